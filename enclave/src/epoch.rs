//! Epoch balance snapshots

use std::collections::BTreeMap;

use erdstall_core::{Account, Address, Balance, Epoch, Transaction, U256};

use crate::errors::{EnclaveError, EnclaveResult};

/// Account balances of one epoch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpochSnapshot {
    number: Epoch,
    accounts: BTreeMap<Address, Account>,
    /// Last nonce of accounts that left through an exit
    retired: BTreeMap<Address, u64>,
}

impl EpochSnapshot {
    pub fn new(number: Epoch) -> Self {
        Self {
            number,
            accounts: BTreeMap::new(),
            retired: BTreeMap::new(),
        }
    }

    pub fn number(&self) -> Epoch {
        self.number
    }

    pub fn account(&self, address: &Address) -> Option<&Account> {
        self.accounts.get(address)
    }

    pub fn balance(&self, address: &Address) -> U256 {
        self.accounts
            .get(address)
            .map(|a| a.value)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Sum of all balances
    pub fn total(&self) -> U256 {
        self.accounts
            .values()
            .fold(U256::ZERO, |sum, a| sum.saturating_add(a.value))
    }

    /// Signable balances in account order
    pub fn balances(&self) -> impl Iterator<Item = Balance> + '_ {
        self.accounts.iter().map(|(account, a)| Balance {
            epoch: self.number,
            account: *account,
            value: a.value,
        })
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.accounts.contains_key(address)
    }

    /// Nonce of the last transaction `address` sent, also after it exited
    pub fn nonce(&self, address: &Address) -> u64 {
        self.accounts
            .get(address)
            .map(|a| a.nonce)
            .or_else(|| self.retired.get(address).copied())
            .unwrap_or_default()
    }

    /// Account of `address`, reviving the nonce of an exited account
    fn entry(&mut self, address: Address) -> &mut Account {
        let retired = &mut self.retired;
        self.accounts.entry(address).or_insert_with(|| Account {
            nonce: retired.remove(&address).unwrap_or_default(),
            value: U256::ZERO,
        })
    }

    /// Credit the first deposit of `account` in this epoch
    pub fn deposit(&mut self, account: Address, value: U256) -> EnclaveResult<Balance> {
        if self.accounts.contains_key(&account) {
            return Err(EnclaveError::DoubleDeposit {
                epoch: self.number,
                account,
            });
        }
        self.accounts.insert(account, Account::with_value(value));
        Ok(Balance {
            epoch: self.number,
            account,
            value,
        })
    }

    /// Check `tx` against this epoch without applying it
    pub fn check_tx(&self, contract: Address, tx: &Transaction) -> EnclaveResult<()> {
        if tx.epoch != self.number {
            return Err(EnclaveError::StaleEpoch {
                current: self.number,
                got: tx.epoch,
            });
        }
        if !tx.verify(contract) {
            return Err(EnclaveError::InvalidSignature);
        }
        let sender = self.accounts.get(&tx.sender).copied().unwrap_or(Account {
            nonce: self.nonce(&tx.sender),
            value: U256::ZERO,
        });
        let expected = sender.nonce + 1;
        if tx.nonce != expected {
            return Err(EnclaveError::InvalidNonce {
                expected,
                got: tx.nonce,
            });
        }
        if tx.amount > sender.value {
            return Err(EnclaveError::InsufficientBalance {
                have: sender.value,
                need: tx.amount,
            });
        }
        if tx.sender != tx.recipient {
            let recipient = self.balance(&tx.recipient);
            recipient
                .checked_add(tx.amount)
                .ok_or(EnclaveError::Overflow)?;
        }
        Ok(())
    }

    /// Apply a valid transaction; nothing changes if it is rejected
    pub fn apply_tx(&mut self, contract: Address, tx: &Transaction) -> EnclaveResult<()> {
        self.check_tx(contract, tx)?;

        let sender = self.entry(tx.sender);
        sender.nonce = tx.nonce;
        sender.value -= tx.amount;
        let recipient = self.entry(tx.recipient);
        recipient.value += tx.amount;
        Ok(())
    }

    /// Take away value that left through an exit of an older epoch
    pub fn deduct_exit(&mut self, account: &Address, value: U256) -> EnclaveResult<()> {
        let Some(entry) = self.accounts.get_mut(account) else {
            return if value.is_zero() {
                Ok(())
            } else {
                Err(EnclaveError::InconsistentExit(*account))
            };
        };
        entry.value = entry
            .value
            .checked_sub(value)
            .ok_or(EnclaveError::InconsistentExit(*account))?;
        if entry.value.is_zero() {
            let nonce = entry.nonce;
            self.accounts.remove(account);
            self.retired.insert(*account, nonce);
        }
        Ok(())
    }

    /// Check that `account` can exit with exactly `value`
    pub fn check_exit(&self, account: &Address, value: U256) -> EnclaveResult<()> {
        let expected = self.balance(account);
        if !self.contains(account) || expected != value {
            return Err(EnclaveError::ExitMismatch {
                account: *account,
                expected,
                got: value,
            });
        }
        Ok(())
    }

    pub fn remove(&mut self, account: &Address) -> Option<Account> {
        self.accounts.remove(account)
    }

    /// Transaction epoch following `sealed`: its balances and nonces plus the
    /// deposits collected while it was live
    pub fn successor(sealed: &EpochSnapshot, deposits: EpochSnapshot) -> EnclaveResult<Self> {
        let expected = sealed.number + 1;
        if deposits.number != expected {
            return Err(EnclaveError::NonConsecutiveEpoch {
                expected,
                got: deposits.number,
            });
        }

        let mut next = EpochSnapshot {
            number: expected,
            accounts: sealed.accounts.clone(),
            retired: sealed.retired.clone(),
        };
        for (address, deposit) in deposits.accounts {
            let account = next.entry(address);
            account.value = account
                .value
                .checked_add(deposit.value)
                .ok_or(EnclaveError::Overflow)?;
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use erdstall_core::Signer;

    const CONTRACT: Address = Address::repeat_byte(0xcc);

    fn funded(alice: &Signer, value: u64) -> EpochSnapshot {
        let mut epoch = EpochSnapshot::new(3);
        epoch.deposit(alice.address(), U256::from(value)).unwrap();
        epoch
    }

    fn tx(from: &Signer, nonce: u64, epoch: Epoch, to: Address, amount: u64) -> Transaction {
        Transaction::sign(CONTRACT, from, nonce, epoch, to, U256::from(amount)).unwrap()
    }

    #[test]
    fn test_double_deposit() {
        let mut epoch = EpochSnapshot::new(0);
        let a = Address::repeat_byte(1);
        epoch.deposit(a, U256::from(5u64)).unwrap();
        assert_eq!(
            epoch.deposit(a, U256::from(5u64)),
            Err(EnclaveError::DoubleDeposit {
                epoch: 0,
                account: a
            })
        );
        assert_eq!(epoch.balance(&a), U256::from(5u64));
    }

    #[test]
    fn test_transfer() {
        let alice = Signer::random();
        let bob = Address::repeat_byte(0xbb);
        let mut epoch = funded(&alice, 100);

        epoch.apply_tx(CONTRACT, &tx(&alice, 1, 3, bob, 30)).unwrap();
        assert_eq!(epoch.balance(&alice.address()), U256::from(70u64));
        assert_eq!(epoch.balance(&bob), U256::from(30u64));
        assert_eq!(epoch.account(&alice.address()).unwrap().nonce, 1);
        assert_eq!(epoch.total(), U256::from(100u64));
    }

    #[test]
    fn test_rejected_tx_leaves_state() {
        let alice = Signer::random();
        let bob = Address::repeat_byte(0xbb);
        let mut epoch = funded(&alice, 100);
        let before = epoch.clone();

        assert_eq!(
            epoch.apply_tx(CONTRACT, &tx(&alice, 2, 3, bob, 1)),
            Err(EnclaveError::InvalidNonce {
                expected: 1,
                got: 2
            })
        );
        assert!(matches!(
            epoch.apply_tx(CONTRACT, &tx(&alice, 1, 3, bob, 101)),
            Err(EnclaveError::InsufficientBalance { .. })
        ));
        assert_eq!(
            epoch.apply_tx(CONTRACT, &tx(&alice, 1, 2, bob, 1)),
            Err(EnclaveError::StaleEpoch { current: 3, got: 2 })
        );

        let mut forged = tx(&alice, 1, 3, bob, 1);
        forged.amount = U256::from(50u64);
        assert_eq!(
            epoch.apply_tx(CONTRACT, &forged),
            Err(EnclaveError::InvalidSignature)
        );
        assert_eq!(epoch, before);
    }

    #[test]
    fn test_replay_rejected() {
        let alice = Signer::random();
        let bob = Address::repeat_byte(0xbb);
        let mut epoch = funded(&alice, 100);
        let t = tx(&alice, 1, 3, bob, 10);
        epoch.apply_tx(CONTRACT, &t).unwrap();
        assert!(matches!(
            epoch.apply_tx(CONTRACT, &t),
            Err(EnclaveError::InvalidNonce { .. })
        ));
        assert_eq!(epoch.balance(&bob), U256::from(10u64));
    }

    #[test]
    fn test_self_transfer_keeps_balance() {
        let alice = Signer::random();
        let mut epoch = funded(&alice, 100);
        epoch
            .apply_tx(CONTRACT, &tx(&alice, 1, 3, alice.address(), 40))
            .unwrap();
        assert_eq!(epoch.balance(&alice.address()), U256::from(100u64));
    }

    #[test]
    fn test_check_exit() {
        let a = Address::repeat_byte(1);
        let mut epoch = EpochSnapshot::new(1);
        epoch.deposit(a, U256::from(10u64)).unwrap();

        assert!(epoch.check_exit(&a, U256::from(10u64)).is_ok());
        assert_eq!(
            epoch.check_exit(&a, U256::from(9u64)),
            Err(EnclaveError::ExitMismatch {
                account: a,
                expected: U256::from(10u64),
                got: U256::from(9u64)
            })
        );
        assert!(epoch
            .check_exit(&Address::repeat_byte(2), U256::ZERO)
            .is_err());
    }

    #[test]
    fn test_successor_merges_deposits() {
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        let mut sealed = EpochSnapshot::new(4);
        sealed.deposit(a, U256::from(10u64)).unwrap();
        sealed.accounts.get_mut(&a).unwrap().nonce = 3;

        let mut deposits = EpochSnapshot::new(5);
        deposits.deposit(a, U256::from(1u64)).unwrap();
        deposits.deposit(b, U256::from(2u64)).unwrap();

        let next = EpochSnapshot::successor(&sealed, deposits).unwrap();
        assert_eq!(next.number(), 5);
        assert_eq!(
            next.account(&a),
            Some(&Account {
                nonce: 3,
                value: U256::from(11u64)
            })
        );
        assert_eq!(next.balance(&b), U256::from(2u64));

        assert_eq!(
            EpochSnapshot::successor(&sealed, EpochSnapshot::new(7)),
            Err(EnclaveError::NonConsecutiveEpoch {
                expected: 5,
                got: 7
            })
        );
    }

    #[test]
    fn test_deduct_exit() {
        let a = Address::repeat_byte(1);
        let mut epoch = EpochSnapshot::new(2);
        epoch.deposit(a, U256::from(10u64)).unwrap();

        epoch.deduct_exit(&a, U256::from(4u64)).unwrap();
        assert_eq!(epoch.balance(&a), U256::from(6u64));
        assert_eq!(
            epoch.deduct_exit(&a, U256::from(7u64)),
            Err(EnclaveError::InconsistentExit(a))
        );
        epoch.deduct_exit(&a, U256::from(6u64)).unwrap();
        assert!(!epoch.contains(&a));
    }

    #[test]
    fn test_full_exit_keeps_nonce() {
        let alice = Signer::random();
        let bob = Address::repeat_byte(0xbb);
        let mut epoch = funded(&alice, 100);
        epoch.apply_tx(CONTRACT, &tx(&alice, 1, 3, bob, 10)).unwrap();

        epoch.deduct_exit(&alice.address(), U256::from(90u64)).unwrap();
        assert!(!epoch.contains(&alice.address()));
        assert_eq!(epoch.balances().count(), 1);
        assert_eq!(epoch.nonce(&alice.address()), 1);

        // back with a fresh deposit two epochs later
        let sealed = EpochSnapshot::successor(&epoch, EpochSnapshot::new(4)).unwrap();
        let mut deposits = EpochSnapshot::new(5);
        deposits.deposit(alice.address(), U256::from(50u64)).unwrap();
        let mut next = EpochSnapshot::successor(&sealed, deposits).unwrap();
        assert_eq!(
            next.account(&alice.address()),
            Some(&Account {
                nonce: 1,
                value: U256::from(50u64)
            })
        );

        assert_eq!(
            next.apply_tx(CONTRACT, &tx(&alice, 1, 5, bob, 5)),
            Err(EnclaveError::InvalidNonce {
                expected: 2,
                got: 1
            })
        );
        next.apply_tx(CONTRACT, &tx(&alice, 2, 5, bob, 5)).unwrap();
        assert_eq!(next.nonce(&alice.address()), 2);
    }

    #[test]
    fn test_exited_account_paid_keeps_nonce() {
        let alice = Signer::random();
        let bob = Signer::random();
        let mut epoch = funded(&alice, 100);
        epoch.deposit(bob.address(), U256::from(60u64)).unwrap();
        epoch
            .apply_tx(CONTRACT, &tx(&alice, 1, 3, bob.address(), 10))
            .unwrap();
        epoch.deduct_exit(&alice.address(), U256::from(90u64)).unwrap();

        epoch
            .apply_tx(CONTRACT, &tx(&bob, 1, 3, alice.address(), 40))
            .unwrap();
        assert_eq!(
            epoch.account(&alice.address()),
            Some(&Account {
                nonce: 1,
                value: U256::from(40u64)
            })
        );
    }
}
