//! Transaction-side epoch processing
//!
//! Owns the live transaction epoch. At every phase end it seals that epoch,
//! signs a balance proof for each of its accounts and opens the next one
//! from the sealed balances and the retiring deposits.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use erdstall_core::{Address, Balance, BalanceProof, Epoch, Parameters, Signer, Transaction, U256};
use tracing::{debug, info};

use crate::epoch::EpochSnapshot;
use crate::errors::{EnclaveError, EnclaveResult};
use crate::proofs::ProofCache;

/// How a submitted transaction was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Applied,
    /// Targets a transaction epoch that is not live yet
    Deferred(Epoch),
}

/// Result of sealing the live transaction epoch
#[derive(Debug)]
pub struct Sealed {
    pub epoch: Option<EpochSnapshot>,
    pub balance_proofs: Vec<BalanceProof>,
}

pub struct TxProcessor {
    params: Parameters,
    signer: Arc<Signer>,
    current: Option<EpochSnapshot>,
    senders: HashSet<Address>,
    balance_proofs: Arc<ProofCache<BalanceProof>>,
}

impl TxProcessor {
    pub fn new(
        params: Parameters,
        signer: Arc<Signer>,
        balance_proofs: Arc<ProofCache<BalanceProof>>,
    ) -> Self {
        Self {
            params,
            signer,
            current: None,
            senders: HashSet::new(),
            balance_proofs,
        }
    }

    pub fn current(&self) -> Option<&EpochSnapshot> {
        self.current.as_ref()
    }

    /// Apply `tx` to the live epoch, or report the future epoch it waits for
    pub fn submit(&mut self, tx: &Transaction) -> EnclaveResult<Submission> {
        let Some(current) = self.current.as_mut() else {
            return Ok(Submission::Deferred(tx.epoch));
        };
        if tx.epoch > current.number() {
            return Ok(Submission::Deferred(tx.epoch));
        }

        current.apply_tx(self.params.contract, tx)?;
        self.senders.insert(tx.sender);

        let sender = sign_balance(&self.params, &self.signer, current, tx.sender)?;
        let recipient = sign_balance(&self.params, &self.signer, current, tx.recipient)?;
        self.balance_proofs.insert(sender);
        self.balance_proofs.insert(recipient);
        debug!(
            epoch = tx.epoch,
            nonce = tx.nonce,
            sender = %tx.sender,
            recipient = %tx.recipient,
            amount = %tx.amount,
            "Transaction applied"
        );
        Ok(Submission::Applied)
    }

    /// Seal the live epoch and open the next one
    ///
    /// `exiters` left with the value of the epoch before the live one, which
    /// is carried in the live balances and taken out before sealing. An
    /// exiter that sent value while the live epoch ran cannot be reconciled
    /// and halts the engine.
    pub fn phase_shift(
        &mut self,
        deposits: EpochSnapshot,
        exiters: &BTreeMap<Address, U256>,
    ) -> EnclaveResult<Sealed> {
        let Some(mut sealing) = self.current.take() else {
            // first phase end: the deposits of epoch 0 start the first tx epoch
            if deposits.number() != 0 {
                return Err(EnclaveError::NonConsecutiveEpoch {
                    expected: 0,
                    got: deposits.number(),
                });
            }
            info!(epoch = 0, accounts = deposits.len(), "Transaction epoch opened");
            self.current = Some(deposits);
            return Ok(Sealed {
                epoch: None,
                balance_proofs: Vec::new(),
            });
        };

        for (account, value) in exiters {
            if self.senders.contains(account) {
                return Err(EnclaveError::InconsistentExit(*account));
            }
            sealing.deduct_exit(account, *value)?;
            self.balance_proofs.remove(account);
        }

        let mut cached = self.balance_proofs.drain();
        let mut balance_proofs = Vec::with_capacity(sealing.len());
        for balance in sealing.balances() {
            let proof = match cached.remove(&balance.account) {
                Some(proof) if proof.balance == balance => proof,
                _ => sign_balance(&self.params, &self.signer, &sealing, balance.account)?,
            };
            balance_proofs.push(proof);
        }

        let next = EpochSnapshot::successor(&sealing, deposits)?;
        info!(
            sealed = sealing.number(),
            accounts = sealing.len(),
            total = %sealing.total(),
            exits = exiters.len(),
            "Transaction epoch sealed"
        );
        self.current = Some(next);
        self.senders.clear();
        Ok(Sealed {
            epoch: Some(sealing),
            balance_proofs,
        })
    }
}

fn sign_balance(
    params: &Parameters,
    signer: &Signer,
    epoch: &EpochSnapshot,
    account: Address,
) -> EnclaveResult<BalanceProof> {
    let balance = Balance {
        epoch: epoch.number(),
        account,
        value: epoch.balance(&account),
    };
    Ok(BalanceProof::sign(params.contract, signer, balance)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor() -> (TxProcessor, Arc<Signer>, Parameters) {
        let signer = Arc::new(Signer::random());
        let params = Parameters {
            tee: signer.address(),
            phase_duration: 10,
            response_duration: 3,
            pow_depth: 1,
            init_block: 100,
            contract: Address::repeat_byte(0xcc),
        };
        (
            TxProcessor::new(params, Arc::clone(&signer), Arc::new(ProofCache::new())),
            signer,
            params,
        )
    }

    fn deposits(epoch: Epoch, entries: &[(Address, u64)]) -> EpochSnapshot {
        let mut snapshot = EpochSnapshot::new(epoch);
        for (account, value) in entries {
            snapshot.deposit(*account, U256::from(*value)).unwrap();
        }
        snapshot
    }

    fn value(proofs: &[BalanceProof], account: Address) -> Option<U256> {
        proofs
            .iter()
            .find(|p| p.balance.account == account)
            .map(|p| p.balance.value)
    }

    #[test]
    fn test_untouched_balance_carried() {
        let (mut txp, _, params) = processor();
        let a = Address::repeat_byte(0xaa);
        txp.phase_shift(deposits(0, &[(a, 100)]), &BTreeMap::new())
            .unwrap();

        let sealed = txp
            .phase_shift(deposits(1, &[]), &BTreeMap::new())
            .unwrap();
        assert_eq!(sealed.epoch.as_ref().map(EpochSnapshot::number), Some(0));
        assert_eq!(sealed.balance_proofs.len(), 1);
        let proof = &sealed.balance_proofs[0];
        assert_eq!(proof.balance.value, U256::from(100u64));
        assert!(proof.verify(params.contract, params.tee));
        assert_eq!(txp.current().map(EpochSnapshot::number), Some(1));
    }

    #[test]
    fn test_transfer_then_seal() {
        let (mut txp, _, params) = processor();
        let alice = Signer::random();
        let bob = Address::repeat_byte(0xbb);
        txp.phase_shift(deposits(0, &[(alice.address(), 100)]), &BTreeMap::new())
            .unwrap();

        let tx = Transaction::sign(params.contract, &alice, 1, 0, bob, U256::from(30u64)).unwrap();
        assert_eq!(txp.submit(&tx).unwrap(), Submission::Applied);
        assert!(matches!(
            txp.submit(&tx),
            Err(EnclaveError::InvalidNonce { .. })
        ));

        let sealed = txp
            .phase_shift(deposits(1, &[]), &BTreeMap::new())
            .unwrap();
        assert_eq!(value(&sealed.balance_proofs, alice.address()), Some(U256::from(70u64)));
        assert_eq!(value(&sealed.balance_proofs, bob), Some(U256::from(30u64)));
        for proof in &sealed.balance_proofs {
            assert!(proof.verify(params.contract, params.tee));
        }
    }

    #[test]
    fn test_submit_classifies_epochs() {
        let (mut txp, _, params) = processor();
        let alice = Signer::random();
        let bob = Address::repeat_byte(0xbb);

        let early = Transaction::sign(params.contract, &alice, 1, 0, bob, U256::from(1u64)).unwrap();
        assert_eq!(txp.submit(&early).unwrap(), Submission::Deferred(0));

        txp.phase_shift(deposits(0, &[(alice.address(), 10)]), &BTreeMap::new())
            .unwrap();
        txp.phase_shift(deposits(1, &[]), &BTreeMap::new()).unwrap();

        assert_eq!(
            txp.submit(&early),
            Err(EnclaveError::StaleEpoch { current: 1, got: 0 })
        );
        let future = Transaction::sign(params.contract, &alice, 1, 3, bob, U256::from(1u64)).unwrap();
        assert_eq!(txp.submit(&future).unwrap(), Submission::Deferred(3));
    }

    #[test]
    fn test_exiter_carried_value_removed() {
        let (mut txp, _, params) = processor();
        let alice = Signer::random();
        let bob = Signer::random();
        txp.phase_shift(
            deposits(0, &[(alice.address(), 100), (bob.address(), 50)]),
            &BTreeMap::new(),
        )
        .unwrap();
        txp.phase_shift(deposits(1, &[]), &BTreeMap::new()).unwrap();

        // epoch 1 is live; bob pays alice who exits epoch 0 with 100
        let tx = Transaction::sign(params.contract, &bob, 1, 1, alice.address(), U256::from(20u64)).unwrap();
        txp.submit(&tx).unwrap();

        let exiters = BTreeMap::from([(alice.address(), U256::from(100u64))]);
        let sealed = txp.phase_shift(deposits(2, &[]), &exiters).unwrap();
        let epoch = sealed.epoch.unwrap();
        assert_eq!(epoch.balance(&alice.address()), U256::from(20u64));
        assert_eq!(epoch.balance(&bob.address()), U256::from(30u64));
        assert_eq!(epoch.total(), U256::from(50u64));
    }

    #[test]
    fn test_nonce_survives_full_exit_and_redeposit() {
        let (mut txp, _, params) = processor();
        let alice = Signer::random();
        let bob = Address::repeat_byte(0xbb);
        let pay = |nonce, epoch| {
            Transaction::sign(params.contract, &alice, nonce, epoch, bob, U256::from(10u64)).unwrap()
        };
        txp.phase_shift(deposits(0, &[(alice.address(), 100)]), &BTreeMap::new())
            .unwrap();
        txp.submit(&pay(1, 0)).unwrap();
        txp.phase_shift(deposits(1, &[]), &BTreeMap::new()).unwrap();

        // alice exits epoch 0 with everything she had
        let exiters = BTreeMap::from([(alice.address(), U256::from(90u64))]);
        let sealed = txp.phase_shift(deposits(2, &[]), &exiters).unwrap();
        assert!(!sealed.epoch.unwrap().contains(&alice.address()));

        txp.phase_shift(deposits(3, &[(alice.address(), 50)]), &BTreeMap::new())
            .unwrap();
        assert_eq!(
            txp.submit(&pay(1, 3)),
            Err(EnclaveError::InvalidNonce {
                expected: 2,
                got: 1
            })
        );
        assert_eq!(txp.submit(&pay(2, 3)).unwrap(), Submission::Applied);
        assert_eq!(
            txp.current().unwrap().balance(&alice.address()),
            U256::from(40u64)
        );
    }

    #[test]
    fn test_exiter_that_sent_is_fatal() {
        let (mut txp, _, params) = processor();
        let alice = Signer::random();
        txp.phase_shift(deposits(0, &[(alice.address(), 100)]), &BTreeMap::new())
            .unwrap();
        txp.phase_shift(deposits(1, &[]), &BTreeMap::new()).unwrap();

        let tx = Transaction::sign(
            params.contract,
            &alice,
            1,
            1,
            Address::repeat_byte(0xbb),
            U256::from(60u64),
        )
        .unwrap();
        txp.submit(&tx).unwrap();

        let exiters = BTreeMap::from([(alice.address(), U256::from(100u64))]);
        let err = txp.phase_shift(deposits(2, &[]), &exiters).unwrap_err();
        assert_eq!(err, EnclaveError::InconsistentExit(alice.address()));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_non_consecutive_deposits_fatal() {
        let (mut txp, _, _) = processor();
        txp.phase_shift(deposits(0, &[]), &BTreeMap::new()).unwrap();
        let err = txp
            .phase_shift(deposits(5, &[]), &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, EnclaveError::NonConsecutiveEpoch { expected: 1, got: 5 }));
    }
}
