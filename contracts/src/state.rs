//! Contract rules
//!
//! Pure state of the Erdstall contract. Every entry point receives the number
//! of the block its transaction is included in and returns the events it
//! emits; nothing is changed when a call reverts.

use std::collections::{BTreeMap, HashMap, HashSet};

use erdstall_core::{Address, Balance, BalanceProof, DepositProof, Epoch, Parameters, U256};

use crate::errors::{ContractError, ContractResult};
use crate::events::ContractEvent;

/// What a pending challenge demands from the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeKind {
    /// A balance proof; the value is the challenger's exit-epoch balance
    Balance { value: U256 },
    /// A deposit proof for the deposited value
    Deposit { value: U256 },
}

impl ChallengeKind {
    /// Value paid out if the challenge stays unanswered
    pub fn value(&self) -> U256 {
        match self {
            ChallengeKind::Balance { value } | ChallengeKind::Deposit { value } => *value,
        }
    }
}

/// An open challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Challenge {
    /// Epoch whose proof is demanded
    pub epoch: Epoch,
    pub kind: ChallengeKind,
    /// Last block a response is accepted in
    pub deadline: u64,
}

#[derive(Debug, Clone, Copy)]
struct ExitClaim {
    value: U256,
    withdrawn: bool,
}

/// Storage of the contract plus the on-chain wallets of its users
#[derive(Debug)]
pub struct ContractState {
    params: Parameters,
    wallets: HashMap<Address, U256>,
    deposits: BTreeMap<(Epoch, Address), U256>,
    exits: BTreeMap<(Epoch, Address), ExitClaim>,
    challenges: HashMap<Address, Challenge>,
    frozen: Option<Epoch>,
    frozen_paid: HashSet<Address>,
}

impl ContractState {
    pub fn new(params: Parameters) -> Self {
        Self {
            params,
            wallets: HashMap::new(),
            deposits: BTreeMap::new(),
            exits: BTreeMap::new(),
            challenges: HashMap::new(),
            frozen: None,
            frozen_paid: HashSet::new(),
        }
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    pub fn frozen(&self) -> Option<Epoch> {
        self.frozen
    }

    /// On-chain funds of `account`
    pub fn wallet(&self, account: &Address) -> U256 {
        self.wallets.get(account).copied().unwrap_or_default()
    }

    /// Credit on-chain funds
    pub fn fund(&mut self, account: Address, value: U256) {
        let wallet = self.wallets.entry(account).or_default();
        *wallet = wallet.saturating_add(value);
    }

    pub fn deposit_of(&self, epoch: Epoch, account: &Address) -> Option<U256> {
        self.deposits.get(&(epoch, *account)).copied()
    }

    pub fn challenge_of(&self, account: &Address) -> Option<Challenge> {
        self.challenges.get(account).copied()
    }

    /// Registered exit value of `account` for `epoch`
    pub fn exit_of(&self, epoch: Epoch, account: &Address) -> Option<U256> {
        self.exits.get(&(epoch, *account)).map(|c| c.value)
    }

    fn ensure_not_frozen(&self) -> ContractResult<()> {
        match self.frozen {
            Some(epoch) => Err(ContractError::Frozen(epoch)),
            None => Ok(()),
        }
    }

    fn verify_owned(&self, sender: Address, proof: &BalanceProof) -> ContractResult<()> {
        if proof.balance.account != sender {
            return Err(ContractError::NotOwner);
        }
        if !proof.verify(self.params.contract, self.params.tee) {
            return Err(ContractError::InvalidProof);
        }
        Ok(())
    }

    fn expect_epoch(expected: Option<Epoch>, got: Epoch, now: u64) -> ContractResult<Epoch> {
        match expected {
            Some(expected) if expected == got => Ok(expected),
            Some(expected) => Err(ContractError::WrongEpoch { expected, got }),
            None => Err(ContractError::TooEarly { ready_at: now + 1 }),
        }
    }

    fn pay(&mut self, account: Address, value: U256) {
        self.fund(account, value);
    }

    // =========================================================================
    // User entry points
    // =========================================================================

    pub fn deposit(
        &mut self,
        sender: Address,
        value: U256,
        now: u64,
    ) -> ContractResult<Vec<ContractEvent>> {
        self.ensure_not_frozen()?;
        let epoch = self.params.checked_epoch(now)?;
        if value.is_zero() {
            return Err(ContractError::ZeroValue);
        }
        let have = self.wallet(&sender);
        if have < value {
            return Err(ContractError::InsufficientFunds { have, need: value });
        }
        if self.deposits.contains_key(&(epoch, sender)) {
            return Err(ContractError::DoubleDeposit {
                epoch,
                account: sender,
            });
        }

        self.wallets.insert(sender, have - value);
        self.deposits.insert((epoch, sender), value);
        Ok(vec![ContractEvent::Deposited(Balance {
            epoch,
            account: sender,
            value,
        })])
    }

    pub fn exit(
        &mut self,
        sender: Address,
        proof: &BalanceProof,
        now: u64,
    ) -> ContractResult<Vec<ContractEvent>> {
        self.ensure_not_frozen()?;
        self.params.checked_epoch(now)?;
        self.verify_owned(sender, proof)?;
        let epoch = Self::expect_epoch(self.params.exit_epoch(now), proof.balance.epoch, now)?;
        if self.exits.contains_key(&(epoch, sender)) {
            return Err(ContractError::AlreadyExited {
                epoch,
                account: sender,
            });
        }
        if self.challenges.contains_key(&sender) {
            return Err(ContractError::ChallengePending);
        }

        self.exits.insert(
            (epoch, sender),
            ExitClaim {
                value: proof.balance.value,
                withdrawn: false,
            },
        );
        Ok(vec![ContractEvent::Exiting(proof.balance)])
    }

    pub fn withdraw(
        &mut self,
        sender: Address,
        epoch: Epoch,
        now: u64,
    ) -> ContractResult<Vec<ContractEvent>> {
        if let Some(frozen) = self.frozen {
            if epoch > frozen {
                return Err(ContractError::Frozen(frozen));
            }
        }
        let ready_at = self.params.exit_window_end(epoch);
        if now < ready_at {
            return Err(ContractError::TooEarly { ready_at });
        }
        let claim = self
            .exits
            .get_mut(&(epoch, sender))
            .ok_or(ContractError::NothingToWithdraw)?;
        if claim.withdrawn {
            return Err(ContractError::AlreadyWithdrawn);
        }
        claim.withdrawn = true;
        let value = claim.value;

        self.pay(sender, value);
        Ok(vec![ContractEvent::Withdrawn {
            epoch,
            account: sender,
            value,
        }])
    }

    pub fn challenge(
        &mut self,
        sender: Address,
        proof: &BalanceProof,
        now: u64,
    ) -> ContractResult<Vec<ContractEvent>> {
        self.ensure_not_frozen()?;
        self.params.checked_epoch(now)?;
        if self.params.in_response_window(now) {
            return Err(ContractError::InResponseWindow);
        }
        self.verify_owned(sender, proof)?;
        let exit_epoch = Self::expect_epoch(self.params.exit_epoch(now), proof.balance.epoch, now)?;
        if self.exits.contains_key(&(exit_epoch, sender)) {
            return Err(ContractError::AlreadyExited {
                epoch: exit_epoch,
                account: sender,
            });
        }
        if self.challenges.contains_key(&sender) {
            return Err(ContractError::ChallengePending);
        }

        let epoch = exit_epoch + 1;
        self.challenges.insert(
            sender,
            Challenge {
                epoch,
                kind: ChallengeKind::Balance {
                    value: proof.balance.value,
                },
                deadline: self.params.balance_proof_deadline(epoch),
            },
        );
        Ok(vec![ContractEvent::Challenged {
            epoch,
            account: sender,
        }])
    }

    pub fn challenge_deposit(
        &mut self,
        sender: Address,
        now: u64,
    ) -> ContractResult<Vec<ContractEvent>> {
        self.ensure_not_frozen()?;
        self.params.checked_epoch(now)?;
        if self.params.in_response_window(now) {
            return Err(ContractError::InResponseWindow);
        }
        let epoch = self
            .params
            .tx_epoch(now)
            .ok_or(ContractError::NothingToChallenge)?;
        let value = self
            .deposit_of(epoch, &sender)
            .ok_or(ContractError::NothingToChallenge)?;
        if self.challenges.contains_key(&sender) {
            return Err(ContractError::ChallengePending);
        }

        self.challenges.insert(
            sender,
            Challenge {
                epoch,
                kind: ChallengeKind::Deposit { value },
                deadline: self.params.balance_proof_deadline(epoch),
            },
        );
        Ok(vec![ContractEvent::DepositChallenged {
            epoch,
            account: sender,
        }])
    }

    pub fn withdraw_challenge(
        &mut self,
        sender: Address,
        now: u64,
    ) -> ContractResult<Vec<ContractEvent>> {
        let challenge = self
            .challenges
            .get(&sender)
            .copied()
            .ok_or(ContractError::NoChallenge)?;
        if now <= challenge.deadline {
            return Err(ContractError::DeadlineNotReached {
                deadline: challenge.deadline,
            });
        }

        let mut events = Vec::with_capacity(2);
        if self.frozen.is_none() {
            let epoch = challenge.epoch.saturating_sub(1);
            self.frozen = Some(epoch);
            events.push(ContractEvent::Frozen { epoch });
        }
        self.challenges.remove(&sender);
        self.frozen_paid.insert(sender);

        let value = challenge.kind.value();
        self.pay(sender, value);
        events.push(ContractEvent::Withdrawn {
            epoch: challenge.epoch,
            account: sender,
            value,
        });
        Ok(events)
    }

    pub fn withdraw_frozen(
        &mut self,
        sender: Address,
        proof: &BalanceProof,
    ) -> ContractResult<Vec<ContractEvent>> {
        let frozen = self.frozen.ok_or(ContractError::NotFrozen)?;
        self.verify_owned(sender, proof)?;
        if proof.balance.epoch != frozen {
            return Err(ContractError::WrongEpoch {
                expected: frozen,
                got: proof.balance.epoch,
            });
        }
        if self.frozen_paid.contains(&sender) {
            return Err(ContractError::AlreadyWithdrawn);
        }
        if self
            .exits
            .range((frozen, Address::ZERO)..)
            .any(|((_, account), _)| *account == sender)
        {
            return Err(ContractError::AlreadyExited {
                epoch: frozen,
                account: sender,
            });
        }

        self.frozen_paid.insert(sender);
        let value = proof.balance.value;
        self.pay(sender, value);
        Ok(vec![ContractEvent::Withdrawn {
            epoch: frozen,
            account: sender,
            value,
        }])
    }

    // =========================================================================
    // Operator entry points
    // =========================================================================

    fn pending(&self, account: &Address, now: u64) -> ContractResult<Challenge> {
        let challenge = self
            .challenges
            .get(account)
            .copied()
            .ok_or(ContractError::NoChallenge)?;
        if now > challenge.deadline {
            return Err(ContractError::DeadlinePassed {
                deadline: challenge.deadline,
            });
        }
        Ok(challenge)
    }

    pub fn respond_challenge(
        &mut self,
        proof: &BalanceProof,
        now: u64,
    ) -> ContractResult<Vec<ContractEvent>> {
        self.ensure_not_frozen()?;
        let balance = proof.balance;
        let challenge = self.pending(&balance.account, now)?;
        if !matches!(challenge.kind, ChallengeKind::Balance { .. }) {
            return Err(ContractError::NoChallenge);
        }
        if balance.epoch != challenge.epoch {
            return Err(ContractError::WrongEpoch {
                expected: challenge.epoch,
                got: balance.epoch,
            });
        }
        // the answer turns into an exit, so it has to land in that epoch's exit phase
        Self::expect_epoch(self.params.exit_epoch(now), challenge.epoch, now)?;
        if !proof.verify(self.params.contract, self.params.tee) {
            return Err(ContractError::InvalidProof);
        }

        self.challenges.remove(&balance.account);
        self.exits.insert(
            (balance.epoch, balance.account),
            ExitClaim {
                value: balance.value,
                withdrawn: false,
            },
        );
        Ok(vec![
            ContractEvent::ChallengeResponded(balance),
            ContractEvent::Exiting(balance),
        ])
    }

    pub fn respond_deposit_challenge(
        &mut self,
        proof: &DepositProof,
        now: u64,
    ) -> ContractResult<Vec<ContractEvent>> {
        self.ensure_not_frozen()?;
        let balance = proof.balance;
        let challenge = self.pending(&balance.account, now)?;
        let ChallengeKind::Deposit { value } = challenge.kind else {
            return Err(ContractError::NoChallenge);
        };
        if balance.epoch != challenge.epoch {
            return Err(ContractError::WrongEpoch {
                expected: challenge.epoch,
                got: balance.epoch,
            });
        }
        if balance.value != value {
            return Err(ContractError::ValueMismatch {
                expected: value,
                got: balance.value,
            });
        }
        if !proof.verify(self.params.contract, self.params.tee) {
            return Err(ContractError::InvalidProof);
        }

        self.challenges.remove(&balance.account);
        Ok(vec![ContractEvent::DepositChallengeResponded(balance)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use erdstall_core::Signer;

    // pd=10, resp=3, init=100: phase p spans [100+10p, 110+10p)
    fn setup() -> (ContractState, Signer, Address) {
        let tee = Signer::random();
        let params = Parameters {
            tee: tee.address(),
            phase_duration: 10,
            response_duration: 3,
            pow_depth: 1,
            init_block: 100,
            contract: Address::repeat_byte(0xcc),
        };
        let mut state = ContractState::new(params);
        let alice = Address::repeat_byte(0xaa);
        state.fund(alice, U256::from(1_000u64));
        (state, tee, alice)
    }

    fn proof(state: &ContractState, tee: &Signer, epoch: Epoch, account: Address, value: u64) -> BalanceProof {
        BalanceProof::sign(
            state.params().contract,
            tee,
            Balance {
                epoch,
                account,
                value: U256::from(value),
            },
        )
        .unwrap()
    }

    // =========================================================================
    // DEPOSIT TESTS
    // =========================================================================

    #[test]
    fn test_deposit() {
        let (mut state, _, alice) = setup();
        let events = state.deposit(alice, U256::from(100u64), 105).unwrap();
        assert_eq!(
            events,
            vec![ContractEvent::Deposited(Balance {
                epoch: 0,
                account: alice,
                value: U256::from(100u64)
            })]
        );
        assert_eq!(state.wallet(&alice), U256::from(900u64));
        assert_eq!(state.deposit_of(0, &alice), Some(U256::from(100u64)));
    }

    #[test]
    fn test_double_deposit_rejected() {
        let (mut state, _, alice) = setup();
        state.deposit(alice, U256::from(100u64), 101).unwrap();
        assert_eq!(
            state.deposit(alice, U256::from(1u64), 109),
            Err(ContractError::DoubleDeposit {
                epoch: 0,
                account: alice
            })
        );
        assert_eq!(state.wallet(&alice), U256::from(900u64));

        // next epoch is fine
        state.deposit(alice, U256::from(1u64), 110).unwrap();
    }

    #[test]
    fn test_deposit_checks() {
        let (mut state, _, alice) = setup();
        assert!(state.deposit(alice, U256::from(1u64), 99).is_err());
        assert_eq!(
            state.deposit(alice, U256::ZERO, 100),
            Err(ContractError::ZeroValue)
        );
        assert!(matches!(
            state.deposit(alice, U256::from(5_000u64), 100),
            Err(ContractError::InsufficientFunds { .. })
        ));
    }

    // =========================================================================
    // EXIT AND WITHDRAW TESTS
    // =========================================================================

    #[test]
    fn test_exit_then_withdraw() {
        let (mut state, tee, alice) = setup();
        state.deposit(alice, U256::from(100u64), 101).unwrap();

        // phase 3: exit epoch 1
        let p = proof(&state, &tee, 1, alice, 100);
        assert_eq!(
            state.exit(alice, &proof(&state, &tee, 0, alice, 100), 131),
            Err(ContractError::WrongEpoch {
                expected: 1,
                got: 0
            })
        );
        assert_eq!(
            state.exit(alice, &p, 131).unwrap(),
            vec![ContractEvent::Exiting(p.balance)]
        );
        assert!(matches!(
            state.exit(alice, &p, 132),
            Err(ContractError::AlreadyExited { .. })
        ));

        assert_eq!(
            state.withdraw(alice, 1, 139),
            Err(ContractError::TooEarly { ready_at: 140 })
        );
        state.withdraw(alice, 1, 140).unwrap();
        assert_eq!(state.wallet(&alice), U256::from(1_000u64));
        assert_eq!(
            state.withdraw(alice, 1, 141),
            Err(ContractError::AlreadyWithdrawn)
        );
    }

    #[test]
    fn test_exit_requires_valid_owned_proof() {
        let (mut state, tee, alice) = setup();
        let bob = Address::repeat_byte(0xbb);
        assert_eq!(
            state.exit(alice, &proof(&state, &tee, 1, bob, 1), 131),
            Err(ContractError::NotOwner)
        );

        let forged = proof(&state, &Signer::random(), 1, alice, 1);
        assert_eq!(
            state.exit(alice, &forged, 131),
            Err(ContractError::InvalidProof)
        );
    }

    // =========================================================================
    // CHALLENGE TESTS
    // =========================================================================

    #[test]
    fn test_challenge_answered_registers_exit() {
        let (mut state, tee, alice) = setup();

        // phase 3 outside the response window, exit epoch 1
        assert_eq!(
            state.challenge(alice, &proof(&state, &tee, 1, alice, 50), 131),
            Err(ContractError::InResponseWindow)
        );
        let events = state
            .challenge(alice, &proof(&state, &tee, 1, alice, 50), 135)
            .unwrap();
        assert_eq!(
            events,
            vec![ContractEvent::Challenged {
                epoch: 2,
                account: alice
            }]
        );
        let challenge = state.challenge_of(&alice).unwrap();
        assert_eq!(challenge.deadline, 143);

        // response must be for epoch 2 and land in phase 4
        let answer = proof(&state, &tee, 2, alice, 60);
        assert!(matches!(
            state.respond_challenge(&answer, 138),
            Err(ContractError::WrongEpoch { .. })
        ));
        let events = state.respond_challenge(&answer, 141).unwrap();
        assert_eq!(events[1], ContractEvent::Exiting(answer.balance));
        assert_eq!(state.exit_of(2, &alice), Some(U256::from(60u64)));
        assert!(state.challenge_of(&alice).is_none());
    }

    #[test]
    fn test_unanswered_challenge_freezes() {
        let (mut state, tee, alice) = setup();
        state
            .challenge(alice, &proof(&state, &tee, 1, alice, 50), 135)
            .unwrap();

        assert_eq!(
            state.withdraw_challenge(alice, 143),
            Err(ContractError::DeadlineNotReached { deadline: 143 })
        );
        let events = state.withdraw_challenge(alice, 144).unwrap();
        assert_eq!(events[0], ContractEvent::Frozen { epoch: 1 });
        assert_eq!(state.frozen(), Some(1));
        assert_eq!(state.wallet(&alice), U256::from(1_050u64));

        let answer = proof(&state, &tee, 2, alice, 60);
        assert_eq!(
            state.respond_challenge(&answer, 144),
            Err(ContractError::Frozen(1))
        );
        // the challenger was already paid
        assert_eq!(
            state.withdraw_frozen(alice, &proof(&state, &tee, 1, alice, 50)),
            Err(ContractError::AlreadyWithdrawn)
        );
    }

    #[test]
    fn test_withdraw_frozen_pays_once() {
        let (mut state, tee, alice) = setup();
        let bob = Address::repeat_byte(0xbb);
        state
            .challenge(alice, &proof(&state, &tee, 1, alice, 50), 135)
            .unwrap();
        state.withdraw_challenge(alice, 150).unwrap();

        let bob_proof = proof(&state, &tee, 1, bob, 70);
        assert!(matches!(
            state.withdraw_frozen(bob, &proof(&state, &tee, 2, bob, 70)),
            Err(ContractError::WrongEpoch { .. })
        ));
        state.withdraw_frozen(bob, &bob_proof).unwrap();
        assert_eq!(state.wallet(&bob), U256::from(70u64));
        assert_eq!(
            state.withdraw_frozen(bob, &bob_proof),
            Err(ContractError::AlreadyWithdrawn)
        );
    }

    #[test]
    fn test_deposit_challenge() {
        let (mut state, tee, alice) = setup();
        state.deposit(alice, U256::from(100u64), 101).unwrap();

        // phase 1 outside the response window, tx epoch 0
        state.challenge_deposit(alice, 115).unwrap();
        let challenge = state.challenge_of(&alice).unwrap();
        assert_eq!(challenge.epoch, 0);
        assert_eq!(challenge.deadline, 123);

        let wrong = DepositProof::sign(
            state.params().contract,
            &tee,
            Balance {
                epoch: 0,
                account: alice,
                value: U256::from(99u64),
            },
        )
        .unwrap();
        assert!(matches!(
            state.respond_deposit_challenge(&wrong, 120),
            Err(ContractError::ValueMismatch { .. })
        ));

        let right = DepositProof::sign(
            state.params().contract,
            &tee,
            Balance {
                epoch: 0,
                account: alice,
                value: U256::from(100u64),
            },
        )
        .unwrap();
        state.respond_deposit_challenge(&right, 120).unwrap();
        assert_eq!(
            state.withdraw_challenge(alice, 130),
            Err(ContractError::NoChallenge)
        );
    }

    #[test]
    fn test_unanswered_deposit_challenge_refunds() {
        let (mut state, _, alice) = setup();
        state.deposit(alice, U256::from(100u64), 101).unwrap();
        assert_eq!(
            state.challenge_deposit(Address::repeat_byte(0xbb), 115),
            Err(ContractError::NothingToChallenge)
        );
        state.challenge_deposit(alice, 115).unwrap();
        state.withdraw_challenge(alice, 124).unwrap();
        assert_eq!(state.wallet(&alice), U256::from(1_000u64));
        assert_eq!(state.frozen(), Some(0));
    }
}
