//! Property-Based Tests for Erdstall phase arithmetic and proof serving
//!
//! Uses proptest to generate deployments and blocks and verify that epoch
//! roles and deadlines stay consistent with each other.

use erdstall::core::{Address, Balance, BalanceProof, Parameters, Signature, U256};
use erdstall::operator::ProofStore;
use proptest::prelude::*;

// =============================================================================
// PROPTEST STRATEGIES
// =============================================================================

/// Strategy for valid deployments
fn parameters() -> impl Strategy<Value = Parameters> {
    (1u64..8, 1u64..50, 0u64..1_000)
        .prop_flat_map(|(response, extra, init)| {
            let phase = 2 * response + extra;
            (Just(response), Just(phase), 0..response, Just(init))
        })
        .prop_map(|(response_duration, phase_duration, pow_depth, init_block)| Parameters {
            tee: Address::repeat_byte(0xEE),
            phase_duration,
            response_duration,
            pow_depth,
            init_block,
            contract: Address::repeat_byte(0xC0),
        })
}

/// Strategy for a deployment and a block at or after its init block
fn deployment_and_block() -> impl Strategy<Value = (Parameters, u64)> {
    parameters().prop_flat_map(|p| {
        let init = p.init_block;
        (Just(p), init..init + 10_000)
    })
}

// =============================================================================
// PHASE PROPERTIES
// =============================================================================

proptest! {
    /// Property: generated deployments pass validation
    #[test]
    fn generated_parameters_are_valid(p in parameters()) {
        prop_assert!(p.validate().is_ok());
    }

    /// Property: a block lies inside the phase of its epoch
    #[test]
    fn block_lies_in_its_phase((p, block) in deployment_and_block()) {
        let epoch = p.epoch(block);
        prop_assert!(p.phase_start(epoch) <= block);
        prop_assert!(block < p.phase_start(epoch + 1));
    }

    /// Property: roles lag the deposit epoch by one phase each
    #[test]
    fn epoch_roles_lag_by_one((p, block) in deployment_and_block()) {
        let deposit = p.deposit_epoch(block);
        prop_assert_eq!(p.tx_epoch(block), deposit.checked_sub(1));
        prop_assert_eq!(p.exit_epoch(block), deposit.checked_sub(2));
        prop_assert_eq!(p.freeze_epoch(block), deposit.checked_sub(3));
    }

    /// Property: the response window is the first blocks of every phase
    #[test]
    fn response_window_opens_each_phase((p, block) in deployment_and_block()) {
        let offset = block - p.phase_start(p.epoch(block));
        prop_assert_eq!(p.in_response_window(block), offset < p.response_duration);
        prop_assert!(p.in_response_window(p.phase_start(p.epoch(block))));
    }

    /// Property: exactly one block per phase is its last
    #[test]
    fn last_block_precedes_next_phase((p, block) in deployment_and_block()) {
        prop_assert_eq!(
            p.is_last_block_of_phase(block),
            block + 1 == p.phase_start(p.epoch(block) + 1)
        );
    }

    /// Property: deadlines of one epoch are ordered and fall into the
    /// phases whose role they belong to
    #[test]
    fn deadlines_are_ordered(p in parameters(), epoch in 0u64..1_000) {
        let deposit = p.deposit_proof_deadline(epoch);
        let balance = p.balance_proof_deadline(epoch);
        let exit_end = p.exit_window_end(epoch);
        prop_assert!(deposit < balance);
        prop_assert!(balance < exit_end);

        // the deposit proof is due while `epoch` takes transfers
        prop_assert_eq!(p.tx_epoch(deposit), Some(epoch));
        // the balance proof is due while `epoch` is the exit epoch
        prop_assert_eq!(p.exit_epoch(balance), Some(epoch));
        // exits become final once `epoch` is freeze-eligible
        prop_assert_eq!(p.freeze_epoch(exit_end), Some(epoch));
    }
}

// =============================================================================
// PROOF STORE PROPERTIES
// =============================================================================

fn proof(epoch: u64, account: u8, value: u64) -> BalanceProof {
    BalanceProof {
        balance: Balance {
            epoch,
            account: Address::repeat_byte(account),
            value: U256::from(value),
        },
        sig: Signature::default(),
    }
}

proptest! {
    /// Property: subscribers see the last inserted proof of their account,
    /// and lookups by epoch find every proof inside the retention window
    #[test]
    fn store_keeps_latest_and_recent(
        inserts in prop::collection::vec((1u8..4, 0u64..100), 1..40),
        retention in 1u64..6,
    ) {
        let store = ProofStore::new(retention);
        let mut epoch = 0u64;
        let mut last = std::collections::HashMap::new();
        for (account, value) in &inserts {
            epoch += 1;
            store.insert_balance(proof(epoch, *account, *value));
            last.insert(*account, (epoch, *value));
        }

        for (account, (epoch, value)) in &last {
            let address = Address::repeat_byte(*account);
            let latest = store.latest_balance(&address).unwrap();
            prop_assert_eq!(latest.balance.epoch, *epoch);
            prop_assert_eq!(latest.balance.value, U256::from(*value));

            let streams = store.subscribe(address);
            let seen = streams.balances.borrow().clone().unwrap();
            prop_assert_eq!(seen.balance.epoch, *epoch);
        }

        let newest = epoch;
        let (account, value) = inserts[inserts.len() - 1];
        prop_assert_eq!(
            store.balance_at(newest, &Address::repeat_byte(account)).map(|p| p.balance.value),
            Some(U256::from(value))
        );
        if newest > retention {
            let stale = newest - retention - 1;
            for account in 1u8..4 {
                prop_assert!(store.balance_at(stale, &Address::repeat_byte(account)).is_none());
            }
        }
    }
}
