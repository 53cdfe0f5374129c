//! End-to-end tests of the epoch engine behind the Enclave capability

use std::sync::Arc;
use std::time::Duration;

use erdstall_core::{Address, Balance, BalanceProof, Block, Log, Parameters, Receipt, Signer, Transaction, B256, U256};
use erdstall_enclave::prelude::*;

// pd=4, resp=2, pow=1, init=1: phase p spans blocks [1+4p, 5+4p)
const CONTRACT: Address = Address::repeat_byte(0xcc);

fn params(tee: Address) -> Parameters {
    Parameters {
        tee,
        phase_duration: 4,
        response_duration: 2,
        pow_depth: 1,
        init_block: 1,
        contract: CONTRACT,
    }
}

struct Chain {
    parent: B256,
    next: u64,
}

impl Chain {
    fn new() -> Self {
        Self {
            parent: B256::ZERO,
            next: 1,
        }
    }

    fn block(&mut self, logs: Vec<Log>) -> Block {
        let block = Block {
            number: self.next,
            hash: B256::from(U256::from(self.next) + U256::from(1_000u64)),
            parent_hash: self.parent,
            receipts: vec![Receipt {
                tx_hash: B256::ZERO,
                logs,
            }],
        };
        self.parent = block.hash;
        self.next += 1;
        block
    }

    /// Empty blocks up to and including `last`
    fn until(&mut self, last: u64) -> Vec<Block> {
        let mut blocks = Vec::new();
        while self.next <= last {
            blocks.push(self.block(vec![]));
        }
        blocks
    }
}

fn deposit(epoch: u64, account: Address, value: u64) -> Log {
    Log::deposited(
        CONTRACT,
        &Balance {
            epoch,
            account,
            value: U256::from(value),
        },
    )
}

fn value_of(proofs: &[BalanceProof], account: Address) -> Option<U256> {
    proofs
        .iter()
        .find(|p| p.balance.account == account)
        .map(|p| p.balance.value)
}

async fn running() -> (LocalEnclave, Parameters) {
    let enclave = LocalEnclave::new();
    let (tee, _) = enclave.init().await.unwrap();
    let params = params(tee);
    enclave.run(params).await.unwrap();
    (enclave, params)
}

// =============================================================================
// LIFECYCLE
// =============================================================================

#[tokio::test]
async fn test_run_checks_identity_and_state() {
    let enclave = LocalEnclave::new();
    assert_eq!(
        enclave.process_blocks(vec![]).await,
        Err(EnclaveError::NotRunning)
    );
    assert!(matches!(
        enclave.run(params(Address::repeat_byte(1))).await,
        Err(EnclaveError::WrongIdentity { .. })
    ));

    let params = params(enclave.address());
    enclave.run(params).await.unwrap();
    assert_eq!(enclave.run(params).await, Err(EnclaveError::AlreadyRunning));
    enclave.shutdown().await;
}

// =============================================================================
// PROOF SCENARIOS
// =============================================================================

#[tokio::test]
async fn test_untouched_deposit_carried_into_balance_proof() {
    let (enclave, params) = running().await;
    let alice = Address::repeat_byte(0xaa);
    let mut chain = Chain::new();

    let mut blocks = vec![chain.block(vec![deposit(0, alice, 100)])];
    blocks.extend(chain.until(9));
    enclave.process_blocks(blocks).await.unwrap();

    let deposits = enclave.deposit_proofs().await.unwrap();
    assert_eq!(deposits.len(), 1);
    assert_eq!(deposits[0].balance.value, U256::from(100u64));
    assert!(deposits[0].verify(params.contract, params.tee));

    let balances = enclave.balance_proofs().await.unwrap();
    assert_eq!(balances.len(), 1);
    assert_eq!(balances[0].balance.epoch, 0);
    assert_eq!(value_of(&balances, alice), Some(U256::from(100u64)));
    assert!(balances[0].verify(params.contract, params.tee));

    enclave.shutdown().await;
}

#[tokio::test]
async fn test_transfer_and_replay() {
    let (enclave, params) = running().await;
    let alice = Signer::random();
    let bob = Address::repeat_byte(0xbb);
    let mut chain = Chain::new();

    let mut blocks = vec![chain.block(vec![deposit(0, alice.address(), 100)])];
    blocks.extend(chain.until(5));
    enclave.process_blocks(blocks).await.unwrap();

    let tx = Transaction::sign(params.contract, &alice, 1, 0, bob, U256::from(30u64)).unwrap();
    enclave.process_txs(vec![tx.clone()]).await.unwrap();
    assert_eq!(
        enclave
            .pending_balance_proof(&bob)
            .map(|p| p.balance.value),
        Some(U256::from(30u64))
    );
    assert!(matches!(
        enclave.process_txs(vec![tx]).await,
        Err(EnclaveError::InvalidNonce { expected: 2, got: 1 })
    ));

    enclave.process_blocks(chain.until(9)).await.unwrap();
    let balances = enclave.balance_proofs().await.unwrap();
    assert_eq!(value_of(&balances, alice.address()), Some(U256::from(70u64)));
    assert_eq!(value_of(&balances, bob), Some(U256::from(30u64)));

    enclave.shutdown().await;
}

#[tokio::test]
async fn test_stale_epoch_rejected() {
    let (enclave, params) = running().await;
    let alice = Signer::random();
    let mut chain = Chain::new();

    let mut blocks = vec![chain.block(vec![deposit(0, alice.address(), 100)])];
    blocks.extend(chain.until(9));
    enclave.process_blocks(blocks).await.unwrap();

    let tx = Transaction::sign(params.contract, &alice, 1, 0, Address::ZERO, U256::from(1u64)).unwrap();
    assert_eq!(
        enclave.process_txs(vec![tx]).await,
        Err(EnclaveError::StaleEpoch { current: 1, got: 0 })
    );
    enclave.shutdown().await;
}

// =============================================================================
// FUTURE EPOCHS
// =============================================================================

#[tokio::test]
async fn test_future_tx_blocks_until_phase_shift() {
    let (enclave, params) = running().await;
    let enclave = Arc::new(enclave);
    let alice = Signer::random();
    let bob = Address::repeat_byte(0xbb);
    let mut chain = Chain::new();

    let mut blocks = vec![chain.block(vec![deposit(0, alice.address(), 100)])];
    blocks.extend(chain.until(5));
    enclave.process_blocks(blocks).await.unwrap();

    let tx = Transaction::sign(params.contract, &alice, 1, 1, bob, U256::from(30u64)).unwrap();
    let submitter = {
        let enclave = Arc::clone(&enclave);
        tokio::spawn(async move { enclave.process_txs(vec![tx]).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!submitter.is_finished());

    enclave.process_blocks(chain.until(9)).await.unwrap();
    submitter.await.unwrap().unwrap();

    enclave.process_blocks(chain.until(13)).await.unwrap();
    let first = enclave.balance_proofs().await.unwrap();
    assert_eq!(first[0].balance.epoch, 0);
    let second = enclave.balance_proofs().await.unwrap();
    assert_eq!(value_of(&second, alice.address()), Some(U256::from(70u64)));
    assert_eq!(value_of(&second, bob), Some(U256::from(30u64)));

    enclave.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_releases_parked_submitter() {
    let (enclave, params) = running().await;
    let enclave = Arc::new(enclave);
    let alice = Signer::random();

    let tx = Transaction::sign(params.contract, &alice, 1, 7, Address::ZERO, U256::from(1u64)).unwrap();
    let submitter = {
        let enclave = Arc::clone(&enclave);
        tokio::spawn(async move { enclave.process_txs(vec![tx]).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    enclave.shutdown().await;
    assert_eq!(submitter.await.unwrap(), Err(EnclaveError::Shutdown));
}

async fn running_caching() -> (Arc<CachingEnclave<LocalEnclave>>, Parameters) {
    let caching = CachingEnclave::new(LocalEnclave::new());
    let (tee, _) = caching.init().await.unwrap();
    let params = params(tee);
    caching.run(params).await.unwrap();
    (Arc::new(caching), params)
}

#[tokio::test]
async fn test_caching_enclave_holds_future_tx() {
    let (caching, params) = running_caching().await;
    let alice = Signer::random();
    let bob = Address::repeat_byte(0xbb);
    let mut chain = Chain::new();
    let mut blocks = vec![chain.block(vec![deposit(0, alice.address(), 100)])];
    blocks.extend(chain.until(5));
    caching.process_blocks(blocks).await.unwrap();

    let tx = Transaction::sign(params.contract, &alice, 1, 1, bob, U256::from(30u64)).unwrap();
    let submitter = {
        let caching = Arc::clone(&caching);
        tokio::spawn(async move { caching.process_txs(vec![tx]).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!submitter.is_finished());
    assert_eq!(caching.deferred(), 1);

    caching.process_blocks(chain.until(9)).await.unwrap();
    submitter.await.unwrap().unwrap();
    assert_eq!(caching.deferred(), 0);
    assert_eq!(
        caching
            .inner()
            .pending_balance_proof(&bob)
            .map(|p| p.balance.value),
        Some(U256::from(30u64))
    );

    caching.shutdown().await;
}

#[tokio::test]
async fn test_caching_enclave_reports_late_rejection() {
    let (caching, params) = running_caching().await;
    let alice = Signer::random();
    let bob = Address::repeat_byte(0xbb);
    let mut chain = Chain::new();
    let mut blocks = vec![chain.block(vec![deposit(0, alice.address(), 100)])];
    blocks.extend(chain.until(5));
    caching.process_blocks(blocks).await.unwrap();

    let overdraw = Transaction::sign(params.contract, &alice, 1, 1, bob, U256::from(500u64)).unwrap();
    let submitter = {
        let caching = Arc::clone(&caching);
        tokio::spawn(async move { caching.process_txs(vec![overdraw]).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(caching.deferred(), 1);

    caching.process_blocks(chain.until(9)).await.unwrap();
    assert!(matches!(
        submitter.await.unwrap(),
        Err(EnclaveError::InsufficientBalance { .. })
    ));

    // nonce 1 was never used, so the sender continues with it
    let tx = Transaction::sign(params.contract, &alice, 1, 1, bob, U256::from(30u64)).unwrap();
    caching.process_txs(vec![tx]).await.unwrap();
    assert_eq!(
        caching
            .inner()
            .pending_balance_proof(&bob)
            .map(|p| p.balance.value),
        Some(U256::from(30u64))
    );

    caching.shutdown().await;
}

#[tokio::test]
async fn test_caching_enclave_shutdown_releases_held_tx() {
    let (caching, params) = running_caching().await;
    let alice = Signer::random();

    let tx = Transaction::sign(params.contract, &alice, 1, 3, Address::ZERO, U256::from(1u64)).unwrap();
    let submitter = {
        let caching = Arc::clone(&caching);
        tokio::spawn(async move { caching.process_txs(vec![tx]).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    caching.shutdown().await;
    assert_eq!(submitter.await.unwrap(), Err(EnclaveError::Shutdown));
    assert_eq!(caching.deferred(), 0);
}

// =============================================================================
// REJECTED BLOCKS
// =============================================================================

#[tokio::test]
async fn test_rejected_block_does_not_stall_engine() {
    let (enclave, params) = running().await;
    let alice = Address::repeat_byte(0xaa);
    let bob = Address::repeat_byte(0xbb);
    let mut chain = Chain::new();

    // block 1 deposits for an epoch that is not taking deposits
    let blocks = vec![
        chain.block(vec![deposit(1, alice, 100)]),
        chain.block(vec![deposit(0, bob, 5)]),
    ];
    let err = enclave.process_blocks(blocks).await.unwrap_err();
    assert!(matches!(err, EnclaveError::RejectedBlock { number: 1, .. }));
    assert!(!err.is_fatal());

    enclave.process_blocks(chain.until(9)).await.unwrap();
    let deposits = enclave.deposit_proofs().await.unwrap();
    assert_eq!(deposits.len(), 1);
    assert_eq!(deposits[0].balance.account, bob);
    assert!(deposits[0].verify(params.contract, params.tee));

    let balances = enclave.balance_proofs().await.unwrap();
    assert_eq!(value_of(&balances, bob), Some(U256::from(5u64)));
    assert_eq!(value_of(&balances, alice), None);

    enclave.shutdown().await;
}

// =============================================================================
// EXITS AND HALTING
// =============================================================================

#[tokio::test]
async fn test_exit_removes_carried_balance() {
    let (enclave, _) = running().await;
    let alice = Address::repeat_byte(0xaa);
    let bob = Address::repeat_byte(0xbb);
    let mut chain = Chain::new();

    let mut blocks = vec![chain.block(vec![deposit(0, alice, 100), deposit(0, bob, 5)])];
    blocks.extend(chain.until(9));
    enclave.process_blocks(blocks).await.unwrap();
    let sealed = enclave.balance_proofs().await.unwrap();
    assert_eq!(sealed.len(), 2);

    // phase 2: epoch 0 accepts exits
    let exit = Log::exiting(
        CONTRACT,
        &Balance {
            epoch: 0,
            account: alice,
            value: U256::from(100u64),
        },
    );
    let mut blocks = vec![chain.block(vec![exit])];
    blocks.extend(chain.until(13));
    enclave.process_blocks(blocks).await.unwrap();

    let next = enclave.balance_proofs().await.unwrap();
    assert_eq!(next[0].balance.epoch, 1);
    assert_eq!(value_of(&next, alice), None);
    assert_eq!(value_of(&next, bob), Some(U256::from(5u64)));
    enclave.shutdown().await;
}

#[tokio::test]
async fn test_exiter_that_spent_halts_engine() {
    let (enclave, params) = running().await;
    let alice = Signer::random();
    let mut chain = Chain::new();

    let mut blocks = vec![chain.block(vec![deposit(0, alice.address(), 100)])];
    blocks.extend(chain.until(9));
    enclave.process_blocks(blocks).await.unwrap();

    // epoch 1 is live; alice spends there and exits epoch 0 in full
    let tx = Transaction::sign(params.contract, &alice, 1, 1, Address::ZERO, U256::from(10u64)).unwrap();
    enclave.process_txs(vec![tx]).await.unwrap();

    let exit = Log::exiting(
        CONTRACT,
        &Balance {
            epoch: 0,
            account: alice.address(),
            value: U256::from(100u64),
        },
    );
    let mut blocks = vec![chain.block(vec![exit])];
    blocks.extend(chain.until(13));
    assert_eq!(
        enclave.process_blocks(blocks).await,
        Err(EnclaveError::InconsistentExit(alice.address()))
    );

    let halted = enclave.process_blocks(chain.until(14)).await.unwrap_err();
    assert_eq!(
        halted,
        EnclaveError::Halted(Box::new(EnclaveError::InconsistentExit(alice.address())))
    );
    enclave.shutdown().await;
}
