//! In-memory chain running the contract rules
//!
//! Every successful contract call is mined into its own block right away.
//! Empty blocks are produced by [`SimulatedChain::mine_blocks`] or by the
//! interval miner. Reverted calls leave the chain untouched.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use erdstall_core::{
    keccak256, Address, BalanceProof, Block, DepositProof, Epoch, Log, Parameters, Receipt,
    B256, U256,
};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::errors::{ContractError, ContractResult};
use crate::events::{ChainEvent, ContractEvent};
use crate::state::{Challenge, ContractState};
use crate::surface::{ChainReader, ClientContract, Inclusion, OperatorContract};

const EVENT_CAPACITY: usize = 1024;

/// Durations of a deployment; the chain fills in identities and the start block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deployment {
    pub phase_duration: u64,
    pub response_duration: u64,
    pub pow_depth: u64,
}

impl Default for Deployment {
    fn default() -> Self {
        Self {
            phase_duration: 20,
            response_duration: 5,
            pow_depth: 1,
        }
    }
}

struct Inner {
    contract: ContractState,
    blocks: Vec<Block>,
    tx_count: u64,
}

impl Inner {
    fn head(&self) -> &Block {
        // the genesis block is pushed on construction
        &self.blocks[self.blocks.len() - 1]
    }

    fn next_number(&self) -> u64 {
        self.blocks.len() as u64
    }

    fn seal(&mut self, receipts: Vec<Receipt>) -> u64 {
        let number = self.next_number();
        let parent_hash = self.head().hash;
        let mut preimage = Vec::with_capacity(8 + 32 * (1 + receipts.len()));
        preimage.extend_from_slice(&number.to_be_bytes());
        preimage.extend_from_slice(parent_hash.as_slice());
        for receipt in &receipts {
            preimage.extend_from_slice(receipt.tx_hash.as_slice());
        }
        self.blocks.push(Block {
            number,
            hash: keccak256(&preimage),
            parent_hash,
            receipts,
        });
        number
    }
}

/// Simulated chain with a single deployed Erdstall contract
pub struct SimulatedChain {
    inner: Mutex<Inner>,
    head: watch::Sender<u64>,
    events: broadcast::Sender<ChainEvent>,
}

impl SimulatedChain {
    /// Start a chain and deploy the contract for enclave `tee`. Epoch 0 begins
    /// with the block after deployment.
    pub fn deploy(tee: Address, deployment: Deployment) -> ContractResult<Arc<Self>> {
        let genesis = Block {
            number: 0,
            hash: keccak256(b"erdstall-genesis"),
            parent_hash: B256::ZERO,
            receipts: Vec::new(),
        };
        let contract = Address::from_slice(&keccak256(tee.as_slice())[12..]);
        let params = Parameters {
            tee,
            phase_duration: deployment.phase_duration,
            response_duration: deployment.response_duration,
            pow_depth: deployment.pow_depth,
            init_block: 1,
            contract,
        };
        params.validate()?;

        let (head, _) = watch::channel(0);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        info!(%contract, %tee, "Deployed contract");
        Ok(Arc::new(Self {
            inner: Mutex::new(Inner {
                contract: ContractState::new(params),
                blocks: vec![genesis],
                tx_count: 0,
            }),
            head,
            events,
        }))
    }

    pub fn params(&self) -> Parameters {
        *self.inner.lock().contract.params()
    }

    /// Current head block number
    pub fn head(&self) -> u64 {
        self.inner.lock().head().number
    }

    /// Give `account` on-chain funds
    pub fn fund(&self, account: Address, value: U256) {
        self.inner.lock().contract.fund(account, value);
    }

    /// On-chain funds of `account`
    pub fn wallet(&self, account: &Address) -> U256 {
        self.inner.lock().contract.wallet(account)
    }

    pub fn challenge_of(&self, account: &Address) -> Option<Challenge> {
        self.inner.lock().contract.challenge_of(account)
    }

    pub fn exit_of(&self, epoch: Epoch, account: &Address) -> Option<U256> {
        self.inner.lock().contract.exit_of(epoch, account)
    }

    /// Attach a user account
    pub fn connect(self: &Arc<Self>, account: Address) -> SimulatedAccount {
        SimulatedAccount {
            chain: Arc::clone(self),
            account,
        }
    }

    /// Mine `n` empty blocks, returning the new head
    pub fn mine_blocks(&self, n: u64) -> u64 {
        let mut head = self.head();
        for _ in 0..n {
            head = self.inner.lock().seal(Vec::new());
            self.head.send_replace(head);
        }
        head
    }

    /// Mine one empty block every `interval` until cancelled
    pub fn spawn_miner(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let chain = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let head = chain.mine_blocks(1);
                        debug!(head, "Mined block");
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        })
    }

    /// Run a contract call and mine it
    fn transact<F>(&self, sender: Address, call: F) -> ContractResult<Inclusion>
    where
        F: FnOnce(&mut ContractState, u64) -> ContractResult<Vec<ContractEvent>>,
    {
        let (inclusion, events) = {
            let mut inner = self.inner.lock();
            let now = inner.next_number();
            let events = call(&mut inner.contract, now)?;

            inner.tx_count += 1;
            let mut preimage = sender.to_vec();
            preimage.extend_from_slice(&inner.tx_count.to_be_bytes());
            let tx_hash = keccak256(&preimage);

            let contract = inner.contract.params().contract;
            let logs = events
                .iter()
                .filter_map(|event| match event {
                    ContractEvent::Deposited(b) => Some(Log::deposited(contract, b)),
                    ContractEvent::Exiting(b) => Some(Log::exiting(contract, b)),
                    _ => None,
                })
                .collect();
            let block = inner.seal(vec![Receipt { tx_hash, logs }]);
            (Inclusion { tx_hash, block }, events)
        };

        for event in events {
            debug!(block = inclusion.block, ?event, "Contract event");
            // no subscribers is fine
            let _ = self.events.send(ChainEvent {
                block: inclusion.block,
                event,
            });
        }
        self.head.send_replace(inclusion.block);
        Ok(inclusion)
    }
}

#[async_trait]
impl ChainReader for SimulatedChain {
    async fn big_bang(&self) -> ContractResult<Parameters> {
        Ok(self.params())
    }

    fn subscribe_head(&self) -> watch::Receiver<u64> {
        self.head.subscribe()
    }

    fn subscribe_events(&self) -> broadcast::Receiver<ChainEvent> {
        self.events.subscribe()
    }

    async fn block_by_number(&self, number: u64) -> ContractResult<Block> {
        self.inner
            .lock()
            .blocks
            .get(number as usize)
            .cloned()
            .ok_or(ContractError::UnknownBlock(number))
    }

    async fn frozen_epoch(&self) -> ContractResult<Option<Epoch>> {
        Ok(self.inner.lock().contract.frozen())
    }
}

#[async_trait]
impl OperatorContract for SimulatedChain {
    async fn respond_challenge(&self, proof: &BalanceProof) -> ContractResult<Inclusion> {
        let tee = self.params().tee;
        self.transact(tee, |c, now| c.respond_challenge(proof, now))
    }

    async fn respond_deposit_challenge(&self, proof: &DepositProof) -> ContractResult<Inclusion> {
        let tee = self.params().tee;
        self.transact(tee, |c, now| c.respond_deposit_challenge(proof, now))
    }
}

/// A user account on the simulated chain
#[derive(Clone)]
pub struct SimulatedAccount {
    chain: Arc<SimulatedChain>,
    account: Address,
}

impl SimulatedAccount {
    pub fn chain(&self) -> &Arc<SimulatedChain> {
        &self.chain
    }
}

#[async_trait]
impl ChainReader for SimulatedAccount {
    async fn big_bang(&self) -> ContractResult<Parameters> {
        self.chain.big_bang().await
    }

    fn subscribe_head(&self) -> watch::Receiver<u64> {
        self.chain.subscribe_head()
    }

    fn subscribe_events(&self) -> broadcast::Receiver<ChainEvent> {
        self.chain.subscribe_events()
    }

    async fn block_by_number(&self, number: u64) -> ContractResult<Block> {
        self.chain.block_by_number(number).await
    }

    async fn frozen_epoch(&self) -> ContractResult<Option<Epoch>> {
        self.chain.frozen_epoch().await
    }
}

#[async_trait]
impl ClientContract for SimulatedAccount {
    fn account(&self) -> Address {
        self.account
    }

    async fn deposit(&self, value: U256) -> ContractResult<Inclusion> {
        let from = self.account;
        self.chain.transact(from, |c, now| c.deposit(from, value, now))
    }

    async fn exit(&self, proof: &BalanceProof) -> ContractResult<Inclusion> {
        let from = self.account;
        self.chain.transact(from, |c, now| c.exit(from, proof, now))
    }

    async fn withdraw(&self, epoch: Epoch) -> ContractResult<Inclusion> {
        let from = self.account;
        self.chain.transact(from, |c, now| c.withdraw(from, epoch, now))
    }

    async fn challenge(&self, proof: &BalanceProof) -> ContractResult<Inclusion> {
        let from = self.account;
        self.chain.transact(from, |c, now| c.challenge(from, proof, now))
    }

    async fn challenge_deposit(&self) -> ContractResult<Inclusion> {
        let from = self.account;
        self.chain.transact(from, |c, now| c.challenge_deposit(from, now))
    }

    async fn withdraw_challenge(&self) -> ContractResult<Inclusion> {
        let from = self.account;
        self.chain.transact(from, |c, now| c.withdraw_challenge(from, now))
    }

    async fn withdraw_frozen(&self, proof: &BalanceProof) -> ContractResult<Inclusion> {
        let from = self.account;
        self.chain.transact(from, |c, _| c.withdraw_frozen(from, proof))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use erdstall_core::{Balance, ContractLog, Signer};

    fn chain() -> (Arc<SimulatedChain>, Signer) {
        let tee = Signer::random();
        let chain = SimulatedChain::deploy(
            tee.address(),
            Deployment {
                phase_duration: 10,
                response_duration: 3,
                pow_depth: 1,
            },
        )
        .unwrap();
        (chain, tee)
    }

    #[test]
    fn test_deploy_validates() {
        let bad = Deployment {
            phase_duration: 10,
            response_duration: 3,
            pow_depth: 3,
        };
        assert!(SimulatedChain::deploy(Address::ZERO, bad).is_err());
    }

    #[test]
    fn test_blocks_are_linked() {
        let (chain, _) = chain();
        assert_eq!(chain.mine_blocks(3), 3);
        let inner = chain.inner.lock();
        for pair in inner.blocks.windows(2) {
            assert_eq!(pair[1].number, pair[0].number + 1);
            assert_eq!(pair[1].parent_hash, pair[0].hash);
        }
    }

    #[tokio::test]
    async fn test_deposit_is_mined_with_log() {
        let (chain, _) = chain();
        let alice = Address::repeat_byte(0xaa);
        chain.fund(alice, U256::from(10u64));
        let mut events = chain.subscribe_events();
        let head = chain.subscribe_head();

        let account = chain.connect(alice);
        let inclusion = account.deposit(U256::from(10u64)).await.unwrap();
        assert_eq!(inclusion.block, 1);
        assert_eq!(*head.borrow(), 1);

        let expected = Balance {
            epoch: 0,
            account: alice,
            value: U256::from(10u64),
        };
        let block = chain.block_by_number(1).await.unwrap();
        let params = chain.params();
        assert_eq!(
            block.contract_logs(params.contract).unwrap(),
            vec![ContractLog::Deposited(expected)]
        );
        assert_eq!(
            events.recv().await.unwrap(),
            ChainEvent {
                block: 1,
                event: ContractEvent::Deposited(expected)
            }
        );
    }

    #[tokio::test]
    async fn test_reverted_call_mines_nothing() {
        let (chain, _) = chain();
        let account = chain.connect(Address::repeat_byte(0xaa));
        assert!(matches!(
            account.deposit(U256::from(1u64)).await,
            Err(ContractError::InsufficientFunds { .. })
        ));
        assert_eq!(chain.head(), 0);
        assert_eq!(
            chain.block_by_number(1).await,
            Err(ContractError::UnknownBlock(1))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_miner() {
        let (chain, _) = chain();
        let cancel = CancellationToken::new();
        let miner = chain.spawn_miner(Duration::from_secs(1), cancel.clone());
        let mut head = chain.subscribe_head();

        crate::surface::wait_for_block(&mut head, 3).await.unwrap();
        cancel.cancel();
        miner.await.unwrap();
        assert!(chain.head() >= 3);
    }
}
