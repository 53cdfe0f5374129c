//! Epoch engine tasks
//!
//! Two tasks share the work. The block task owns the [`BlockProcessor`], the
//! transaction task owns the [`TxProcessor`]. They meet once per phase: the
//! block task hands over the retiring deposits and the phase's exiters and
//! waits for the sealed epoch, which becomes its new exit epoch.
//!
//! Submitting a transaction for a future epoch parks its reply sender until
//! the phase shift that makes the epoch live. On shutdown every parked
//! sender receives [`EnclaveError::Shutdown`].

use std::collections::BTreeMap;
use std::sync::Arc;

use erdstall_core::{
    Address, BalanceProof, Block, DepositProof, Epoch, Parameters, Signer, Transaction, U256,
};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::blocks::BlockProcessor;
use crate::epoch::EpochSnapshot;
use crate::errors::{EnclaveError, EnclaveResult};
use crate::proofs::ProofCache;
use crate::txs::{Submission, TxProcessor};

/// Engine tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Capacity of each task's command queue
    pub command_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command_buffer: 256,
        }
    }
}

type Reply<T> = oneshot::Sender<EnclaveResult<T>>;

enum BlockCommand {
    Process { blocks: Vec<Block>, reply: Reply<()> },
}

enum TxCommand {
    Submit {
        tx: Transaction,
        reply: Reply<()>,
    },
    PhaseShift {
        deposits: EpochSnapshot,
        exiters: BTreeMap<Address, U256>,
        reply: Reply<Option<EpochSnapshot>>,
    },
}

/// First fatal error, shared by both tasks and the handle
struct Latch {
    error: Mutex<Option<EnclaveError>>,
    cancel: CancellationToken,
}

impl Latch {
    fn halt(&self, err: EnclaveError) {
        let mut slot = self.error.lock();
        if slot.is_none() {
            error!(error = %err, "Epoch engine halted");
            *slot = Some(err);
        }
        self.cancel.cancel();
    }

    fn check(&self) -> EnclaveResult<()> {
        match self.error.lock().as_ref() {
            Some(err) => Err(EnclaveError::Halted(Box::new(err.clone()))),
            None => Ok(()),
        }
    }

    /// Error for a caller whose request was dropped
    fn stopped(&self) -> EnclaveError {
        self.check().err().unwrap_or(EnclaveError::Shutdown)
    }

    /// Pass `result` through, halting on fatal errors
    fn observe<T>(&self, result: EnclaveResult<T>) -> EnclaveResult<T> {
        if let Err(err) = &result {
            if err.is_fatal() {
                self.halt(err.clone());
            }
        }
        result
    }
}

/// Handle to a running engine
#[derive(Clone)]
pub struct EngineHandle {
    blocks: mpsc::Sender<BlockCommand>,
    txs: mpsc::Sender<TxCommand>,
    deposit_batches: Arc<AsyncMutex<mpsc::UnboundedReceiver<Vec<DepositProof>>>>,
    balance_batches: Arc<AsyncMutex<mpsc::UnboundedReceiver<Vec<BalanceProof>>>>,
    deposit_cache: Arc<ProofCache<DepositProof>>,
    balance_cache: Arc<ProofCache<BalanceProof>>,
    latch: Arc<Latch>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl EngineHandle {
    /// Spawn the block and transaction tasks
    pub fn spawn(params: Parameters, signer: Arc<Signer>, config: EngineConfig) -> Self {
        let cancel = CancellationToken::new();
        let latch = Arc::new(Latch {
            error: Mutex::new(None),
            cancel: cancel.clone(),
        });
        let deposit_cache = Arc::new(ProofCache::new());
        let balance_cache = Arc::new(ProofCache::new());

        let (blocks_tx, blocks_rx) = mpsc::channel(config.command_buffer);
        let (txs_tx, txs_rx) = mpsc::channel(config.command_buffer);
        let (deposit_out, deposit_batches) = mpsc::unbounded_channel();
        let (balance_out, balance_batches) = mpsc::unbounded_channel();

        let block_task = BlockTask {
            processor: BlockProcessor::new(params, Arc::clone(&signer), Arc::clone(&deposit_cache)),
            commands: blocks_rx,
            txs: txs_tx.clone(),
            deposit_out,
            latch: Arc::clone(&latch),
        };
        let tx_task = TxTask {
            processor: TxProcessor::new(params, signer, Arc::clone(&balance_cache)),
            commands: txs_rx,
            pending: BTreeMap::new(),
            balance_out,
            latch: Arc::clone(&latch),
        };

        let tasks = vec![
            tokio::spawn(block_task.run(cancel.clone())),
            tokio::spawn(tx_task.run(cancel)),
        ];
        info!(
            contract = %params.contract,
            phase_duration = params.phase_duration,
            pow_depth = params.pow_depth,
            "Epoch engine started"
        );

        Self {
            blocks: blocks_tx,
            txs: txs_tx,
            deposit_batches: Arc::new(AsyncMutex::new(deposit_batches)),
            balance_batches: Arc::new(AsyncMutex::new(balance_batches)),
            deposit_cache,
            balance_cache,
            latch,
            tasks: Arc::new(Mutex::new(tasks)),
        }
    }

    pub async fn process_blocks(&self, blocks: Vec<Block>) -> EnclaveResult<()> {
        self.latch.check()?;
        let (reply, response) = oneshot::channel();
        self.blocks
            .send(BlockCommand::Process { blocks, reply })
            .await
            .map_err(|_| self.latch.stopped())?;
        response.await.map_err(|_| self.latch.stopped())?
    }

    /// Submit transactions in order; resolves once each of them was applied
    /// or rejected, reporting the first rejection
    pub async fn process_txs(&self, txs: Vec<Transaction>) -> EnclaveResult<()> {
        self.latch.check()?;
        let mut responses = Vec::with_capacity(txs.len());
        for tx in txs {
            let (reply, response) = oneshot::channel();
            self.txs
                .send(TxCommand::Submit { tx, reply })
                .await
                .map_err(|_| self.latch.stopped())?;
            responses.push(response);
        }

        let mut first_err = None;
        for response in responses {
            let result = response.await.map_err(|_| self.latch.stopped())?;
            if let Err(err) = result {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Next batch of deposit proofs, one per phase
    pub async fn deposit_proofs(&self) -> EnclaveResult<Vec<DepositProof>> {
        let mut batches = self.deposit_batches.lock().await;
        batches.recv().await.ok_or_else(|| self.latch.stopped())
    }

    /// Next batch of balance proofs, one per sealed epoch
    pub async fn balance_proofs(&self) -> EnclaveResult<Vec<BalanceProof>> {
        let mut batches = self.balance_batches.lock().await;
        batches.recv().await.ok_or_else(|| self.latch.stopped())
    }

    /// Deposit proof issued in the running phase
    pub fn pending_deposit_proof(&self, account: &Address) -> Option<DepositProof> {
        self.deposit_cache.get(account)
    }

    /// Balance proof of the live transaction epoch, if the account transacted
    pub fn pending_balance_proof(&self, account: &Address) -> Option<BalanceProof> {
        self.balance_cache.get(account)
    }

    pub fn halted(&self) -> Option<EnclaveError> {
        self.latch.check().err()
    }

    /// Stop both tasks and wait for them
    pub async fn shutdown(&self) {
        self.latch.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(err) = task.await {
                warn!(?err, "Engine task exited with error");
            }
        }
        info!("Epoch engine stopped");
    }
}

struct BlockTask {
    processor: BlockProcessor,
    commands: mpsc::Receiver<BlockCommand>,
    txs: mpsc::Sender<TxCommand>,
    deposit_out: mpsc::UnboundedSender<Vec<DepositProof>>,
    latch: Arc<Latch>,
}

impl BlockTask {
    async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                cmd = self.commands.recv() => match cmd {
                    Some(BlockCommand::Process { blocks, reply }) => {
                        let result = self.ingest(blocks).await;
                        let result = self.latch.observe(result);
                        let _ = reply.send(result);
                    }
                    None => break,
                },
            }
        }
        debug!("Block task stopped");
    }

    /// Act on a batch of blocks; a block with rejected events does not stop
    /// the batch, the first rejection is reported once it is done
    async fn ingest(&mut self, blocks: Vec<Block>) -> EnclaveResult<()> {
        let mut rejected = None;
        for block in blocks {
            self.processor.push(block)?;
            while let Some(number) = self.processor.next_confirmed() {
                let confirmed = self.processor.process_confirmed(number)?;
                if let Some(err) = confirmed.rejected {
                    rejected.get_or_insert(err);
                }
                let Some(end) = confirmed.phase_end else {
                    continue;
                };
                let _ = self.deposit_out.send(end.deposit_proofs);

                let (reply, response) = oneshot::channel();
                self.txs
                    .send(TxCommand::PhaseShift {
                        deposits: end.deposits,
                        exiters: end.exiters,
                        reply,
                    })
                    .await
                    .map_err(|_| self.latch.stopped())?;
                let sealed = response.await.map_err(|_| self.latch.stopped())??;
                self.processor.install_exit_epoch(sealed)?;
            }
        }
        rejected.map_or(Ok(()), Err)
    }
}

struct TxTask {
    processor: TxProcessor,
    commands: mpsc::Receiver<TxCommand>,
    /// Transactions waiting for their epoch, in submission order
    pending: BTreeMap<Epoch, Vec<(Transaction, Reply<()>)>>,
    balance_out: mpsc::UnboundedSender<Vec<BalanceProof>>,
    latch: Arc<Latch>,
}

impl TxTask {
    async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                cmd = self.commands.recv() => match cmd {
                    Some(TxCommand::Submit { tx, reply }) => self.submit(tx, reply),
                    Some(TxCommand::PhaseShift { deposits, exiters, reply }) => {
                        let result = self.phase_shift(deposits, &exiters);
                        let result = self.latch.observe(result);
                        let _ = reply.send(result);
                    }
                    None => break,
                },
            }
        }

        let parked: usize = self.pending.values().map(Vec::len).sum();
        if parked > 0 {
            debug!(parked, "Cancelling parked transactions");
        }
        let err = self.latch.stopped();
        for (_, reply) in std::mem::take(&mut self.pending).into_values().flatten() {
            let _ = reply.send(Err(err.clone()));
        }
        debug!("Transaction task stopped");
    }

    fn submit(&mut self, tx: Transaction, reply: Reply<()>) {
        match self.processor.submit(&tx) {
            Ok(Submission::Applied) => {
                let _ = reply.send(Ok(()));
            }
            Ok(Submission::Deferred(epoch)) => {
                debug!(epoch, sender = %tx.sender, nonce = tx.nonce, "Transaction parked");
                self.pending.entry(epoch).or_default().push((tx, reply));
            }
            Err(err) => {
                debug!(error = %err, sender = %tx.sender, nonce = tx.nonce, "Transaction rejected");
                let _ = reply.send(Err(err));
            }
        }
    }

    fn phase_shift(
        &mut self,
        deposits: EpochSnapshot,
        exiters: &BTreeMap<Address, U256>,
    ) -> EnclaveResult<Option<EpochSnapshot>> {
        let sealed = self.processor.phase_shift(deposits, exiters)?;
        if sealed.epoch.is_some() {
            let _ = self.balance_out.send(sealed.balance_proofs);
        }

        let Some(live) = self.processor.current().map(EpochSnapshot::number) else {
            return Ok(sealed.epoch);
        };
        // everything parked for epochs up to the live one is decided now
        let later = self.pending.split_off(&(live + 1));
        let ready = std::mem::replace(&mut self.pending, later);
        for (tx, reply) in ready.into_values().flatten() {
            if exiters.contains_key(&tx.sender) {
                let _ = reply.send(Err(EnclaveError::ExitedAccount(tx.sender)));
                continue;
            }
            if exiters.contains_key(&tx.recipient) {
                let _ = reply.send(Err(EnclaveError::ExitedAccount(tx.recipient)));
                continue;
            }
            let result = self.processor.submit(&tx).and_then(|s| match s {
                Submission::Applied => Ok(()),
                Submission::Deferred(epoch) => Err(EnclaveError::StaleEpoch {
                    current: live,
                    got: epoch,
                }),
            });
            let _ = reply.send(result);
        }
        Ok(sealed.epoch)
    }
}
