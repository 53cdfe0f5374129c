//! Enclave decorator holding back transactions for epochs that are not live
//!
//! The wrapped enclave may sit behind a connection. This wrapper keeps
//! transactions for future epochs on this side and forwards them once the
//! blocks it relays make their epoch live. Submitters still wait for the
//! verdict of the wrapped enclave, so a transaction rejected after it was
//! held back is reported to its submitter. Transactions are forwarded one
//! at a time in submission order.

use std::collections::BTreeMap;

use async_trait::async_trait;
use erdstall_core::{Address, BalanceProof, Block, DepositProof, Epoch, Parameters, Transaction};
use parking_lot::Mutex;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tracing::{debug, warn};

use crate::errors::{EnclaveError, EnclaveResult};
use crate::{Attestation, Enclave};

type Held = (Transaction, oneshot::Sender<EnclaveResult<()>>);

#[derive(Default)]
struct Tracking {
    params: Option<Parameters>,
    last_block: Option<u64>,
    deferred: BTreeMap<Epoch, Vec<Held>>,
}

impl Tracking {
    /// Transaction epoch the wrapped engine has live
    fn live_epoch(&self) -> Option<Epoch> {
        let params = self.params.as_ref()?;
        let confirmed = self.last_block?.checked_sub(params.pow_depth)?;
        if confirmed < params.init_block {
            return None;
        }
        params.tx_epoch(confirmed + 1)
    }

    /// Take held transactions whose epoch is live or past
    fn take_ready(&mut self) -> Vec<Held> {
        let Some(live) = self.live_epoch() else {
            return Vec::new();
        };
        let later = self.deferred.split_off(&(live + 1));
        std::mem::replace(&mut self.deferred, later)
            .into_values()
            .flatten()
            .collect()
    }
}

pub struct CachingEnclave<E> {
    inner: E,
    tracking: Mutex<Tracking>,
    /// Held while forwarding, keeps submission order across callers
    forwarding: AsyncMutex<()>,
}

impl<E: Enclave> CachingEnclave<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            tracking: Mutex::new(Tracking::default()),
            forwarding: AsyncMutex::new(()),
        }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    /// Number of transactions held back
    pub fn deferred(&self) -> usize {
        self.tracking.lock().deferred.values().map(Vec::len).sum()
    }

    /// Forward every held transaction whose epoch is live
    async fn flush(&self) {
        let _order = self.forwarding.lock().await;
        let ready = self.tracking.lock().take_ready();
        if ready.is_empty() {
            return;
        }
        debug!(count = ready.len(), "Forwarding held transactions");
        for (tx, reply) in ready {
            if reply.is_closed() {
                debug!(sender = %tx.sender, nonce = tx.nonce, "Held transaction withdrawn");
                continue;
            }
            let result = self.inner.process_txs(vec![tx]).await;
            if let Err(err) = &result {
                debug!(error = %err, "Held transaction rejected");
            }
            let _ = reply.send(result);
        }
    }
}

#[async_trait]
impl<E: Enclave> Enclave for CachingEnclave<E> {
    async fn init(&self) -> EnclaveResult<(Address, Attestation)> {
        self.inner.init().await
    }

    async fn run(&self, params: Parameters) -> EnclaveResult<()> {
        self.inner.run(params).await?;
        self.tracking.lock().params = Some(params);
        Ok(())
    }

    async fn process_blocks(&self, blocks: Vec<Block>) -> EnclaveResult<()> {
        let last = blocks.last().map(|b| b.number);
        let result = self.inner.process_blocks(blocks).await;
        // rejected events still consume their blocks
        if matches!(result, Ok(()) | Err(EnclaveError::RejectedBlock { .. })) {
            if let Some(last) = last {
                self.tracking.lock().last_block = Some(last);
            }
            self.flush().await;
        }
        result
    }

    async fn process_txs(&self, txs: Vec<Transaction>) -> EnclaveResult<()> {
        let responses = {
            let mut tracking = self.tracking.lock();
            if tracking.params.is_none() {
                return Err(EnclaveError::NotRunning);
            }
            let live = tracking.live_epoch();
            let mut responses = Vec::with_capacity(txs.len());
            for tx in txs {
                if live.map_or(true, |live| tx.epoch > live) {
                    debug!(epoch = tx.epoch, sender = %tx.sender, "Transaction held back");
                }
                let (reply, response) = oneshot::channel();
                tracking.deferred.entry(tx.epoch).or_default().push((tx, reply));
                responses.push(response);
            }
            responses
        };

        self.flush().await;

        let mut first_err = None;
        for response in responses {
            let result = response.await.unwrap_or(Err(EnclaveError::Shutdown));
            if let Err(err) = result {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    async fn deposit_proofs(&self) -> EnclaveResult<Vec<DepositProof>> {
        self.inner.deposit_proofs().await
    }

    async fn balance_proofs(&self) -> EnclaveResult<Vec<BalanceProof>> {
        self.inner.balance_proofs().await
    }

    async fn shutdown(&self) {
        let held = std::mem::take(&mut self.tracking.lock().deferred);
        let held: Vec<_> = held.into_values().flatten().collect();
        if !held.is_empty() {
            warn!(count = held.len(), "Cancelling held transactions on shutdown");
        }
        for (_, reply) in held {
            let _ = reply.send(Err(EnclaveError::Shutdown));
        }
        self.inner.shutdown().await;
    }
}
