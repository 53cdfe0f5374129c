//! Erdstall Operator
//!
//! Runs next to an enclave and connects it to the chain and to clients.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      Erdstall Operator                     │
//! ├────────────────────────────────────────────────────────────┤
//! │  chain head ──► block pump ──► CachingEnclave<E>           │
//! │                                    │         ▲             │
//! │                     proof drains ◄─┘         │ txs         │
//! │                          │                   │             │
//! │                          ▼                   │             │
//! │                     ProofStore ──► OperatorApi (clients)   │
//! │                          │                                 │
//! │  contract events ──► challenge responder ──► contract      │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! The operator holds no protocol state of its own. Everything it hands out
//! is signed by the enclave, so clients verify proofs and never trust it.

mod config;
mod error;
mod pump;
mod responder;
mod store;

pub use config::OperatorConfig;
pub use error::{OperatorError, OperatorResult};
pub use store::{ProofStore, DEFAULT_RETENTION};

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use erdstall_client::{ClientError, ClientResult, OperatorApi, ProofStreams};
use erdstall_contracts::OperatorContract;
use erdstall_core::{Address, BalanceProof, DepositProof, Epoch, Parameters, Transaction};
use erdstall_enclave::{CachingEnclave, Enclave};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// State shared by the operator's tasks
pub(crate) struct Shared<E, C> {
    pub(crate) config: OperatorConfig,
    pub(crate) params: Parameters,
    pub(crate) enclave: CachingEnclave<E>,
    pub(crate) chain: C,
    pub(crate) store: ProofStore,
}

/// A running operator
pub struct Operator<E, C> {
    shared: Arc<Shared<E, C>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<E, C> Operator<E, C>
where
    E: Enclave + 'static,
    C: OperatorContract + 'static,
{
    /// Read the deployment, start the enclave for it and spawn the relay,
    /// drain and responder tasks
    pub async fn start(config: OperatorConfig, enclave: E, chain: C) -> OperatorResult<Self> {
        let params = chain.big_bang().await?;
        params.validate()?;

        let (tee, _attestation) = enclave.init().await?;
        if tee != params.tee {
            return Err(OperatorError::WrongEnclave {
                expected: params.tee,
                got: tee,
            });
        }
        let enclave = CachingEnclave::new(enclave);
        enclave.run(params).await?;
        info!(contract = %params.contract, %tee, "Operator started");

        let shared = Arc::new(Shared {
            store: ProofStore::new(config.proof_retention),
            config,
            params,
            enclave,
            chain,
        });
        let operator = Self {
            shared,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        };

        operator.spawn("block relay", pump::pump_blocks);
        operator.spawn("deposit proofs", pump::drain_deposit_proofs);
        operator.spawn("balance proofs", pump::drain_balance_proofs);
        if operator.shared.config.respond_to_challenges {
            operator.spawn("challenge responder", responder::respond_to_challenges);
        }
        Ok(operator)
    }

    /// Spawn a task that stops the whole operator when it fails
    fn spawn<F, Fut>(&self, name: &'static str, task: F)
    where
        F: FnOnce(Arc<Shared<E, C>>, CancellationToken) -> Fut,
        Fut: Future<Output = OperatorResult<()>> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        let fut = task(self.shared.clone(), cancel.clone());
        let handle = tokio::spawn(async move {
            match fut.await {
                Ok(()) => debug!(task = name, "Task finished"),
                Err(e) => {
                    error!(task = name, error = %e, "Operator task failed, stopping");
                    cancel.cancel();
                }
            }
        });
        self.tasks.lock().push(handle);
    }

    pub fn params(&self) -> &Parameters {
        &self.shared.params
    }

    pub fn store(&self) -> &ProofStore {
        &self.shared.store
    }

    /// Transactions held back until their epoch opens
    pub fn deferred_transactions(&self) -> usize {
        self.shared.enclave.deferred()
    }

    /// Stop all tasks and shut the enclave down
    pub async fn shutdown(&self) {
        info!("Stopping operator");
        self.cancel.cancel();
        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        self.shared.enclave.shutdown().await;
    }
}

impl<E, C> Operator<E, C> {
    /// Whether a task failure or `shutdown` stopped the operator
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the operator stopped
    pub async fn stopped(&self) {
        self.cancel.cancelled().await
    }
}

impl<E, C> Drop for Operator<E, C> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn operator_error(e: impl std::fmt::Display) -> ClientError {
    ClientError::Operator(e.to_string())
}

#[async_trait]
impl<E, C> OperatorApi for Operator<E, C>
where
    E: Enclave + 'static,
    C: OperatorContract + 'static,
{
    async fn add_transaction(&self, tx: Transaction) -> ClientResult<()> {
        if self.is_stopped() {
            return Err(operator_error(erdstall_enclave::EnclaveError::Shutdown));
        }
        debug!(sender = %tx.sender, nonce = tx.nonce, epoch = tx.epoch, "Forwarding transaction");
        self.shared
            .enclave
            .process_txs(vec![tx])
            .await
            .map_err(operator_error)
    }

    async fn get_deposit_proof(&self, epoch: Epoch, account: Address) -> ClientResult<DepositProof> {
        let wait = self.shared.config.deposit_proof_wait;
        tokio::time::timeout(wait, self.shared.store.wait_deposit(epoch, account))
            .await
            .unwrap_or(Err(ClientError::ProofNotFound))
    }

    async fn get_balance_proof(&self, account: Address) -> ClientResult<BalanceProof> {
        self.shared
            .store
            .latest_balance(&account)
            .ok_or(ClientError::ProofNotFound)
    }

    async fn subscribe_proofs(&self, account: Address) -> ClientResult<ProofStreams> {
        Ok(self.shared.store.subscribe(account))
    }
}

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::OperatorConfig;
    pub use crate::error::{OperatorError, OperatorResult};
    pub use crate::Operator;
}
