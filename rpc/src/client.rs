//! RPC clients: the operator transport used by clients and the remote
//! enclave proxy used by the operator
//!
//! Transport failures are retried with a fixed backoff until the request
//! deadline. Errors the server answered with are returned right away.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use erdstall_client::{ClientError, ClientResult, OperatorApi, ProofStreams};
use erdstall_core::{Address, BalanceProof, Block, DepositProof, Epoch, Parameters, Transaction};
use erdstall_enclave::{Attestation, Enclave, EnclaveError, EnclaveResult};
use jsonrpsee::core::ClientError as WireError;
use jsonrpsee::types::ErrorObjectOwned;
use jsonrpsee::ws_client::{WsClient, WsClientBuilder};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::errors::{client_error, enclave_error};
use crate::methods::{EnclaveRpcClient, OperatorRpcClient};
use crate::types::ProofUpdate;
use crate::DEFAULT_RPC_PORT;

/// Transport settings of an RPC client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcClientConfig {
    /// WebSocket URL of the server
    pub url: String,
    /// Deadline of one logical request, retries included
    pub request_timeout: Duration,
    /// Pause between retries after a transport failure
    pub retry_interval: Duration,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            url: format!("ws://127.0.0.1:{DEFAULT_RPC_PORT}"),
            request_timeout: Duration::from_secs(20),
            retry_interval: Duration::from_millis(500),
        }
    }
}

impl RpcClientConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// Why a call produced no result
#[derive(Debug)]
enum CallFailure {
    /// The server answered with an error
    Rejected(ErrorObjectOwned),
    /// No answer before the deadline
    Unreachable(String),
}

fn is_retryable(err: &WireError) -> bool {
    matches!(
        err,
        WireError::Transport(_) | WireError::RestartNeeded(_) | WireError::RequestTimeout
    )
}

/// WebSocket connection that is re-established on demand
struct Connection {
    config: RpcClientConfig,
    client: Mutex<Option<Arc<WsClient>>>,
}

impl Connection {
    fn new(config: RpcClientConfig) -> Self {
        Self {
            config,
            client: Mutex::new(None),
        }
    }

    async fn get(&self) -> Result<Arc<WsClient>, WireError> {
        let mut slot = self.client.lock().await;
        if let Some(client) = slot.as_ref().filter(|c| c.is_connected()) {
            return Ok(client.clone());
        }
        let client = Arc::new(
            WsClientBuilder::default()
                .request_timeout(self.config.request_timeout)
                .build(&self.config.url)
                .await?,
        );
        debug!(url = %self.config.url, "Connected");
        *slot = Some(client.clone());
        Ok(client)
    }

    async fn call<T, F, Fut>(&self, method: &'static str, call: F) -> Result<T, CallFailure>
    where
        F: Fn(Arc<WsClient>) -> Fut,
        Fut: Future<Output = Result<T, WireError>>,
    {
        let deadline = Instant::now() + self.config.request_timeout;
        loop {
            let attempt = match self.get().await {
                Ok(client) => call(client).await,
                Err(e) => Err(e),
            };
            match attempt {
                Ok(value) => return Ok(value),
                Err(WireError::Call(obj)) => return Err(CallFailure::Rejected(obj)),
                Err(e) if is_retryable(&e) && Instant::now() + self.config.retry_interval < deadline => {
                    debug!(method, error = %e, "Retrying request");
                    tokio::time::sleep(self.config.retry_interval).await;
                }
                Err(e) => {
                    warn!(method, error = %e, "Request failed");
                    return Err(CallFailure::Unreachable(e.to_string()));
                }
            }
        }
    }
}

// =============================================================================
// Operator transport
// =============================================================================

/// [`OperatorApi`] over JSON-RPC
pub struct RpcOperatorClient {
    conn: Connection,
}

impl RpcOperatorClient {
    /// Connect eagerly so a wrong URL fails here
    pub async fn connect(config: RpcClientConfig) -> ClientResult<Self> {
        let conn = Connection::new(config);
        conn.get()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(Self { conn })
    }

    async fn call<T, F, Fut>(&self, method: &'static str, call: F) -> ClientResult<T>
    where
        F: Fn(Arc<WsClient>) -> Fut,
        Fut: Future<Output = Result<T, WireError>>,
    {
        self.conn.call(method, call).await.map_err(|f| match f {
            CallFailure::Rejected(obj) => client_error(&obj),
            CallFailure::Unreachable(msg) => ClientError::Transport(msg),
        })
    }
}

#[async_trait]
impl OperatorApi for RpcOperatorClient {
    async fn add_transaction(&self, tx: Transaction) -> ClientResult<()> {
        self.call("addTransaction", |c| {
            let tx = tx.clone();
            async move { c.add_transaction(tx).await }
        })
        .await
    }

    async fn get_deposit_proof(&self, epoch: Epoch, account: Address) -> ClientResult<DepositProof> {
        self.call("getDepositProof", |c| async move {
            c.get_deposit_proof(epoch, account).await
        })
        .await
    }

    async fn get_balance_proof(&self, account: Address) -> ClientResult<BalanceProof> {
        self.call("getBalanceProof", |c| async move {
            c.get_balance_proof(account).await
        })
        .await
    }

    async fn subscribe_proofs(&self, account: Address) -> ClientResult<ProofStreams> {
        let mut sub = self
            .call("subscribeProofs", |c| async move {
                c.subscribe_proofs(account).await
            })
            .await?;

        let (deposits_tx, deposits) = watch::channel(None);
        let (balances_tx, balances) = watch::channel(None);
        tokio::spawn(async move {
            while let Some(update) = sub.next().await {
                match update {
                    Ok(ProofUpdate::Deposit(proof)) => {
                        deposits_tx.send_replace(Some(proof));
                    }
                    Ok(ProofUpdate::Balance(proof)) => {
                        balances_tx.send_replace(Some(proof));
                    }
                    Err(e) => warn!(%account, error = %e, "Malformed proof notification"),
                }
                if deposits_tx.is_closed() && balances_tx.is_closed() {
                    break;
                }
            }
            debug!(%account, "Proof subscription ended");
        });
        Ok(ProofStreams { deposits, balances })
    }
}

// =============================================================================
// Remote enclave
// =============================================================================

/// [`Enclave`] proxy talking to an enclave served over JSON-RPC
pub struct RemoteEnclave {
    conn: Connection,
}

impl RemoteEnclave {
    pub async fn connect(config: RpcClientConfig) -> EnclaveResult<Self> {
        let conn = Connection::new(config);
        conn.get()
            .await
            .map_err(|e| EnclaveError::Transport(e.to_string()))?;
        info!(url = %conn.config.url, "Connected to remote enclave");
        Ok(Self { conn })
    }

    async fn call<T, F, Fut>(&self, method: &'static str, call: F) -> EnclaveResult<T>
    where
        F: Fn(Arc<WsClient>) -> Fut,
        Fut: Future<Output = Result<T, WireError>>,
    {
        self.conn.call(method, call).await.map_err(|f| match f {
            CallFailure::Rejected(obj) => enclave_error(&obj),
            CallFailure::Unreachable(msg) => EnclaveError::Transport(msg),
        })
    }
}

#[async_trait]
impl Enclave for RemoteEnclave {
    async fn init(&self) -> EnclaveResult<(Address, Attestation)> {
        let resp = self.call("init", |c| async move { c.init().await }).await?;
        Ok((resp.tee, resp.attestation))
    }

    async fn run(&self, params: Parameters) -> EnclaveResult<()> {
        self.call("run", |c| async move { c.run(params).await }).await
    }

    async fn process_blocks(&self, blocks: Vec<Block>) -> EnclaveResult<()> {
        self.call("processBlocks", |c| {
            let blocks = blocks.clone();
            async move { c.process_blocks(blocks).await }
        })
        .await
    }

    /// Bounded by the request timeout; callers that submit transactions of
    /// future epochs wrap this enclave in a caching enclave.
    async fn process_txs(&self, txs: Vec<Transaction>) -> EnclaveResult<()> {
        self.call("processTransactions", |c| {
            let txs = txs.clone();
            async move { c.process_transactions(txs).await }
        })
        .await
    }

    async fn deposit_proofs(&self) -> EnclaveResult<Vec<DepositProof>> {
        loop {
            let batch = self
                .call("depositProofs", |c| async move { c.deposit_proofs().await })
                .await?;
            if let Some(proofs) = batch {
                return Ok(proofs);
            }
        }
    }

    async fn balance_proofs(&self) -> EnclaveResult<Vec<BalanceProof>> {
        loop {
            let batch = self
                .call("balanceProofs", |c| async move { c.balance_proofs().await })
                .await?;
            if let Some(proofs) = batch {
                return Ok(proofs);
            }
        }
    }

    async fn shutdown(&self) {
        if let Err(e) = self.call("shutdown", |c| async move { c.shutdown().await }).await {
            warn!(error = %e, "Remote enclave shutdown failed");
        }
    }
}
