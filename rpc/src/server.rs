//! RPC server implementation

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use erdstall_client::{OperatorApi, ProofStreams};
use erdstall_core::{Address, BalanceProof, Block, DepositProof, Epoch, Parameters, Transaction};
use erdstall_enclave::{Enclave, EnclaveResult};
use jsonrpsee::core::{async_trait, RpcResult, SubscriptionResult};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObjectOwned;
use jsonrpsee::{Methods, PendingSubscriptionSink, SubscriptionMessage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::RpcError;
use crate::methods::{EnclaveRpcServer, OperatorRpcServer};
use crate::types::{InitResponse, ProofUpdate};
use crate::DEFAULT_RPC_PORT;

/// RPC server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcConfig {
    /// HTTP and WebSocket bind address
    pub addr: SocketAddr,
    /// Maximum request size in bytes
    pub max_request_size: u32,
    /// Maximum response size in bytes
    pub max_response_size: u32,
    /// Maximum concurrent connections
    pub max_connections: u32,
    /// How long a proof-batch request waits before answering null.
    /// Must stay below the clients' request timeout.
    pub proof_batch_wait: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_RPC_PORT)),
            max_request_size: 10 * 1024 * 1024, // 10MB
            max_response_size: 10 * 1024 * 1024,
            max_connections: 100,
            proof_batch_wait: Duration::from_secs(10),
        }
    }
}

impl RpcConfig {
    /// Loopback server on an ephemeral port
    pub fn local() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            proof_batch_wait: Duration::from_secs(2),
            ..Default::default()
        }
    }

    /// Server reachable from other hosts
    pub fn testnet() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_RPC_PORT)),
            ..Default::default()
        }
    }
}

/// A running RPC server
pub struct RpcServer {
    addr: SocketAddr,
    handle: ServerHandle,
}

impl RpcServer {
    /// Serve the client-facing API backed by `service`
    pub async fn start_operator<S: OperatorApi + 'static>(
        config: &RpcConfig,
        service: S,
    ) -> Result<Self, RpcError> {
        let handler = OperatorHandler {
            service: Arc::new(service),
        };
        Self::start(config, handler.into_rpc().into(), "operator").await
    }

    /// Serve the enclave API backed by `enclave`
    pub async fn start_enclave<E: Enclave + 'static>(
        config: &RpcConfig,
        enclave: E,
    ) -> Result<Self, RpcError> {
        let handler = EnclaveHandler {
            enclave: Arc::new(enclave),
            batch_wait: config.proof_batch_wait,
        };
        Self::start(config, handler.into_rpc().into(), "enclave").await
    }

    async fn start(config: &RpcConfig, methods: Methods, api: &str) -> Result<Self, RpcError> {
        let server = Server::builder()
            .max_request_body_size(config.max_request_size)
            .max_response_body_size(config.max_response_size)
            .max_connections(config.max_connections)
            .build(config.addr)
            .await
            .map_err(|e| RpcError::ServerError(e.to_string()))?;
        let addr = server
            .local_addr()
            .map_err(|e| RpcError::ServerError(e.to_string()))?;

        info!(%addr, api, "Starting RPC server");
        let handle = server.start(methods);
        Ok(Self { addr, handle })
    }

    /// Bound address, with the actual port when configured with port 0
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// WebSocket URL clients connect to
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Stop the RPC server
    pub fn stop(&self) -> Result<(), RpcError> {
        info!(addr = %self.addr, "Stopping RPC server");
        self.handle
            .stop()
            .map_err(|e| RpcError::ServerError(format!("{:?}", e)))
    }

    /// Resolves once the server stopped
    pub async fn stopped(self) {
        self.handle.stopped().await
    }
}

fn rpc_err(err: impl Into<RpcError>) -> ErrorObjectOwned {
    err.into().into()
}

// =============================================================================
// Operator API
// =============================================================================

struct OperatorHandler<S> {
    service: Arc<S>,
}

#[async_trait]
impl<S: OperatorApi + 'static> OperatorRpcServer for OperatorHandler<S> {
    async fn add_transaction(&self, tx: Transaction) -> RpcResult<()> {
        debug!(sender = %tx.sender, nonce = tx.nonce, epoch = tx.epoch, "addTransaction");
        self.service.add_transaction(tx).await.map_err(rpc_err)
    }

    async fn get_deposit_proof(&self, epoch: Epoch, account: Address) -> RpcResult<DepositProof> {
        self.service
            .get_deposit_proof(epoch, account)
            .await
            .map_err(rpc_err)
    }

    async fn get_balance_proof(&self, account: Address) -> RpcResult<BalanceProof> {
        self.service.get_balance_proof(account).await.map_err(rpc_err)
    }

    async fn subscribe_proofs(
        &self,
        pending: PendingSubscriptionSink,
        account: Address,
    ) -> SubscriptionResult {
        let ProofStreams {
            mut deposits,
            mut balances,
        } = match self.service.subscribe_proofs(account).await {
            Ok(streams) => streams,
            Err(e) => {
                pending.reject(rpc_err(e)).await;
                return Ok(());
            }
        };
        let sink = pending.accept().await?;
        debug!(%account, "Proof subscription opened");

        // replay what is already buffered
        deposits.mark_changed();
        balances.mark_changed();
        loop {
            let update = tokio::select! {
                _ = sink.closed() => break,
                changed = deposits.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let proof = deposits.borrow_and_update().clone();
                    proof.map(ProofUpdate::Deposit)
                }
                changed = balances.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let proof = balances.borrow_and_update().clone();
                    proof.map(ProofUpdate::Balance)
                }
            };
            if let Some(update) = update {
                let msg = SubscriptionMessage::from_json(&update)?;
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
        }
        debug!(%account, "Proof subscription closed");
        Ok(())
    }
}

// =============================================================================
// Enclave API
// =============================================================================

struct EnclaveHandler<E> {
    enclave: Arc<E>,
    batch_wait: Duration,
}

impl<E: Enclave> EnclaveHandler<E> {
    /// Wait up to `batch_wait` for the next batch. Dropping the wait loses
    /// nothing since the enclave's batch queue is only read on completion.
    async fn next_batch<T>(
        &self,
        batch: impl std::future::Future<Output = EnclaveResult<Vec<T>>>,
    ) -> RpcResult<Option<Vec<T>>> {
        match tokio::time::timeout(self.batch_wait, batch).await {
            Ok(Ok(proofs)) => Ok(Some(proofs)),
            Ok(Err(e)) => Err(rpc_err(e)),
            Err(_) => Ok(None),
        }
    }
}

#[async_trait]
impl<E: Enclave + 'static> EnclaveRpcServer for EnclaveHandler<E> {
    async fn init(&self) -> RpcResult<InitResponse> {
        let (tee, attestation) = self.enclave.init().await.map_err(rpc_err)?;
        Ok(InitResponse { tee, attestation })
    }

    async fn run(&self, params: Parameters) -> RpcResult<()> {
        self.enclave.run(params).await.map_err(rpc_err)
    }

    async fn process_blocks(&self, blocks: Vec<Block>) -> RpcResult<()> {
        self.enclave.process_blocks(blocks).await.map_err(rpc_err)
    }

    async fn process_transactions(&self, txs: Vec<Transaction>) -> RpcResult<()> {
        self.enclave.process_txs(txs).await.map_err(rpc_err)
    }

    async fn deposit_proofs(&self) -> RpcResult<Option<Vec<DepositProof>>> {
        self.next_batch(self.enclave.deposit_proofs()).await
    }

    async fn balance_proofs(&self) -> RpcResult<Option<Vec<BalanceProof>>> {
        self.next_batch(self.enclave.balance_proofs()).await
    }

    async fn shutdown(&self) -> RpcResult<()> {
        self.enclave.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_config_default() {
        let config = RpcConfig::default();
        assert_eq!(config.addr.port(), 8545);
        assert!(config.proof_batch_wait < Duration::from_secs(20));
    }

    #[test]
    fn test_rpc_config_local_uses_ephemeral_port() {
        assert_eq!(RpcConfig::local().addr.port(), 0);
        assert!(RpcConfig::testnet().addr.ip().is_unspecified());
    }
}
