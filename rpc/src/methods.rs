//! RPC method definitions
//!
//! Defines both JSON-RPC APIs using jsonrpsee macros.

use erdstall_core::{
    Address, BalanceProof, Block, DepositProof, Epoch, Parameters, Transaction,
};
use jsonrpsee::core::{RpcResult, SubscriptionResult};
use jsonrpsee::proc_macros::rpc;

use crate::types::{InitResponse, ProofUpdate};

/// Client-facing operator API, prefixed with `erdstall_`
#[rpc(server, client, namespace = "erdstall")]
pub trait OperatorRpc {
    /// Forward a signed transaction to the enclave
    #[method(name = "addTransaction")]
    async fn add_transaction(&self, tx: Transaction) -> RpcResult<()>;

    /// Deposit proof of `account` for `epoch`, waiting server-side until it exists
    #[method(name = "getDepositProof")]
    async fn get_deposit_proof(&self, epoch: Epoch, account: Address) -> RpcResult<DepositProof>;

    /// Newest balance proof of `account`
    #[method(name = "getBalanceProof")]
    async fn get_balance_proof(&self, account: Address) -> RpcResult<BalanceProof>;

    /// Proofs for `account` as they are produced
    #[subscription(name = "subscribeProofs" => "proof", unsubscribe = "unsubscribeProofs", item = ProofUpdate)]
    async fn subscribe_proofs(&self, account: Address) -> SubscriptionResult;
}

/// Enclave API consumed by the operator, prefixed with `enclave_`
#[rpc(server, client, namespace = "enclave")]
pub trait EnclaveRpc {
    #[method(name = "init")]
    async fn init(&self) -> RpcResult<InitResponse>;

    #[method(name = "run")]
    async fn run(&self, params: Parameters) -> RpcResult<()>;

    #[method(name = "processBlocks")]
    async fn process_blocks(&self, blocks: Vec<Block>) -> RpcResult<()>;

    #[method(name = "processTransactions")]
    async fn process_transactions(&self, txs: Vec<Transaction>) -> RpcResult<()>;

    /// Next deposit proof batch, or null if none arrived within the server's wait
    #[method(name = "depositProofs")]
    async fn deposit_proofs(&self) -> RpcResult<Option<Vec<DepositProof>>>;

    /// Next balance proof batch, or null if none arrived within the server's wait
    #[method(name = "balanceProofs")]
    async fn balance_proofs(&self) -> RpcResult<Option<Vec<BalanceProof>>>;

    #[method(name = "shutdown")]
    async fn shutdown(&self) -> RpcResult<()>;
}
