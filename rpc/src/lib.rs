//! Erdstall JSON-RPC surfaces
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  erdstall_*   ┌──────────────────┐  enclave_*   ┌──────────────┐
//! │    Client    │──────────────▶│     Operator     │─────────────▶│   Enclave    │
//! │ RpcOperator- │  WebSocket    │ RpcServer::      │  WebSocket   │ RpcServer::  │
//! │ Client       │◀── proofs ────│ start_operator   │ RemoteEnclave│ start_enclave│
//! └──────────────┘               └──────────────────┘              └──────────────┘
//! ```
//!
//! # Supported Methods
//!
//! ## Operator (`erdstall_` namespace)
//! - `erdstall_addTransaction` - Forward a signed transaction
//! - `erdstall_getDepositProof` - Deposit proof of an account for an epoch
//! - `erdstall_getBalanceProof` - Newest balance proof of an account
//! - `erdstall_subscribeProofs` - Proofs of an account as they are produced
//!
//! ## Enclave (`enclave_` namespace)
//! - `enclave_init`, `enclave_run`, `enclave_shutdown`
//! - `enclave_processBlocks`, `enclave_processTransactions`
//! - `enclave_depositProofs`, `enclave_balanceProofs` - Next proof batch

pub mod client;
pub mod errors;
pub mod methods;
pub mod server;
pub mod types;

pub use client::{RemoteEnclave, RpcClientConfig, RpcOperatorClient};
pub use errors::{RpcError, RpcErrorCode, RpcResult};
pub use server::{RpcConfig, RpcServer};
pub use types::{InitResponse, ProofUpdate};

/// RPC API version
pub const RPC_VERSION: &str = "1.0.0";

/// Default RPC port
pub const DEFAULT_RPC_PORT: u16 = 8545;
