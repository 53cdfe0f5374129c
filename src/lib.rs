//! Erdstall: enclave-backed rollup with an on-chain dispute protocol
//!
//! This is the root crate that re-exports all Erdstall components for
//! integration testing and provides unified access to the protocol.
//!
//! ## Architecture Overview
//!
//! An enclave follows the contract's deposits and exits through confirmed
//! blocks, applies signed transfers, and signs a deposit proof and a balance
//! proof for every account at each phase end. Clients verify these proofs
//! and fall back to on-chain challenges whenever the operator misses a
//! deadline; an unanswered challenge freezes the contract and everyone
//! withdraws their last proven balance.
//!
//! ## Crate Organization
//!
//! - `erdstall-core`: parameters, signed data model, ABI codec, block model
//! - `erdstall-contracts`: contract surface and the simulated chain
//! - `erdstall-enclave`: block ledger, epoch engine, `Enclave` implementations
//! - `erdstall-client`: client protocol state machine
//! - `erdstall-rpc`: JSON-RPC for clients and for remote enclaves
//! - `erdstall-operator`: block relay, proof store, challenge responder

pub use erdstall_client as client;
pub use erdstall_contracts as contracts;
pub use erdstall_core as core;
pub use erdstall_enclave as enclave;
pub use erdstall_operator as operator;
pub use erdstall_rpc as rpc;

/// Erdstall version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use erdstall_client::{Client, ClientConfig, ClientError, OperatorApi, Status, Trust};
    pub use erdstall_contracts::{
        ChainEvent, ChainReader, ClientContract, ContractEvent, Deployment, OperatorContract,
        SimulatedChain,
    };
    pub use erdstall_core::{
        Address, Balance, BalanceProof, DepositProof, Epoch, Parameters, Signer, Transaction, U256,
    };
    pub use erdstall_enclave::{CachingEnclave, Enclave, EnclaveError, LocalEnclave};
    pub use erdstall_operator::{Operator, OperatorConfig};
    pub use erdstall_rpc::{RemoteEnclave, RpcClientConfig, RpcConfig, RpcOperatorClient, RpcServer};
}
