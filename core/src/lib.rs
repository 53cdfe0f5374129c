//! Erdstall Core
//!
//! Shared data model and cryptographic plumbing used by the enclave, the
//! operator and the client.
//!
//! # Modules
//!
//! - [`params`]: per-deployment parameters and the block → epoch mapping
//! - [`types`]: balances, transactions and the signed proofs
//! - [`abi`]: Solidity `abi.encode` compatible encoder
//! - [`codec`]: tag-prefixed encodings that get signed
//! - [`signer`]: Ethereum-style recoverable ECDSA signatures
//! - [`block`]: confirmed blocks, receipts and contract event logs
//!
//! The encodings in [`codec`] are recomputed by the on-chain contract when
//! proofs are supplied in disputes, so they must match it byte for byte.

pub mod abi;
pub mod block;
pub mod codec;
mod errors;
pub mod params;
pub mod signer;
pub mod types;

pub use alloy_primitives::{keccak256, Address, B256, U256};

pub use block::{Block, ContractLog, Log, Receipt};
pub use errors::{CoreError, CoreResult};
pub use params::Parameters;
pub use signer::{Signature, Signer};
pub use types::{Account, Balance, BalanceProof, DepositProof, Epoch, Transaction};
