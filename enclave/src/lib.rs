//! Erdstall Enclave
//!
//! The trusted half of the rollup. It follows the contract's Deposited and
//! Exiting events through confirmed blocks, applies signed transfers, and
//! signs deposit and balance proofs at every phase end.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ Enclave (LocalEnclave, CachingEnclave<E>, remote proxy)  │
//! │      ↓                                                   │
//! │ EngineHandle ── block task ──── BlockProcessor           │
//! │            │        │ phase shift (deposits, exiters)    │
//! │            │        ↓                                    │
//! │            └─── tx task ─────── TxProcessor              │
//! │                                                          │
//! │ BlockLedger · EpochSnapshot · ProofCache                 │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! During phase `p` the deposit epoch is `p`, the transaction epoch `p - 1`
//! and the exit epoch `p - 2`. The last confirmed block of a phase seals the
//! transaction epoch into the new exit epoch and retires the deposit epoch
//! into the next transaction epoch.

pub mod blocks;
pub mod caching;
pub mod engine;
pub mod epoch;
mod errors;
pub mod ledger;
pub mod local;
pub mod proofs;
pub mod txs;

use async_trait::async_trait;
use erdstall_core::{Address, BalanceProof, Block, DepositProof, Parameters, Transaction};
use serde::{Deserialize, Serialize};

pub use caching::CachingEnclave;
pub use engine::{EngineConfig, EngineHandle};
pub use epoch::EpochSnapshot;
pub use errors::{EnclaveError, EnclaveResult};
pub use ledger::BlockLedger;
pub use local::LocalEnclave;

/// Attestation report binding the enclave identity to its code
///
/// Opaque to this crate. An in-process enclave issues an empty report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    #[serde(with = "hex_bytes")]
    pub report: Vec<u8>,
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(serde::de::Error::custom)
    }
}

/// Capability surface of an enclave, local or remote
#[async_trait]
pub trait Enclave: Send + Sync {
    /// Identity the enclave signs with, plus its attestation
    async fn init(&self) -> EnclaveResult<(Address, Attestation)>;

    /// Start processing for a deployment. Returns once the engine runs.
    async fn run(&self, params: Parameters) -> EnclaveResult<()>;

    /// Feed consecutive blocks
    async fn process_blocks(&self, blocks: Vec<Block>) -> EnclaveResult<()>;

    /// Apply transactions. May block until a future epoch opens.
    async fn process_txs(&self, txs: Vec<Transaction>) -> EnclaveResult<()>;

    /// Next batch of deposit proofs
    async fn deposit_proofs(&self) -> EnclaveResult<Vec<DepositProof>>;

    /// Next batch of balance proofs
    async fn balance_proofs(&self) -> EnclaveResult<Vec<BalanceProof>>;

    async fn shutdown(&self);
}

#[async_trait]
impl<E: Enclave + ?Sized> Enclave for std::sync::Arc<E> {
    async fn init(&self) -> EnclaveResult<(Address, Attestation)> {
        (**self).init().await
    }

    async fn run(&self, params: Parameters) -> EnclaveResult<()> {
        (**self).run(params).await
    }

    async fn process_blocks(&self, blocks: Vec<Block>) -> EnclaveResult<()> {
        (**self).process_blocks(blocks).await
    }

    async fn process_txs(&self, txs: Vec<Transaction>) -> EnclaveResult<()> {
        (**self).process_txs(txs).await
    }

    async fn deposit_proofs(&self) -> EnclaveResult<Vec<DepositProof>> {
        (**self).deposit_proofs().await
    }

    async fn balance_proofs(&self) -> EnclaveResult<Vec<BalanceProof>> {
        (**self).balance_proofs().await
    }

    async fn shutdown(&self) {
        (**self).shutdown().await
    }
}

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::caching::CachingEnclave;
    pub use crate::errors::{EnclaveError, EnclaveResult};
    pub use crate::local::LocalEnclave;
    pub use crate::{Attestation, Enclave};
}
