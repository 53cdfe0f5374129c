//! Client error types

use erdstall_contracts::ContractError;
use erdstall_core::{Address, CoreError, Epoch};
use thiserror::Error;

/// Errors raised by the client and its operator transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("Contract call failed: {0}")]
    Contract(#[from] ContractError),

    #[error("Operator error: {0}")]
    Operator(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Proof not available")]
    ProofNotFound,

    #[error("Proof for epoch {requested} is gone, newest is {newest}")]
    ProofGone { requested: Epoch, newest: Epoch },

    #[error("Invalid proof: {0}")]
    InvalidProof(String),

    #[error("No balance proof for epoch {0}")]
    NoBalanceProof(Epoch),

    #[error("No transaction epoch yet")]
    NoTransactionEpoch,

    #[error("No exit epoch yet")]
    NoExitEpoch,

    #[error("Signer {signer} does not own chain account {chain}")]
    AccountMismatch { signer: Address, chain: Address },

    #[error("Contract parameters differ from the expected deployment")]
    WrongParameters,

    #[error("Request timed out")]
    Timeout,

    #[error("Session closed")]
    Closed,

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
