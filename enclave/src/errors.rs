//! Enclave error types

use erdstall_core::{Address, CoreError, Epoch, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the enclave
///
/// `Clone` so that a fatal error can be handed to every caller that arrives
/// after the engine halted, serializable so a remote enclave reports the
/// same variant.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnclaveError {
    // Ledger errors
    #[error("Non-consecutive block: expected {expected}, got {got}")]
    NonConsecutiveBlock { expected: u64, got: u64 },

    #[error("Parent hash mismatch at block {0}")]
    ParentMismatch(u64),

    // Block event errors
    #[error("Event for epoch {got} does not match the live epoch {expected:?}")]
    EpochMismatch { expected: Option<Epoch>, got: Epoch },

    #[error("Account {account} already deposited in epoch {epoch}")]
    DoubleDeposit { epoch: Epoch, account: Address },

    #[error("Exit of {account} for {got} does not match the recorded balance {expected}")]
    ExitMismatch {
        account: Address,
        expected: U256,
        got: U256,
    },

    #[error("Events of block {number} rejected: {reason}")]
    RejectedBlock {
        number: u64,
        reason: Box<EnclaveError>,
    },

    // Transaction errors
    #[error("Invalid transaction signature")]
    InvalidSignature,

    #[error("Invalid nonce: expected {expected}, got {got}")]
    InvalidNonce { expected: u64, got: u64 },

    #[error("Insufficient balance: have {have}, need {need}")]
    InsufficientBalance { have: U256, need: U256 },

    #[error("Stale epoch {got}, the live transaction epoch is {current}")]
    StaleEpoch { current: Epoch, got: Epoch },

    #[error("Account {0} exited")]
    ExitedAccount(Address),

    // Fatal errors
    #[error("Non-consecutive epoch: expected {expected}, got {got}")]
    NonConsecutiveEpoch { expected: Epoch, got: Epoch },

    #[error("Exiting account {0} sent value in the epoch being sealed")]
    InconsistentExit(Address),

    #[error("Balance overflow")]
    Overflow,

    // Lifecycle errors
    #[error("Enclave not running")]
    NotRunning,

    #[error("Enclave already running")]
    AlreadyRunning,

    #[error("Parameters name enclave {got}, this enclave is {expected}")]
    WrongIdentity { expected: Address, got: Address },

    #[error("Enclave halted: {0}")]
    Halted(Box<EnclaveError>),

    #[error("Enclave shut down")]
    Shutdown,

    #[error("Enclave unreachable: {0}")]
    Transport(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl EnclaveError {
    /// Whether the engine's own bookkeeping can no longer be trusted
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EnclaveError::NonConsecutiveEpoch { .. }
                | EnclaveError::InconsistentExit(_)
                | EnclaveError::Overflow
                | EnclaveError::Halted(_)
        )
    }
}

/// Result type for enclave operations
pub type EnclaveResult<T> = Result<T, EnclaveError>;
