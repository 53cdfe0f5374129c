//! Operator errors

use erdstall_client::ClientError;
use erdstall_contracts::ContractError;
use erdstall_core::{Address, CoreError, Epoch};
use erdstall_enclave::EnclaveError;
use thiserror::Error;

/// Operator result type
pub type OperatorResult<T> = Result<T, OperatorError>;

/// Operator errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperatorError {
    /// Enclave error
    #[error("Enclave error: {0}")]
    Enclave(#[from] EnclaveError),

    /// Contract error
    #[error("Contract error: {0}")]
    Contract(#[from] ContractError),

    #[error(transparent)]
    Core(#[from] CoreError),

    /// A proof the operator needs is not available
    #[error("Proof unavailable: {0}")]
    Proof(#[from] ClientError),

    #[error("Challenge of epoch {epoch} expired at block {deadline}")]
    ChallengeExpired { epoch: Epoch, deadline: u64 },

    /// The contract was deployed for another enclave
    #[error("Contract expects enclave {expected}, connected enclave is {got}")]
    WrongEnclave { expected: Address, got: Address },
}
