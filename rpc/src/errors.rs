//! RPC error types and their wire mapping

use erdstall_client::ClientError;
use erdstall_core::Epoch;
use erdstall_enclave::EnclaveError;
use jsonrpsee::types::ErrorObjectOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// RPC error codes following JSON-RPC 2.0 plus Erdstall codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorCode {
    // Standard JSON-RPC errors
    InvalidParams = -32602,
    InternalError = -32603,

    // Erdstall errors (-32000 to -32099)
    ProofNotFound = -32000,
    ProofGone = -32001,
    TransactionRejected = -32002,
    Enclave = -32003,
    Timeout = -32004,
}

impl RpcErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Payload of a `ProofGone` error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofGoneData {
    pub requested: Epoch,
    pub newest: Epoch,
}

/// RPC errors
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Proof not found")]
    ProofNotFound,

    #[error("Proof for epoch {requested} is gone, newest is {newest}")]
    ProofGone { requested: Epoch, newest: Epoch },

    #[error("Transaction rejected: {0}")]
    TransactionRejected(String),

    #[error(transparent)]
    Enclave(EnclaveError),

    #[error("Request timed out")]
    Timeout,

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Server error: {0}")]
    ServerError(String),
}

impl From<RpcError> for ErrorObjectOwned {
    fn from(err: RpcError) -> Self {
        let message = err.to_string();
        match err {
            RpcError::InvalidParams(_) => {
                ErrorObjectOwned::owned(RpcErrorCode::InvalidParams.code(), message, None::<()>)
            }
            RpcError::ProofNotFound => {
                ErrorObjectOwned::owned(RpcErrorCode::ProofNotFound.code(), message, None::<()>)
            }
            RpcError::ProofGone { requested, newest } => ErrorObjectOwned::owned(
                RpcErrorCode::ProofGone.code(),
                message,
                Some(ProofGoneData { requested, newest }),
            ),
            RpcError::TransactionRejected(_) => ErrorObjectOwned::owned(
                RpcErrorCode::TransactionRejected.code(),
                message,
                None::<()>,
            ),
            RpcError::Enclave(e) => {
                ErrorObjectOwned::owned(RpcErrorCode::Enclave.code(), message, Some(e))
            }
            RpcError::Timeout => {
                ErrorObjectOwned::owned(RpcErrorCode::Timeout.code(), message, None::<()>)
            }
            RpcError::InternalError(_) | RpcError::ServerError(_) => {
                ErrorObjectOwned::owned(RpcErrorCode::InternalError.code(), message, None::<()>)
            }
        }
    }
}

impl From<ClientError> for RpcError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::ProofNotFound => RpcError::ProofNotFound,
            ClientError::ProofGone { requested, newest } => {
                RpcError::ProofGone { requested, newest }
            }
            ClientError::Timeout => RpcError::Timeout,
            ClientError::Operator(msg) => RpcError::TransactionRejected(msg),
            other => RpcError::InternalError(other.to_string()),
        }
    }
}

impl From<EnclaveError> for RpcError {
    fn from(err: EnclaveError) -> Self {
        RpcError::Enclave(err)
    }
}

fn data<T: for<'de> Deserialize<'de>>(err: &ErrorObjectOwned) -> Option<T> {
    err.data().and_then(|raw| serde_json::from_str(raw.get()).ok())
}

/// Rebuild the operator error a server reported
pub fn client_error(err: &ErrorObjectOwned) -> ClientError {
    match err.code() {
        c if c == RpcErrorCode::ProofNotFound.code() => ClientError::ProofNotFound,
        c if c == RpcErrorCode::Timeout.code() => ClientError::Timeout,
        c if c == RpcErrorCode::ProofGone.code() => match data::<ProofGoneData>(err) {
            Some(gone) => ClientError::ProofGone {
                requested: gone.requested,
                newest: gone.newest,
            },
            None => ClientError::Operator(err.message().to_string()),
        },
        _ => ClientError::Operator(err.message().to_string()),
    }
}

/// Rebuild the enclave error a server reported
pub fn enclave_error(err: &ErrorObjectOwned) -> EnclaveError {
    if err.code() == RpcErrorCode::Enclave.code() {
        if let Some(e) = data::<EnclaveError>(err) {
            return e;
        }
    }
    EnclaveError::Transport(format!("{} ({})", err.message(), err.code()))
}

/// Result type for RPC operations
pub type RpcResult<T> = Result<T, RpcError>;
