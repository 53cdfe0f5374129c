//! Core error types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the core data model
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoreError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Block {block} precedes the initial block {init}")]
    BlockBeforeInit { block: u64, init: u64 },

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Malformed log: {0}")]
    MalformedLog(String),
}

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;
