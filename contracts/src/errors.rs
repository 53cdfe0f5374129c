//! Error types for contract calls

use erdstall_core::{Address, CoreError, Epoch, U256};
use thiserror::Error;

/// Reasons a contract call reverts or the chain connection fails
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContractError {
    #[error("Contract frozen at epoch {0}")]
    Frozen(Epoch),

    #[error("Contract not frozen")]
    NotFrozen,

    #[error("Insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: U256, need: U256 },

    #[error("Zero value")]
    ZeroValue,

    #[error("Account {account} already deposited in epoch {epoch}")]
    DoubleDeposit { epoch: Epoch, account: Address },

    #[error("Wrong epoch: expected {expected}, got {got}")]
    WrongEpoch { expected: Epoch, got: Epoch },

    #[error("Proof is not for the sender")]
    NotOwner,

    #[error("Proof signature invalid")]
    InvalidProof,

    #[error("Account {account} already exited epoch {epoch}")]
    AlreadyExited { epoch: Epoch, account: Address },

    #[error("Already withdrawn")]
    AlreadyWithdrawn,

    #[error("Nothing to withdraw")]
    NothingToWithdraw,

    #[error("Too early: possible from block {ready_at}")]
    TooEarly { ready_at: u64 },

    #[error("Not allowed during the response window")]
    InResponseWindow,

    #[error("Challenge already pending")]
    ChallengePending,

    #[error("No pending challenge")]
    NoChallenge,

    #[error("Nothing to challenge")]
    NothingToChallenge,

    #[error("Response deadline {deadline} passed")]
    DeadlinePassed { deadline: u64 },

    #[error("Response deadline {deadline} not reached")]
    DeadlineNotReached { deadline: u64 },

    #[error("Value mismatch: expected {expected}, got {got}")]
    ValueMismatch { expected: U256, got: U256 },

    #[error("Unknown block {0}")]
    UnknownBlock(u64),

    #[error("Chain connection closed")]
    ChainClosed,

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type for contract calls
pub type ContractResult<T> = Result<T, ContractError>;
