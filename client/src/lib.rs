//! # Erdstall Client
//!
//! Client side of the Erdstall protocol. A [`Client`] follows the contract
//! and the operator for one account and turns missed operator deadlines into
//! on-chain challenges.
//!
//! ## Operations
//!
//! | Operation   | Outcome                                                   |
//! |-------------|-----------------------------------------------------------|
//! | `deposit`   | deposit proof, or deposit challenge and reclaim           |
//! | `transfer`  | signed transaction handed to the operator                 |
//! | `leave`     | exit with the exit-epoch proof, then withdraw             |
//! | `challenge` | on-chain answer and withdrawal, or reclaim and freeze     |
//!
//! Each operation runs in the background and reports through a
//! [`StatusStream`]; the stream closes when the operation is done.

pub mod api;
pub mod balance;
pub mod client;
pub mod config;
pub mod errors;
pub mod status;
pub mod trust;
mod watchers;

pub use api::{OperatorApi, ProofStreams};
pub use balance::{BalanceTable, EpochBalance};
pub use client::Client;
pub use config::ClientConfig;
pub use errors::{ClientError, ClientResult};
pub use status::{Status, StatusSender, StatusStream};
pub use trust::{Trust, TrustTracker};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::api::{OperatorApi, ProofStreams};
    pub use crate::client::Client;
    pub use crate::config::ClientConfig;
    pub use crate::errors::{ClientError, ClientResult};
    pub use crate::status::{Status, StatusStream};
    pub use crate::trust::Trust;
}
