//! Erdstall Contract Surface
//!
//! The on-chain half of the protocol as seen from off-chain code.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────┐
//! │ ClientContract / OperatorContract (calls)         │
//! │      ↓                                            │
//! │ ChainReader (head, events, blocks, bigBang)       │
//! │      ↓                                            │
//! │ SimulatedChain ── ContractState (contract rules)  │
//! └───────────────────────────────────────────────────┘
//! ```
//!
//! Deposited and Exiting events are also written as logs into the mined
//! block, where the enclave picks them up. Clients follow the typed
//! [`ChainEvent`] broadcast instead.

pub mod errors;
pub mod events;
pub mod simulated;
pub mod state;
pub mod surface;

pub use errors::{ContractError, ContractResult};
pub use events::{ChainEvent, ContractEvent};
pub use simulated::{Deployment, SimulatedAccount, SimulatedChain};
pub use state::{Challenge, ChallengeKind, ContractState};
pub use surface::{wait_for_block, ChainReader, ClientContract, Inclusion, OperatorContract};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::errors::{ContractError, ContractResult};
    pub use crate::events::{ChainEvent, ContractEvent};
    pub use crate::simulated::{Deployment, SimulatedAccount, SimulatedChain};
    pub use crate::surface::{wait_for_block, ChainReader, ClientContract, Inclusion, OperatorContract};
}
