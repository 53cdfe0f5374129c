//! Typed contract events

use erdstall_core::{Address, Balance, Epoch, U256};
use serde::{Deserialize, Serialize};

/// Event emitted by the contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractEvent {
    Deposited(Balance),
    Exiting(Balance),
    Withdrawn {
        epoch: Epoch,
        account: Address,
        value: U256,
    },
    Challenged {
        epoch: Epoch,
        account: Address,
    },
    ChallengeResponded(Balance),
    DepositChallenged {
        epoch: Epoch,
        account: Address,
    },
    DepositChallengeResponded(Balance),
    Frozen {
        epoch: Epoch,
    },
}

impl ContractEvent {
    /// Account the event concerns, if any
    pub fn account(&self) -> Option<Address> {
        match self {
            ContractEvent::Deposited(b)
            | ContractEvent::Exiting(b)
            | ContractEvent::ChallengeResponded(b)
            | ContractEvent::DepositChallengeResponded(b) => Some(b.account),
            ContractEvent::Withdrawn { account, .. }
            | ContractEvent::Challenged { account, .. }
            | ContractEvent::DepositChallenged { account, .. } => Some(*account),
            ContractEvent::Frozen { .. } => None,
        }
    }
}

/// A contract event together with the block that included it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEvent {
    pub block: u64,
    pub event: ContractEvent,
}
