//! Operator trust

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

/// Client-local belief about the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trust {
    /// The last proof arrived in time and verified
    Trusted,
    /// The operator missed a deadline
    Untrusted,
    /// A proof failed to verify or the chain could not be read
    Unknown,
}

impl fmt::Display for Trust {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trust::Trusted => write!(f, "trusted"),
            Trust::Untrusted => write!(f, "untrusted"),
            Trust::Unknown => write!(f, "unknown"),
        }
    }
}

/// Publishes trust changes
#[derive(Debug)]
pub struct TrustTracker {
    tx: watch::Sender<Trust>,
}

impl TrustTracker {
    pub fn new(initial: Trust) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    pub fn get(&self) -> Trust {
        *self.tx.borrow()
    }

    pub fn set(&self, trust: Trust) {
        let old = self.tx.send_replace(trust);
        if old != trust {
            info!(from = %old, to = %trust, "Operator trust changed");
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Trust> {
        self.tx.subscribe()
    }
}
