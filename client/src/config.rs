//! Client configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Client session settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Bound on a single operator request
    pub request_timeout: Duration,
    /// Pause between deposit-proof polls after a failed request
    pub proof_poll_interval: Duration,
    /// Capacity of each operation's status channel
    pub status_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(20),
            proof_poll_interval: Duration::from_secs(2),
            status_buffer: 32,
        }
    }
}

impl ClientConfig {
    /// Settings for a local dev network with fast blocks
    pub fn local() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            proof_poll_interval: Duration::from_millis(200),
            ..Default::default()
        }
    }
}
