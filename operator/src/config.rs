//! Operator configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::store::DEFAULT_RETENTION;

/// Operator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorConfig {
    /// How long `getDepositProof` waits for a proof that does not exist yet.
    /// Must stay below the clients' request timeout.
    pub deposit_proof_wait: Duration,
    /// Epochs of proofs kept for lookups by epoch
    pub proof_retention: u64,
    /// Answer deposit and balance challenges on chain
    pub respond_to_challenges: bool,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            deposit_proof_wait: Duration::from_secs(15),
            proof_retention: DEFAULT_RETENTION,
            respond_to_challenges: true,
        }
    }
}

impl OperatorConfig {
    /// Short waits for in-process deployments
    pub fn local() -> Self {
        Self {
            deposit_proof_wait: Duration::from_secs(4),
            ..Default::default()
        }
    }

    pub fn testnet() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deposit_wait_below_client_timeout() {
        assert!(OperatorConfig::default().deposit_proof_wait < Duration::from_secs(20));
        assert!(OperatorConfig::local().deposit_proof_wait < Duration::from_secs(5));
    }
}
