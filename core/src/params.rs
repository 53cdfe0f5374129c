//! Phase parameters
//!
//! Maps block numbers to epochs for the four rolling roles. During phase `p`
//! the deposit epoch is `p`, the transaction epoch `p - 1`, the exit epoch
//! `p - 2` and the freeze-eligible epoch `p - 3`.

use serde::{Deserialize, Serialize};

use crate::errors::{CoreError, CoreResult};
use crate::types::Epoch;
use crate::Address;

/// Immutable per-deployment configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameters {
    /// Signer identity of the enclave
    pub tee: Address,
    /// Blocks per phase
    pub phase_duration: u64,
    /// Blocks at the start of each phase reserved for operator responses
    pub response_duration: u64,
    /// Confirmations required before a block is treated as final
    pub pow_depth: u64,
    /// First block of epoch 0 (the contract's `bigBang`)
    pub init_block: u64,
    /// Contract identity, part of every signed encoding
    pub contract: Address,
}

impl Parameters {
    /// Check the relations between the durations
    pub fn validate(&self) -> CoreResult<()> {
        if self.phase_duration == 0 {
            return Err(CoreError::InvalidParameters(
                "phase duration must be non-zero".into(),
            ));
        }
        if self.pow_depth >= self.response_duration {
            return Err(CoreError::InvalidParameters(format!(
                "pow depth {} must be smaller than response duration {}",
                self.pow_depth, self.response_duration
            )));
        }
        if 2 * self.response_duration > self.phase_duration {
            return Err(CoreError::InvalidParameters(format!(
                "response duration {} exceeds half the phase duration {}",
                self.response_duration, self.phase_duration
            )));
        }
        Ok(())
    }

    /// Epoch of `block`, rejecting blocks before the initial block
    pub fn checked_epoch(&self, block: u64) -> CoreResult<Epoch> {
        if block < self.init_block {
            return Err(CoreError::BlockBeforeInit {
                block,
                init: self.init_block,
            });
        }
        Ok(self.epoch(block))
    }

    /// `(block - init_block) / phase_duration`. Callers reject blocks before
    /// the initial block.
    pub fn epoch(&self, block: u64) -> Epoch {
        debug_assert!(block >= self.init_block, "block precedes init block");
        block.saturating_sub(self.init_block) / self.phase_duration
    }

    /// Epoch accepting deposits at `block`
    pub fn deposit_epoch(&self, block: u64) -> Epoch {
        self.epoch(block)
    }

    /// Epoch accepting transfers at `block`, one phase behind deposits
    pub fn tx_epoch(&self, block: u64) -> Option<Epoch> {
        self.epoch(block).checked_sub(1)
    }

    /// Epoch accepting exits at `block`
    pub fn exit_epoch(&self, block: u64) -> Option<Epoch> {
        self.epoch(block).checked_sub(2)
    }

    /// Epoch whose exits are final and may be withdrawn or frozen at `block`
    pub fn freeze_epoch(&self, block: u64) -> Option<Epoch> {
        self.epoch(block).checked_sub(3)
    }

    /// First block of the phase in which `epoch` is the deposit epoch
    pub fn phase_start(&self, epoch: Epoch) -> u64 {
        self.init_block + epoch * self.phase_duration
    }

    /// Whether `block` is the last block of its phase
    pub fn is_last_block_of_phase(&self, block: u64) -> bool {
        (block - self.init_block) % self.phase_duration == self.phase_duration - 1
    }

    /// Whether `block` lies inside the response window of its phase
    pub fn in_response_window(&self, block: u64) -> bool {
        (block - self.init_block) % self.phase_duration < self.response_duration
    }

    /// Block by which the deposit proofs of `epoch` must have been delivered
    pub fn deposit_proof_deadline(&self, epoch: Epoch) -> u64 {
        self.phase_start(epoch + 1) + self.response_duration
    }

    /// Block by which the balance proofs of `epoch` must have been delivered.
    /// Also the deadline for answering a challenge on `epoch`.
    pub fn balance_proof_deadline(&self, epoch: Epoch) -> u64 {
        self.phase_start(epoch + 2) + self.response_duration
    }

    /// First block at which exits of `epoch` may be withdrawn
    pub fn exit_window_end(&self, epoch: Epoch) -> u64 {
        self.phase_start(epoch + 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> Parameters {
        Parameters {
            tee: Address::repeat_byte(0x11),
            phase_duration: 10,
            response_duration: 3,
            pow_depth: 1,
            init_block: 100,
            contract: Address::repeat_byte(0x22),
        }
    }

    #[test]
    fn test_epoch_roles() {
        let p = params();

        assert_eq!(p.deposit_epoch(100), 0);
        assert_eq!(p.tx_epoch(100), None);
        assert_eq!(p.exit_epoch(109), None);

        assert_eq!(p.deposit_epoch(135), 3);
        assert_eq!(p.tx_epoch(135), Some(2));
        assert_eq!(p.exit_epoch(135), Some(1));
        assert_eq!(p.freeze_epoch(135), Some(0));
    }

    #[test]
    fn test_checked_epoch_rejects_early_blocks() {
        let p = params();
        assert_eq!(
            p.checked_epoch(99),
            Err(CoreError::BlockBeforeInit { block: 99, init: 100 })
        );
        assert_eq!(p.checked_epoch(119), Ok(1));
    }

    #[test]
    fn test_phase_boundaries() {
        let p = params();

        assert!(!p.is_last_block_of_phase(100));
        assert!(p.is_last_block_of_phase(109));
        assert!(p.is_last_block_of_phase(119));
        assert_eq!(p.phase_start(2), 120);

        assert!(p.in_response_window(120));
        assert!(p.in_response_window(122));
        assert!(!p.in_response_window(123));
    }

    #[test]
    fn test_deadlines() {
        let p = params();

        assert_eq!(p.deposit_proof_deadline(0), 113);
        assert_eq!(p.balance_proof_deadline(0), 123);
        assert_eq!(p.exit_window_end(0), 130);
    }

    #[test]
    fn test_validate() {
        assert!(params().validate().is_ok());

        let mut p = params();
        p.phase_duration = 0;
        assert!(p.validate().is_err());

        let mut p = params();
        p.pow_depth = 3;
        assert!(p.validate().is_err());

        let mut p = params();
        p.response_duration = 6;
        assert!(p.validate().is_err());
    }
}
