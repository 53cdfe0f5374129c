//! Local block ledger
//!
//! Contiguous run of blocks starting at `offset`. Blocks are accepted only
//! as the direct successor of the head; nothing is reorganized.

use std::collections::VecDeque;

use erdstall_core::Block;
use tracing::trace;

use crate::errors::{EnclaveError, EnclaveResult};

#[derive(Debug, Default)]
pub struct BlockLedger {
    offset: u64,
    blocks: VecDeque<Block>,
}

impl BlockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of the oldest retained block
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn head(&self) -> Option<&Block> {
        self.blocks.back()
    }

    pub fn get(&self, number: u64) -> Option<&Block> {
        let index = number.checked_sub(self.offset)?;
        self.blocks.get(usize::try_from(index).ok()?)
    }

    /// Block `depth` blocks below the head, if retained
    pub fn confirmed(&self, depth: u64) -> Option<&Block> {
        let head = self.head()?.number;
        self.get(head.checked_sub(depth)?)
    }

    /// Append `block` if it directly succeeds the head
    pub fn push_verify(&mut self, block: Block) -> EnclaveResult<()> {
        match self.blocks.back() {
            None => {
                self.offset = block.number;
            }
            Some(head) => {
                let expected = head.number + 1;
                if block.number != expected {
                    return Err(EnclaveError::NonConsecutiveBlock {
                        expected,
                        got: block.number,
                    });
                }
                if block.parent_hash != head.hash {
                    return Err(EnclaveError::ParentMismatch(block.number));
                }
            }
        }
        trace!(number = block.number, "Ledger push");
        self.blocks.push_back(block);
        Ok(())
    }

    /// Drop retained blocks older than `number`; the head is always kept
    pub fn prune_until(&mut self, number: u64) {
        while self.offset < number && self.blocks.len() > 1 {
            self.blocks.pop_front();
            self.offset += 1;
        }
    }
}
