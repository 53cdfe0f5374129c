//! Per-epoch balance table
//!
//! Entries are replaced, never edited: adding a proof to an epoch inserts a
//! new [`EpochBalance`] built from the previous one.

use std::collections::BTreeMap;
use std::sync::Arc;

use erdstall_core::{BalanceProof, DepositProof, Epoch, U256};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// What the client knows about its balance in one epoch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochBalance {
    pub epoch: Epoch,
    pub deposit: Option<DepositProof>,
    pub balance: Option<BalanceProof>,
    /// Deposit reclaimed on-chain after an unanswered deposit challenge
    pub voided: bool,
}

impl EpochBalance {
    fn empty(epoch: Epoch) -> Self {
        Self {
            epoch,
            deposit: None,
            balance: None,
            voided: false,
        }
    }

    /// Value the balance proof attests
    pub fn value(&self) -> Option<U256> {
        self.balance.as_ref().map(|p| p.balance.value)
    }
}

/// Shared table of [`EpochBalance`] entries
#[derive(Debug, Clone, Default)]
pub struct BalanceTable {
    entries: Arc<Mutex<BTreeMap<Epoch, EpochBalance>>>,
}

impl BalanceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, epoch: Epoch) -> Option<EpochBalance> {
        self.entries.lock().get(&epoch).cloned()
    }

    /// Newest entry
    pub fn latest(&self) -> Option<EpochBalance> {
        self.entries.lock().values().next_back().cloned()
    }

    /// Newest balance proof
    pub fn latest_balance_proof(&self) -> Option<BalanceProof> {
        self.entries
            .lock()
            .values()
            .rev()
            .find_map(|e| e.balance.clone())
    }

    fn replace(&self, epoch: Epoch, update: impl FnOnce(&mut EpochBalance)) {
        let mut entries = self.entries.lock();
        let mut next = entries
            .get(&epoch)
            .cloned()
            .unwrap_or_else(|| EpochBalance::empty(epoch));
        update(&mut next);
        entries.insert(epoch, next);
    }

    pub fn insert_deposit(&self, proof: DepositProof) {
        self.replace(proof.balance.epoch, |e| e.deposit = Some(proof));
    }

    pub fn insert_balance(&self, proof: BalanceProof) {
        self.replace(proof.balance.epoch, |e| e.balance = Some(proof));
    }

    pub fn mark_voided(&self, epoch: Epoch) {
        self.replace(epoch, |e| e.voided = true);
    }

    /// Forget everything after a completed withdrawal
    pub fn reset(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
