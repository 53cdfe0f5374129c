//! Per-account proof store
//!
//! Keeps the proofs of the last few epochs for lookups by epoch, plus one
//! single-slot `watch` channel per account and proof kind for subscribers.

use std::collections::{BTreeMap, HashMap};

use erdstall_client::{ClientError, ClientResult, ProofStreams};
use erdstall_core::{Address, BalanceProof, DepositProof, Epoch};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::trace;

/// Epochs of proofs kept for lookups by epoch
pub const DEFAULT_RETENTION: u64 = 4;

struct Slot {
    deposits: watch::Sender<Option<DepositProof>>,
    balances: watch::Sender<Option<BalanceProof>>,
}

impl Slot {
    fn new() -> Self {
        Self {
            deposits: watch::channel(None).0,
            balances: watch::channel(None).0,
        }
    }
}

/// Proofs handed out by the enclave, indexed by account
pub struct ProofStore {
    retention: u64,
    slots: RwLock<HashMap<Address, Slot>>,
    deposits: Mutex<BTreeMap<(Epoch, Address), DepositProof>>,
    balances: Mutex<BTreeMap<(Epoch, Address), BalanceProof>>,
}

impl Default for ProofStore {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

/// Drop entries older than `retention` epochs before `newest`
fn prune<P>(history: &mut BTreeMap<(Epoch, Address), P>, newest: Epoch, retention: u64) {
    let keep_from = newest.saturating_sub(retention);
    *history = history.split_off(&(keep_from, Address::ZERO));
}

impl ProofStore {
    pub fn new(retention: u64) -> Self {
        Self {
            retention,
            slots: RwLock::new(HashMap::new()),
            deposits: Mutex::new(BTreeMap::new()),
            balances: Mutex::new(BTreeMap::new()),
        }
    }

    fn with_slot<R>(&self, account: Address, f: impl FnOnce(&Slot) -> R) -> R {
        if let Some(slot) = self.slots.read().get(&account) {
            return f(slot);
        }
        let mut slots = self.slots.write();
        f(slots.entry(account).or_insert_with(Slot::new))
    }

    pub fn insert_deposit(&self, proof: DepositProof) {
        let balance = proof.balance;
        trace!(epoch = balance.epoch, account = %balance.account, "Storing deposit proof");
        {
            let mut history = self.deposits.lock();
            history.insert((balance.epoch, balance.account), proof.clone());
            prune(&mut history, balance.epoch, self.retention);
        }
        self.with_slot(balance.account, |slot| {
            slot.deposits.send_replace(Some(proof));
        });
    }

    pub fn insert_balance(&self, proof: BalanceProof) {
        let balance = proof.balance;
        trace!(epoch = balance.epoch, account = %balance.account, "Storing balance proof");
        {
            let mut history = self.balances.lock();
            history.insert((balance.epoch, balance.account), proof.clone());
            prune(&mut history, balance.epoch, self.retention);
        }
        self.with_slot(balance.account, |slot| {
            slot.balances.send_replace(Some(proof));
        });
    }

    pub fn deposit_at(&self, epoch: Epoch, account: &Address) -> Option<DepositProof> {
        self.deposits.lock().get(&(epoch, *account)).cloned()
    }

    pub fn balance_at(&self, epoch: Epoch, account: &Address) -> Option<BalanceProof> {
        self.balances.lock().get(&(epoch, *account)).cloned()
    }

    /// Newest balance proof of `account`
    pub fn latest_balance(&self, account: &Address) -> Option<BalanceProof> {
        self.slots
            .read()
            .get(account)
            .and_then(|slot| slot.balances.borrow().clone())
    }

    pub fn subscribe(&self, account: Address) -> ProofStreams {
        self.with_slot(account, |slot| ProofStreams {
            deposits: slot.deposits.subscribe(),
            balances: slot.balances.subscribe(),
        })
    }

    /// Wait for the deposit proof of `account` for `epoch`. Fails with
    /// `ProofGone` once a newer deposit proof replaced a missing one.
    pub async fn wait_deposit(&self, epoch: Epoch, account: Address) -> ClientResult<DepositProof> {
        let mut rx = self.subscribe(account).deposits;
        loop {
            if let Some(proof) = self.deposit_at(epoch, &account) {
                return Ok(proof);
            }
            let newest = rx.borrow_and_update().as_ref().map(|p| p.balance.epoch);
            if let Some(newest) = newest.filter(|n| *n > epoch) {
                return Err(ClientError::ProofGone {
                    requested: epoch,
                    newest,
                });
            }
            rx.changed().await.map_err(|_| ClientError::Closed)?;
        }
    }

    /// Wait for the balance proof of `account` for `epoch`
    pub async fn wait_balance(&self, epoch: Epoch, account: Address) -> ClientResult<BalanceProof> {
        let mut rx = self.subscribe(account).balances;
        loop {
            if let Some(proof) = self.balance_at(epoch, &account) {
                return Ok(proof);
            }
            let newest = rx.borrow_and_update().as_ref().map(|p| p.balance.epoch);
            if let Some(newest) = newest.filter(|n| *n > epoch) {
                return Err(ClientError::ProofGone {
                    requested: epoch,
                    newest,
                });
            }
            rx.changed().await.map_err(|_| ClientError::Closed)?;
        }
    }
}
