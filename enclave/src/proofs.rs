//! Per-account proof caches

use std::collections::BTreeMap;

use erdstall_core::{Address, Balance, BalanceProof, DepositProof};
use parking_lot::Mutex;

/// A proof that attests one balance
pub trait Proof: Clone + Send + 'static {
    fn balance(&self) -> &Balance;
}

impl Proof for DepositProof {
    fn balance(&self) -> &Balance {
        &self.balance
    }
}

impl Proof for BalanceProof {
    fn balance(&self) -> &Balance {
        &self.balance
    }
}

/// Latest proof per account, collected until the phase ends
#[derive(Debug)]
pub struct ProofCache<P> {
    proofs: Mutex<BTreeMap<Address, P>>,
}

impl<P: Proof> Default for ProofCache<P> {
    fn default() -> Self {
        Self {
            proofs: Mutex::new(BTreeMap::new()),
        }
    }
}

impl<P: Proof> ProofCache<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `proof`, replacing an older one for the same account
    pub fn insert(&self, proof: P) {
        let account = proof.balance().account;
        self.proofs.lock().insert(account, proof);
    }

    pub fn get(&self, account: &Address) -> Option<P> {
        self.proofs.lock().get(account).cloned()
    }

    pub fn remove(&self, account: &Address) -> Option<P> {
        self.proofs.lock().remove(account)
    }

    pub fn len(&self) -> usize {
        self.proofs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.proofs.lock().is_empty()
    }

    /// Take every cached proof, leaving the cache empty
    pub fn drain(&self) -> BTreeMap<Address, P> {
        std::mem::take(&mut *self.proofs.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use erdstall_core::{Signature, U256};

    fn proof(account: u8, value: u64) -> BalanceProof {
        BalanceProof {
            balance: Balance {
                epoch: 1,
                account: Address::repeat_byte(account),
                value: U256::from(value),
            },
            sig: Signature::default(),
        }
    }

    #[test]
    fn test_insert_replaces() {
        let cache = ProofCache::new();
        cache.insert(proof(1, 10));
        cache.insert(proof(1, 20));
        cache.insert(proof(2, 5));
        assert_eq!(cache.len(), 2);
        assert_eq!(
            cache.get(&Address::repeat_byte(1)).map(|p| p.balance.value),
            Some(U256::from(20u64))
        );
    }

    #[test]
    fn test_drain_empties() {
        let cache = ProofCache::new();
        cache.insert(proof(1, 10));
        cache.insert(proof(2, 10));
        let drained = cache.drain();
        assert_eq!(drained.len(), 2);
        assert!(cache.is_empty());
        assert!(cache.remove(&Address::repeat_byte(1)).is_none());
    }
}
