//! Block-side epoch processing
//!
//! Owns the ledger, the deposit epoch and the exit epoch. Blocks are acted on
//! once `pow_depth` successors are known. Deposits and exits of a block are
//! validated together before any of them is applied. A block whose events
//! fail validation is still consumed, with none of its events applied.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use erdstall_core::{Address, Block, ContractLog, DepositProof, Parameters, Signer, U256};
use tracing::{debug, info, warn};

use crate::epoch::EpochSnapshot;
use crate::errors::{EnclaveError, EnclaveResult};
use crate::ledger::BlockLedger;
use crate::proofs::ProofCache;

/// Output of the last block of a phase
#[derive(Debug)]
pub struct PhaseEnd {
    /// The retiring deposit epoch
    pub deposits: EpochSnapshot,
    /// Accounts that exited during the phase, with the exited value
    pub exiters: BTreeMap<Address, U256>,
    /// Deposit proofs collected during the phase
    pub deposit_proofs: Vec<DepositProof>,
}

/// Outcome of acting on one confirmed block
#[derive(Debug, Default)]
pub struct Confirmed {
    pub phase_end: Option<PhaseEnd>,
    /// Set when the block's events were skipped
    pub rejected: Option<EnclaveError>,
}

pub struct BlockProcessor {
    params: Parameters,
    signer: Arc<Signer>,
    ledger: BlockLedger,
    /// Next block to act on
    next: u64,
    deposit: EpochSnapshot,
    exit: Option<EpochSnapshot>,
    exiters: BTreeMap<Address, U256>,
    deposit_proofs: Arc<ProofCache<DepositProof>>,
}

impl BlockProcessor {
    pub fn new(
        params: Parameters,
        signer: Arc<Signer>,
        deposit_proofs: Arc<ProofCache<DepositProof>>,
    ) -> Self {
        Self {
            params,
            signer,
            ledger: BlockLedger::new(),
            next: params.init_block,
            deposit: EpochSnapshot::new(0),
            exit: None,
            exiters: BTreeMap::new(),
            deposit_proofs,
        }
    }

    pub fn deposit_epoch(&self) -> &EpochSnapshot {
        &self.deposit
    }

    pub fn exit_epoch(&self) -> Option<&EpochSnapshot> {
        self.exit.as_ref()
    }

    /// Last block acted on
    pub fn last_processed(&self) -> Option<u64> {
        (self.next > self.params.init_block).then(|| self.next - 1)
    }

    /// Append a block to the ledger
    pub fn push(&mut self, block: Block) -> EnclaveResult<()> {
        self.params.checked_epoch(block.number)?;
        if self.ledger.is_empty() && block.number != self.next {
            return Err(EnclaveError::NonConsecutiveBlock {
                expected: self.next,
                got: block.number,
            });
        }
        self.ledger.push_verify(block)
    }

    /// Next block that is deep enough to act on
    pub fn next_confirmed(&self) -> Option<u64> {
        let head = self.ledger.head()?.number;
        (head >= self.next + self.params.pow_depth).then_some(self.next)
    }

    /// Act on confirmed block `number`
    pub fn process_confirmed(&mut self, number: u64) -> EnclaveResult<Confirmed> {
        let block = self
            .ledger
            .get(number)
            .ok_or(EnclaveError::NonConsecutiveBlock {
                expected: self.next,
                got: number,
            })?;
        let events = block
            .contract_logs(self.params.contract)
            .map_err(EnclaveError::from)
            .and_then(|events| self.validate(&events).map(|()| events));
        let rejected = match events {
            Ok(events) => {
                self.apply(events)?;
                None
            }
            Err(err) => {
                warn!(block = number, error = %err, "Block events rejected");
                Some(EnclaveError::RejectedBlock {
                    number,
                    reason: Box::new(err),
                })
            }
        };

        self.next = number + 1;
        self.ledger.prune_until(number);

        if !self.params.is_last_block_of_phase(number) {
            return Ok(Confirmed {
                phase_end: None,
                rejected,
            });
        }

        let number = self.deposit.number();
        let deposits = std::mem::replace(&mut self.deposit, EpochSnapshot::new(number + 1));
        let deposit_proofs = self.deposit_proofs.drain().into_values().collect();
        info!(epoch = number, deposits = deposits.len(), exits = self.exiters.len(), "Deposit phase ended");
        Ok(Confirmed {
            phase_end: Some(PhaseEnd {
                deposits,
                exiters: std::mem::take(&mut self.exiters),
                deposit_proofs,
            }),
            rejected,
        })
    }

    fn apply(&mut self, events: Vec<ContractLog>) -> EnclaveResult<()> {
        for event in events {
            match event {
                ContractLog::Deposited(balance) => {
                    self.deposit.deposit(balance.account, balance.value)?;
                    let proof = DepositProof::sign(self.params.contract, &self.signer, balance)?;
                    self.deposit_proofs.insert(proof);
                    debug!(epoch = balance.epoch, account = %balance.account, value = %balance.value, "Deposit");
                }
                ContractLog::Exiting(balance) => {
                    if let Some(exit) = self.exit.as_mut() {
                        exit.remove(&balance.account);
                    }
                    self.exiters.insert(balance.account, balance.value);
                    debug!(epoch = balance.epoch, account = %balance.account, value = %balance.value, "Exit");
                }
            }
        }
        Ok(())
    }

    fn validate(&self, events: &[ContractLog]) -> EnclaveResult<()> {
        let mut deposited = HashSet::new();
        let mut exited = HashSet::new();
        for event in events {
            match event {
                ContractLog::Deposited(b) => {
                    if b.epoch != self.deposit.number() {
                        return Err(EnclaveError::EpochMismatch {
                            expected: Some(self.deposit.number()),
                            got: b.epoch,
                        });
                    }
                    if self.deposit.contains(&b.account) || !deposited.insert(b.account) {
                        return Err(EnclaveError::DoubleDeposit {
                            epoch: b.epoch,
                            account: b.account,
                        });
                    }
                }
                ContractLog::Exiting(b) => {
                    let exit = self
                        .exit
                        .as_ref()
                        .filter(|e| e.number() == b.epoch)
                        .ok_or(EnclaveError::EpochMismatch {
                            expected: self.exit.as_ref().map(EpochSnapshot::number),
                            got: b.epoch,
                        })?;
                    if !exited.insert(b.account) {
                        return Err(EnclaveError::ExitMismatch {
                            account: b.account,
                            expected: U256::ZERO,
                            got: b.value,
                        });
                    }
                    exit.check_exit(&b.account, b.value)?;
                }
            }
        }
        Ok(())
    }

    /// Install the epoch sealed at the last phase end as the exit epoch
    pub fn install_exit_epoch(&mut self, sealed: Option<EpochSnapshot>) -> EnclaveResult<()> {
        let Some(sealed) = sealed else {
            return Ok(());
        };
        // sealed is two behind the fresh deposit epoch
        let expected = self.deposit.number().saturating_sub(2);
        if sealed.number() != expected {
            return Err(EnclaveError::NonConsecutiveEpoch {
                expected,
                got: sealed.number(),
            });
        }
        debug!(epoch = sealed.number(), accounts = sealed.len(), "Exit epoch installed");
        self.exit = Some(sealed);
        Ok(())
    }
}
