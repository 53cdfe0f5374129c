//! Block relay and proof drains
//!
//! The pump forwards every block from the contract's init block onwards to
//! the enclave, in order and without gaps. If the enclave reports a
//! different next block the pump resumes from there. The drains move each proof batch
//! the enclave emits into the proof store.

use std::sync::Arc;

use erdstall_contracts::OperatorContract;
use erdstall_enclave::{Enclave, EnclaveError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::OperatorResult;
use crate::Shared;

/// Relay blocks to the enclave until cancelled or the chain closes
pub(crate) async fn pump_blocks<E, C>(
    shared: Arc<Shared<E, C>>,
    cancel: CancellationToken,
) -> OperatorResult<()>
where
    E: Enclave,
    C: OperatorContract,
{
    let mut head = shared.chain.subscribe_head();
    let mut next = shared.params.init_block;
    loop {
        let target = *head.borrow_and_update();
        if next <= target {
            let mut blocks = Vec::with_capacity((target - next + 1) as usize);
            for number in next..=target {
                blocks.push(shared.chain.block_by_number(number).await?);
            }
            debug!(from = next, to = target, "Relaying blocks");
            next = match shared.enclave.process_blocks(blocks).await {
                Ok(()) => target + 1,
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e @ EnclaveError::RejectedBlock { .. }) => {
                    warn!(from = next, to = target, error = %e, "Enclave rejected block events");
                    target + 1
                }
                Err(EnclaveError::NonConsecutiveBlock { expected, got }) => {
                    warn!(expected, got, "Enclave expects another block, resuming there");
                    expected
                }
                Err(e) => {
                    warn!(from = next, to = target, error = %e, "Block relay failed, retrying");
                    next
                }
            };
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            changed = head.changed() => {
                if changed.is_err() {
                    info!("Chain closed, block relay stops");
                    return Ok(());
                }
            }
        }
    }
}

/// Move deposit proof batches into the store
pub(crate) async fn drain_deposit_proofs<E, C>(
    shared: Arc<Shared<E, C>>,
    cancel: CancellationToken,
) -> OperatorResult<()>
where
    E: Enclave,
    C: OperatorContract,
{
    loop {
        let batch = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            batch = shared.enclave.deposit_proofs() => batch?,
        };
        info!(count = batch.len(), "Received deposit proofs");
        for proof in batch {
            shared.store.insert_deposit(proof);
        }
    }
}

/// Move balance proof batches into the store
pub(crate) async fn drain_balance_proofs<E, C>(
    shared: Arc<Shared<E, C>>,
    cancel: CancellationToken,
) -> OperatorResult<()>
where
    E: Enclave,
    C: OperatorContract,
{
    loop {
        let batch = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            batch = shared.enclave.balance_proofs() => batch?,
        };
        let epoch = batch.first().map(|p| p.balance.epoch);
        info!(count = batch.len(), ?epoch, "Received balance proofs");
        for proof in batch {
            shared.store.insert_balance(proof);
        }
    }
}
