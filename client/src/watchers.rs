//! Session watchers

use std::sync::Arc;

use erdstall_contracts::{ChainEvent, ClientContract, ContractEvent};
use erdstall_core::Epoch;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use crate::api::OperatorApi;
use crate::client::Session;
use crate::trust::Trust;

/// Verify every pushed balance proof and record it. Stops at the first
/// invalid proof, leaving trust at `Unknown`.
pub(crate) async fn watch_balances<C, O>(session: Arc<Session<C, O>>)
where
    C: ClientContract,
    O: OperatorApi,
{
    let mut pushed = session.proofs.balances.clone();
    let mut newest: Option<Epoch> = None;
    loop {
        let current = pushed.borrow_and_update().clone();
        if let Some(proof) = current {
            let epoch = proof.balance.epoch;
            if newest.map_or(true, |n| epoch > n) {
                if let Err(e) = session.check_balance_proof(&proof, None) {
                    error!(epoch, error = %e, "Invalid balance proof, stopping balance watcher");
                    session.trust.set(Trust::Unknown);
                    return;
                }
                debug!(epoch, value = %proof.balance.value, "Balance proof received");
                newest = Some(epoch);
                session.table.insert_balance(proof);
                session.trust.set(Trust::Trusted);
            }
        }

        tokio::select! {
            biased;
            _ = session.cancel.cancelled() => return,
            changed = pushed.changed() => {
                if changed.is_err() {
                    debug!("Balance proof stream closed");
                    return;
                }
            }
        }
    }
}

/// Claim the balance of the frozen epoch once the contract freezes
pub(crate) async fn watch_frozen<C, O>(session: Arc<Session<C, O>>)
where
    C: ClientContract,
    O: OperatorApi,
{
    let mut events = session.chain.subscribe_events();
    let frozen = loop {
        tokio::select! {
            biased;
            _ = session.frozen_watch.cancelled() => return,
            received = events.recv() => match received {
                Ok(ChainEvent { event: ContractEvent::Frozen { epoch }, .. }) => break epoch,
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event subscription lagged"),
                Err(RecvError::Closed) => return,
            }
        }
    };

    warn!(epoch = frozen, "Contract frozen");
    session.trust.set(Trust::Untrusted);
    let proof = match session.balance_proof_for(frozen).await {
        Ok(proof) => proof,
        Err(e) => {
            warn!(epoch = frozen, error = %e, "Nothing to claim from the frozen contract");
            return;
        }
    };
    tokio::select! {
        biased;
        _ = session.frozen_watch.cancelled() => {}
        claimed = session.chain.withdraw_frozen(&proof) => match claimed {
            Ok(inclusion) => {
                info!(
                    epoch = frozen,
                    value = %proof.balance.value,
                    block = inclusion.block,
                    "Withdrew frozen balance"
                );
                session.table.reset();
            }
            Err(e) => warn!(epoch = frozen, error = %e, "Frozen withdrawal rejected"),
        }
    }
}
