//! On-chain challenge responder
//!
//! A balance challenge for epoch `c` is answered with the balance proof of
//! `c` once `c` is the exit epoch; a deposit challenge with the stored
//! deposit proof right away. Each challenge is handled in its own task and
//! abandoned once its deadline block is mined.

use std::future::Future;
use std::sync::Arc;

use erdstall_contracts::{wait_for_block, ContractEvent, OperatorContract};
use erdstall_core::{Address, Epoch};
use erdstall_enclave::Enclave;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{OperatorError, OperatorResult};
use crate::Shared;

/// Follow contract events and answer every challenge
pub(crate) async fn respond_to_challenges<E, C>(
    shared: Arc<Shared<E, C>>,
    cancel: CancellationToken,
) -> OperatorResult<()>
where
    E: Enclave + 'static,
    C: OperatorContract + 'static,
{
    let mut events = shared.chain.subscribe_events();
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            event = events.recv() => match event {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Challenge responder lagged behind contract events");
                    continue;
                }
                Err(RecvError::Closed) => return Ok(()),
            },
        };

        match event.event {
            ContractEvent::Challenged { epoch, account } => {
                info!(epoch, %account, block = event.block, "Balance challenge");
                let answer = answer_challenge(shared.clone(), epoch, account);
                spawn_answer(&shared, &cancel, epoch, answer);
            }
            ContractEvent::DepositChallenged { epoch, account } => {
                info!(epoch, %account, block = event.block, "Deposit challenge");
                let answer = answer_deposit_challenge(shared.clone(), epoch, account);
                spawn_answer(&shared, &cancel, epoch, answer);
            }
            _ => {}
        }
    }
}

/// Run `answer` until it completes, the operator stops, or the challenge's
/// deadline block is mined
fn spawn_answer<E, C, F>(shared: &Shared<E, C>, cancel: &CancellationToken, epoch: Epoch, answer: F)
where
    C: OperatorContract,
    F: Future<Output = OperatorResult<()>> + Send + 'static,
{
    let deadline = shared.params.balance_proof_deadline(epoch);
    let mut head = shared.chain.subscribe_head();
    let cancel = cancel.clone();
    tokio::spawn(async move {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            result = answer => result,
            _ = wait_for_block(&mut head, deadline) => {
                Err(OperatorError::ChallengeExpired { epoch, deadline })
            }
        };
        if let Err(e) = result {
            error!(epoch, error = %e, "Challenge left unanswered");
        }
    });
}

async fn answer_challenge<E, C>(
    shared: Arc<Shared<E, C>>,
    epoch: Epoch,
    account: Address,
) -> OperatorResult<()>
where
    E: Enclave,
    C: OperatorContract,
{
    let proof = shared.store.wait_balance(epoch, account).await?;

    // the response must land while `epoch` is the exit epoch
    let mut head = shared.chain.subscribe_head();
    wait_for_block(&mut head, shared.params.phase_start(epoch + 2) - 1).await?;
    let inclusion = shared.chain.respond_challenge(&proof).await?;
    info!(epoch, %account, block = inclusion.block, "Answered balance challenge");
    Ok(())
}

async fn answer_deposit_challenge<E, C>(
    shared: Arc<Shared<E, C>>,
    epoch: Epoch,
    account: Address,
) -> OperatorResult<()>
where
    E: Enclave,
    C: OperatorContract,
{
    let proof = shared.store.wait_deposit(epoch, account).await?;
    let inclusion = shared.chain.respond_deposit_challenge(&proof).await?;
    info!(epoch, %account, block = inclusion.block, "Answered deposit challenge");
    Ok(())
}
