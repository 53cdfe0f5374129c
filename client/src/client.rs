//! Client session and protocol flows

use std::future::Future;
use std::sync::Arc;

use erdstall_contracts::{
    wait_for_block, ChainEvent, ClientContract, ContractError, ContractEvent, ContractResult,
};
use erdstall_core::{
    Address, Balance, BalanceProof, DepositProof, Epoch, Parameters, Signer, Transaction, U256,
};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::api::{OperatorApi, ProofStreams};
use crate::balance::{BalanceTable, EpochBalance};
use crate::config::ClientConfig;
use crate::errors::{ClientError, ClientResult};
use crate::status::{StatusSender, StatusStream};
use crate::trust::{Trust, TrustTracker};
use crate::watchers;

/// Shared state of one client session
pub(crate) struct Session<C, O> {
    pub(crate) config: ClientConfig,
    pub(crate) params: Parameters,
    pub(crate) signer: Signer,
    pub(crate) chain: C,
    pub(crate) operator: O,
    pub(crate) proofs: ProofStreams,
    pub(crate) table: BalanceTable,
    pub(crate) trust: TrustTracker,
    /// Last nonce the operator accepted
    nonce: tokio::sync::Mutex<u64>,
    pub(crate) cancel: CancellationToken,
    /// Child of `cancel`, stopped before this client claims a challenge
    pub(crate) frozen_watch: CancellationToken,
}

/// Erdstall client bound to one account
///
/// Long-running operations run as background tasks and report through a
/// [`StatusStream`]. Two watchers run for the life of the session: one
/// verifies pushed balance proofs, the other claims funds if the contract
/// freezes.
pub struct Client<C, O> {
    session: Arc<Session<C, O>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<C, O> Client<C, O>
where
    C: ClientContract + 'static,
    O: OperatorApi + 'static,
{
    /// Open a session, reading the deployment parameters from the contract
    pub async fn connect(
        config: ClientConfig,
        signer: Signer,
        chain: C,
        operator: O,
    ) -> ClientResult<Self> {
        let params = chain.big_bang().await?;
        Self::start(config, signer, chain, operator, params).await
    }

    /// Open a session, failing unless the contract matches `expected`
    pub async fn connect_expecting(
        config: ClientConfig,
        signer: Signer,
        chain: C,
        operator: O,
        expected: &Parameters,
    ) -> ClientResult<Self> {
        let params = chain.big_bang().await?;
        if params != *expected {
            return Err(ClientError::WrongParameters);
        }
        Self::start(config, signer, chain, operator, params).await
    }

    async fn start(
        config: ClientConfig,
        signer: Signer,
        chain: C,
        operator: O,
        params: Parameters,
    ) -> ClientResult<Self> {
        params.validate()?;
        let account = signer.address();
        if chain.account() != account {
            return Err(ClientError::AccountMismatch {
                signer: account,
                chain: chain.account(),
            });
        }
        let proofs = operator.subscribe_proofs(account).await?;

        let cancel = CancellationToken::new();
        let session = Arc::new(Session {
            config,
            params,
            signer,
            chain,
            operator,
            proofs,
            table: BalanceTable::new(),
            trust: TrustTracker::new(Trust::Unknown),
            nonce: tokio::sync::Mutex::new(0),
            frozen_watch: cancel.child_token(),
            cancel,
        });

        let span = info_span!("client", %account);
        let tasks = vec![
            tokio::spawn(watchers::watch_balances(session.clone()).instrument(span.clone())),
            tokio::spawn(watchers::watch_frozen(session.clone()).instrument(span)),
        ];
        info!(%account, contract = %params.contract, "Client connected");
        Ok(Self {
            session,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn address(&self) -> Address {
        self.session.signer.address()
    }

    pub fn params(&self) -> &Parameters {
        &self.session.params
    }

    pub fn trust(&self) -> Trust {
        self.session.trust.get()
    }

    pub fn subscribe_trust(&self) -> watch::Receiver<Trust> {
        self.session.trust.subscribe()
    }

    /// Per-epoch balances known to this session
    pub fn balances(&self) -> BalanceTable {
        self.session.table.clone()
    }

    pub fn latest_balance(&self) -> Option<EpochBalance> {
        self.session.table.latest()
    }

    /// Deposit `value` and wait for the enclave's deposit proof, challenging
    /// the operator on-chain if it does not arrive in time
    pub fn deposit(&self, value: U256) -> StatusStream {
        self.spawn_op("deposit", move |s, status| async move {
            s.deposit(value, &status).await
        })
    }

    /// Send an off-chain payment in the current transaction epoch
    pub fn transfer(&self, recipient: Address, amount: U256) -> StatusStream {
        self.spawn_op("transfer", move |s, status| async move {
            s.transfer(recipient, amount, &status).await
        })
    }

    /// Exit with the balance proof of the current exit epoch, then withdraw
    pub fn leave(&self) -> StatusStream {
        self.spawn_op("leave", |s, status| async move { s.leave(&status).await })
    }

    /// Withdraw a registered exit of `epoch` once its exit window closed
    pub fn withdraw(&self, epoch: Epoch) -> StatusStream {
        self.spawn_op("withdraw", move |s, status| async move {
            s.withdraw(epoch, &status).await
        })
    }

    /// Force the operator to publish the next balance proof on-chain
    pub fn challenge(&self) -> StatusStream {
        self.spawn_op("challenge", |s, status| async move {
            s.challenge(&status).await
        })
    }

    /// Stop the watchers and any running operation
    pub async fn close(&self) {
        self.session.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        info!(account = %self.address(), "Client closed");
    }

    fn spawn_op<F, Fut>(&self, op: &'static str, run: F) -> StatusStream
    where
        F: FnOnce(Arc<Session<C, O>>, StatusSender) -> Fut,
        Fut: Future<Output = ClientResult<()>> + Send + 'static,
    {
        let (status, stream) = StatusSender::channel(op, self.session.config.status_buffer);
        let cancel = self.session.cancel.clone();
        let fut = run(self.session.clone(), status.clone());
        tokio::spawn(
            async move {
                tokio::select! {
                    _ = cancel.cancelled() => status.error("Session closed").await,
                    res = fut => {
                        if let Err(e) = res {
                            status.error(e.to_string()).await;
                        }
                    }
                }
            }
            .instrument(info_span!("op", op)),
        );
        stream
    }
}

impl<C, O> Drop for Client<C, O> {
    fn drop(&mut self) {
        self.session.cancel.cancel();
    }
}

/// Wait for the first contract event matching `pred`
async fn wait_for_event<T>(
    events: &mut broadcast::Receiver<ChainEvent>,
    mut pred: impl FnMut(&ContractEvent) -> Option<T>,
) -> ContractResult<T> {
    loop {
        match events.recv().await {
            Ok(ChainEvent { event, .. }) => {
                if let Some(hit) = pred(&event) {
                    return Ok(hit);
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event subscription lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return Err(ContractError::ChainClosed),
        }
    }
}

impl<C, O> Session<C, O>
where
    C: ClientContract,
    O: OperatorApi,
{
    pub(crate) fn account(&self) -> Address {
        self.signer.address()
    }

    fn head(&self) -> u64 {
        *self.chain.subscribe_head().borrow()
    }

    /// Bound an operator request by the configured timeout
    pub(crate) async fn request<T>(
        &self,
        fut: impl Future<Output = ClientResult<T>>,
    ) -> ClientResult<T> {
        tokio::time::timeout(self.config.request_timeout, fut)
            .await
            .map_err(|_| ClientError::Timeout)?
    }

    fn check_balance(&self, balance: &Balance, epoch: Option<Epoch>) -> ClientResult<()> {
        if balance.account != self.account() {
            return Err(ClientError::InvalidProof(format!(
                "proof is for account {}",
                balance.account
            )));
        }
        match epoch {
            Some(expected) if balance.epoch != expected => Err(ClientError::InvalidProof(format!(
                "proof is for epoch {}, expected {expected}",
                balance.epoch
            ))),
            _ => Ok(()),
        }
    }

    pub(crate) fn check_balance_proof(
        &self,
        proof: &BalanceProof,
        epoch: Option<Epoch>,
    ) -> ClientResult<()> {
        if !proof.verify(self.params.contract, self.params.tee) {
            return Err(ClientError::InvalidProof("not signed by the enclave".into()));
        }
        self.check_balance(&proof.balance, epoch)
    }

    fn check_deposit_proof(
        &self,
        proof: &DepositProof,
        epoch: Epoch,
        value: U256,
    ) -> ClientResult<()> {
        if !proof.verify(self.params.contract, self.params.tee) {
            return Err(ClientError::InvalidProof("not signed by the enclave".into()));
        }
        self.check_balance(&proof.balance, Some(epoch))?;
        if proof.balance.value != value {
            return Err(ClientError::InvalidProof(format!(
                "proof attests {}, deposited {value}",
                proof.balance.value
            )));
        }
        Ok(())
    }

    /// Balance proof of `epoch`, from the table or fetched from the operator
    pub(crate) async fn balance_proof_for(&self, epoch: Epoch) -> ClientResult<BalanceProof> {
        if let Some(proof) = self.table.get(epoch).and_then(|e| e.balance) {
            return Ok(proof);
        }
        let proof = self
            .request(self.operator.get_balance_proof(self.account()))
            .await?;
        self.check_balance_proof(&proof, Some(epoch))
            .map_err(|_| ClientError::NoBalanceProof(epoch))?;
        self.table.insert_balance(proof.clone());
        Ok(proof)
    }

    /// First deposit proof for `epoch` from the subscription or from polling
    async fn await_deposit_proof(&self, epoch: Epoch) -> DepositProof {
        let mut pushed = self.proofs.deposits.clone();
        let from_stream = async move {
            loop {
                let current = pushed.borrow_and_update().clone();
                if let Some(proof) = current.filter(|p| p.balance.epoch == epoch) {
                    return Some(proof);
                }
                if pushed.changed().await.is_err() {
                    return None;
                }
            }
        };
        let from_polling = async {
            loop {
                match self
                    .request(self.operator.get_deposit_proof(epoch, self.account()))
                    .await
                {
                    Ok(proof) => return proof,
                    Err(e) => {
                        debug!(epoch, error = %e, "Deposit proof not available yet");
                        tokio::time::sleep(self.config.proof_poll_interval).await;
                    }
                }
            }
        };
        tokio::select! {
            Some(proof) = from_stream => proof,
            proof = from_polling => proof,
        }
    }

    async fn deposit(&self, value: U256, status: &StatusSender) -> ClientResult<()> {
        status.message(format!("Depositing {value}")).await;
        let inclusion = self.chain.deposit(value).await.inspect_err(|_| {
            self.trust.set(Trust::Unknown);
        })?;
        let epoch = self.params.deposit_epoch(inclusion.block);
        let deadline = self.params.deposit_proof_deadline(epoch);
        status
            .message(format!(
                "Deposit included in block {} for epoch {epoch}, proof due by block {deadline}",
                inclusion.block
            ))
            .await;

        let mut head = self.chain.subscribe_head();
        tokio::select! {
            biased;
            proof = self.await_deposit_proof(epoch) => {
                match self.check_deposit_proof(&proof, epoch, value) {
                    Ok(()) => {
                        self.table.insert_deposit(proof);
                        self.trust.set(Trust::Trusted);
                        status.message(format!("Deposit proof for epoch {epoch} received")).await;
                        return Ok(());
                    }
                    Err(e) => {
                        self.trust.set(Trust::Unknown);
                        status.warning(format!("Rejected deposit proof: {e}")).await;
                    }
                }
            }
            reached = wait_for_block(&mut head, deadline) => {
                reached.inspect_err(|_| self.trust.set(Trust::Unknown))?;
                self.trust.set(Trust::Untrusted);
                status.warning(format!("No deposit proof by block {deadline}")).await;
            }
        }
        self.challenge_deposit(epoch, value, status).await
    }

    async fn challenge_deposit(
        &self,
        epoch: Epoch,
        value: U256,
        status: &StatusSender,
    ) -> ClientResult<()> {
        let mut head = self.chain.subscribe_head();
        // challenges are rejected while the operator may still answer off-chain
        wait_for_block(&mut head, self.params.deposit_proof_deadline(epoch)).await?;

        let mut events = self.chain.subscribe_events();
        let inclusion = self.chain.challenge_deposit().await?;
        let deadline = self.params.balance_proof_deadline(epoch);
        status
            .message(format!(
                "Challenged deposit of epoch {epoch} in block {}, answer due by block {deadline}",
                inclusion.block
            ))
            .await;

        let me = self.account();
        let answered = tokio::select! {
            biased;
            answer = wait_for_event(&mut events, |event| match event {
                ContractEvent::DepositChallengeResponded(b) if b.account == me && b.epoch == epoch => Some(*b),
                _ => None,
            }) => Some(answer?),
            reached = wait_for_block(&mut head, deadline) => {
                reached?;
                None
            }
        };

        if let Some(balance) = answered {
            status
                .message(format!(
                    "Operator answered the deposit challenge with {}",
                    balance.value
                ))
                .await;
            match self
                .request(self.operator.get_deposit_proof(epoch, me))
                .await
            {
                Ok(proof) if self.check_deposit_proof(&proof, epoch, value).is_ok() => {
                    self.table.insert_deposit(proof);
                }
                Ok(_) => status.warning("Operator served an invalid deposit proof").await,
                Err(e) => status.warning(format!("Deposit proof unavailable: {e}")).await,
            }
            return Ok(());
        }

        self.table.mark_voided(epoch);
        self.trust.set(Trust::Untrusted);
        self.frozen_watch.cancel();
        let inclusion = self.chain.withdraw_challenge().await?;
        status
            .message(format!(
                "Deposit challenge unanswered, reclaimed {value} in block {}",
                inclusion.block
            ))
            .await;
        Ok(())
    }

    async fn transfer(
        &self,
        recipient: Address,
        amount: U256,
        status: &StatusSender,
    ) -> ClientResult<()> {
        let epoch = self
            .params
            .tx_epoch(self.head() + 1)
            .ok_or(ClientError::NoTransactionEpoch)?;

        // held across the request so nonces reach the operator in order
        let mut nonce = self.nonce.lock().await;
        let tx = Transaction::sign(
            self.params.contract,
            &self.signer,
            *nonce + 1,
            epoch,
            recipient,
            amount,
        )?;
        self.request(self.operator.add_transaction(tx)).await?;
        *nonce += 1;

        status
            .message(format!(
                "Sent {amount} to {recipient} in epoch {epoch} with nonce {}",
                *nonce
            ))
            .await;
        Ok(())
    }

    async fn leave(&self, status: &StatusSender) -> ClientResult<()> {
        let epoch = self
            .params
            .exit_epoch(self.head() + 1)
            .ok_or(ClientError::NoExitEpoch)?;
        let proof = self.balance_proof_for(epoch).await?;
        status
            .message(format!(
                "Exiting with {} from epoch {epoch}",
                proof.balance.value
            ))
            .await;
        let inclusion = self.chain.exit(&proof).await?;
        status
            .message(format!("Exit included in block {}", inclusion.block))
            .await;
        self.withdraw(epoch, status).await
    }

    async fn withdraw(&self, epoch: Epoch, status: &StatusSender) -> ClientResult<()> {
        let ready_at = self.params.exit_window_end(epoch);
        let mut head = self.chain.subscribe_head();
        if *head.borrow() + 1 < ready_at {
            status
                .message(format!("Waiting for block {ready_at} to withdraw"))
                .await;
            wait_for_block(&mut head, ready_at - 1).await?;
        }
        let inclusion = self.chain.withdraw(epoch).await?;
        self.table.reset();
        self.trust.set(Trust::Trusted);
        status
            .message(format!(
                "Withdrew exit of epoch {epoch} in block {}",
                inclusion.block
            ))
            .await;
        Ok(())
    }

    async fn challenge(&self, status: &StatusSender) -> ClientResult<()> {
        let mut head = self.chain.subscribe_head();
        let next = *head.borrow() + 1;
        if self.params.in_response_window(next) {
            let open_at =
                self.params.phase_start(self.params.epoch(next)) + self.params.response_duration;
            status
                .message(format!(
                    "Response window open, challenging from block {open_at}"
                ))
                .await;
            wait_for_block(&mut head, open_at - 1).await?;
        }

        let exit_epoch = self
            .params
            .exit_epoch(*head.borrow() + 1)
            .ok_or(ClientError::NoExitEpoch)?;
        let proof = self.balance_proof_for(exit_epoch).await?;

        let mut events = self.chain.subscribe_events();
        let inclusion = self.chain.challenge(&proof).await?;
        let challenged = exit_epoch + 1;
        let deadline = self.params.balance_proof_deadline(challenged);
        status
            .message(format!(
                "Challenged epoch {challenged} in block {}, answer due by block {deadline}",
                inclusion.block
            ))
            .await;

        let me = self.account();
        tokio::select! {
            biased;
            answer = wait_for_event(&mut events, |event| match event {
                ContractEvent::ChallengeResponded(b) if b.account == me && b.epoch == challenged => Some(*b),
                _ => None,
            }) => {
                let balance = answer?;
                status
                    .message(format!(
                        "Operator answered with {}, exit registered for epoch {challenged}",
                        balance.value
                    ))
                    .await;
                self.withdraw(challenged, status).await
            }
            reached = wait_for_block(&mut head, deadline) => {
                reached?;
                self.trust.set(Trust::Untrusted);
                self.frozen_watch.cancel();
                let inclusion = self.chain.withdraw_challenge().await?;
                self.table.reset();
                status
                    .message(format!(
                        "Challenge unanswered, reclaimed {} in block {}",
                        proof.balance.value, inclusion.block
                    ))
                    .await;
                Ok(())
            }
        }
    }
}
