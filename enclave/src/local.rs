//! In-process enclave

use std::sync::Arc;

use async_trait::async_trait;
use erdstall_core::{Address, BalanceProof, Block, DepositProof, Parameters, Signer, Transaction};
use parking_lot::Mutex;
use tracing::info;

use crate::engine::{EngineConfig, EngineHandle};
use crate::errors::{EnclaveError, EnclaveResult};
use crate::{Attestation, Enclave};

/// Enclave running the epoch engine in this process
pub struct LocalEnclave {
    signer: Arc<Signer>,
    config: EngineConfig,
    engine: Mutex<Option<EngineHandle>>,
}

impl LocalEnclave {
    /// Enclave with a fresh identity
    pub fn new() -> Self {
        Self::with_signer(Signer::random())
    }

    pub fn with_signer(signer: Signer) -> Self {
        Self {
            signer: Arc::new(signer),
            config: EngineConfig::default(),
            engine: Mutex::new(None),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    fn engine(&self) -> EnclaveResult<EngineHandle> {
        self.engine.lock().clone().ok_or(EnclaveError::NotRunning)
    }

    /// Deposit proof issued for `account` in the running phase
    pub fn pending_deposit_proof(&self, account: &Address) -> Option<DepositProof> {
        self.engine().ok()?.pending_deposit_proof(account)
    }

    /// Balance proof of `account` in the live transaction epoch
    pub fn pending_balance_proof(&self, account: &Address) -> Option<BalanceProof> {
        self.engine().ok()?.pending_balance_proof(account)
    }
}

impl Default for LocalEnclave {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Enclave for LocalEnclave {
    async fn init(&self) -> EnclaveResult<(Address, Attestation)> {
        Ok((self.signer.address(), Attestation::default()))
    }

    async fn run(&self, params: Parameters) -> EnclaveResult<()> {
        params.validate()?;
        if params.tee != self.signer.address() {
            return Err(EnclaveError::WrongIdentity {
                expected: self.signer.address(),
                got: params.tee,
            });
        }

        let mut engine = self.engine.lock();
        if engine.is_some() {
            return Err(EnclaveError::AlreadyRunning);
        }
        *engine = Some(EngineHandle::spawn(params, Arc::clone(&self.signer), self.config));
        info!(tee = %params.tee, init_block = params.init_block, "Enclave running");
        Ok(())
    }

    async fn process_blocks(&self, blocks: Vec<Block>) -> EnclaveResult<()> {
        self.engine()?.process_blocks(blocks).await
    }

    async fn process_txs(&self, txs: Vec<Transaction>) -> EnclaveResult<()> {
        self.engine()?.process_txs(txs).await
    }

    async fn deposit_proofs(&self) -> EnclaveResult<Vec<DepositProof>> {
        self.engine()?.deposit_proofs().await
    }

    async fn balance_proofs(&self) -> EnclaveResult<Vec<BalanceProof>> {
        self.engine()?.balance_proofs().await
    }

    async fn shutdown(&self) {
        let engine = self.engine.lock().take();
        if let Some(engine) = engine {
            engine.shutdown().await;
        }
    }
}
