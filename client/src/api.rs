//! Client-facing operator interface

use async_trait::async_trait;
use erdstall_core::{Address, BalanceProof, DepositProof, Epoch, Transaction};
use tokio::sync::watch;

use crate::errors::ClientResult;

/// Proofs pushed to one account. Each stream holds only the newest proof;
/// an unread proof is overwritten by the next one.
#[derive(Debug, Clone)]
pub struct ProofStreams {
    pub deposits: watch::Receiver<Option<DepositProof>>,
    pub balances: watch::Receiver<Option<BalanceProof>>,
}

/// Logical operations the operator offers to clients
#[async_trait]
pub trait OperatorApi: Send + Sync {
    async fn add_transaction(&self, tx: Transaction) -> ClientResult<()>;

    /// Deposit proof of `account` for `epoch`; waits until it exists or the
    /// request deadline passes. Fails with `ProofGone` once a newer epoch's
    /// proof replaced it.
    async fn get_deposit_proof(&self, epoch: Epoch, account: Address) -> ClientResult<DepositProof>;

    /// Newest balance proof of `account`
    async fn get_balance_proof(&self, account: Address) -> ClientResult<BalanceProof>;

    async fn subscribe_proofs(&self, account: Address) -> ClientResult<ProofStreams>;
}

#[async_trait]
impl<O: OperatorApi + ?Sized> OperatorApi for std::sync::Arc<O> {
    async fn add_transaction(&self, tx: Transaction) -> ClientResult<()> {
        (**self).add_transaction(tx).await
    }

    async fn get_deposit_proof(&self, epoch: Epoch, account: Address) -> ClientResult<DepositProof> {
        (**self).get_deposit_proof(epoch, account).await
    }

    async fn get_balance_proof(&self, account: Address) -> ClientResult<BalanceProof> {
        (**self).get_balance_proof(account).await
    }

    async fn subscribe_proofs(&self, account: Address) -> ClientResult<ProofStreams> {
        (**self).subscribe_proofs(account).await
    }
}
