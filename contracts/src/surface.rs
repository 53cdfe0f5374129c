//! Contract surface consumed by clients and the operator
//!
//! The traits mirror the contract's entry points. Every state-changing call
//! resolves once the transaction is included and returns where it landed.

use async_trait::async_trait;
use erdstall_core::{Address, BalanceProof, Block, DepositProof, Epoch, Parameters, B256, U256};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

use crate::errors::{ContractError, ContractResult};
use crate::events::ChainEvent;

/// Inclusion of a contract transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inclusion {
    pub tx_hash: B256,
    pub block: u64,
}

/// Read-only view of the chain and the contract
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Deployment parameters, as stored by the contract's `bigBang`
    async fn big_bang(&self) -> ContractResult<Parameters>;

    /// Head block number, updated on every new block
    fn subscribe_head(&self) -> watch::Receiver<u64>;

    /// Contract events as they are included
    fn subscribe_events(&self) -> broadcast::Receiver<ChainEvent>;

    /// Fetch a block with its receipts
    async fn block_by_number(&self, number: u64) -> ContractResult<Block>;

    /// Epoch the contract is frozen at, if frozen
    async fn frozen_epoch(&self) -> ContractResult<Option<Epoch>>;
}

/// Contract calls issued by a user account
#[async_trait]
pub trait ClientContract: ChainReader {
    /// Sending account
    fn account(&self) -> Address;

    async fn deposit(&self, value: U256) -> ContractResult<Inclusion>;

    async fn exit(&self, proof: &BalanceProof) -> ContractResult<Inclusion>;

    async fn withdraw(&self, epoch: Epoch) -> ContractResult<Inclusion>;

    /// Demand the operator's next balance proof, backed by a proof of the
    /// current exit epoch
    async fn challenge(&self, proof: &BalanceProof) -> ContractResult<Inclusion>;

    /// Demand the deposit proof of the current transaction epoch
    async fn challenge_deposit(&self) -> ContractResult<Inclusion>;

    /// Claim the challenged value after an unanswered challenge
    async fn withdraw_challenge(&self) -> ContractResult<Inclusion>;

    /// Claim a proof of the frozen epoch
    async fn withdraw_frozen(&self, proof: &BalanceProof) -> ContractResult<Inclusion>;
}

/// Contract calls issued by the operator
#[async_trait]
pub trait OperatorContract: ChainReader {
    async fn respond_challenge(&self, proof: &BalanceProof) -> ContractResult<Inclusion>;

    async fn respond_deposit_challenge(&self, proof: &DepositProof) -> ContractResult<Inclusion>;
}

#[async_trait]
impl<T: ChainReader + ?Sized> ChainReader for std::sync::Arc<T> {
    async fn big_bang(&self) -> ContractResult<Parameters> {
        (**self).big_bang().await
    }

    fn subscribe_head(&self) -> watch::Receiver<u64> {
        (**self).subscribe_head()
    }

    fn subscribe_events(&self) -> broadcast::Receiver<ChainEvent> {
        (**self).subscribe_events()
    }

    async fn block_by_number(&self, number: u64) -> ContractResult<Block> {
        (**self).block_by_number(number).await
    }

    async fn frozen_epoch(&self) -> ContractResult<Option<Epoch>> {
        (**self).frozen_epoch().await
    }
}

#[async_trait]
impl<T: OperatorContract + ?Sized> OperatorContract for std::sync::Arc<T> {
    async fn respond_challenge(&self, proof: &BalanceProof) -> ContractResult<Inclusion> {
        (**self).respond_challenge(proof).await
    }

    async fn respond_deposit_challenge(&self, proof: &DepositProof) -> ContractResult<Inclusion> {
        (**self).respond_deposit_challenge(proof).await
    }
}

/// Wait until the head reaches `target`, returning the observed head
pub async fn wait_for_block(head: &mut watch::Receiver<u64>, target: u64) -> ContractResult<u64> {
    let reached = head
        .wait_for(|h| *h >= target)
        .await
        .map_err(|_| ContractError::ChainClosed)?;
    Ok(*reached)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_for_block() {
        let (tx, mut rx) = watch::channel(3u64);
        assert_eq!(wait_for_block(&mut rx, 2).await.unwrap(), 3);

        let waiter = tokio::spawn(async move { wait_for_block(&mut rx, 5).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send_replace(4);
        tx.send_replace(6);
        assert_eq!(waiter.await.unwrap().unwrap(), 6);
    }

    #[tokio::test]
    async fn test_wait_for_block_closed() {
        let (tx, mut rx) = watch::channel(0u64);
        drop(tx);
        assert_eq!(
            wait_for_block(&mut rx, 1).await,
            Err(ContractError::ChainClosed)
        );
    }
}
