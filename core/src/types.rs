//! Protocol data model

use serde::{Deserialize, Serialize};

use crate::codec::{encode_balance, encode_deposit, encode_transaction};
use crate::errors::CoreResult;
use crate::signer::{self, Signature, Signer};
use crate::{keccak256, Address, B256, U256};

/// Monotonic phase-window counter
pub type Epoch = u64;

/// Per-account state inside an epoch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Nonce of the last applied transaction
    pub nonce: u64,
    /// Balance
    pub value: U256,
}

impl Account {
    /// Account holding `value` with a fresh nonce
    pub fn with_value(value: U256) -> Self {
        Self { nonce: 0, value }
    }
}

/// The unit that gets signed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Balance {
    pub epoch: Epoch,
    pub account: Address,
    pub value: U256,
}

/// Signed off-chain transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub nonce: u64,
    pub epoch: Epoch,
    pub sender: Address,
    pub recipient: Address,
    pub amount: U256,
    pub sig: Signature,
}

impl Transaction {
    /// Build and sign a transfer from `signer`
    pub fn sign(
        contract: Address,
        signer: &Signer,
        nonce: u64,
        epoch: Epoch,
        recipient: Address,
        amount: U256,
    ) -> CoreResult<Self> {
        let mut tx = Self {
            nonce,
            epoch,
            sender: signer.address(),
            recipient,
            amount,
            sig: Signature::default(),
        };
        tx.sig = signer.sign(&encode_transaction(contract, &tx))?;
        Ok(tx)
    }

    /// Whether the signature was produced by the sender
    pub fn verify(&self, contract: Address) -> bool {
        signer::verify(&encode_transaction(contract, self), &self.sig, self.sender)
    }

    /// Keccak-256 of the signed encoding
    pub fn hash(&self, contract: Address) -> B256 {
        keccak256(encode_transaction(contract, self))
    }
}

/// Enclave attestation of a deposit-epoch balance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositProof {
    pub balance: Balance,
    pub sig: Signature,
}

impl DepositProof {
    /// Sign `balance` as a deposit proof
    pub fn sign(contract: Address, signer: &Signer, balance: Balance) -> CoreResult<Self> {
        let sig = signer.sign(&encode_deposit(contract, &balance))?;
        Ok(Self { balance, sig })
    }

    /// Whether the proof was signed by `tee` for `contract`
    pub fn verify(&self, contract: Address, tee: Address) -> bool {
        signer::verify(&encode_deposit(contract, &self.balance), &self.sig, tee)
    }
}

/// Enclave attestation of a transaction-epoch balance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceProof {
    pub balance: Balance,
    pub sig: Signature,
}

impl BalanceProof {
    /// Sign `balance` as a balance proof
    pub fn sign(contract: Address, signer: &Signer, balance: Balance) -> CoreResult<Self> {
        let sig = signer.sign(&encode_balance(contract, &balance))?;
        Ok(Self { balance, sig })
    }

    /// Whether the proof was signed by `tee` for `contract`
    pub fn verify(&self, contract: Address, tee: Address) -> bool {
        signer::verify(&encode_balance(contract, &self.balance), &self.sig, tee)
    }
}
