//! RPC request and response types

use erdstall_core::{Address, BalanceProof, DepositProof};
use erdstall_enclave::Attestation;
use serde::{Deserialize, Serialize};

/// Proof pushed on a `subscribeProofs` subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "proof", rename_all = "camelCase")]
pub enum ProofUpdate {
    Deposit(DepositProof),
    Balance(BalanceProof),
}

/// Enclave identity returned by `enclave_init`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitResponse {
    pub tee: Address,
    pub attestation: Attestation,
}
