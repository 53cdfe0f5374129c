//! Confirmed blocks and contract event logs
//!
//! The enclave only consumes two contract events:
//!
//! ```text
//! event Deposited(uint64 indexed epoch, address indexed account, uint256 value);
//! event Exiting(uint64 indexed epoch, address indexed account, uint256 value);
//! ```
//!
//! Both are laid out as `topics = [signature, epoch, account]` with the value
//! as the single data word. Anything else emitted by the contract or by other
//! addresses is ignored.

use serde::{Deserialize, Serialize};

use crate::abi::{address_word, event_topic, uint64_word, AbiType, WORD_SIZE};
use crate::errors::{CoreError, CoreResult};
use crate::types::{Balance, Epoch};
use crate::{Address, B256, U256};

const EVENT_PARAMS: [AbiType; 3] = [AbiType::Uint64, AbiType::Address, AbiType::Uint256];

/// Topic0 of `Deposited`
pub fn deposited_topic() -> B256 {
    event_topic("Deposited", &EVENT_PARAMS)
}

/// Topic0 of `Exiting`
pub fn exiting_topic() -> B256 {
    event_topic("Exiting", &EVENT_PARAMS)
}

/// Raw event log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    /// Emitting contract
    pub address: Address,
    /// Event topics
    pub topics: Vec<B256>,
    /// Event data
    pub data: Vec<u8>,
}

impl Log {
    fn balance_event(topic: B256, contract: Address, balance: &Balance) -> Self {
        Self {
            address: contract,
            topics: vec![
                topic,
                B256::from(uint64_word(balance.epoch)),
                B256::from(address_word(&balance.account)),
            ],
            data: balance.value.to_be_bytes::<WORD_SIZE>().to_vec(),
        }
    }

    /// `Deposited` log as the contract emits it
    pub fn deposited(contract: Address, balance: &Balance) -> Self {
        Self::balance_event(deposited_topic(), contract, balance)
    }

    /// `Exiting` log as the contract emits it
    pub fn exiting(contract: Address, balance: &Balance) -> Self {
        Self::balance_event(exiting_topic(), contract, balance)
    }
}

/// Receipt of one transaction in a block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: B256,
    pub logs: Vec<Log>,
}

/// A block with its receipts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub number: u64,
    pub hash: B256,
    pub parent_hash: B256,
    pub receipts: Vec<Receipt>,
}

impl Block {
    /// Empty block at `number`
    pub fn empty(number: u64) -> Self {
        Self {
            number,
            ..Default::default()
        }
    }

    /// Decoded `Deposited`/`Exiting` events of `contract`, in log order
    pub fn contract_logs(&self, contract: Address) -> CoreResult<Vec<ContractLog>> {
        let mut out = Vec::new();
        for log in self.receipts.iter().flat_map(|r| r.logs.iter()) {
            if log.address != contract {
                continue;
            }
            if let Some(event) = ContractLog::decode(log)? {
                out.push(event);
            }
        }
        Ok(out)
    }
}

/// Contract event relevant to the enclave
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractLog {
    Deposited(Balance),
    Exiting(Balance),
}

impl ContractLog {
    /// Decode `log`, returning `None` for unrelated events
    pub fn decode(log: &Log) -> CoreResult<Option<Self>> {
        let Some(topic) = log.topics.first() else {
            return Ok(None);
        };
        let deposited = *topic == deposited_topic();
        if !deposited && *topic != exiting_topic() {
            return Ok(None);
        }

        if log.topics.len() != 3 {
            return Err(CoreError::MalformedLog(format!(
                "expected 3 topics, got {}",
                log.topics.len()
            )));
        }
        if log.data.len() != WORD_SIZE {
            return Err(CoreError::MalformedLog(format!(
                "expected {} data bytes, got {}",
                WORD_SIZE,
                log.data.len()
            )));
        }

        let epoch_word = log.topics[1].0;
        if epoch_word[..24].iter().any(|b| *b != 0) {
            return Err(CoreError::MalformedLog("epoch exceeds uint64".into()));
        }
        let mut epoch_bytes = [0u8; 8];
        epoch_bytes.copy_from_slice(&epoch_word[24..]);
        let epoch: Epoch = u64::from_be_bytes(epoch_bytes);

        let account_word = log.topics[2].0;
        if account_word[..12].iter().any(|b| *b != 0) {
            return Err(CoreError::MalformedLog("dirty address word".into()));
        }
        let account = Address::from_slice(&account_word[12..]);
        let value = U256::from_be_slice(&log.data);

        let balance = Balance {
            epoch,
            account,
            value,
        };
        Ok(Some(if deposited {
            ContractLog::Deposited(balance)
        } else {
            ContractLog::Exiting(balance)
        }))
    }

    /// The carried balance
    pub fn balance(&self) -> &Balance {
        match self {
            ContractLog::Deposited(b) | ContractLog::Exiting(b) => b,
        }
    }
}
