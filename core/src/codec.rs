//! Signed encodings
//!
//! Each encoding starts with a tag string so that a signature over one kind
//! of message can never be replayed as another. All of them are plain
//! `abi.encode` tuples that the contract recomputes from its call arguments.

use crate::abi::{encode, AbiValue};
use crate::types::{Balance, Transaction};
use crate::Address;

/// Tag of deposit proofs
pub const DEPOSIT_TAG: &str = "ErdstallDeposit";
/// Tag of balance proofs
pub const BALANCE_TAG: &str = "ErdstallBalance";
/// Tag of off-chain transactions
pub const TRANSACTION_TAG: &str = "ErdstallTransaction";

fn encode_tagged_balance(tag: &str, contract: Address, balance: &Balance) -> Vec<u8> {
    encode(&[
        AbiValue::String(tag.to_string()),
        AbiValue::Address(contract),
        AbiValue::Uint64(balance.epoch),
        AbiValue::Address(balance.account),
        AbiValue::Uint256(balance.value),
    ])
}

/// `abi.encode("ErdstallDeposit", contract, epoch, account, value)`
pub fn encode_deposit(contract: Address, balance: &Balance) -> Vec<u8> {
    encode_tagged_balance(DEPOSIT_TAG, contract, balance)
}

/// `abi.encode("ErdstallBalance", contract, epoch, account, value)`
pub fn encode_balance(contract: Address, balance: &Balance) -> Vec<u8> {
    encode_tagged_balance(BALANCE_TAG, contract, balance)
}

/// `abi.encode("ErdstallTransaction", contract, nonce, epoch, sender, recipient, amount)`
pub fn encode_transaction(contract: Address, tx: &Transaction) -> Vec<u8> {
    encode(&[
        AbiValue::String(TRANSACTION_TAG.to_string()),
        AbiValue::Address(contract),
        AbiValue::Uint64(tx.nonce),
        AbiValue::Uint64(tx.epoch),
        AbiValue::Address(tx.sender),
        AbiValue::Address(tx.recipient),
        AbiValue::Uint256(tx.amount),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{uint64_word, WORD_SIZE};
    use crate::U256;

    fn balance() -> Balance {
        Balance {
            epoch: 7,
            account: Address::repeat_byte(0xaa),
            value: U256::from(1_000u64),
        }
    }

    #[test]
    fn test_balance_layout() {
        let contract = Address::repeat_byte(0xcc);
        let encoded = encode_balance(contract, &balance());

        // five head words, then the tag's length word and one padded word
        assert_eq!(encoded.len(), 7 * WORD_SIZE);
        assert_eq!(&encoded[..32], &uint64_word(5 * 32));
        assert_eq!(&encoded[44..64], contract.as_slice());
        assert_eq!(&encoded[64..96], &uint64_word(7));
        assert_eq!(&encoded[108..128], balance().account.as_slice());
        assert_eq!(&encoded[128..160], &U256::from(1_000u64).to_be_bytes::<32>());
        assert_eq!(&encoded[160..192], &uint64_word(BALANCE_TAG.len() as u64));
        assert_eq!(&encoded[192..192 + BALANCE_TAG.len()], BALANCE_TAG.as_bytes());
    }

    #[test]
    fn test_deposit_and_balance_encodings_differ() {
        let contract = Address::repeat_byte(0xcc);
        assert_ne!(
            encode_deposit(contract, &balance()),
            encode_balance(contract, &balance())
        );
    }

    #[test]
    fn test_contract_is_bound() {
        assert_ne!(
            encode_balance(Address::repeat_byte(1), &balance()),
            encode_balance(Address::repeat_byte(2), &balance())
        );
    }
}
