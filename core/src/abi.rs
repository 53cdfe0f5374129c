//! Solidity ABI encoding
//!
//! Implements the subset of `abi.encode` needed for the signed encodings:
//! strings, addresses, `uint64` and `uint256`. Static values occupy one
//! 32-byte head word; a string places its offset in the head and its length
//! and right-padded bytes in the tail.

use crate::{keccak256, Address, B256, U256};

/// Size of one ABI word in bytes
pub const WORD_SIZE: usize = 32;

/// ABI type identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbiType {
    String,
    Address,
    Uint64,
    Uint256,
}

impl AbiType {
    /// Canonical type string used in signatures
    pub fn type_string(&self) -> &'static str {
        match self {
            AbiType::String => "string",
            AbiType::Address => "address",
            AbiType::Uint64 => "uint64",
            AbiType::Uint256 => "uint256",
        }
    }

    /// Whether the type is encoded in the tail
    pub fn is_dynamic(&self) -> bool {
        matches!(self, AbiType::String)
    }
}

/// Typed ABI value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiValue {
    String(String),
    Address(Address),
    Uint64(u64),
    Uint256(U256),
}

impl AbiValue {
    /// Type of this value
    pub fn abi_type(&self) -> AbiType {
        match self {
            AbiValue::String(_) => AbiType::String,
            AbiValue::Address(_) => AbiType::Address,
            AbiValue::Uint64(_) => AbiType::Uint64,
            AbiValue::Uint256(_) => AbiType::Uint256,
        }
    }
}

/// Build the canonical signature `name(type,...)`
pub fn build_signature(name: &str, param_types: &[AbiType]) -> String {
    let types: Vec<&str> = param_types.iter().map(|t| t.type_string()).collect();
    format!("{}({})", name, types.join(","))
}

/// Topic 0 of an event log
pub fn event_topic(name: &str, param_types: &[AbiType]) -> B256 {
    keccak256(build_signature(name, param_types).as_bytes())
}

/// Left-pad a `u64` into a word
pub fn uint64_word(v: u64) -> [u8; WORD_SIZE] {
    U256::from(v).to_be_bytes::<WORD_SIZE>()
}

/// Left-pad an address into a word
pub fn address_word(a: &Address) -> [u8; WORD_SIZE] {
    a.into_word().0
}

/// Tuple encoder equivalent to Solidity's `abi.encode(v1, v2, ...)`
pub struct AbiEncoder {
    head: Vec<u8>,
    tail: Vec<u8>,
    head_size: usize,
}

impl AbiEncoder {
    /// Create an encoder for a tuple with `arity` members
    pub fn new(arity: usize) -> Self {
        Self {
            head: Vec::with_capacity(arity * WORD_SIZE),
            tail: Vec::new(),
            head_size: arity * WORD_SIZE,
        }
    }

    /// Append the next tuple member
    pub fn encode(&mut self, value: &AbiValue) {
        match value {
            AbiValue::String(s) => {
                let offset = self.head_size + self.tail.len();
                self.head.extend_from_slice(&uint64_word(offset as u64));
                self.tail.extend_from_slice(&uint64_word(s.len() as u64));
                self.tail.extend_from_slice(s.as_bytes());
                let padding = (WORD_SIZE - s.len() % WORD_SIZE) % WORD_SIZE;
                self.tail.extend(std::iter::repeat(0u8).take(padding));
            }
            AbiValue::Address(a) => self.head.extend_from_slice(&address_word(a)),
            AbiValue::Uint64(v) => self.head.extend_from_slice(&uint64_word(*v)),
            AbiValue::Uint256(v) => self.head.extend_from_slice(&v.to_be_bytes::<WORD_SIZE>()),
        }
    }

    /// Concatenate head and tail
    pub fn finish(self) -> Vec<u8> {
        debug_assert_eq!(self.head.len(), self.head_size, "tuple arity mismatch");
        let mut out = self.head;
        out.extend_from_slice(&self.tail);
        out
    }
}

/// Encode a whole tuple
pub fn encode(values: &[AbiValue]) -> Vec<u8> {
    let mut encoder = AbiEncoder::new(values.len());
    for value in values {
        encoder.encode(value);
    }
    encoder.finish()
}
