//! Ethereum-style signatures
//!
//! Messages are hashed as `keccak256("\x19Ethereum Signed Message:\n32" ||
//! keccak256(message))` and signed with recoverable secp256k1 ECDSA. A
//! signature is the 65-byte `r || s || v` with `v` in `{27, 28}`, the form
//! the contract's `ecrecover` expects. Verification recovers the signer and
//! compares addresses; any malformed input verifies as `false`.

use std::fmt;

use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::{CoreError, CoreResult};
use crate::{keccak256, Address, B256};

/// Length of an encoded signature
pub const SIGNATURE_LEN: usize = 65;

const ETH_MESSAGE_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n32";

/// Recoverable signature `r || s || v`
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature([u8; SIGNATURE_LEN]);

impl Signature {
    /// Parse a 65-byte signature
    pub fn from_slice(bytes: &[u8]) -> CoreResult<Self> {
        let bytes: [u8; SIGNATURE_LEN] = bytes.try_into().map_err(|_| {
            CoreError::InvalidSignature(format!(
                "expected {} bytes, got {}",
                SIGNATURE_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LEN] {
        &self.0
    }
}

impl Default for Signature {
    fn default() -> Self {
        Self([0u8; SIGNATURE_LEN])
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature(0x{})", hex::encode(self.0))
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let raw = hex::decode(s.strip_prefix("0x").unwrap_or(&s))
            .map_err(serde::de::Error::custom)?;
        Signature::from_slice(&raw).map_err(serde::de::Error::custom)
    }
}

/// Hash signed by [`Signer::sign`]
pub fn eth_message_hash(message: &[u8]) -> B256 {
    let inner = keccak256(message);
    let mut buf = Vec::with_capacity(ETH_MESSAGE_PREFIX.len() + 32);
    buf.extend_from_slice(ETH_MESSAGE_PREFIX);
    buf.extend_from_slice(inner.as_slice());
    keccak256(&buf)
}

/// Address of a public key: last 20 bytes of the Keccak-256 of the
/// uncompressed point without its prefix byte
pub fn address_of(key: &VerifyingKey) -> Address {
    let point = key.as_affine().to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

/// Recover the address that signed `message`
pub fn recover(message: &[u8], signature: &Signature) -> CoreResult<Address> {
    let hash = eth_message_hash(message);
    let raw = signature.as_bytes();

    let v = match raw[64] {
        v @ 27..=28 => v - 27,
        v @ 0..=1 => v,
        v => {
            return Err(CoreError::InvalidSignature(format!(
                "invalid recovery byte {}",
                v
            )))
        }
    };
    let recovery_id = RecoveryId::from_byte(v)
        .ok_or_else(|| CoreError::InvalidSignature("invalid recovery id".into()))?;
    let sig = EcdsaSignature::from_slice(&raw[..64])
        .map_err(|e| CoreError::InvalidSignature(e.to_string()))?;
    let key = VerifyingKey::recover_from_prehash(hash.as_slice(), &sig, recovery_id)
        .map_err(|e| CoreError::InvalidSignature(e.to_string()))?;

    Ok(address_of(&key))
}

/// Whether `signature` over `message` was produced by `expected`
pub fn verify(message: &[u8], signature: &Signature, expected: Address) -> bool {
    matches!(recover(message, signature), Ok(signer) if signer == expected)
}

/// Signing identity
#[derive(Clone)]
pub struct Signer {
    key: SigningKey,
    address: Address,
}

impl Signer {
    /// Generate a fresh key
    pub fn random() -> Self {
        Self::from_key(SigningKey::random(&mut rand::rngs::OsRng))
    }

    /// Load a key from its 32-byte secret scalar
    pub fn from_bytes(secret: &[u8]) -> CoreResult<Self> {
        let key = SigningKey::from_slice(secret).map_err(|e| CoreError::InvalidKey(e.to_string()))?;
        Ok(Self::from_key(key))
    }

    fn from_key(key: SigningKey) -> Self {
        let address = address_of(key.verifying_key());
        Self { key, address }
    }

    /// Address of this identity
    pub fn address(&self) -> Address {
        self.address
    }

    /// Secret scalar, for persisting the key
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.key.to_bytes().into()
    }

    /// Sign `message` Ethereum style
    pub fn sign(&self, message: &[u8]) -> CoreResult<Signature> {
        let hash = eth_message_hash(message);
        let (sig, recovery_id) = self
            .key
            .sign_prehash_recoverable(hash.as_slice())
            .map_err(|e| CoreError::InvalidSignature(e.to_string()))?;

        let mut raw = [0u8; SIGNATURE_LEN];
        raw[..64].copy_from_slice(&sig.to_bytes());
        raw[64] = 27 + recovery_id.to_byte();
        Ok(Signature(raw))
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer").field("address", &self.address).finish()
    }
}
