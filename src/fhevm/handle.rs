//! 32-byte ciphertext handles.
//!
//! Layout: `[0..21]` hash prefix, `[21]` index within its input, `[22..30]`
//! chain id as big-endian u64, `[30]` FHE type tag, `[31]` handle version.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::types::FheType;
use crate::eip712::{decode_hex, encode_hex_prefixed, keccak256};
use crate::error::FhevmError;

pub const HANDLE_VERSION: u8 = 0;
const HANDLE_DOMAIN: &[u8] = b"ZK-w_hdl";

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle([u8; 32]);

impl Handle {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Derive the handle of value `index` inside the ciphertext blob whose
    /// keccak hash is `blob_hash`.
    pub fn derive(
        blob_hash: &[u8; 32],
        index: u8,
        acl_address: &[u8],
        chain_id: u64,
        ty: FheType,
    ) -> Self {
        let mut preimage = Vec::with_capacity(HANDLE_DOMAIN.len() + 32 + 1 + acl_address.len() + 32);
        preimage.extend_from_slice(HANDLE_DOMAIN);
        preimage.extend_from_slice(blob_hash);
        preimage.push(index);
        preimage.extend_from_slice(acl_address);
        let mut chain_word = [0u8; 32];
        chain_word[24..].copy_from_slice(&chain_id.to_be_bytes());
        preimage.extend_from_slice(&chain_word);
        let digest = keccak256(&preimage);

        let mut bytes = [0u8; 32];
        bytes[..21].copy_from_slice(&digest[..21]);
        bytes[21] = index;
        bytes[22..30].copy_from_slice(&chain_id.to_be_bytes());
        bytes[30] = ty.id();
        bytes[31] = HANDLE_VERSION;
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn index(&self) -> u8 {
        self.0[21]
    }

    pub fn chain_id(&self) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.0[22..30]);
        u64::from_be_bytes(raw)
    }

    pub fn fhe_type(&self) -> Option<FheType> {
        FheType::from_id(self.0[30])
    }

    pub fn version(&self) -> u8 {
        self.0[31]
    }

    /// Lowercase `0x`-prefixed hex.
    pub fn to_hex(&self) -> String {
        encode_hex_prefixed(&self.0)
    }

    pub fn from_hex(value: &str) -> Result<Self, FhevmError> {
        let bytes = decode_hex(value).map_err(|e| FhevmError::InvalidInput(e.to_string()))?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|raw: Vec<u8>| {
            FhevmError::InvalidInput(format!("handle must be 32 bytes, got {}", raw.len()))
        })?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.to_hex())
    }
}

impl FromStr for Handle {
    type Err = FhevmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Handle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Handle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::from_hex(&raw).map_err(serde::de::Error::custom)
    }
}
