//! Encrypted scalar types and their cleartext values.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::eip712::normalize_address;
use crate::error::FhevmError;

/// Encrypted scalar type. The discriminant is the on-chain type tag stored in
/// byte 30 of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FheType {
    Bool = 0,
    U8 = 2,
    U16 = 3,
    U32 = 4,
    U64 = 5,
    Address = 7,
}

impl FheType {
    pub const ALL: [FheType; 6] = [
        Self::Bool,
        Self::U8,
        Self::U16,
        Self::U32,
        Self::U64,
        Self::Address,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| ty.id() == id)
    }

    /// Width counted against the per-input bit budget. Booleans take two bits.
    pub fn bits(self) -> u32 {
        match self {
            Self::Bool => 2,
            Self::U8 => 8,
            Self::U16 => 16,
            Self::U32 => 32,
            Self::U64 => 64,
            Self::Address => 160,
        }
    }

    /// Solidity-facing name (`ebool`, `euint8`, ...).
    pub fn solidity_name(self) -> &'static str {
        match self {
            Self::Bool => "ebool",
            Self::U8 => "euint8",
            Self::U16 => "euint16",
            Self::U32 => "euint32",
            Self::U64 => "euint64",
            Self::Address => "eaddress",
        }
    }
}

impl fmt::Display for FheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::Address => "address",
        };
        f.write_str(name)
    }
}

impl FromStr for FheType {
    type Err = FhevmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bool" | "ebool" => Ok(Self::Bool),
            "u8" | "uint8" | "euint8" => Ok(Self::U8),
            "u16" | "uint16" | "euint16" => Ok(Self::U16),
            "u32" | "uint32" | "euint32" => Ok(Self::U32),
            "u64" | "uint64" | "euint64" => Ok(Self::U64),
            "address" | "eaddress" => Ok(Self::Address),
            other => Err(FhevmError::InvalidInput(format!("unknown FHE type {other}"))),
        }
    }
}

/// A cleartext value of one of the supported encrypted types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum FheValue {
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    /// Lowercase `0x`-prefixed address.
    Address(String),
}

impl FheValue {
    pub fn fhe_type(&self) -> FheType {
        match self {
            Self::Bool(_) => FheType::Bool,
            Self::U8(_) => FheType::U8,
            Self::U16(_) => FheType::U16,
            Self::U32(_) => FheType::U32,
            Self::U64(_) => FheType::U64,
            Self::Address(_) => FheType::Address,
        }
    }

    pub fn address(value: &str) -> Result<Self, FhevmError> {
        normalize_address(value)
            .map(Self::Address)
            .ok_or_else(|| FhevmError::InvalidInput(format!("invalid address {value}")))
    }

    /// Parse a cleartext literal of type `ty`.
    pub fn parse(ty: FheType, raw: &str) -> Result<Self, FhevmError> {
        let raw = raw.trim();
        let invalid = |e: &dyn fmt::Display| {
            FhevmError::InvalidInput(format!("invalid {ty} value {raw}: {e}"))
        };
        Ok(match ty {
            FheType::Bool => match raw {
                "true" | "1" => Self::Bool(true),
                "false" | "0" => Self::Bool(false),
                _ => return Err(invalid(&"expected true/false")),
            },
            FheType::U8 => Self::U8(raw.parse().map_err(|e| invalid(&e))?),
            FheType::U16 => Self::U16(raw.parse().map_err(|e| invalid(&e))?),
            FheType::U32 => Self::U32(raw.parse().map_err(|e| invalid(&e))?),
            FheType::U64 => Self::U64(raw.parse().map_err(|e| invalid(&e))?),
            FheType::Address => Self::address(raw)?,
        })
    }

    /// Big-endian 32-byte word of the cleartext.
    pub fn to_word(&self) -> [u8; 32] {
        let mut word = [0u8; 32];
        match self {
            Self::Bool(b) => word[31] = u8::from(*b),
            Self::U8(v) => word[31] = *v,
            Self::U16(v) => word[30..].copy_from_slice(&v.to_be_bytes()),
            Self::U32(v) => word[28..].copy_from_slice(&v.to_be_bytes()),
            Self::U64(v) => word[24..].copy_from_slice(&v.to_be_bytes()),
            Self::Address(a) => {
                if let Ok(bytes) = crate::eip712::decode_hex(a)
                    && bytes.len() == 20
                {
                    word[12..].copy_from_slice(&bytes);
                }
            }
        }
        word
    }

    /// Inverse of [`FheValue::to_word`]; rejects words that overflow `ty`.
    pub fn from_word(ty: FheType, word: &[u8; 32]) -> Result<Self, FhevmError> {
        let width = match ty {
            FheType::Bool | FheType::U8 => 1,
            FheType::U16 => 2,
            FheType::U32 => 4,
            FheType::U64 => 8,
            FheType::Address => 20,
        };
        if word[..32 - width].iter().any(|b| *b != 0) {
            return Err(FhevmError::Backend(format!("cleartext overflows {ty}")));
        }
        let tail = &word[32 - width..];
        let mut u64_bytes = [0u8; 8];
        if width <= 8 {
            u64_bytes[8 - width..].copy_from_slice(tail);
        }
        let n = u64::from_be_bytes(u64_bytes);
        Ok(match ty {
            FheType::Bool if n <= 1 => Self::Bool(n == 1),
            FheType::Bool => return Err(FhevmError::Backend("cleartext overflows bool".into())),
            FheType::U8 => Self::U8(n as u8),
            FheType::U16 => Self::U16(n as u16),
            FheType::U32 => Self::U32(n as u32),
            FheType::U64 => Self::U64(n),
            FheType::Address => Self::Address(crate::eip712::encode_hex_prefixed(tail)),
        })
    }

    /// Numeric view; booleans map to 0/1 and addresses have none.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Bool(b) => Some(u64::from(*b)),
            Self::U8(v) => Some(u64::from(*v)),
            Self::U16(v) => Some(u64::from(*v)),
            Self::U32(v) => Some(u64::from(*v)),
            Self::U64(v) => Some(*v),
            Self::Address(_) => None,
        }
    }
}

impl fmt::Display for FheValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::U8(v) => write!(f, "{v}"),
            Self::U16(v) => write!(f, "{v}"),
            Self::U32(v) => write!(f, "{v}"),
            Self::U64(v) => write!(f, "{v}"),
            Self::Address(a) => f.write_str(a),
        }
    }
}
