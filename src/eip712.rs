//! EIP-712 typed data and secp256k1 signatures.
//!
//! Struct hashing and the wallet-facing JSON payload come from alloy. This
//! module adds the signature format exchanged with wallets (65-byte
//! `r || s || v` hex with `v` in `{27, 28}`) and the lowercase `0x` address
//! strings used across the runtime.

use alloy_primitives::{Address, hex};
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};

pub use alloy_dyn_abi::eip712::TypedData;
pub use alloy_sol_types::{Eip712Domain, SolStruct, eip712_domain};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Eip712Error {
    #[error("Typed data cannot be hashed: {0}")]
    Encoding(String),

    #[error("Invalid hex: {0}")]
    InvalidHex(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
}

/// `keccak256(0x1901 || domainSeparator || hashStruct(message))` of a payload.
pub fn signing_hash(data: &TypedData) -> Result<[u8; 32], Eip712Error> {
    data.eip712_signing_hash()
        .map(|hash| hash.0)
        .map_err(|e| Eip712Error::Encoding(e.to_string()))
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    alloy_primitives::keccak256(data).0
}

/// Decode hex with an optional `0x` prefix. `"0x"` decodes to an empty vector.
pub fn decode_hex(value: &str) -> Result<Vec<u8>, Eip712Error> {
    hex::decode(value.trim()).map_err(|e| Eip712Error::InvalidHex(format!("{value}: {e}")))
}

pub fn encode_hex_prefixed(bytes: &[u8]) -> String {
    hex::encode_prefixed(bytes)
}

/// Lowercase `0x`-prefixed form of a 20-byte address, or `None` if malformed.
pub fn normalize_address(value: &str) -> Option<String> {
    let hex = value.trim().strip_prefix("0x")?;
    if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(format!("0x{}", hex.to_ascii_lowercase()))
}

pub fn addresses_equal(a: &str, b: &str) -> bool {
    match (normalize_address(a), normalize_address(b)) {
        (Some(a), Some(b)) => a == b,
        _ => a.eq_ignore_ascii_case(b),
    }
}

/// Parse a `0x`-prefixed address string. Checksums are not enforced.
pub fn parse_address(value: &str) -> Result<Address, Eip712Error> {
    normalize_address(value)
        .and_then(|normalized| normalized.parse().ok())
        .ok_or_else(|| Eip712Error::InvalidAddress(value.to_string()))
}

/// Lowercase string form of `address`.
pub fn format_address(address: &Address) -> String {
    encode_hex_prefixed(address.as_slice())
}

pub fn address_from_verifying_key(key: &VerifyingKey) -> String {
    let encoded = key.to_encoded_point(false);
    format_address(&Address::from_raw_public_key(&encoded.as_bytes()[1..]))
}

pub fn address_of(key: &SigningKey) -> String {
    address_from_verifying_key(key.verifying_key())
}

/// Sign a 32-byte digest, returning `0x{r}{s}{v}` with `v ∈ {27, 28}`.
pub fn sign_hash(key: &SigningKey, hash: &[u8; 32]) -> Result<String, Eip712Error> {
    let (signature, recovery_id) = key
        .sign_prehash_recoverable(hash)
        .map_err(|e| Eip712Error::InvalidSignature(e.to_string()))?;
    let mut out = Vec::with_capacity(65);
    out.extend_from_slice(&signature.to_bytes());
    out.push(27 + recovery_id.to_byte());
    Ok(encode_hex_prefixed(&out))
}

/// Recover the signing address (lowercase) of a 65-byte signature over `hash`.
pub fn recover_signer(hash: &[u8; 32], signature_hex: &str) -> Result<String, Eip712Error> {
    let bytes = decode_hex(signature_hex)?;
    if bytes.len() != 65 {
        return Err(Eip712Error::InvalidSignature(
            "signature must decode to 65 bytes".to_string(),
        ));
    }
    let signature = EcdsaSignature::try_from(&bytes[..64])
        .map_err(|e| Eip712Error::InvalidSignature(format!("invalid ECDSA bytes: {e}")))?;
    let recovery_id = normalize_recovery_id(bytes[64])?;
    let key = VerifyingKey::recover_from_prehash(hash, &signature, recovery_id)
        .map_err(|e| Eip712Error::InvalidSignature(format!("recovery failed: {e}")))?;
    Ok(address_from_verifying_key(&key))
}

fn normalize_recovery_id(raw: u8) -> Result<RecoveryId, Eip712Error> {
    let id = match raw {
        27 | 28 => raw - 27,
        0 | 1 => raw,
        _ => {
            return Err(Eip712Error::InvalidSignature(
                "recovery id must be 0/1 or 27/28".to_string(),
            ));
        }
    };
    RecoveryId::try_from(id)
        .map_err(|_| Eip712Error::InvalidSignature("recovery id is invalid".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mail_typed_data() -> TypedData {
        serde_json::from_value(json!({
            "types": {
                "EIP712Domain": [
                    { "name": "name", "type": "string" },
                    { "name": "version", "type": "string" },
                    { "name": "chainId", "type": "uint256" },
                    { "name": "verifyingContract", "type": "address" }
                ],
                "Person": [
                    { "name": "name", "type": "string" },
                    { "name": "wallet", "type": "address" }
                ],
                "Mail": [
                    { "name": "from", "type": "Person" },
                    { "name": "to", "type": "Person" },
                    { "name": "contents", "type": "string" }
                ]
            },
            "primaryType": "Mail",
            "domain": {
                "name": "Ether Mail",
                "version": "1",
                "chainId": 1,
                "verifyingContract": "0xCcCCccccCCCCcCCCCCCcCcCccCcCCCcCcccccccC"
            },
            "message": {
                "from": { "name": "Cow", "wallet": "0xCD2a3d9F938E13CD947Ec05AbC7FE734Df8DD826" },
                "to": { "name": "Bob", "wallet": "0xbBbBBBBbbBBBbbbBbbBbbbbBBbBbbbbBbBbbBBbB" },
                "contents": "Hello, Bob!"
            }
        }))
        .expect("mail typed data")
    }

    #[test]
    fn mail_example_matches_reference_digest() {
        let data = mail_typed_data();
        assert_eq!(
            hex::encode(data.domain.separator()),
            "f2cee375fa42b42143804025fc449deafd50cc031ca257e0b194a650a912090f"
        );
        assert_eq!(
            hex::encode(signing_hash(&data).unwrap()),
            "be609aee343fb3c4b28e1df9e632fca64fcfaede20f02e86244efddf30957bd2"
        );
    }

    #[test]
    fn wallet_json_survives_a_round_trip() {
        let data = mail_typed_data();
        let wire = serde_json::to_string(&data).unwrap();
        let parsed: TypedData = serde_json::from_str(&wire).unwrap();
        assert_eq!(signing_hash(&parsed), signing_hash(&data));
    }

    #[test]
    fn sign_then_recover_round_trips_signer() {
        let key = SigningKey::from_slice(&[7u8; 32]).unwrap();
        let hash = signing_hash(&mail_typed_data()).unwrap();
        let signature = sign_hash(&key, &hash).unwrap();
        assert_eq!(recover_signer(&hash, &signature).unwrap(), address_of(&key));

        let other = keccak256(b"different payload");
        assert_ne!(recover_signer(&other, &signature).unwrap(), address_of(&key));
    }

    #[test]
    fn recover_rejects_malformed_signatures() {
        let hash = keccak256(b"x");
        assert!(recover_signer(&hash, "0x1234").is_err());
        let mut bad_v = "0x".to_string();
        bad_v.push_str(&"11".repeat(64));
        bad_v.push_str("05");
        assert!(matches!(
            recover_signer(&hash, &bad_v),
            Err(Eip712Error::InvalidSignature(_))
        ));
    }

    #[test]
    fn address_normalization() {
        assert_eq!(
            normalize_address("0xCD2a3d9F938E13CD947Ec05AbC7FE734Df8DD826").as_deref(),
            Some("0xcd2a3d9f938e13cd947ec05abc7fe734df8dd826")
        );
        assert!(normalize_address("0x1234").is_none());
        assert!(addresses_equal(
            "0xCD2a3d9F938E13CD947Ec05AbC7FE734Df8DD826",
            "0xcd2a3d9f938e13cd947ec05abc7fe734df8dd826"
        ));

        let parsed = parse_address("0xCD2a3d9F938E13CD947Ec05AbC7FE734Df8DD826").unwrap();
        assert_eq!(
            format_address(&parsed),
            "0xcd2a3d9f938e13cd947ec05abc7fe734df8dd826"
        );
        assert!(matches!(
            parse_address("cd2a3d9f938e13cd947ec05abc7fe734df8dd826"),
            Err(Eip712Error::InvalidAddress(_))
        ));
    }
}
