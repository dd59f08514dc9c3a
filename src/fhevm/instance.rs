//! The encryption/decryption capability object.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use alloy_primitives::{Bytes, U256, hex};
use async_trait::async_trait;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use super::abi::UserDecryptRequestVerification;
use super::handle::Handle;
use super::input::EncryptedInputBuilder;
use super::types::FheValue;
use crate::eip712::{
    Eip712Domain, TypedData, decode_hex, encode_hex_prefixed, keccak256, normalize_address,
    parse_address,
};
use crate::error::FhevmError;

/// Upper bound on the summed bit width of one encrypted input.
pub const MAX_INPUT_BITS: u32 = 2048;

const USER_DECRYPT_EXTRA_DATA: [u8; 1] = [0x00];

/// Output of one encryption pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedData {
    /// One handle per added value, in insertion order.
    pub handles: Vec<Handle>,
    #[serde(serialize_with = "serialize_hex")]
    pub input_proof: Vec<u8>,
}

impl EncryptedData {
    pub fn input_proof_hex(&self) -> String {
        encode_hex_prefixed(&self.input_proof)
    }
}

fn serialize_hex<S: serde::Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&encode_hex_prefixed(bytes))
}

/// Ephemeral keypair that re-encrypted results are delivered under.
pub struct DecryptionKeypair {
    pub public_key: String,
    pub private_key: SecretString,
}

impl DecryptionKeypair {
    pub fn generate() -> Self {
        let mut private = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut private);
        let public_key = encode_hex_prefixed(&keccak256(&private));
        Self {
            public_key,
            private_key: SecretString::from(hex::encode(private)),
        }
    }

    /// Whether `private_key` is the secret half of `public_key`.
    pub fn matches(public_key: &str, private_key: &SecretString) -> bool {
        let Ok(private) = decode_hex(private_key.expose_secret()) else {
            return false;
        };
        let Ok(public) = decode_hex(public_key) else {
            return false;
        };
        keccak256(&private).as_slice() == public.as_slice()
    }
}

impl fmt::Debug for DecryptionKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptionKeypair")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

/// A handle to reveal and the contract it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandleContractPair {
    pub handle: String,
    pub contract_address: String,
}

impl HandleContractPair {
    pub fn new(handle: impl Into<String>, contract_address: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            contract_address: contract_address.into(),
        }
    }
}

/// Everything the platform needs to authorize one reveal batch.
pub struct UserDecryptRequest {
    pub private_key: SecretString,
    pub public_key: String,
    pub signature: String,
    pub contract_addresses: Vec<String>,
    pub user_address: String,
    pub start_timestamp: u64,
    pub duration_days: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Simulation,
    Remote,
}

/// Backend behind an [`FhevmInstance`].
#[async_trait]
pub trait FhevmBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn chain_id(&self) -> u64;

    /// Encrypt `values` bound to `(contract, user)` in one pass.
    async fn encrypt(
        &self,
        contract: &str,
        user: &str,
        values: &[FheValue],
    ) -> Result<EncryptedData, FhevmError>;

    fn generate_keypair(&self) -> Result<DecryptionKeypair, FhevmError> {
        Ok(DecryptionKeypair::generate())
    }

    fn create_eip712(
        &self,
        public_key: &str,
        contract_addresses: &[String],
        start_timestamp: u64,
        duration_days: u64,
    ) -> Result<TypedData, FhevmError>;

    /// Reveal `pairs`. Keys of the returned map are handle strings as the
    /// backend chooses to spell them; handles it cannot reveal are absent.
    async fn user_decrypt(
        &self,
        pairs: &[HandleContractPair],
        request: &UserDecryptRequest,
    ) -> Result<HashMap<String, FheValue>, FhevmError>;

    fn public_key(&self) -> Option<String>;

    fn public_params(&self, bits: u32) -> Option<String>;
}

/// Cheaply cloneable capability object for one `(chain, account)` pair.
#[derive(Clone)]
pub struct FhevmInstance {
    backend: Arc<dyn FhevmBackend>,
}

impl FhevmInstance {
    pub fn new(backend: Arc<dyn FhevmBackend>) -> Self {
        Self { backend }
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn chain_id(&self) -> u64 {
        self.backend.chain_id()
    }

    pub fn backend(&self) -> &Arc<dyn FhevmBackend> {
        &self.backend
    }

    /// Start an input bound to `contract` and `user`. Both must be addresses.
    pub fn create_encrypted_input(
        &self,
        contract: &str,
        user: &str,
    ) -> Result<EncryptedInputBuilder, FhevmError> {
        let contract = normalize_address(contract)
            .ok_or_else(|| FhevmError::InvalidInput(format!("invalid contract address {contract}")))?;
        let user = normalize_address(user)
            .ok_or_else(|| FhevmError::InvalidInput(format!("invalid user address {user}")))?;
        Ok(EncryptedInputBuilder::new(self.clone(), contract, user))
    }

    pub(crate) async fn encrypt_values(
        &self,
        contract: &str,
        user: &str,
        values: &[FheValue],
    ) -> Result<EncryptedData, FhevmError> {
        self.backend.encrypt(contract, user, values).await
    }

    pub fn generate_keypair(&self) -> Result<DecryptionKeypair, FhevmError> {
        self.backend.generate_keypair()
    }

    pub fn create_eip712(
        &self,
        public_key: &str,
        contract_addresses: &[String],
        start_timestamp: u64,
        duration_days: u64,
    ) -> Result<TypedData, FhevmError> {
        self.backend
            .create_eip712(public_key, contract_addresses, start_timestamp, duration_days)
    }

    pub async fn user_decrypt(
        &self,
        pairs: &[HandleContractPair],
        request: &UserDecryptRequest,
    ) -> Result<HashMap<String, FheValue>, FhevmError> {
        self.backend.user_decrypt(pairs, request).await
    }

    pub fn public_key(&self) -> Option<String> {
        self.backend.public_key()
    }

    pub fn public_params(&self, bits: u32) -> Option<String> {
        self.backend.public_params(bits)
    }
}

impl fmt::Debug for FhevmInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FhevmInstance")
            .field("kind", &self.kind())
            .field("chain_id", &self.chain_id())
            .finish()
    }
}

/// The authorization a user signs to reveal handles of `contract_addresses`.
pub fn user_decrypt_verification(
    public_key: &str,
    contract_addresses: &[String],
    start_timestamp: u64,
    duration_days: u64,
) -> Result<UserDecryptRequestVerification, FhevmError> {
    let public_key = decode_hex(public_key)
        .map_err(|e| FhevmError::InvalidInput(format!("decryption public key: {e}")))?;
    let contract_addresses = contract_addresses
        .iter()
        .map(|address| parse_address(address))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| FhevmError::InvalidInput(e.to_string()))?;
    Ok(UserDecryptRequestVerification {
        publicKey: Bytes::from(public_key),
        contractAddresses: contract_addresses,
        startTimestamp: U256::from(start_timestamp),
        durationDays: U256::from(duration_days),
        extraData: Bytes::from_static(&USER_DECRYPT_EXTRA_DATA),
    })
}

/// Wallet payload for [`user_decrypt_verification`] under `domain`.
pub fn user_decrypt_typed_data(
    domain: Eip712Domain,
    public_key: &str,
    contract_addresses: &[String],
    start_timestamp: u64,
    duration_days: u64,
) -> Result<TypedData, FhevmError> {
    let verification = user_decrypt_verification(
        public_key,
        contract_addresses,
        start_timestamp,
        duration_days,
    )?;
    Ok(TypedData::from_struct(&verification, Some(domain)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eip712::{SolStruct, eip712_domain, signing_hash};

    #[test]
    fn keypair_halves_match() {
        let keypair = DecryptionKeypair::generate();
        assert!(DecryptionKeypair::matches(
            &keypair.public_key,
            &keypair.private_key
        ));
        let other = DecryptionKeypair::generate();
        assert!(!DecryptionKeypair::matches(
            &keypair.public_key,
            &other.private_key
        ));
        assert!(!format!("{keypair:?}").contains(keypair.private_key.expose_secret()));
    }

    #[test]
    fn user_decrypt_payload_hashes_with_domain() {
        let domain = eip712_domain! {
            name: "Decryption",
            version: "1",
            chain_id: 10901,
            verifying_contract: parse_address("0x5ffdaAB0373E62E2ea2944776209aEf29E631A64").unwrap(),
        };
        let contracts = ["0x0000000000000000000000000000000000000001".to_string()];
        let data =
            user_decrypt_typed_data(domain.clone(), "0x1234", &contracts, 1_700_000_000, 7)
                .unwrap();
        assert_eq!(data.primary_type, "UserDecryptRequestVerification");
        assert_eq!(data.message["durationDays"], "0x7");
        assert_eq!(data.message["extraData"], "0x00");

        let verification = user_decrypt_verification("0x1234", &contracts, 1_700_000_000, 7)
            .unwrap();
        assert_eq!(
            signing_hash(&data).unwrap(),
            verification.eip712_signing_hash(&domain).0
        );
    }

    #[test]
    fn user_decrypt_payload_rejects_malformed_inputs() {
        let contracts = ["not-an-address".to_string()];
        assert!(matches!(
            user_decrypt_verification("0x1234", &contracts, 0, 1),
            Err(FhevmError::InvalidInput(_))
        ));
        assert!(matches!(
            user_decrypt_verification("0xzz", &[], 0, 1),
            Err(FhevmError::InvalidInput(_))
        ));
    }
}
