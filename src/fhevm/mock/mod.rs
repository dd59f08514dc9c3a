//! In-process simulation of the encryption platform for local dev chains.
//!
//! Values are not actually encrypted. The backend keeps cleartexts and an
//! access list in memory, signs input proofs with a simulated coprocessor key
//! under the live input-verification domain, and enforces the same
//! authorization rules on reveals that the real key management service does.

pub mod rpc;

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use k256::ecdsa::SigningKey;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};

use super::handle::Handle;
use super::instance::{
    BackendKind, DecryptionKeypair, EncryptedData, FhevmBackend, HandleContractPair,
    UserDecryptRequest, user_decrypt_typed_data, user_decrypt_verification,
};
use super::proof::{InputProof, ciphertext_verification};
use super::types::FheValue;
use crate::eip712::{
    SolStruct, TypedData, address_of, addresses_equal, decode_hex, encode_hex_prefixed, keccak256,
    normalize_address, parse_address, recover_signer, sign_hash,
};
use crate::error::FhevmError;
use crate::rpc::JsonRpcClient;

pub use self::rpc::{ContractDomain, RelayerMetadata, SimulationParams};

const DEFAULT_COPROCESSOR_SEED: &[u8] = b"fhevm-wallet-runtime/simulated-coprocessor";
const MAX_DURATION_DAYS: u64 = 365;
const CLOCK_SKEW_SECS: u64 = 60;
const INPUT_EXTRA_DATA: [u8; 1] = [0x00];

/// Coprocessor signing key: the configured hex secret, or a fixed dev key.
pub fn coprocessor_key(secret: Option<&SecretString>) -> Result<SigningKey, FhevmError> {
    let bytes = match secret {
        Some(secret) => decode_hex(secret.expose_secret())
            .map_err(|e| FhevmError::InvalidInput(format!("simulation signer key: {e}")))?,
        None => keccak256(DEFAULT_COPROCESSOR_SEED).to_vec(),
    };
    SigningKey::from_slice(&bytes)
        .map_err(|e| FhevmError::InvalidInput(format!("simulation signer key: {e}")))
}

#[derive(Default)]
struct Ledger {
    cleartexts: HashMap<Handle, FheValue>,
    acl: HashMap<Handle, HashSet<String>>,
}

/// Simulated coprocessor and key management service.
///
/// Handles created by this backend are answered from its in-memory ledger.
/// With a dev node attached, any other handle is checked against the
/// on-chain ACL and its cleartext is read from the node.
pub struct SimulationBackend {
    params: SimulationParams,
    coprocessor: SigningKey,
    coprocessor_address: String,
    acl_bytes: Vec<u8>,
    ledger: RwLock<Ledger>,
    node: Option<JsonRpcClient>,
}

impl SimulationBackend {
    pub fn new(params: SimulationParams, coprocessor: SigningKey) -> Self {
        let coprocessor_address = address_of(&coprocessor);
        let acl_bytes = decode_hex(&params.acl_address).unwrap_or_default();
        Self {
            params,
            coprocessor,
            coprocessor_address,
            acl_bytes,
            ledger: RwLock::new(Ledger::default()),
            node: None,
        }
    }

    /// Fall back to `node` for handles missing from the ledger.
    pub fn with_node(mut self, node: JsonRpcClient) -> Self {
        self.node = Some(node);
        self
    }

    pub fn params(&self) -> &SimulationParams {
        &self.params
    }

    pub fn coprocessor_address(&self) -> &str {
        &self.coprocessor_address
    }

    /// Grant `account` (a user or a contract) read access to `handle`.
    pub fn allow(&self, handle: &Handle, account: &str) {
        let account = normalize_address(account).unwrap_or_else(|| account.to_ascii_lowercase());
        self.ledger
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .acl
            .entry(*handle)
            .or_default()
            .insert(account);
    }

    pub fn is_allowed(&self, handle: &Handle, account: &str) -> bool {
        let account = normalize_address(account).unwrap_or_else(|| account.to_ascii_lowercase());
        self.ledger
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .acl
            .get(handle)
            .is_some_and(|allowed| allowed.contains(&account))
    }

    /// Record the cleartext behind a contract-computed handle.
    pub fn store_cleartext(&self, handle: Handle, value: FheValue) {
        self.ledger
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .cleartexts
            .insert(handle, value);
    }

    pub fn cleartext(&self, handle: &Handle) -> Option<FheValue> {
        self.ledger
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .cleartexts
            .get(handle)
            .cloned()
    }

    /// Whether the ledger holds a cleartext or any grant for `handle`.
    fn knows(&self, handle: &Handle) -> bool {
        let ledger = self.ledger.read().unwrap_or_else(PoisonError::into_inner);
        ledger.cleartexts.contains_key(handle) || ledger.acl.contains_key(handle)
    }

    /// Check an input proof the way the on-chain input verifier does and
    /// return the attested handles.
    pub fn verify_input_proof(
        &self,
        proof: &[u8],
        contract: &str,
        user: &str,
    ) -> Result<Vec<Handle>, FhevmError> {
        let decoded = InputProof::decode(proof)?;
        if decoded.signatures.is_empty() {
            return Err(FhevmError::AuthorizationFailure {
                reason: "input proof carries no coprocessor signature".to_string(),
            });
        }
        let hash = ciphertext_verification(
            &decoded.handles,
            user,
            contract,
            self.params.chain_id,
            &decoded.extra_data,
        )?
        .eip712_signing_hash(&self.params.input_verification_domain)
        .0;
        for signature in &decoded.signatures {
            let signer = recover_signer(&hash, signature).map_err(|e| {
                FhevmError::AuthorizationFailure {
                    reason: e.to_string(),
                }
            })?;
            if !addresses_equal(&signer, &self.coprocessor_address) {
                return Err(FhevmError::AuthorizationFailure {
                    reason: format!("input proof signed by unknown coprocessor {signer}"),
                });
            }
        }
        Ok(decoded.handles)
    }

    fn check_authorization(
        &self,
        pairs: &[HandleContractPair],
        request: &UserDecryptRequest,
    ) -> Result<(), FhevmError> {
        let deny = |reason: String| Err(FhevmError::AuthorizationFailure { reason });

        for pair in pairs {
            if !request
                .contract_addresses
                .iter()
                .any(|signed| addresses_equal(signed, &pair.contract_address))
            {
                return deny(format!(
                    "contract {} is not covered by the signature",
                    pair.contract_address
                ));
            }
        }

        if request.duration_days == 0 || request.duration_days > MAX_DURATION_DAYS {
            return deny(format!(
                "duration of {} days is outside 1..={MAX_DURATION_DAYS}",
                request.duration_days
            ));
        }
        let now = u64::try_from(Utc::now().timestamp()).unwrap_or(0);
        if request.start_timestamp > now + CLOCK_SKEW_SECS {
            return deny("signature validity has not started".to_string());
        }
        let expiry = request
            .start_timestamp
            .saturating_add(request.duration_days * 86_400);
        if now > expiry {
            return deny("signature has expired".to_string());
        }

        if !DecryptionKeypair::matches(&request.public_key, &request.private_key) {
            return deny("private key does not match the signed public key".to_string());
        }

        let hash = user_decrypt_verification(
            &request.public_key,
            &request.contract_addresses,
            request.start_timestamp,
            request.duration_days,
        )?
        .eip712_signing_hash(&self.params.decryption_domain)
        .0;
        let signer = recover_signer(&hash, &request.signature).map_err(|e| {
            FhevmError::AuthorizationFailure {
                reason: e.to_string(),
            }
        })?;
        if !addresses_equal(&signer, &request.user_address) {
            return deny(format!(
                "signature recovers to {signer}, not {}",
                request.user_address
            ));
        }
        Ok(())
    }

    /// Reveal handles the ledger does not know, through the dev node.
    async fn reveal_from_node(
        &self,
        node: &JsonRpcClient,
        pending: &[(Handle, &str)],
        user: &str,
    ) -> Result<HashMap<String, FheValue>, FhevmError> {
        let account = |value: &str| {
            parse_address(value).map_err(|e| FhevmError::AuthorizationFailure {
                reason: e.to_string(),
            })
        };
        let user_address = account(user)?;
        for (handle, contract) in pending {
            for (label, address) in [(user, user_address), (*contract, account(*contract)?)] {
                if !rpc::fetch_acl_permission(node, &self.params.acl_address, handle, address)
                    .await?
                {
                    return Err(FhevmError::AuthorizationFailure {
                        reason: format!("the ACL does not allow {label} to use {handle}"),
                    });
                }
            }
        }

        let handles: Vec<Handle> = pending.iter().map(|(handle, _)| *handle).collect();
        let words = rpc::fetch_cleartexts(node, &handles).await?;
        let mut revealed = HashMap::new();
        for (handle, word) in handles.iter().zip(words) {
            let Some(ty) = handle.fhe_type() else {
                tracing::debug!(%handle, "Skipping handle with an unknown type tag");
                continue;
            };
            revealed.insert(handle.to_hex(), FheValue::from_word(ty, &word)?);
        }
        tracing::debug!(
            requested = handles.len(),
            revealed = revealed.len(),
            "Revealed handles through the dev node"
        );
        Ok(revealed)
    }
}

#[async_trait]
impl FhevmBackend for SimulationBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Simulation
    }

    fn chain_id(&self) -> u64 {
        self.params.chain_id
    }

    async fn encrypt(
        &self,
        contract: &str,
        user: &str,
        values: &[FheValue],
    ) -> Result<EncryptedData, FhevmError> {
        let index_limit = u8::try_from(values.len())
            .map_err(|_| FhevmError::InvalidInput("too many values in one input".to_string()))?;

        // Blob: random nonce followed by (type tag, word) per value.
        let mut nonce = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut nonce);
        let mut blob = nonce.to_vec();
        for value in values {
            blob.push(value.fhe_type().id());
            blob.extend_from_slice(&value.to_word());
        }
        let blob_hash = keccak256(&blob);

        let handles: Vec<Handle> = (0..index_limit)
            .zip(values)
            .map(|(index, value)| {
                Handle::derive(
                    &blob_hash,
                    index,
                    &self.acl_bytes,
                    self.params.chain_id,
                    value.fhe_type(),
                )
            })
            .collect();

        let hash = ciphertext_verification(
            &handles,
            user,
            contract,
            self.params.chain_id,
            &INPUT_EXTRA_DATA,
        )?
        .eip712_signing_hash(&self.params.input_verification_domain)
        .0;
        let signature =
            sign_hash(&self.coprocessor, &hash).map_err(|e| FhevmError::Backend(e.to_string()))?;
        let input_proof = InputProof {
            handles: handles.clone(),
            signatures: vec![signature],
            extra_data: INPUT_EXTRA_DATA.to_vec(),
        }
        .encode()?;

        // Only an attested input reaches the ledger.
        {
            let mut ledger = self.ledger.write().unwrap_or_else(PoisonError::into_inner);
            for (handle, value) in handles.iter().zip(values) {
                ledger.cleartexts.insert(*handle, value.clone());
                let allowed = ledger.acl.entry(*handle).or_default();
                allowed.insert(user.to_ascii_lowercase());
                allowed.insert(contract.to_ascii_lowercase());
            }
        }

        tracing::debug!(
            contract,
            handles = handles.len(),
            proof_bytes = input_proof.len(),
            "Simulated input encryption"
        );
        Ok(EncryptedData {
            handles,
            input_proof,
        })
    }

    fn create_eip712(
        &self,
        public_key: &str,
        contract_addresses: &[String],
        start_timestamp: u64,
        duration_days: u64,
    ) -> Result<TypedData, FhevmError> {
        user_decrypt_typed_data(
            self.params.decryption_domain.clone(),
            public_key,
            contract_addresses,
            start_timestamp,
            duration_days,
        )
    }

    async fn user_decrypt(
        &self,
        pairs: &[HandleContractPair],
        request: &UserDecryptRequest,
    ) -> Result<HashMap<String, FheValue>, FhevmError> {
        self.check_authorization(pairs, request)?;

        let mut revealed = HashMap::new();
        let mut pending = Vec::new();
        for pair in pairs {
            let Ok(handle) = Handle::from_hex(&pair.handle) else {
                tracing::debug!(handle = %pair.handle, "Skipping malformed handle");
                continue;
            };
            if !self.knows(&handle) && self.node.is_some() {
                pending.push((handle, pair.contract_address.as_str()));
                continue;
            }
            if !self.is_allowed(&handle, &request.user_address)
                || !self.is_allowed(&handle, &pair.contract_address)
            {
                return Err(FhevmError::AuthorizationFailure {
                    reason: format!(
                        "{} may not be revealed to {} through {}",
                        handle, request.user_address, pair.contract_address
                    ),
                });
            }
            if let Some(value) = self.cleartext(&handle) {
                revealed.insert(handle.to_hex(), value);
            }
        }

        if let Some(node) = &self.node
            && !pending.is_empty()
        {
            revealed.extend(
                self.reveal_from_node(node, &pending, &request.user_address)
                    .await?,
            );
        }
        Ok(revealed)
    }

    fn public_key(&self) -> Option<String> {
        Some(encode_hex_prefixed(&[0u8; 32]))
    }

    fn public_params(&self, bits: u32) -> Option<String> {
        let mut seed = b"public-params".to_vec();
        seed.extend_from_slice(&bits.to_be_bytes());
        Some(encode_hex_prefixed(&keccak256(&seed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eip712::eip712_domain;
    use crate::fhevm::instance::{FhevmInstance, MAX_INPUT_BITS};
    use crate::fhevm::types::FheType;
    use crate::wallet::{LocalKeySigner, TypedDataSigner};
    use std::sync::Arc;

    const CONTRACT: &str = "0x00000000000000000000000000000000000000c0";

    fn params() -> SimulationParams {
        SimulationParams {
            chain_id: 31337,
            gateway_chain_id: 55815,
            acl_address: "0x50157cffd6bbfa2dece204a89ec419c23ef5755d".into(),
            input_verifier_address: "0x901f8942346f7ab3a01f6d7613119bca447bb030".into(),
            kms_verifier_address: "0x1364cbbf2cdf5032c47d8226a6f6fbd2afcdacac".into(),
            decryption_domain: eip712_domain! {
                name: "KMSVerifier",
                version: "1",
                chain_id: 55815,
                verifying_contract: parse_address("0x5ffdaab0373e62e2ea2944776209aef29e631a64").unwrap(),
            },
            input_verification_domain: eip712_domain! {
                name: "InputVerification",
                version: "1",
                chain_id: 55815,
                verifying_contract: parse_address("0x812b06e1cdce800494b79ffe4f925a504a9a9810").unwrap(),
            },
        }
    }

    fn backend() -> Arc<SimulationBackend> {
        Arc::new(SimulationBackend::new(
            params(),
            coprocessor_key(None).unwrap(),
        ))
    }

    #[tokio::test]
    async fn input_proof_attests_handles_in_order() {
        let backend = backend();
        let instance = FhevmInstance::new(backend.clone());
        let user = LocalKeySigner::random().address().await.unwrap();

        let mut input = instance.create_encrypted_input(CONTRACT, &user).unwrap();
        input.add32(1500).add_bool(true).add64(7);
        let encrypted = input.encrypt().await.unwrap();

        assert_eq!(encrypted.handles.len(), 3);
        let types: Vec<_> = encrypted.handles.iter().map(|h| h.fhe_type()).collect();
        assert_eq!(
            types,
            vec![Some(FheType::U32), Some(FheType::Bool), Some(FheType::U64)]
        );
        assert!(encrypted.handles.iter().all(|h| h.chain_id() == 31337));
        assert_eq!(
            encrypted.input_proof.len(),
            2 + 3 * 32 + 65 + INPUT_EXTRA_DATA.len()
        );

        let attested = backend
            .verify_input_proof(&encrypted.input_proof, CONTRACT, &user)
            .unwrap();
        assert_eq!(attested, encrypted.handles);
        assert!(
            backend
                .verify_input_proof(
                    &encrypted.input_proof,
                    "0x00000000000000000000000000000000000000c1",
                    &user
                )
                .is_err()
        );
    }

    #[tokio::test]
    async fn oversized_and_empty_inputs_are_rejected() {
        let instance = FhevmInstance::new(backend());
        let user = "0x00000000000000000000000000000000000000aa";

        let empty = instance.create_encrypted_input(CONTRACT, user).unwrap();
        assert!(matches!(
            empty.encrypt().await,
            Err(FhevmError::InvalidInput(_))
        ));

        let mut big = instance.create_encrypted_input(CONTRACT, user).unwrap();
        for _ in 0..13 {
            big.add_address(CONTRACT);
        }
        assert!(big.bits() > MAX_INPUT_BITS);
        assert!(matches!(
            big.encrypt().await,
            Err(FhevmError::InputTooLarge { max: 2048, .. })
        ));

        let mut bad = instance.create_encrypted_input(CONTRACT, user).unwrap();
        bad.add8(1).add_address("not-an-address");
        assert!(bad.encrypt().await.is_err());
    }

    #[tokio::test]
    async fn reveal_requires_matching_signature_and_acl() {
        let backend = backend();
        let instance = FhevmInstance::new(backend.clone());
        let signer = LocalKeySigner::random();
        let user = signer.address().await.unwrap();

        let mut input = instance.create_encrypted_input(CONTRACT, &user).unwrap();
        input.add16(42);
        let handle = input.encrypt().await.unwrap().handles[0];

        let keypair = instance.generate_keypair().unwrap();
        let start = u64::try_from(Utc::now().timestamp()).unwrap();
        let contracts = vec![CONTRACT.to_string()];
        let typed = instance
            .create_eip712(&keypair.public_key, &contracts, start, 7)
            .unwrap();
        let signature = signer
            .sign_typed_data(&typed)
            .await
            .unwrap();
        let request = UserDecryptRequest {
            private_key: keypair.private_key,
            public_key: keypair.public_key,
            signature,
            contract_addresses: contracts,
            user_address: user.clone(),
            start_timestamp: start,
            duration_days: 7,
        };

        let pairs = [HandleContractPair::new(handle.to_hex(), CONTRACT)];
        let revealed = instance.user_decrypt(&pairs, &request).await.unwrap();
        assert_eq!(revealed.get(&handle.to_hex()), Some(&FheValue::U16(42)));

        let foreign = [HandleContractPair::new(
            handle.to_hex(),
            "0x00000000000000000000000000000000000000c1",
        )];
        assert!(matches!(
            instance.user_decrypt(&foreign, &request).await,
            Err(FhevmError::AuthorizationFailure { .. })
        ));

        let expired = UserDecryptRequest {
            start_timestamp: start - 8 * 86_400,
            ..request
        };
        assert!(matches!(
            instance.user_decrypt(&pairs, &expired).await,
            Err(FhevmError::AuthorizationFailure { .. })
        ));
    }

    #[test]
    fn default_coprocessor_key_is_stable() {
        let a = address_of(&coprocessor_key(None).unwrap());
        let b = address_of(&coprocessor_key(None).unwrap());
        assert_eq!(a, b);
        let custom = SecretString::from(alloy_primitives::hex::encode([7u8; 32]));
        assert_ne!(a, address_of(&coprocessor_key(Some(&custom)).unwrap()));
    }

    #[tokio::test]
    async fn failed_attestation_leaves_the_ledger_untouched() {
        let backend = backend();
        let result = backend
            .encrypt(CONTRACT, "not-an-address", &[FheValue::U8(1), FheValue::Bool(true)])
            .await;
        assert!(matches!(result, Err(FhevmError::InvalidInput(_))));

        let ledger = backend.ledger.read().unwrap();
        assert!(ledger.cleartexts.is_empty());
        assert!(ledger.acl.is_empty());
    }

    #[tokio::test]
    async fn unknown_handles_without_a_node_are_denied() {
        let backend = backend();
        let instance = FhevmInstance::new(backend.clone());
        let signer = LocalKeySigner::random();
        let user = signer.address().await.unwrap();

        let keypair = instance.generate_keypair().unwrap();
        let start = u64::try_from(Utc::now().timestamp()).unwrap();
        let contracts = vec![CONTRACT.to_string()];
        let typed = instance
            .create_eip712(&keypair.public_key, &contracts, start, 1)
            .unwrap();
        let request = UserDecryptRequest {
            signature: signer.sign_typed_data(&typed).await.unwrap(),
            private_key: keypair.private_key,
            public_key: keypair.public_key,
            contract_addresses: contracts,
            user_address: user,
            start_timestamp: start,
            duration_days: 1,
        };
        let stranger = Handle::derive(&[3u8; 32], 0, &[0x50; 20], 31337, FheType::U8);
        let pairs = [HandleContractPair::new(stranger.to_hex(), CONTRACT)];
        assert!(matches!(
            instance.user_decrypt(&pairs, &request).await,
            Err(FhevmError::AuthorizationFailure { .. })
        ));
    }
}
