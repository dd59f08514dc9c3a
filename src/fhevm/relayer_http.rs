//! Relayer SDK backed by a hosted relayer's HTTP API.
//!
//! Inputs are submitted to `POST {relayer}/v1/input-proof`, which answers
//! with the handles and coprocessor signatures of the input. Reveals go to
//! `POST {relayer}/v1/user-decrypt` together with the user's signed
//! authorization. Both endpoints wrap their payload in `{"response": ...}`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::handle::Handle;
use super::instance::{
    BackendKind, EncryptedData, FhevmBackend, HandleContractPair, UserDecryptRequest,
    user_decrypt_typed_data,
};
use super::proof::InputProof;
use super::relayer::{RelayerInstanceConfig, RelayerSdk};
use super::types::FheValue;
use crate::eip712::{
    TypedData, decode_hex, eip712_domain, encode_hex_prefixed, normalize_address, parse_address,
};
use crate::error::FhevmError;

pub const DEFAULT_RELAYER_URL: &str = "https://relayer.testnet.zama.cloud";

const INPUT_PROOF_PATH: &str = "/v1/input-proof";
const USER_DECRYPT_PATH: &str = "/v1/user-decrypt";
const EXTRA_DATA: [u8; 1] = [0x00];

/// Protocol deployment the relayer serves for one host chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayerNetwork {
    pub chain_id: u64,
    pub gateway_chain_id: u64,
    pub acl_address: String,
    pub kms_verifier_address: String,
    pub input_verifier_address: String,
    /// Verifying contract of the user-decrypt EIP-712 domain.
    pub decryption_contract: String,
    /// Verifying contract of the input attestation domain.
    pub input_verification_contract: String,
}

impl RelayerNetwork {
    pub fn sepolia() -> Self {
        Self {
            chain_id: 11_155_111,
            gateway_chain_id: 55_815,
            acl_address: "0xf0ffdc93b7e186bc2f8cb3daa75d86d1930a433d".to_string(),
            kms_verifier_address: "0xbe0e383937d564d7ff0bc3b46c51f0bf8d5c311a".to_string(),
            input_verifier_address: "0xbbc1ffcdc7c316aaad72e807d9b0272be8f84da0".to_string(),
            decryption_contract: "0x5d8bd78e2ea6bbe41f26dfe9fdaeaa349e077478".to_string(),
            input_verification_contract: "0x483b9de06e4e4c7d35ccf5837a1668487406d955".to_string(),
        }
    }
}

/// SDK that builds backends talking to the relayer at `base_url`.
pub struct HttpRelayerSdk {
    client: reqwest::Client,
    base_url: String,
    networks: Vec<RelayerNetwork>,
}

impl HttpRelayerSdk {
    /// Serves Sepolia out of the box; more deployments via [`Self::with_network`].
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            networks: vec![RelayerNetwork::sepolia()],
        }
    }

    pub fn with_network(mut self, network: RelayerNetwork) -> Self {
        self.networks.retain(|n| n.chain_id != network.chain_id);
        self.networks.push(network);
        self
    }

    pub fn network(&self, chain_id: u64) -> Option<&RelayerNetwork> {
        self.networks.iter().find(|n| n.chain_id == chain_id)
    }
}

#[async_trait]
impl RelayerSdk for HttpRelayerSdk {
    fn version(&self) -> String {
        format!("http/{}", env!("CARGO_PKG_VERSION"))
    }

    async fn create_instance(
        &self,
        config: RelayerInstanceConfig,
    ) -> Result<Arc<dyn FhevmBackend>, FhevmError> {
        let network = self
            .network(config.chain_id)
            .cloned()
            .ok_or(FhevmError::UnsupportedChain {
                chain_id: config.chain_id,
            })?;
        tracing::debug!(
            chain_id = network.chain_id,
            gateway_chain_id = network.gateway_chain_id,
            relayer = %self.base_url,
            "Creating relayer backend"
        );
        Ok(Arc::new(HttpRelayerBackend {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            network,
            public_key: config.public_key,
        }))
    }
}

#[derive(Deserialize)]
struct Envelope<T> {
    response: T,
}

#[derive(Deserialize)]
struct InputProofResponse {
    handles: Vec<String>,
    signatures: Vec<String>,
}

#[derive(Deserialize)]
struct RevealedEntry {
    handle: String,
    value: String,
}

struct HttpRelayerBackend {
    client: reqwest::Client,
    base_url: String,
    network: RelayerNetwork,
    public_key: String,
}

impl HttpRelayerBackend {
    async fn post<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T, FhevmError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| FhevmError::PlatformUnreachable {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            let detail = response.text().await.unwrap_or_default();
            return Err(FhevmError::AuthorizationFailure {
                reason: format!("relayer refused {path}: {}", detail.trim()),
            });
        }
        if !status.is_success() {
            return Err(FhevmError::Backend(format!("{url} returned HTTP {status}")));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| FhevmError::Backend(format!("{url} returned a malformed body: {e}")))?;
        Ok(envelope.response)
    }
}

/// `(type tag, word)` per value, the layout the relayer verifies inputs in.
fn pack_values(values: &[FheValue]) -> Vec<u8> {
    let mut packed = Vec::with_capacity(values.len() * 33);
    for value in values {
        packed.push(value.fhe_type().id());
        packed.extend_from_slice(&value.to_word());
    }
    packed
}

fn chain_id_hex(chain_id: u64) -> String {
    format!("{chain_id:#x}")
}

fn strip_0x(value: &str) -> &str {
    value.strip_prefix("0x").unwrap_or(value)
}

#[async_trait]
impl FhevmBackend for HttpRelayerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn chain_id(&self) -> u64 {
        self.network.chain_id
    }

    async fn encrypt(
        &self,
        contract: &str,
        user: &str,
        values: &[FheValue],
    ) -> Result<EncryptedData, FhevmError> {
        let body = json!({
            "contractChainId": chain_id_hex(self.network.chain_id),
            "contractAddress": contract,
            "userAddress": user,
            "ciphertextWithInputVerification": hex_body(&pack_values(values)),
            "extraData": encode_hex_prefixed(&EXTRA_DATA),
        });
        let response: InputProofResponse = self.post(INPUT_PROOF_PATH, &body).await?;

        if response.handles.len() != values.len() {
            return Err(FhevmError::Backend(format!(
                "relayer returned {} handles for {} values",
                response.handles.len(),
                values.len()
            )));
        }
        let handles = response
            .handles
            .iter()
            .map(|raw| Handle::from_hex(raw))
            .collect::<Result<Vec<_>, _>>()?;
        for (handle, value) in handles.iter().zip(values) {
            if handle.fhe_type() != Some(value.fhe_type()) || handle.chain_id() != self.network.chain_id {
                return Err(FhevmError::Backend(format!(
                    "relayer handle {handle} does not match a {} on chain {}",
                    value.fhe_type().solidity_name(),
                    self.network.chain_id
                )));
            }
        }

        let input_proof = InputProof {
            handles: handles.clone(),
            signatures: response.signatures,
            extra_data: EXTRA_DATA.to_vec(),
        }
        .encode()?;
        tracing::debug!(
            contract,
            handles = handles.len(),
            proof_bytes = input_proof.len(),
            "Relayer attested input"
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
        let verifying_contract = parse_address(&self.network.decryption_contract)
            .map_err(|e| FhevmError::Backend(e.to_string()))?;
        let domain = eip712_domain! {
            name: "Decryption",
            version: "1",
            chain_id: self.network.gateway_chain_id,
            verifying_contract: verifying_contract,
        };
        user_decrypt_typed_data(
            domain,
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
        let handle_contract_pairs: Vec<Value> = pairs
            .iter()
            .map(|pair| json!({ "handle": pair.handle, "contractAddress": pair.contract_address }))
            .collect();
        let body = json!({
            "handleContractPairs": handle_contract_pairs,
            "requestValidity": {
                "startTimestamp": request.start_timestamp.to_string(),
                "durationDays": request.duration_days.to_string(),
            },
            "contractsChainId": self.network.chain_id.to_string(),
            "contractAddresses": request.contract_addresses,
            "userAddress": normalize_address(&request.user_address)
                .unwrap_or_else(|| request.user_address.clone()),
            "signature": strip_0x(&request.signature),
            "publicKey": strip_0x(&request.public_key),
            "extraData": encode_hex_prefixed(&EXTRA_DATA),
        });
        let entries: Vec<RevealedEntry> = self.post(USER_DECRYPT_PATH, &body).await?;

        let mut revealed = HashMap::with_capacity(entries.len());
        for entry in entries {
            let handle = Handle::from_hex(&entry.handle)?;
            let Some(ty) = handle.fhe_type() else {
                tracing::debug!(%handle, "Skipping handle with an unknown type tag");
                continue;
            };
            let bytes = decode_hex(&entry.value)
                .map_err(|e| FhevmError::Backend(format!("revealed value: {e}")))?;
            if bytes.len() > 32 {
                return Err(FhevmError::Backend(format!(
                    "revealed value of {handle} is {} bytes",
                    bytes.len()
                )));
            }
            let mut word = [0u8; 32];
            word[32 - bytes.len()..].copy_from_slice(&bytes);
            revealed.insert(entry.handle, FheValue::from_word(ty, &word)?);
        }
        Ok(revealed)
    }

    fn public_key(&self) -> Option<String> {
        Some(self.public_key.clone())
    }

    fn public_params(&self, _bits: u32) -> Option<String> {
        None
    }
}

/// Relayer bodies carry hex without the `0x` prefix.
fn hex_body(bytes: &[u8]) -> String {
    strip_0x(&encode_hex_prefixed(bytes)).to_string()
}
