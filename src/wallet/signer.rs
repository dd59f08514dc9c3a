//! Typed-data signers.

use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use serde_json::{Value, json};

use super::provider::{RpcRequest, methods};
use super::session::WalletSession;
use crate::eip712::{TypedData, address_of, sign_hash, signing_hash};
use crate::error::WalletError;

/// Anything that can produce an EIP-712 signature for one account.
#[async_trait]
pub trait TypedDataSigner: Send + Sync {
    async fn address(&self) -> Result<String, WalletError>;

    /// Sign `data` and return the 65-byte signature as `0x` hex.
    async fn sign_typed_data(&self, data: &TypedData) -> Result<String, WalletError>;
}

/// Signs through the session's active provider with `eth_signTypedData_v4`.
#[derive(Clone)]
pub struct SessionSigner {
    session: WalletSession,
}

impl SessionSigner {
    pub fn new(session: WalletSession) -> Self {
        Self { session }
    }
}

impl WalletSession {
    pub fn signer(&self) -> SessionSigner {
        SessionSigner::new(self.clone())
    }
}

#[async_trait]
impl TypedDataSigner for SessionSigner {
    async fn address(&self) -> Result<String, WalletError> {
        self.session.account().ok_or(WalletError::NotConnected)
    }

    async fn sign_typed_data(&self, data: &TypedData) -> Result<String, WalletError> {
        let provider = self
            .session
            .active_provider()
            .ok_or(WalletError::NotConnected)?
            .provider;
        let account = self.address().await?;

        // v4 wants the payload as a JSON string.
        let payload = serde_json::to_string(data).map_err(|e| {
            WalletError::InvalidResponse {
                method: methods::SIGN_TYPED_DATA_V4.to_string(),
                reason: e.to_string(),
            }
        })?;
        let raw = provider
            .request(RpcRequest::new(
                methods::SIGN_TYPED_DATA_V4,
                json!([account, payload]),
            ))
            .await?;
        match raw {
            Value::String(signature) => Ok(signature),
            other => Err(WalletError::InvalidResponse {
                method: methods::SIGN_TYPED_DATA_V4.to_string(),
                reason: format!("expected signature string, got {other}"),
            }),
        }
    }
}

/// Signs locally with a secp256k1 key.
pub struct LocalKeySigner {
    key: SigningKey,
    address: String,
}

impl LocalKeySigner {
    pub fn new(key: SigningKey) -> Self {
        let address = address_of(&key);
        Self { key, address }
    }

    pub fn random() -> Self {
        Self::new(SigningKey::random(&mut rand::thread_rng()))
    }

    pub fn key(&self) -> &SigningKey {
        &self.key
    }
}

impl std::fmt::Debug for LocalKeySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKeySigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TypedDataSigner for LocalKeySigner {
    async fn address(&self) -> Result<String, WalletError> {
        Ok(self.address.clone())
    }

    async fn sign_typed_data(&self, data: &TypedData) -> Result<String, WalletError> {
        let hash = signing_hash(data).map_err(|e| WalletError::InvalidResponse {
                method: methods::SIGN_TYPED_DATA_V4.to_string(),
                reason: e.to_string(),
            })?;
        sign_hash(&self.key, &hash).map_err(|e| WalletError::Provider {
            code: super::provider::codes::UNAUTHORIZED,
            message: e.to_string(),
        })
    }
}
