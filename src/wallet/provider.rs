//! EIP-1193 provider surface consumed by the wallet session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RpcError, WalletError};

/// Standard provider error codes.
pub mod codes {
    pub const USER_REJECTED: i64 = 4001;
    pub const UNAUTHORIZED: i64 = 4100;
    pub const UNSUPPORTED_METHOD: i64 = 4200;
    pub const DISCONNECTED: i64 = 4900;
    pub const CHAIN_DISCONNECTED: i64 = 4901;
    pub const UNRECOGNIZED_CHAIN: i64 = 4902;
}

/// RPC methods used by the runtime.
pub mod methods {
    pub const REQUEST_ACCOUNTS: &str = "eth_requestAccounts";
    pub const ACCOUNTS: &str = "eth_accounts";
    pub const CHAIN_ID: &str = "eth_chainId";
    pub const SWITCH_CHAIN: &str = "wallet_switchEthereumChain";
    pub const SIGN_TYPED_DATA_V4: &str = "eth_signTypedData_v4";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("provider error {code}: {message}")]
pub struct ProviderRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ProviderRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn user_rejected() -> Self {
        Self::new(codes::USER_REJECTED, "User rejected the request.")
    }

    pub fn unrecognized_chain(chain_id: u64) -> Self {
        Self::new(
            codes::UNRECOGNIZED_CHAIN,
            format!("Unrecognized chain ID 0x{chain_id:x}"),
        )
    }

    pub fn is_user_rejection(&self) -> bool {
        self.code == codes::USER_REJECTED
    }
}

impl From<RpcError> for ProviderRpcError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Server {
                code,
                message,
                data,
                ..
            } => Self {
                code,
                message,
                data,
            },
            other => Self::new(codes::DISCONNECTED, other.to_string()),
        }
    }
}

impl From<ProviderRpcError> for WalletError {
    fn from(err: ProviderRpcError) -> Self {
        if err.is_user_rejection() {
            WalletError::UserRejected {
                message: err.message,
            }
        } else {
            WalletError::Provider {
                code: err.code,
                message: err.message,
            }
        }
    }
}

/// `{ method, params }` request object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    pub fn without_params(method: impl Into<String>) -> Self {
        Self::new(method, Value::Array(Vec::new()))
    }
}

/// Provider-level notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    AccountsChanged(Vec<String>),
    /// Raw chain id as emitted by the provider (usually `0x`-hex).
    ChainChanged(String),
    Disconnect { code: i64, message: String },
}

impl ProviderEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AccountsChanged(_) => "accountsChanged",
            Self::ChainChanged(_) => "chainChanged",
            Self::Disconnect { .. } => "disconnect",
        }
    }
}

pub type ProviderListener = Arc<dyn Fn(&ProviderEvent) + Send + Sync>;

/// Handle returned by [`Eip1193Provider::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// An injected signing provider.
///
/// Implementations must deliver events in emission order and must tolerate
/// `remove_listener` being called from inside a listener callback.
#[async_trait]
pub trait Eip1193Provider: Send + Sync {
    async fn request(&self, request: RpcRequest) -> Result<Value, ProviderRpcError>;

    fn on(&self, listener: ProviderListener) -> ListenerId;

    fn remove_listener(&self, id: ListenerId);
}

/// Listener bookkeeping shared by provider implementations.
#[derive(Default)]
pub struct ListenerSet {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, ProviderListener)>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: ProviderListener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    pub fn remove(&self, id: ListenerId) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(existing, _)| *existing != id);
    }

    pub fn len(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every listener. The set is snapshotted first so callbacks may
    /// add or remove listeners.
    pub fn emit(&self, event: &ProviderEvent) {
        let snapshot: Vec<ProviderListener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(event);
        }
    }
}

/// Decode an accounts array result.
pub fn parse_accounts(method: &str, value: Value) -> Result<Vec<String>, WalletError> {
    serde_json::from_value(value).map_err(|e| WalletError::InvalidResponse {
        method: method.to_string(),
        reason: e.to_string(),
    })
}
