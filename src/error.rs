//! Error types for the wallet and FHEVM runtime.

use serde::Serialize;

/// Top-level error type for the runtime.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),

    #[error("FHEVM error: {0}")]
    Fhevm(#[from] FhevmError),
}

/// Failure domain used when reporting errors to operator surfaces.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorDomain {
    Wallet,
    Encryption,
    Decryption,
    Platform,
    Storage,
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Key/value persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage IO error at {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Serialization error for key {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Storage lock poisoned")]
    Poisoned,
}

/// JSON-RPC transport errors.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("RPC {method} failed with code {code}: {message}")]
    Server {
        method: String,
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error("Invalid RPC response for {method}: {reason}")]
    InvalidResponse { method: String, reason: String },
}

/// Wallet-session errors.
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("No registered wallet provider matches {rdns}")]
    ProviderNotFound { rdns: String },

    #[error("User rejected the request: {message}")]
    UserRejected { message: String },

    #[error("Network {chain_id} is not added to the wallet")]
    NetworkNotAdded { chain_id: u64 },

    #[error("No wallet is connected")]
    NotConnected,

    #[error("Wallet returned no accounts")]
    NoAccounts,

    #[error("Provider error {code}: {message}")]
    Provider { code: i64, message: String },

    #[error("Invalid provider response for {method}: {reason}")]
    InvalidResponse { method: String, reason: String },
}

impl WalletError {
    /// Stable machine-readable code for the error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ProviderNotFound { .. } => "wallet.provider_not_found",
            Self::UserRejected { .. } => "wallet.user_rejected",
            Self::NetworkNotAdded { .. } => "wallet.network_not_added",
            Self::NotConnected => "wallet.not_connected",
            Self::NoAccounts => "wallet.no_accounts",
            Self::Provider { .. } => "wallet.provider_error",
            Self::InvalidResponse { .. } => "wallet.invalid_response",
        }
    }
}

/// FHEVM runtime errors: instance construction, encryption and decryption.
#[derive(Debug, thiserror::Error)]
pub enum FhevmError {
    #[error("FHEVM platform at {url} is unreachable: {reason}")]
    PlatformUnreachable { url: String, reason: String },

    #[error("Relayer SDK failed to load: {reason}")]
    SdkLoadFailure { reason: String },

    #[error("Chain {chain_id} is not supported")]
    UnsupportedChain { chain_id: u64 },

    #[error("Failed to fetch public key for chain {chain_id}: {reason}")]
    PublicKeyFetch { chain_id: u64, reason: String },

    #[error("Failed to create decryption signature: {reason}")]
    SignatureCreationFailure { reason: String },

    #[error("Decryption request was not authorized: {reason}")]
    AuthorizationFailure { reason: String },

    #[error("Handle {handle} matched more than one decrypted entry")]
    ResolutionAmbiguous { handle: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Encrypted input too large: {bits} bits exceeds {max} bits")]
    InputTooLarge { bits: u32, max: u32 },

    #[error("Backend error: {0}")]
    Backend(String),
}

impl FhevmError {
    /// Stable machine-readable code for the error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::PlatformUnreachable { .. } => "fhevm.platform_unreachable",
            Self::SdkLoadFailure { .. } => "fhevm.sdk_load_failure",
            Self::UnsupportedChain { .. } => "fhevm.unsupported_chain",
            Self::PublicKeyFetch { .. } => "fhevm.public_key_fetch",
            Self::SignatureCreationFailure { .. } => "fhevm.signature_creation_failure",
            Self::AuthorizationFailure { .. } => "fhevm.authorization_failure",
            Self::ResolutionAmbiguous { .. } => "fhevm.resolution_ambiguous",
            Self::InvalidInput(_) => "fhevm.invalid_input",
            Self::InputTooLarge { .. } => "fhevm.input_too_large",
            Self::Backend(_) => "fhevm.backend_error",
        }
    }

    pub fn domain(&self) -> ErrorDomain {
        match self {
            Self::PlatformUnreachable { .. }
            | Self::SdkLoadFailure { .. }
            | Self::UnsupportedChain { .. }
            | Self::PublicKeyFetch { .. } => ErrorDomain::Platform,
            Self::InvalidInput(_) | Self::InputTooLarge { .. } => ErrorDomain::Encryption,
            Self::SignatureCreationFailure { .. } => ErrorDomain::Wallet,
            Self::AuthorizationFailure { .. }
            | Self::ResolutionAmbiguous { .. }
            | Self::Backend(_) => ErrorDomain::Decryption,
        }
    }
}

/// Result type alias for the runtime.
pub type Result<T> = std::result::Result<T, Error>;
