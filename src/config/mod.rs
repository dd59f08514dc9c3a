//! Configuration for the wallet runtime.
//!
//! Settings are loaded with priority: env var > TOML config file > default.
//! `./.env` and `~/.fhevm-wallet/.env` are loaded via dotenvy first, so
//! values placed there behave like real env vars.

pub(crate) mod helpers;
mod networks;

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::fhevm::relayer::DEFAULT_RELAYER_SDK_URL;
use crate::fhevm::relayer_http::DEFAULT_RELAYER_URL;
use crate::settings::Settings;

pub use self::networks::{LOCAL_CHAIN_ID, NetworkConfig, NetworkTable, SEPOLIA_CHAIN_ID};

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub networks: NetworkTable,
    pub wallet: WalletConfig,
    pub fhevm: FhevmConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletConfig {
    /// Empty means every configured network is supported.
    pub supported_chains: Vec<u64>,
    pub auto_reconnect: bool,
}

impl WalletConfig {
    pub(crate) fn resolve(settings: &Settings, networks: &NetworkTable) -> Result<Self, ConfigError> {
        if let Some(unknown) = settings
            .wallet
            .supported_chains
            .iter()
            .find(|id| networks.get(**id).is_none())
        {
            return Err(ConfigError::InvalidValue {
                key: "wallet.supported_chains".to_string(),
                message: format!("chain {unknown} is not a configured network"),
            });
        }
        Ok(Self {
            supported_chains: settings.wallet.supported_chains.clone(),
            auto_reconnect: settings.wallet.auto_reconnect,
        })
    }

    /// The chains the wallet session should accept.
    pub fn effective_chains(&self, networks: &NetworkTable) -> Vec<u64> {
        if self.supported_chains.is_empty() {
            networks.chain_ids()
        } else {
            self.supported_chains.clone()
        }
    }
}

#[derive(Debug, Clone)]
pub struct FhevmConfig {
    pub relayer_sdk_url: String,
    /// Hosted relayer the CLI submits inputs and reveals to.
    pub relayer_url: String,
    pub http_timeout: Duration,
    pub public_key_cache_ttl: Duration,
    /// Overrides the built-in coprocessor key of the simulation backend.
    pub simulation_signer_key: Option<SecretString>,
}

impl FhevmConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let relayer_sdk_url = helpers::optional_env("FHEVM_RELAYER_SDK_URL")?
            .or_else(|| settings.fhevm.relayer_sdk_url.clone())
            .unwrap_or_else(|| DEFAULT_RELAYER_SDK_URL.to_string());
        helpers::validate_http_url("FHEVM_RELAYER_SDK_URL", &relayer_sdk_url)?;

        let relayer_url = helpers::optional_env("FHEVM_RELAYER_URL")?
            .or_else(|| settings.fhevm.relayer_url.clone())
            .unwrap_or_else(|| DEFAULT_RELAYER_URL.to_string());
        helpers::validate_http_url("FHEVM_RELAYER_URL", &relayer_url)?;

        let timeout_ms = helpers::parse_optional_env::<u64>(
            "FHEVM_HTTP_TIMEOUT_MS",
            "a positive integer",
        )?
        .unwrap_or(settings.fhevm.http_timeout_ms);
        if timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "FHEVM_HTTP_TIMEOUT_MS".to_string(),
                message: "must be > 0".to_string(),
            });
        }

        let cache_secs = helpers::parse_optional_env::<u64>(
            "FHEVM_PUBLIC_KEY_CACHE_SECS",
            "a non-negative integer",
        )?
        .unwrap_or(settings.fhevm.public_key_cache_secs);

        let simulation_signer_key =
            helpers::optional_env("FHEVM_SIMULATION_SIGNER_KEY")?.map(SecretString::from);

        Ok(Self {
            relayer_sdk_url,
            relayer_url,
            http_timeout: Duration::from_millis(timeout_ms),
            public_key_cache_ttl: Duration::from_secs(cache_secs),
            simulation_signer_key,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub path: PathBuf,
}

impl StorageConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let path = helpers::optional_env("FHEVM_STORAGE_PATH")?
            .or_else(|| settings.storage_path.clone())
            .map(PathBuf::from)
            .unwrap_or_else(crate::storage::default_storage_path);
        Ok(Self { path })
    }
}

fn resolve_networks(settings: &Settings) -> Result<NetworkTable, ConfigError> {
    let mut networks = NetworkTable::from_settings(&settings.networks)?;
    for (key, chain_id) in [
        ("FHEVM_LOCAL_RPC_URL", LOCAL_CHAIN_ID),
        ("FHEVM_SEPOLIA_RPC_URL", SEPOLIA_CHAIN_ID),
    ] {
        if let Some(url) = helpers::optional_env(key)? {
            helpers::validate_http_url(key, &url)?;
            networks.override_rpc_url(chain_id, url);
        }
    }
    Ok(networks)
}

impl RuntimeConfig {
    /// Load configuration from env files, the TOML file and env vars.
    ///
    /// If `toml_path` is `Some`, that file must exist and parse. If `None`,
    /// the default `~/.fhevm-wallet/config.toml` is used when present.
    pub fn load(toml_path: Option<&Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        crate::bootstrap::load_app_env();
        let settings = Self::load_settings(toml_path)?;
        Self::resolve(&settings)
    }

    /// Build config from settings plus env overrides.
    pub fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let networks = resolve_networks(settings)?;
        Ok(Self {
            wallet: WalletConfig::resolve(settings, &networks)?,
            fhevm: FhevmConfig::resolve(settings)?,
            storage: StorageConfig::resolve(settings)?,
            networks,
        })
    }

    fn load_settings(explicit_path: Option<&Path>) -> Result<Settings, ConfigError> {
        let path = explicit_path
            .map(PathBuf::from)
            .unwrap_or_else(Settings::default_toml_path);

        match Settings::load_toml(&path) {
            Ok(Some(settings)) => {
                tracing::debug!("Loaded TOML config from {}", path.display());
                Ok(settings)
            }
            Ok(None) => {
                if explicit_path.is_some() {
                    return Err(ConfigError::ParseError(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                Ok(Settings::default())
            }
            Err(e) => {
                if explicit_path.is_some() {
                    return Err(ConfigError::ParseError(format!(
                        "Failed to load config file {}: {}",
                        path.display(),
                        e
                    )));
                }
                tracing::warn!("Failed to load default config file: {}", e);
                Ok(Settings::default())
            }
        }
    }
}
