//! User settings persistence.
//!
//! Stores user preferences in `~/.fhevm-wallet/config.toml`.
//! Settings are loaded with env var > config.toml > default priority; the
//! env layer is applied by [`crate::config`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// User settings persisted to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Key-value store file. Defaults to `~/.fhevm-wallet/storage.json`.
    #[serde(default)]
    pub storage_path: Option<String>,

    #[serde(default)]
    pub wallet: WalletSettings,

    #[serde(default)]
    pub fhevm: FhevmSettings,

    /// Network table. Empty means the built-in local and Sepolia entries.
    #[serde(default)]
    pub networks: Vec<NetworkSettings>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletSettings {
    /// Chains the application accepts. Empty means every configured network.
    #[serde(default)]
    pub supported_chains: Vec<u64>,

    /// Attempt a silent reconnect once providers are discovered.
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
}

impl Default for WalletSettings {
    fn default() -> Self {
        Self {
            supported_chains: Vec::new(),
            auto_reconnect: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FhevmSettings {
    /// Relayer SDK bundle URL.
    #[serde(default)]
    pub relayer_sdk_url: Option<String>,

    /// Hosted relayer base URL.
    #[serde(default)]
    pub relayer_url: Option<String>,

    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,

    /// How long a fetched network public key stays fresh.
    #[serde(default = "default_public_key_cache_secs")]
    pub public_key_cache_secs: u64,
}

impl Default for FhevmSettings {
    fn default() -> Self {
        Self {
            relayer_sdk_url: None,
            relayer_url: None,
            http_timeout_ms: default_http_timeout_ms(),
            public_key_cache_secs: default_public_key_cache_secs(),
        }
    }
}

/// One `[[networks]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSettings {
    pub name: String,
    pub chain_id: u64,
    #[serde(default)]
    pub rpc_url: Option<String>,
    /// Use the local simulation backend instead of the relayer SDK.
    #[serde(default)]
    pub is_mock: bool,
    #[serde(default)]
    pub public_key_url: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_http_timeout_ms() -> u64 {
    30_000
}

fn default_public_key_cache_secs() -> u64 {
    24 * 60 * 60
}

impl Settings {
    /// Default TOML config file path (~/.fhevm-wallet/config.toml).
    pub fn default_toml_path() -> PathBuf {
        crate::bootstrap::app_dir().join("config.toml")
    }

    /// Load settings from a TOML file.
    ///
    /// Returns `None` if the file doesn't exist. Returns an error only
    /// if the file exists but can't be parsed.
    pub fn load_toml(path: &Path) -> Result<Option<Self>, String> {
        let data = match std::fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(format!("failed to read {}: {}", path.display(), e)),
        };

        let settings: Self = toml::from_str(&data)
            .map_err(|e| format!("invalid TOML in {}: {}", path.display(), e))?;
        Ok(Some(settings))
    }

    /// Write a commented TOML config file with current settings.
    pub fn save_toml(&self, path: &Path) -> Result<(), String> {
        let raw = toml::to_string_pretty(self)
            .map_err(|e| format!("failed to serialize settings: {}", e))?;

        let content = format!(
            "# fhevm-wallet configuration file.\n\
             #\n\
             # Priority: env var > this file > defaults.\n\
             # Run `fhevm-wallet config init` to regenerate this file.\n\
             \n\
             {raw}"
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("failed to create {}: {}", parent.display(), e))?;
        }
        std::fs::write(path, content)
            .map_err(|e| format!("failed to write {}: {}", path.display(), e))
    }

    /// Settings populated with the built-in network table, for `config init`.
    pub fn with_default_networks() -> Self {
        Self {
            networks: crate::config::NetworkTable::default()
                .iter()
                .map(|n| NetworkSettings {
                    name: n.name.clone(),
                    chain_id: n.chain_id,
                    rpc_url: n.rpc_url.clone(),
                    is_mock: n.is_mock,
                    public_key_url: n.public_key_url.clone(),
                })
                .collect(),
            ..Self::default()
        }
    }
}
