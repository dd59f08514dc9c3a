//! Supported networks and their FHEVM endpoints.

use std::collections::{BTreeMap, HashSet};

use super::helpers::validate_http_url;
use crate::error::ConfigError;
use crate::settings::NetworkSettings;

pub const LOCAL_CHAIN_ID: u64 = 31337;
pub const SEPOLIA_CHAIN_ID: u64 = 11_155_111;

const LOCAL_RPC_URL: &str = "http://localhost:8545";
const SEPOLIA_PUBLIC_KEY_URL: &str = "https://keys.zama.org/11155111/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    pub name: String,
    pub chain_id: u64,
    /// Node URL. Required for simulation networks.
    pub rpc_url: Option<String>,
    /// Served by the local simulation backend.
    pub is_mock: bool,
    /// Where the network public key is published. Required for remote networks.
    pub public_key_url: Option<String>,
}

impl NetworkConfig {
    fn from_settings(entry: &NetworkSettings) -> Result<Self, ConfigError> {
        let key = format!("networks.{}", entry.chain_id);
        if entry.name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key,
                message: "network name must not be empty".to_string(),
            });
        }
        if let Some(url) = &entry.rpc_url {
            validate_http_url(&format!("{key}.rpc_url"), url)?;
        }
        if let Some(url) = &entry.public_key_url {
            validate_http_url(&format!("{key}.public_key_url"), url)?;
        }
        if entry.is_mock && entry.rpc_url.is_none() {
            return Err(ConfigError::InvalidValue {
                key,
                message: "simulation networks need an rpc_url".to_string(),
            });
        }
        Ok(Self {
            name: entry.name.trim().to_string(),
            chain_id: entry.chain_id,
            rpc_url: entry.rpc_url.clone(),
            is_mock: entry.is_mock,
            public_key_url: entry.public_key_url.clone(),
        })
    }
}

/// Chain id → network entry, in configuration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkTable {
    networks: Vec<NetworkConfig>,
}

impl NetworkTable {
    /// Build a table, rejecting duplicate chain ids.
    pub fn new(networks: Vec<NetworkConfig>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for network in &networks {
            if !seen.insert(network.chain_id) {
                return Err(ConfigError::InvalidValue {
                    key: "networks".to_string(),
                    message: format!("chain id {} is listed twice", network.chain_id),
                });
            }
        }
        Ok(Self { networks })
    }

    pub(crate) fn from_settings(entries: &[NetworkSettings]) -> Result<Self, ConfigError> {
        if entries.is_empty() {
            return Ok(Self::default());
        }
        let networks = entries
            .iter()
            .map(NetworkConfig::from_settings)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(networks)
    }

    pub fn get(&self, chain_id: u64) -> Option<&NetworkConfig> {
        self.networks.iter().find(|n| n.chain_id == chain_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NetworkConfig> {
        self.networks.iter()
    }

    pub fn len(&self) -> usize {
        self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }

    pub fn chain_ids(&self) -> Vec<u64> {
        self.networks.iter().map(|n| n.chain_id).collect()
    }

    /// Key URLs of every network that publishes one.
    pub fn public_key_urls(&self) -> BTreeMap<u64, String> {
        self.networks
            .iter()
            .filter_map(|n| n.public_key_url.clone().map(|url| (n.chain_id, url)))
            .collect()
    }

    /// Replace the RPC URL of `chain_id`. Unknown chains are ignored.
    pub(crate) fn override_rpc_url(&mut self, chain_id: u64, url: String) {
        if let Some(network) = self.networks.iter_mut().find(|n| n.chain_id == chain_id) {
            network.rpc_url = Some(url);
        }
    }
}

impl Default for NetworkTable {
    fn default() -> Self {
        Self {
            networks: vec![
                NetworkConfig {
                    name: "localhost".to_string(),
                    chain_id: LOCAL_CHAIN_ID,
                    rpc_url: Some(LOCAL_RPC_URL.to_string()),
                    is_mock: true,
                    public_key_url: None,
                },
                NetworkConfig {
                    name: "sepolia".to_string(),
                    chain_id: SEPOLIA_CHAIN_ID,
                    rpc_url: None,
                    is_mock: false,
                    public_key_url: Some(SEPOLIA_PUBLIC_KEY_URL.to_string()),
                },
            ],
        }
    }
}
