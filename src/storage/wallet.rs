//! Persisted wallet connection record.
//!
//! The connector id is the provider's reverse domain name, which is stable
//! across page loads, unlike the per-load instance uuid.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{KeyValueStore, get_json, set_json};
use crate::error::StorageError;

/// Storage keys of the connection record.
pub struct WalletStorageKeys;

impl WalletStorageKeys {
    pub const LAST_CONNECTOR_ID: &'static str = "wallet.lastConnectorId";
    pub const LAST_ACCOUNTS: &'static str = "wallet.lastAccounts";
    pub const LAST_CHAIN_ID: &'static str = "wallet.lastChainId";
    pub const CONNECTED: &'static str = "wallet.connected";
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedConnection {
    pub connector_id: Option<String>,
    pub accounts: Vec<String>,
    pub chain_id: Option<u64>,
    pub connected: bool,
}

impl PersistedConnection {
    /// Connector id of a record marked connected, if any.
    pub fn active_connector(&self) -> Option<&str> {
        if self.connected {
            self.connector_id.as_deref()
        } else {
            None
        }
    }
}

/// Typed access to the wallet connection record.
#[derive(Clone)]
pub struct WalletStorage {
    store: Arc<dyn KeyValueStore>,
}

impl WalletStorage {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn save_connection(
        &self,
        rdns: &str,
        accounts: &[String],
        chain_id: u64,
    ) -> Result<(), StorageError> {
        tracing::debug!(rdns, chain_id, accounts = accounts.len(), "Saving wallet connection");
        let store = self.store.as_ref();
        set_json(store, WalletStorageKeys::LAST_CONNECTOR_ID, rdns)?;
        set_json(store, WalletStorageKeys::LAST_ACCOUNTS, accounts)?;
        set_json(store, WalletStorageKeys::LAST_CHAIN_ID, &chain_id)?;
        set_json(store, WalletStorageKeys::CONNECTED, &true)
    }

    pub fn clear_connection(&self) -> Result<(), StorageError> {
        tracing::debug!("Clearing wallet connection");
        self.store.remove(WalletStorageKeys::LAST_CONNECTOR_ID)?;
        self.store.remove(WalletStorageKeys::LAST_ACCOUNTS)?;
        self.store.remove(WalletStorageKeys::LAST_CHAIN_ID)?;
        self.store.remove(WalletStorageKeys::CONNECTED)
    }

    pub fn last_connection(&self) -> Result<PersistedConnection, StorageError> {
        let store = self.store.as_ref();
        Ok(PersistedConnection {
            connector_id: get_json(store, WalletStorageKeys::LAST_CONNECTOR_ID)?,
            accounts: get_json(store, WalletStorageKeys::LAST_ACCOUNTS)?.unwrap_or_default(),
            chain_id: get_json(store, WalletStorageKeys::LAST_CHAIN_ID)?,
            connected: get_json(store, WalletStorageKeys::CONNECTED)?.unwrap_or(false),
        })
    }

    pub fn is_connected(&self) -> bool {
        get_json(self.store.as_ref(), WalletStorageKeys::CONNECTED)
            .ok()
            .flatten()
            .unwrap_or(false)
    }
}
