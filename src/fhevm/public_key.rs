//! Per-chain network public key retrieval with a persistent cache.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FhevmError;
use crate::storage::{KeyValueStore, get_json, set_json};

pub const PUBLIC_KEY_STORAGE_PREFIX: &str = "fhevm.publicKey";
pub const DEFAULT_PUBLIC_KEY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedPublicKey {
    public_key: String,
    fetched_at: DateTime<Utc>,
}

pub struct PublicKeyFetcher {
    client: reqwest::Client,
    store: Arc<dyn KeyValueStore>,
    urls: BTreeMap<u64, String>,
    ttl: Duration,
}

impl PublicKeyFetcher {
    pub fn new(
        client: reqwest::Client,
        store: Arc<dyn KeyValueStore>,
        urls: BTreeMap<u64, String>,
    ) -> Self {
        Self {
            client,
            store,
            urls,
            ttl: DEFAULT_PUBLIC_KEY_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn storage_key(chain_id: u64) -> String {
        format!("{PUBLIC_KEY_STORAGE_PREFIX}.{chain_id}")
    }

    pub fn url_for(&self, chain_id: u64) -> Option<&str> {
        self.urls.get(&chain_id).map(String::as_str)
    }

    /// Cached key for `chain_id` if it is younger than the TTL.
    pub fn cached(&self, chain_id: u64) -> Option<String> {
        let key = Self::storage_key(chain_id);
        let cached: CachedPublicKey = match get_json(self.store.as_ref(), &key) {
            Ok(Some(cached)) => cached,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(chain_id, "Public key cache read failed: {}", e);
                return None;
            }
        };
        let age = Utc::now().signed_duration_since(cached.fetched_at);
        let fresh = age
            .to_std()
            .map(|age| age < self.ttl)
            .unwrap_or(false);
        fresh.then_some(cached.public_key)
    }

    pub fn invalidate(&self, chain_id: u64) {
        if let Err(e) = self.store.remove(&Self::storage_key(chain_id)) {
            tracing::warn!(chain_id, "Public key cache removal failed: {}", e);
        }
    }

    /// Resolve the network public key, serving from cache while it is fresh.
    pub async fn fetch(&self, chain_id: u64) -> Result<String, FhevmError> {
        let Some(url) = self.url_for(chain_id) else {
            return Err(FhevmError::UnsupportedChain { chain_id });
        };

        if let Some(public_key) = self.cached(chain_id) {
            tracing::debug!(chain_id, "Public key cache hit");
            return Ok(public_key);
        }

        tracing::info!(chain_id, url, "Fetching network public key");
        let fetch_error = |reason: String| FhevmError::PublicKeyFetch { chain_id, reason };
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(fetch_error(format!("HTTP {status}")));
        }
        let body = response.text().await.map_err(|e| fetch_error(e.to_string()))?;
        let public_key = body.trim().to_string();
        if public_key.is_empty() {
            return Err(fetch_error("empty response body".to_string()));
        }

        let entry = CachedPublicKey {
            public_key: public_key.clone(),
            fetched_at: Utc::now(),
        };
        if let Err(e) = set_json(self.store.as_ref(), &Self::storage_key(chain_id), &entry) {
            tracing::warn!(chain_id, "Public key cache write failed: {}", e);
        }
        Ok(public_key)
    }
}
