//! Remote backend: the relayer SDK module, loaded lazily once per process.
//!
//! The SDK is an external module. The runtime downloads its bundle over HTTP
//! and hands the bytes to a host-supplied [`BundleActivator`], which is the
//! only piece that knows how to turn the bundle into a [`RelayerSdk`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::OnceCell;

use super::instance::{
    BackendKind, DecryptionKeypair, EncryptedData, FhevmBackend, HandleContractPair,
    UserDecryptRequest,
};
use super::types::FheValue;
use crate::eip712::TypedData;
use crate::error::FhevmError;

pub const DEFAULT_RELAYER_SDK_URL: &str =
    "https://cdn.zama.org/relayer-sdk-js/0.3.0-5/relayer-sdk-js.umd.cjs";

/// Parameters the SDK needs to build a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayerInstanceConfig {
    pub chain_id: u64,
    pub public_key: String,
    pub account: Option<String>,
}

/// A loaded relayer SDK module.
#[async_trait]
pub trait RelayerSdk: Send + Sync {
    fn version(&self) -> String;

    async fn create_instance(
        &self,
        config: RelayerInstanceConfig,
    ) -> Result<Arc<dyn FhevmBackend>, FhevmError>;
}

#[async_trait]
pub trait SdkLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn RelayerSdk>, FhevmError>;
}

/// Loader that hands out an already-linked SDK.
pub struct StaticSdkLoader {
    sdk: Arc<dyn RelayerSdk>,
}

impl StaticSdkLoader {
    pub fn new(sdk: Arc<dyn RelayerSdk>) -> Self {
        Self { sdk }
    }
}

#[async_trait]
impl SdkLoader for StaticSdkLoader {
    async fn load(&self) -> Result<Arc<dyn RelayerSdk>, FhevmError> {
        Ok(Arc::clone(&self.sdk))
    }
}

/// Turns downloaded bundle bytes into an SDK; `None` means the bundle did
/// not expose the SDK entry point.
pub type BundleActivator = Arc<dyn Fn(Bytes) -> Option<Arc<dyn RelayerSdk>> + Send + Sync>;

/// Downloads the SDK bundle from a URL and activates it.
pub struct HttpBundleLoader {
    client: reqwest::Client,
    url: String,
    activator: BundleActivator,
}

impl HttpBundleLoader {
    pub fn new(client: reqwest::Client, url: impl Into<String>, activator: BundleActivator) -> Self {
        Self {
            client,
            url: url.into(),
            activator,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SdkLoader for HttpBundleLoader {
    async fn load(&self) -> Result<Arc<dyn RelayerSdk>, FhevmError> {
        tracing::info!(url = %self.url, "Loading relayer SDK bundle");
        let failure = |reason: String| FhevmError::SdkLoadFailure { reason };

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| failure(format!("failed to fetch {}: {e}", self.url)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(failure(format!("{} returned HTTP {status}", self.url)));
        }
        let bundle = response
            .bytes()
            .await
            .map_err(|e| failure(format!("failed to read bundle: {e}")))?;
        if bundle.is_empty() {
            return Err(failure("bundle is empty".to_string()));
        }

        let size = bundle.len();
        let sdk = (self.activator)(bundle)
            .ok_or_else(|| failure("bundle did not expose the relayer SDK".to_string()))?;
        tracing::info!(version = %sdk.version(), bytes = size, "Relayer SDK loaded");
        Ok(sdk)
    }
}

/// Memoized SDK handle. Concurrent callers share one in-flight load; a
/// completed load is reused; a failed load leaves the slot empty.
pub struct LazySdk {
    loader: Arc<dyn SdkLoader>,
    cell: OnceCell<Arc<dyn RelayerSdk>>,
}

impl LazySdk {
    pub fn new(loader: Arc<dyn SdkLoader>) -> Self {
        Self {
            loader,
            cell: OnceCell::new(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }

    pub async fn get(&self) -> Result<Arc<dyn RelayerSdk>, FhevmError> {
        self.cell
            .get_or_try_init(|| self.loader.load())
            .await
            .map(Arc::clone)
    }
}

/// Remote backend that reports the network public key it was built with.
pub struct RemoteBackend {
    inner: Arc<dyn FhevmBackend>,
    chain_id: u64,
    public_key: String,
}

impl RemoteBackend {
    pub fn new(inner: Arc<dyn FhevmBackend>, chain_id: u64, public_key: String) -> Self {
        Self {
            inner,
            chain_id,
            public_key,
        }
    }
}

#[async_trait]
impl FhevmBackend for RemoteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn encrypt(
        &self,
        contract: &str,
        user: &str,
        values: &[FheValue],
    ) -> Result<EncryptedData, FhevmError> {
        self.inner.encrypt(contract, user, values).await
    }

    fn generate_keypair(&self) -> Result<DecryptionKeypair, FhevmError> {
        self.inner.generate_keypair()
    }

    fn create_eip712(
        &self,
        public_key: &str,
        contract_addresses: &[String],
        start_timestamp: u64,
        duration_days: u64,
    ) -> Result<TypedData, FhevmError> {
        self.inner
            .create_eip712(public_key, contract_addresses, start_timestamp, duration_days)
    }

    async fn user_decrypt(
        &self,
        pairs: &[HandleContractPair],
        request: &UserDecryptRequest,
    ) -> Result<HashMap<String, FheValue>, FhevmError> {
        self.inner.user_decrypt(pairs, request).await
    }

    fn public_key(&self) -> Option<String> {
        Some(self.public_key.clone())
    }

    fn public_params(&self, bits: u32) -> Option<String> {
        self.inner.public_params(bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLoader {
        calls: AtomicUsize,
        fail_first: bool,
    }

    struct NamedSdk;

    #[async_trait]
    impl RelayerSdk for NamedSdk {
        fn version(&self) -> String {
            "test".to_string()
        }

        async fn create_instance(
            &self,
            config: RelayerInstanceConfig,
        ) -> Result<Arc<dyn FhevmBackend>, FhevmError> {
            Err(FhevmError::UnsupportedChain {
                chain_id: config.chain_id,
            })
        }
    }

    #[async_trait]
    impl SdkLoader for CountingLoader {
        async fn load(&self) -> Result<Arc<dyn RelayerSdk>, FhevmError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.fail_first && call == 0 {
                return Err(FhevmError::SdkLoadFailure {
                    reason: "offline".to_string(),
                });
            }
            Ok(Arc::new(NamedSdk))
        }
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_load() {
        let loader = Arc::new(CountingLoader {
            calls: AtomicUsize::new(0),
            fail_first: false,
        });
        let sdk = Arc::new(LazySdk::new(loader.clone()));

        let (a, b, c) = tokio::join!(sdk.get(), sdk.get(), sdk.get());
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
        assert!(sdk.is_loaded());
    }

    #[tokio::test]
    async fn failed_load_is_reported_then_retried_on_next_call() {
        let loader = Arc::new(CountingLoader {
            calls: AtomicUsize::new(0),
            fail_first: true,
        });
        let sdk = LazySdk::new(loader.clone());

        assert!(matches!(
            sdk.get().await,
            Err(FhevmError::SdkLoadFailure { .. })
        ));
        assert!(!sdk.is_loaded());
        assert!(sdk.get().await.is_ok());
        assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
    }
}
