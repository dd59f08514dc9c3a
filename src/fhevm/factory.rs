//! Builds capability objects for a `(chain, account)` configuration.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tokio::sync::Mutex;

use super::instance::FhevmInstance;
use super::mock::{SimulationBackend, SimulationParams, coprocessor_key};
use super::public_key::PublicKeyFetcher;
use super::relayer::{
    BundleActivator, HttpBundleLoader, LazySdk, RelayerInstanceConfig, RemoteBackend, SdkLoader,
    StaticSdkLoader,
};
use super::relayer_http::HttpRelayerSdk;
use crate::config::{NetworkConfig, NetworkTable, RuntimeConfig};
use crate::error::FhevmError;
use crate::rpc::JsonRpcClient;
use crate::storage::KeyValueStore;
use crate::wallet::WalletSnapshot;

/// Inputs that determine which capability object gets built. Any field
/// change requires a rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FhevmInstanceConfig {
    pub chain_id: u64,
    pub account: Option<String>,
    pub is_mock: bool,
    pub rpc_url: Option<String>,
}

impl FhevmInstanceConfig {
    pub fn for_network(network: &NetworkConfig, account: Option<String>) -> Self {
        Self {
            chain_id: network.chain_id,
            account,
            is_mock: network.is_mock,
            rpc_url: network.rpc_url.clone(),
        }
    }

    /// Config for the wallet's current chain and account. `None` while the
    /// wallet has no chain id.
    pub fn from_wallet(
        snapshot: &WalletSnapshot,
        networks: &NetworkTable,
    ) -> Result<Option<Self>, FhevmError> {
        let Some(chain_id) = snapshot.chain_id else {
            return Ok(None);
        };
        let network = networks
            .get(chain_id)
            .ok_or(FhevmError::UnsupportedChain { chain_id })?;
        Ok(Some(Self::for_network(network, snapshot.account.clone())))
    }
}

pub struct FhevmInstanceFactory {
    sdk: Arc<LazySdk>,
    public_keys: Arc<PublicKeyFetcher>,
    http_timeout: Duration,
    simulation_signer: Option<SecretString>,
}

impl FhevmInstanceFactory {
    pub fn new(sdk: Arc<LazySdk>, public_keys: Arc<PublicKeyFetcher>) -> Self {
        Self {
            sdk,
            public_keys,
            http_timeout: Duration::from_secs(30),
            simulation_signer: None,
        }
    }

    /// Wire a factory from runtime configuration. `activator` turns the
    /// downloaded SDK bundle into a usable SDK.
    pub fn from_config(
        config: &RuntimeConfig,
        store: Arc<dyn KeyValueStore>,
        activator: BundleActivator,
    ) -> Result<Self, FhevmError> {
        let client = http_client(config)?;
        let loader = HttpBundleLoader::new(
            client.clone(),
            config.fhevm.relayer_sdk_url.clone(),
            activator,
        );
        Ok(Self::with_loader(config, store, client, Arc::new(loader)))
    }

    /// Wire a factory whose remote path talks to the hosted relayer at
    /// `fhevm.relayer_url` directly.
    pub fn from_config_with_relayer(
        config: &RuntimeConfig,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self, FhevmError> {
        let client = http_client(config)?;
        let sdk = HttpRelayerSdk::new(client.clone(), config.fhevm.relayer_url.clone());
        let loader = StaticSdkLoader::new(Arc::new(sdk));
        Ok(Self::with_loader(config, store, client, Arc::new(loader)))
    }

    fn with_loader(
        config: &RuntimeConfig,
        store: Arc<dyn KeyValueStore>,
        client: reqwest::Client,
        loader: Arc<dyn SdkLoader>,
    ) -> Self {
        let public_keys =
            PublicKeyFetcher::new(client, store, config.networks.public_key_urls())
                .with_ttl(config.fhevm.public_key_cache_ttl);

        Self::new(Arc::new(LazySdk::new(loader)), Arc::new(public_keys))
            .with_http_timeout(config.fhevm.http_timeout)
            .with_simulation_signer(config.fhevm.simulation_signer_key.clone())
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn with_simulation_signer(mut self, key: Option<SecretString>) -> Self {
        self.simulation_signer = key;
        self
    }

    pub fn public_keys(&self) -> &Arc<PublicKeyFetcher> {
        &self.public_keys
    }

    pub async fn create(&self, config: &FhevmInstanceConfig) -> Result<FhevmInstance, FhevmError> {
        tracing::info!(
            chain_id = config.chain_id,
            mock = config.is_mock,
            "Creating FHEVM instance"
        );
        if config.is_mock {
            let backend = self.create_simulation_backend(config).await?;
            Ok(FhevmInstance::new(backend))
        } else {
            self.create_remote(config).await
        }
    }

    /// Simulation path, returning the concrete backend so callers can drive
    /// its access list and cleartext ledger.
    pub async fn create_simulation_backend(
        &self,
        config: &FhevmInstanceConfig,
    ) -> Result<Arc<SimulationBackend>, FhevmError> {
        let url = config.rpc_url.as_deref().ok_or_else(|| {
            FhevmError::InvalidInput(format!(
                "chain {} is a simulation network without an RPC URL",
                config.chain_id
            ))
        })?;
        let rpc = JsonRpcClient::new(url, self.http_timeout).map_err(|e| {
            FhevmError::PlatformUnreachable {
                url: url.to_string(),
                reason: e.to_string(),
            }
        })?;
        let params = SimulationParams::resolve(&rpc, config.chain_id).await?;
        let key = coprocessor_key(self.simulation_signer.as_ref())?;
        Ok(Arc::new(SimulationBackend::new(params, key).with_node(rpc)))
    }

    async fn create_remote(&self, config: &FhevmInstanceConfig) -> Result<FhevmInstance, FhevmError> {
        let sdk = self.sdk.get().await?;
        let public_key = self.public_keys.fetch(config.chain_id).await?;
        let inner = sdk
            .create_instance(RelayerInstanceConfig {
                chain_id: config.chain_id,
                public_key: public_key.clone(),
                account: config.account.clone(),
            })
            .await?;
        Ok(FhevmInstance::new(Arc::new(RemoteBackend::new(
            inner,
            config.chain_id,
            public_key,
        ))))
    }
}

fn http_client(config: &RuntimeConfig) -> Result<reqwest::Client, FhevmError> {
    reqwest::Client::builder()
        .timeout(config.fhevm.http_timeout)
        .build()
        .map_err(|e| FhevmError::Backend(format!("HTTP client: {e}")))
}

/// Holds the instance for the current config and rebuilds it only when the
/// config changes.
pub struct FhevmRuntime {
    factory: FhevmInstanceFactory,
    current: Mutex<Option<(FhevmInstanceConfig, FhevmInstance)>>,
}

impl FhevmRuntime {
    pub fn new(factory: FhevmInstanceFactory) -> Self {
        Self {
            factory,
            current: Mutex::new(None),
        }
    }

    pub fn factory(&self) -> &FhevmInstanceFactory {
        &self.factory
    }

    pub async fn instance_for(
        &self,
        config: &FhevmInstanceConfig,
    ) -> Result<FhevmInstance, FhevmError> {
        let mut current = self.current.lock().await;
        if let Some((built_for, instance)) = current.as_ref()
            && built_for == config
        {
            return Ok(instance.clone());
        }

        *current = None;
        let instance = self.factory.create(config).await?;
        *current = Some((config.clone(), instance.clone()));
        Ok(instance)
    }

    /// Instance for the wallet's current chain and account.
    pub async fn instance_for_wallet(
        &self,
        snapshot: &WalletSnapshot,
        networks: &NetworkTable,
    ) -> Result<Option<FhevmInstance>, FhevmError> {
        match FhevmInstanceConfig::from_wallet(snapshot, networks)? {
            Some(config) => self.instance_for(&config).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn current(&self) -> Option<FhevmInstance> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|(_, instance)| instance.clone())
    }

    pub async fn reset(&self) {
        *self.current.lock().await = None;
    }
}
