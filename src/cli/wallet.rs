//! Local-key wallet for the CLI.

use std::sync::Arc;

use anyhow::Context;
use k256::ecdsa::SigningKey;
use secrecy::{ExposeSecret, SecretString};

use super::WalletArgs;
use crate::config::{NetworkConfig, RuntimeConfig};
use crate::eip712::decode_hex;
use crate::rpc::JsonRpcClient;
use crate::storage::{JsonFileStore, KeyValueStore, WalletStorage};
use crate::wallet::{
    DiscoveryBus, ProviderDetail, ProviderInfo, ProviderRegistry, ReconnectOutcome,
    RpcWalletProvider, WalletSession,
};

/// Reverse domain name the CLI wallet announces itself under.
pub const LOCAL_WALLET_RDNS: &str = "dev.fhevm-wallet.local";

const LOCAL_WALLET_ICON: &str = "data:image/svg+xml;base64,PHN2Zy8+";

/// A connected CLI wallet plus the store it persists into.
pub(crate) struct LocalWallet {
    pub session: WalletSession,
    pub store: Arc<dyn KeyValueStore>,
    pub network: NetworkConfig,
}

pub(crate) fn open_store(config: &RuntimeConfig) -> anyhow::Result<Arc<dyn KeyValueStore>> {
    let store = JsonFileStore::open(&config.storage.path)
        .with_context(|| format!("opening {}", config.storage.path.display()))?;
    Ok(Arc::new(store))
}

fn signing_key(raw: Option<&str>) -> anyhow::Result<SigningKey> {
    match raw {
        Some(raw) => {
            let secret = SecretString::from(raw.to_string());
            let bytes = decode_hex(secret.expose_secret()).context("private key is not hex")?;
            SigningKey::from_slice(&bytes).context("private key is not a valid secp256k1 scalar")
        }
        None => {
            tracing::warn!("No wallet key configured; using a throwaway key");
            Ok(SigningKey::random(&mut rand::thread_rng()))
        }
    }
}

/// Announce the local wallet and bring the session to `Connected`, silently
/// when the persisted connection still matches.
pub(crate) async fn connect_local_wallet(
    config: &RuntimeConfig,
    args: &WalletArgs,
) -> anyhow::Result<LocalWallet> {
    let network = config
        .networks
        .get(args.chain_id)
        .cloned()
        .with_context(|| format!("chain {} is not a configured network", args.chain_id))?;
    let rpc_url = network.rpc_url.clone().with_context(|| {
        format!(
            "network '{}' has no rpc_url; set one in the config file",
            network.name
        )
    })?;

    let key = signing_key(args.private_key.as_deref())?;
    let rpc = JsonRpcClient::new(rpc_url, config.fhevm.http_timeout)?;
    let provider = RpcWalletProvider::with_signing_key(rpc, key);

    let store = open_store(config)?;
    let bus = DiscoveryBus::new();
    let registry = ProviderRegistry::start(Arc::clone(&bus));
    bus.announce_provider(ProviderDetail {
        info: ProviderInfo {
            uuid: uuid::Uuid::new_v4().to_string(),
            name: "Local key wallet".to_string(),
            icon: LOCAL_WALLET_ICON.to_string(),
            rdns: LOCAL_WALLET_RDNS.to_string(),
        },
        provider: Arc::new(provider),
    });

    let session = WalletSession::with_supported_chains(
        registry,
        WalletStorage::new(Arc::clone(&store)),
        config.wallet.effective_chains(&config.networks),
    );

    let outcome = if config.wallet.auto_reconnect {
        session.attempt_silent_reconnect().await
    } else {
        ReconnectOutcome::AlreadyAttempted
    };
    tracing::debug!(?outcome, "Silent reconnect");
    if outcome != ReconnectOutcome::Reconnected {
        session.connect(LOCAL_WALLET_RDNS).await?;
    }
    if !session.is_network_supported() {
        tracing::warn!(
            chain_id = ?session.chain_id(),
            "Wallet is on a network the application does not support"
        );
    }

    Ok(LocalWallet {
        session,
        store,
        network,
    })
}

pub(crate) async fn run_connect(config: &RuntimeConfig, args: &WalletArgs) -> anyhow::Result<()> {
    let wallet = connect_local_wallet(config, args).await?;
    let snapshot = wallet.session.snapshot();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

pub(crate) fn run_disconnect(config: &RuntimeConfig) -> anyhow::Result<()> {
    let store = open_store(config)?;
    WalletStorage::new(store).clear_connection()?;
    println!("Disconnected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_keys_are_parsed_from_hex() {
        let key = signing_key(Some(
            "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318",
        ))
        .unwrap();
        assert_eq!(
            crate::eip712::address_of(&key),
            "0x2c7536e3605d9c16a7a3d7b1898e529396a65c23"
        );
    }

    #[test]
    fn malformed_keys_are_rejected() {
        assert!(signing_key(Some("0xzz")).is_err());
        assert!(signing_key(Some("0x00")).is_err());
    }
}
