//! End-to-end wallet session tests against a scripted EIP-1193 provider.
//!
//! Covers discovery through the bus, explicit connect with persistence,
//! silent reconnect across a simulated restart, the one-shot reconnect guard,
//! failures that must leave the persisted record alone, and idempotent
//! disconnect.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::sync::Notify;

use fhevm_wallet_runtime::error::WalletError;
use fhevm_wallet_runtime::storage::{JsonFileStore, KeyValueStore, MemoryStore, WalletStorage};
use fhevm_wallet_runtime::wallet::{
    DiscoveryBus, Eip1193Provider, ListenerId, ListenerSet, ProviderDetail, ProviderEvent,
    ProviderInfo, ProviderListener, ProviderRegistry, ProviderRpcError, ReconnectOutcome,
    RpcRequest, SessionPhase, WalletSession,
};

const RDNS: &str = "io.example.wallet";

struct ScriptedWallet {
    accounts: Mutex<Vec<String>>,
    chain_id: Mutex<String>,
    calls: Mutex<HashMap<String, usize>>,
    listeners: ListenerSet,
    /// Operator refuses every `eth_requestAccounts` prompt.
    rejecting: Mutex<bool>,
    /// `eth_accounts` waits here when set.
    accounts_gate: Mutex<Option<Arc<Notify>>>,
}

impl ScriptedWallet {
    fn new(accounts: &[&str], chain_id: &str) -> Arc<Self> {
        Arc::new(Self {
            accounts: Mutex::new(accounts.iter().map(|a| a.to_string()).collect()),
            chain_id: Mutex::new(chain_id.to_string()),
            calls: Mutex::new(HashMap::new()),
            listeners: ListenerSet::new(),
            rejecting: Mutex::new(false),
            accounts_gate: Mutex::new(None),
        })
    }

    fn reject_prompts(&self) {
        *self.rejecting.lock().unwrap() = true;
    }

    fn hold_accounts(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.accounts_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    fn calls(&self, method: &str) -> usize {
        self.calls.lock().unwrap().get(method).copied().unwrap_or(0)
    }

    fn set_accounts(&self, accounts: &[&str]) {
        *self.accounts.lock().unwrap() = accounts.iter().map(|a| a.to_string()).collect();
    }
}

#[async_trait]
impl Eip1193Provider for ScriptedWallet {
    async fn request(&self, request: RpcRequest) -> Result<Value, ProviderRpcError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(request.method.clone())
            .or_default() += 1;
        match request.method.as_str() {
            "eth_requestAccounts" => {
                if *self.rejecting.lock().unwrap() {
                    return Err(ProviderRpcError::user_rejected());
                }
                Ok(json!(*self.accounts.lock().unwrap()))
            }
            "eth_accounts" => {
                let gate = self.accounts_gate.lock().unwrap().clone();
                if let Some(gate) = gate {
                    gate.notified().await;
                }
                Ok(json!(*self.accounts.lock().unwrap()))
            }
            "eth_chainId" => Ok(json!(*self.chain_id.lock().unwrap())),
            "wallet_switchEthereumChain" => {
                let raw = request.params[0]["chainId"].as_str().unwrap_or("0x0");
                let chain_id = u64::from_str_radix(raw.trim_start_matches("0x"), 16).unwrap_or(0);
                Err(ProviderRpcError::unrecognized_chain(chain_id))
            }
            other => Err(ProviderRpcError::new(4200, other)),
        }
    }

    fn on(&self, listener: ProviderListener) -> ListenerId {
        self.listeners.add(listener)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners.remove(id);
    }
}

fn detail(wallet: Arc<ScriptedWallet>, uuid: &str) -> ProviderDetail {
    ProviderDetail {
        info: ProviderInfo {
            uuid: uuid.to_string(),
            name: "Example Wallet".to_string(),
            icon: "data:image/svg+xml,<svg/>".to_string(),
            rdns: RDNS.to_string(),
        },
        provider: wallet,
    }
}

/// A fresh "page load": new bus, registry and session over `store`.
fn boot(wallet: &Arc<ScriptedWallet>, store: Arc<dyn KeyValueStore>) -> WalletSession {
    let bus = DiscoveryBus::new();
    let registry = ProviderRegistry::start(Arc::clone(&bus));
    bus.announce_provider(detail(Arc::clone(wallet), "uuid-1"));
    WalletSession::with_supported_chains(registry, WalletStorage::new(store), vec![31337])
}

#[tokio::test]
async fn connect_updates_state_and_persists() {
    let wallet = ScriptedWallet::new(&["0xUser1"], "0x7A69");
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let session = boot(&wallet, Arc::clone(&store));

    let snapshot = session.connect(RDNS).await.unwrap();
    assert_eq!(snapshot.account.as_deref(), Some("0xUser1"));
    assert_eq!(snapshot.chain_id, Some(31337));
    assert!(snapshot.connected());
    assert_eq!(
        snapshot.provider.as_ref().map(|p| p.rdns.as_str()),
        Some(RDNS)
    );

    let saved = WalletStorage::new(store).last_connection().unwrap();
    assert_eq!(saved.active_connector(), Some(RDNS));
    assert_eq!(saved.accounts, vec!["0xUser1".to_string()]);
    assert_eq!(saved.chain_id, Some(31337));
}

#[tokio::test]
async fn unknown_provider_is_reported() {
    let wallet = ScriptedWallet::new(&["0xUser1"], "0x7a69");
    let session = boot(&wallet, Arc::new(MemoryStore::new()));

    let err = session.connect("io.unknown.wallet").await.unwrap_err();
    assert!(matches!(err, WalletError::ProviderNotFound { .. }));
    assert_eq!(session.snapshot().phase, SessionPhase::Disconnected);
    assert!(session.snapshot().error.is_some());
}

#[tokio::test]
async fn silent_reconnect_restores_session_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("storage.json");
    let wallet = ScriptedWallet::new(&["0xUser1"], "0x7a69");

    {
        let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::open(&path).unwrap());
        let first = boot(&wallet, store);
        first.connect(RDNS).await.unwrap();
    }

    let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::open(&path).unwrap());
    let session = boot(&wallet, store);
    let prompts_before = wallet.calls("eth_requestAccounts");

    assert_eq!(
        session.attempt_silent_reconnect().await,
        ReconnectOutcome::Reconnected
    );
    assert_eq!(wallet.calls("eth_requestAccounts"), prompts_before);
    assert_eq!(session.account().as_deref(), Some("0xUser1"));
    assert_eq!(session.chain_id(), Some(31337));
    assert!(session.snapshot().connected());
}

#[tokio::test]
async fn account_mismatch_clears_persisted_connection() {
    let wallet = ScriptedWallet::new(&["0xUser1"], "0x7a69");
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    boot(&wallet, Arc::clone(&store)).connect(RDNS).await.unwrap();

    wallet.set_accounts(&["0xUser2"]);
    let session = boot(&wallet, Arc::clone(&store));

    assert_eq!(
        session.attempt_silent_reconnect().await,
        ReconnectOutcome::AccountMismatch
    );
    assert_eq!(session.snapshot().phase, SessionPhase::Disconnected);
    let storage = WalletStorage::new(store);
    assert!(!storage.is_connected());
    assert_eq!(storage.last_connection().unwrap().active_connector(), None);
}

#[tokio::test]
async fn reconnect_body_runs_once_until_disconnect() {
    let wallet = ScriptedWallet::new(&["0xUser1"], "0x7a69");
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    boot(&wallet, Arc::clone(&store)).connect(RDNS).await.unwrap();

    let bus = DiscoveryBus::new();
    let registry = ProviderRegistry::start(Arc::clone(&bus));
    let session = WalletSession::new(registry, WalletStorage::new(Arc::clone(&store)));
    let watcher = session.spawn_auto_reconnect();

    // The same wallet announcing repeatedly must not trigger more queries.
    bus.announce_provider(detail(Arc::clone(&wallet), "uuid-2"));
    bus.announce_provider(detail(Arc::clone(&wallet), "uuid-3"));
    bus.announce_provider(detail(Arc::clone(&wallet), "uuid-2"));

    let mut updates = session.subscribe();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !updates.borrow_and_update().connected() {
            updates.changed().await.unwrap();
        }
    })
    .await
    .expect("auto reconnect did not connect");
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(wallet.calls("eth_accounts"), 1);
    assert!(session.reconnect_attempted());
    assert_eq!(
        session.attempt_silent_reconnect().await,
        ReconnectOutcome::AlreadyAttempted
    );

    session.disconnect();
    assert!(!session.reconnect_attempted());
    watcher.abort();
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let wallet = ScriptedWallet::new(&["0xUser1"], "0x7a69");
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let session = boot(&wallet, Arc::clone(&store));
    session.connect(RDNS).await.unwrap();

    session.disconnect();
    let once = session.snapshot();
    session.disconnect();
    let twice = session.snapshot();

    assert_eq!(once, twice);
    assert_eq!(twice.phase, SessionPhase::Disconnected);
    assert_eq!(twice.account, None);
    assert!(wallet.listeners.is_empty());
    assert!(!WalletStorage::new(store).is_connected());
}

#[tokio::test]
async fn provider_events_drive_the_session() {
    let wallet = ScriptedWallet::new(&["0xUser1"], "0x7a69");
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let session = boot(&wallet, Arc::clone(&store));
    session.connect(RDNS).await.unwrap();

    wallet
        .listeners
        .emit(&ProviderEvent::AccountsChanged(vec!["0xUser3".to_string()]));
    assert_eq!(session.account().as_deref(), Some("0xUser3"));
    assert_eq!(
        WalletStorage::new(Arc::clone(&store))
            .last_connection()
            .unwrap()
            .accounts,
        vec!["0xUser3".to_string()]
    );

    wallet
        .listeners
        .emit(&ProviderEvent::ChainChanged("0xaa36a7".to_string()));
    assert_eq!(session.chain_id(), Some(11_155_111));
    assert!(!session.is_network_supported());

    wallet.listeners.emit(&ProviderEvent::AccountsChanged(Vec::new()));
    assert_eq!(session.snapshot().phase, SessionPhase::Disconnected);
    assert!(!WalletStorage::new(store).is_connected());
}

#[tokio::test]
async fn disconnect_event_matches_empty_accounts_changed() {
    let mut finals = Vec::new();
    for event in [
        ProviderEvent::AccountsChanged(Vec::new()),
        ProviderEvent::Disconnect {
            code: 4900,
            message: "Disconnected from all chains".to_string(),
        },
    ] {
        let wallet = ScriptedWallet::new(&["0xUser1"], "0x7a69");
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let session = boot(&wallet, Arc::clone(&store));
        session.connect(RDNS).await.unwrap();
        assert_eq!(
            session.attempt_silent_reconnect().await,
            ReconnectOutcome::AlreadyConnected
        );

        wallet.listeners.emit(&event);

        assert!(wallet.listeners.is_empty());
        assert!(!session.reconnect_attempted());
        assert!(!WalletStorage::new(store).is_connected());
        finals.push(session.snapshot());
    }
    assert_eq!(finals[0], finals[1]);
    assert_eq!(finals[1].phase, SessionPhase::Disconnected);
    assert_eq!(finals[1].account, None);
    assert_eq!(finals[1].chain_id, None);
}

#[tokio::test]
async fn failed_connect_keeps_the_persisted_record() {
    let wallet = ScriptedWallet::new(&["0xUser1"], "0x7a69");
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let session = boot(&wallet, Arc::clone(&store));
    session.connect(RDNS).await.unwrap();
    let storage = WalletStorage::new(Arc::clone(&store));
    let before = storage.last_connection().unwrap();

    wallet.reject_prompts();
    let err = session.connect(RDNS).await.unwrap_err();
    assert!(matches!(err, WalletError::UserRejected { .. }));
    assert_eq!(storage.last_connection().unwrap(), before);
    assert!(session.snapshot().connected());
    assert!(session.snapshot().error.is_some());

    // A fresh session whose first prompt is refused leaves it alone too.
    let restarted = boot(&wallet, Arc::clone(&store));
    assert!(restarted.connect(RDNS).await.is_err());
    assert_eq!(restarted.snapshot().phase, SessionPhase::Disconnected);
    assert_eq!(storage.last_connection().unwrap(), before);
    assert!(storage.is_connected());
}

#[tokio::test]
async fn failed_network_switch_keeps_the_persisted_record() {
    let wallet = ScriptedWallet::new(&["0xUser1"], "0x7a69");
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let session = boot(&wallet, Arc::clone(&store));
    session.connect(RDNS).await.unwrap();
    let storage = WalletStorage::new(Arc::clone(&store));
    let before = storage.last_connection().unwrap();

    let err = session.switch_network(11_155_111).await.unwrap_err();
    assert!(matches!(
        err,
        WalletError::NetworkNotAdded {
            chain_id: 11_155_111
        }
    ));
    assert_eq!(storage.last_connection().unwrap(), before);
    assert_eq!(session.chain_id(), Some(31337));
    assert!(session.snapshot().connected());
}

#[tokio::test]
async fn any_shared_account_is_enough_to_reconnect() {
    let wallet = ScriptedWallet::new(&["0xUser1", "0xUser2"], "0x7a69");
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    boot(&wallet, Arc::clone(&store)).connect(RDNS).await.unwrap();

    // The wallet now leads with an account it never exposed before.
    wallet.set_accounts(&["0xUser3", "0xuser2"]);
    let session = boot(&wallet, Arc::clone(&store));

    assert_eq!(
        session.attempt_silent_reconnect().await,
        ReconnectOutcome::Reconnected
    );
    assert_eq!(session.account().as_deref(), Some("0xUser3"));
    assert!(WalletStorage::new(store).is_connected());
}

#[tokio::test]
async fn explicit_connect_during_reconnect_keeps_its_record() {
    let wallet = ScriptedWallet::new(&["0xUser1"], "0x7a69");
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    boot(&wallet, Arc::clone(&store)).connect(RDNS).await.unwrap();

    let session = boot(&wallet, Arc::clone(&store));
    let gate = wallet.hold_accounts();
    let mut updates = session.subscribe();
    let reconnect = tokio::spawn({
        let session = session.clone();
        async move { session.attempt_silent_reconnect().await }
    });
    tokio::time::timeout(Duration::from_secs(5), async {
        while updates.borrow_and_update().phase != SessionPhase::Reconnecting {
            updates.changed().await.unwrap();
        }
    })
    .await
    .expect("reconnect never started");

    // The operator picks another account while the silent query is pending.
    wallet.set_accounts(&["0xUser2"]);
    session.connect(RDNS).await.unwrap();
    gate.notify_one();

    assert_eq!(reconnect.await.unwrap(), ReconnectOutcome::Superseded);
    assert_eq!(session.account().as_deref(), Some("0xUser2"));
    assert!(session.snapshot().connected());
    let saved = WalletStorage::new(store).last_connection().unwrap();
    assert_eq!(saved.active_connector(), Some(RDNS));
    assert_eq!(saved.accounts, vec!["0xUser2".to_string()]);
}
