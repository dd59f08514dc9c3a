//! Wallet session state machine.
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──▶ Connected
//! Disconnected ──silent reconnect──▶ Reconnecting ──▶ Connected
//! Connected ──disconnect / accountsChanged([]) / disconnect event──▶ Disconnected
//! Connected ──accountsChanged / chainChanged──▶ Connected (fields updated)
//! ```
//!
//! Exactly one [`SessionState`] exists per session and only the session's own
//! methods and provider-event handlers mutate it, always under one mutex, so a
//! handler run never interleaves with another.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::discovery::{ProviderDetail, ProviderInfo, ProviderRegistry};
use super::provider::{
    Eip1193Provider, ListenerId, ProviderEvent, RpcRequest, codes, methods, parse_accounts,
};
use crate::eip712::addresses_equal;
use crate::error::WalletError;
use crate::rpc::{parse_chain_id, parse_quantity, to_quantity};
use crate::storage::WalletStorage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Disconnected,
    Connecting,
    Reconnecting,
    Connected,
}

/// Read-only view of the session published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletSnapshot {
    pub provider: Option<ProviderInfo>,
    pub account: Option<String>,
    pub chain_id: Option<u64>,
    pub phase: SessionPhase,
    pub error: Option<String>,
}

impl WalletSnapshot {
    pub fn connected(&self) -> bool {
        self.phase == SessionPhase::Connected
    }

    pub fn connecting(&self) -> bool {
        matches!(
            self.phase,
            SessionPhase::Connecting | SessionPhase::Reconnecting
        )
    }
}

/// What a silent reconnect attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectOutcome {
    /// The one-shot guard was already spent for this session lifetime.
    AlreadyAttempted,
    AlreadyConnected,
    ConnectionInProgress,
    /// No provider has announced yet; the guard is left untouched.
    NoProviders,
    NoSavedConnection,
    ProviderMissing,
    AccountMismatch,
    Reconnected,
    Failed,
    /// A connect or disconnect took over while the wallet was being queried.
    Superseded,
}

struct ListenerRegistration {
    provider: Arc<dyn Eip1193Provider>,
    ids: Vec<ListenerId>,
}

impl ListenerRegistration {
    fn remove(self) {
        for id in self.ids {
            self.provider.remove_listener(id);
        }
    }
}

struct SessionState {
    provider: Option<ProviderDetail>,
    account: Option<String>,
    chain_id: Option<u64>,
    phase: SessionPhase,
    error: Option<String>,
    reconnect_attempted: bool,
    listeners: Option<ListenerRegistration>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            provider: None,
            account: None,
            chain_id: None,
            phase: SessionPhase::Disconnected,
            error: None,
            reconnect_attempted: false,
            listeners: None,
        }
    }

    fn snapshot(&self) -> WalletSnapshot {
        WalletSnapshot {
            provider: self.provider.as_ref().map(|p| p.info.clone()),
            account: self.account.clone(),
            chain_id: self.chain_id,
            phase: self.phase,
            error: self.error.clone(),
        }
    }
}

struct Shared {
    registry: Arc<ProviderRegistry>,
    storage: WalletStorage,
    supported_chains: Vec<u64>,
    state: Mutex<SessionState>,
    snapshot_tx: watch::Sender<WalletSnapshot>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a mutation and publish the resulting snapshot.
    fn update<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> (R, WalletSnapshot) {
        let mut state = self.lock();
        let result = f(&mut state);
        let snapshot = state.snapshot();
        drop(state);
        self.snapshot_tx.send_replace(snapshot.clone());
        (result, snapshot)
    }

    fn persist(&self, rdns: &str, accounts: &[String], chain_id: u64) {
        if let Err(e) = self.storage.save_connection(rdns, accounts, chain_id) {
            tracing::warn!(rdns, "Failed to persist wallet connection: {}", e);
        }
    }

    fn clear_persisted(&self) {
        if let Err(e) = self.storage.clear_connection() {
            tracing::warn!("Failed to clear persisted wallet connection: {}", e);
        }
    }

    /// End a silent reconnect that did not connect. The persisted record is
    /// cleared only while the attempt still owns the session. Returns false
    /// when another connect or a disconnect already took over.
    fn abandon_reconnect(&self) -> bool {
        let (owned, _) = self.update(|state| {
            if state.phase != SessionPhase::Reconnecting {
                return false;
            }
            state.phase = SessionPhase::Disconnected;
            self.clear_persisted();
            true
        });
        owned
    }

    /// Move to `Connected`, persist, and (re)install provider listeners.
    fn establish(
        self: &Arc<Self>,
        state: &mut SessionState,
        detail: &ProviderDetail,
        accounts: &[String],
        chain_id: u64,
    ) {
        state.provider = Some(detail.clone());
        state.account = accounts.first().cloned();
        state.chain_id = Some(chain_id);
        state.phase = SessionPhase::Connected;
        state.error = None;
        self.persist(&detail.info.rdns, accounts, chain_id);
        self.install_listeners(state, detail);
    }

    /// Replace any previous listener set with a fresh one for `detail`.
    fn install_listeners(self: &Arc<Self>, state: &mut SessionState, detail: &ProviderDetail) {
        if let Some(previous) = state.listeners.take() {
            previous.remove();
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let id = detail.provider.on(Arc::new(move |event: &ProviderEvent| {
            if let Some(shared) = weak.upgrade() {
                shared.handle_event(event);
            }
        }));
        state.listeners = Some(ListenerRegistration {
            provider: Arc::clone(&detail.provider),
            ids: vec![id],
        });
    }

    fn handle_event(&self, event: &ProviderEvent) {
        tracing::debug!(event = event.name(), "Wallet provider event");
        match event {
            ProviderEvent::AccountsChanged(accounts) if accounts.is_empty() => {
                self.disconnect_internal();
            }
            ProviderEvent::Disconnect { code, message } => {
                tracing::info!(code, message = %message, "Wallet provider disconnected");
                self.disconnect_internal();
            }
            ProviderEvent::AccountsChanged(accounts) => {
                self.update(|state| {
                    state.account = accounts.first().cloned();
                    if let (Some(chain_id), Some(provider)) = (state.chain_id, &state.provider) {
                        self.persist(&provider.info.rdns, accounts, chain_id);
                    }
                });
            }
            ProviderEvent::ChainChanged(raw) => {
                let Some(chain_id) = parse_quantity(raw) else {
                    tracing::warn!(raw = %raw, "Ignoring unparseable chainChanged payload");
                    return;
                };
                self.update(|state| {
                    state.chain_id = Some(chain_id);
                    if let (Some(account), Some(provider)) = (&state.account, &state.provider) {
                        self.persist(&provider.info.rdns, std::slice::from_ref(account), chain_id);
                    }
                });
            }
        }
    }

    fn disconnect_internal(&self) {
        self.update(|state| {
            if let Some(registration) = state.listeners.take() {
                registration.remove();
            }
            state.provider = None;
            state.account = None;
            state.chain_id = None;
            state.phase = SessionPhase::Disconnected;
            state.error = None;
            state.reconnect_attempted = false;
        });
        self.clear_persisted();
    }
}

/// Owns the active provider handle, account and chain id of one runtime.
#[derive(Clone)]
pub struct WalletSession {
    shared: Arc<Shared>,
}

impl WalletSession {
    pub fn new(registry: Arc<ProviderRegistry>, storage: WalletStorage) -> Self {
        Self::with_supported_chains(registry, storage, Vec::new())
    }

    pub fn with_supported_chains(
        registry: Arc<ProviderRegistry>,
        storage: WalletStorage,
        supported_chains: Vec<u64>,
    ) -> Self {
        let state = SessionState::new();
        let (snapshot_tx, _) = watch::channel(state.snapshot());
        Self {
            shared: Arc::new(Shared {
                registry,
                storage,
                supported_chains,
                state: Mutex::new(state),
                snapshot_tx,
            }),
        }
    }

    pub fn snapshot(&self) -> WalletSnapshot {
        self.shared.lock().snapshot()
    }

    /// Snapshot stream; a new value is published after every state change.
    pub fn subscribe(&self) -> watch::Receiver<WalletSnapshot> {
        self.shared.snapshot_tx.subscribe()
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.shared.registry
    }

    pub fn active_provider(&self) -> Option<ProviderDetail> {
        self.shared.lock().provider.clone()
    }

    pub fn account(&self) -> Option<String> {
        self.shared.lock().account.clone()
    }

    pub fn chain_id(&self) -> Option<u64> {
        self.shared.lock().chain_id
    }

    pub fn reconnect_attempted(&self) -> bool {
        self.shared.lock().reconnect_attempted
    }

    /// Whether the current chain is one of the configured networks. An unknown
    /// chain id (not connected) counts as supported.
    pub fn is_network_supported(&self) -> bool {
        match self.chain_id() {
            Some(chain_id) => {
                self.shared.supported_chains.is_empty()
                    || self.shared.supported_chains.contains(&chain_id)
            }
            None => true,
        }
    }

    /// Request account access from the provider registered under `rdns`.
    ///
    /// May wait indefinitely for the operator to answer the wallet prompt.
    /// Failures are recorded on the snapshot but leave persisted state alone.
    pub async fn connect(&self, rdns: &str) -> Result<WalletSnapshot, WalletError> {
        let Some(detail) = self.shared.registry.find_by_rdns(rdns) else {
            let err = WalletError::ProviderNotFound {
                rdns: rdns.to_string(),
            };
            self.shared.update(|state| state.error = Some(err.to_string()));
            return Err(err);
        };

        let (previous_phase, _) = self.shared.update(|state| {
            let previous = state.phase;
            state.phase = SessionPhase::Connecting;
            state.error = None;
            previous
        });

        match request_connection(detail.provider.as_ref(), methods::REQUEST_ACCOUNTS).await {
            Ok((accounts, chain_id)) => {
                let (_, snapshot) = self.shared.update(|state| {
                    self.shared.establish(state, &detail, &accounts, chain_id);
                });
                tracing::info!(
                    rdns,
                    account = ?snapshot.account,
                    chain_id,
                    "Wallet connected"
                );
                Ok(snapshot)
            }
            Err(err) => {
                tracing::warn!(rdns, "Wallet connection failed: {}", err);
                self.shared.update(|state| {
                    state.phase = if previous_phase == SessionPhase::Connected {
                        SessionPhase::Connected
                    } else {
                        SessionPhase::Disconnected
                    };
                    state.error = Some(err.to_string());
                });
                Err(err)
            }
        }
    }

    /// Restore the persisted connection without prompting the operator.
    ///
    /// Runs its querying body at most once per session lifetime; only
    /// [`WalletSession::disconnect`] re-arms it. Failures clear the persisted
    /// record and are never surfaced as errors.
    pub async fn attempt_silent_reconnect(&self) -> ReconnectOutcome {
        {
            let mut state = self.shared.lock();
            if state.reconnect_attempted {
                return ReconnectOutcome::AlreadyAttempted;
            }
            match state.phase {
                SessionPhase::Connected => return ReconnectOutcome::AlreadyConnected,
                SessionPhase::Connecting | SessionPhase::Reconnecting => {
                    return ReconnectOutcome::ConnectionInProgress;
                }
                SessionPhase::Disconnected => {}
            }
            if self.shared.registry.is_empty() {
                return ReconnectOutcome::NoProviders;
            }
            state.reconnect_attempted = true;
        }

        let saved = match self.shared.storage.last_connection() {
            Ok(saved) => saved,
            Err(e) => {
                tracing::warn!("Could not read persisted wallet connection: {}", e);
                return ReconnectOutcome::NoSavedConnection;
            }
        };
        let Some(rdns) = saved.active_connector() else {
            tracing::debug!("No saved wallet connection");
            return ReconnectOutcome::NoSavedConnection;
        };

        let Some(detail) = self.shared.registry.find_by_rdns(rdns) else {
            tracing::warn!(rdns, "Previously connected wallet provider not found");
            self.shared.clear_persisted();
            return ReconnectOutcome::ProviderMissing;
        };

        self.shared
            .update(|state| state.phase = SessionPhase::Reconnecting);

        let abandoned = |outcome: ReconnectOutcome| {
            if self.shared.abandon_reconnect() {
                outcome
            } else {
                tracing::debug!(rdns, "Silent reconnect superseded");
                ReconnectOutcome::Superseded
            }
        };

        match request_connection(detail.provider.as_ref(), methods::ACCOUNTS).await {
            Ok((accounts, chain_id)) => {
                // Any live account the wallet still exposes counts as a match.
                let known = accounts.iter().any(|live| {
                    saved
                        .accounts
                        .iter()
                        .any(|persisted| addresses_equal(persisted, live))
                });
                if !known {
                    tracing::info!(rdns, "No matching wallet accounts, clearing saved connection");
                    return abandoned(ReconnectOutcome::AccountMismatch);
                }
                let (established, _) = self.shared.update(|state| {
                    if state.phase != SessionPhase::Reconnecting {
                        return false;
                    }
                    self.shared.establish(state, &detail, &accounts, chain_id);
                    true
                });
                if established {
                    tracing::info!(rdns, chain_id, "Silent wallet reconnect succeeded");
                    ReconnectOutcome::Reconnected
                } else {
                    tracing::debug!(rdns, "Silent reconnect superseded");
                    ReconnectOutcome::Superseded
                }
            }
            Err(WalletError::NoAccounts) => {
                tracing::info!(rdns, "Wallet exposes no accounts, clearing saved connection");
                abandoned(ReconnectOutcome::AccountMismatch)
            }
            Err(err) => {
                tracing::warn!(rdns, "Silent wallet reconnect failed: {}", err);
                abandoned(ReconnectOutcome::Failed)
            }
        }
    }

    /// Drop the connection, its listeners and the persisted record, and
    /// re-arm the silent reconnect guard. Idempotent.
    pub fn disconnect(&self) {
        self.shared.disconnect_internal();
    }

    /// Ask the active provider to switch to `chain_id`. The session's chain id
    /// follows once the provider emits `chainChanged`.
    pub async fn switch_network(&self, chain_id: u64) -> Result<(), WalletError> {
        let provider = self
            .active_provider()
            .ok_or(WalletError::NotConnected)?
            .provider;
        let request = RpcRequest::new(
            methods::SWITCH_CHAIN,
            json!([{ "chainId": to_quantity(chain_id) }]),
        );
        match provider.request(request).await {
            Ok(_) => Ok(()),
            Err(err) if err.code == codes::UNRECOGNIZED_CHAIN => {
                Err(WalletError::NetworkNotAdded { chain_id })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Attempt a silent reconnect whenever the registry's provider set changes.
    /// The one-shot guard keeps the body from running more than once.
    pub fn spawn_auto_reconnect(&self) -> JoinHandle<()> {
        let session = self.clone();
        let mut providers = self.shared.registry.subscribe();
        tokio::spawn(async move {
            loop {
                let count = *providers.borrow_and_update();
                if count > 0 {
                    let outcome = session.attempt_silent_reconnect().await;
                    tracing::debug!(?outcome, providers = count, "Silent reconnect pass");
                }
                if providers.changed().await.is_err() {
                    break;
                }
            }
        })
    }
}

async fn request_connection(
    provider: &dyn Eip1193Provider,
    accounts_method: &str,
) -> Result<(Vec<String>, u64), WalletError> {
    let raw = provider
        .request(RpcRequest::without_params(accounts_method))
        .await?;
    let accounts = parse_accounts(accounts_method, raw)?;
    if accounts.is_empty() {
        return Err(WalletError::NoAccounts);
    }

    let raw_chain: Value = provider
        .request(RpcRequest::without_params(methods::CHAIN_ID))
        .await?;
    let chain_id = parse_chain_id(&raw_chain).ok_or_else(|| WalletError::InvalidResponse {
        method: methods::CHAIN_ID.to_string(),
        reason: format!("unparseable chain id {raw_chain}"),
    })?;
    Ok((accounts, chain_id))
}
