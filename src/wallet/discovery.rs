//! EIP-6963 style multi-provider discovery.
//!
//! The page-global event target is modelled as a [`DiscoveryBus`]: wallets
//! announce themselves on it and answer discovery requests, and the
//! [`ProviderRegistry`] listens for announcements. The registry only holds
//! shared references to providers; it never mutates them.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::provider::Eip1193Provider;

pub const ANNOUNCE_PROVIDER_EVENT: &str = "eip6963:announceProvider";
pub const REQUEST_PROVIDER_EVENT: &str = "eip6963:requestProvider";

/// Announcement metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    /// Per-load instance identifier.
    pub uuid: String,
    pub name: String,
    /// Data URI of the wallet icon.
    pub icon: String,
    /// Reverse domain name, stable across loads (e.g. `io.metamask`).
    pub rdns: String,
}

/// Announced provider: metadata plus the shared request handle.
#[derive(Clone)]
pub struct ProviderDetail {
    pub info: ProviderInfo,
    pub provider: Arc<dyn Eip1193Provider>,
}

impl fmt::Debug for ProviderDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderDetail")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    RequestProvider,
    AnnounceProvider(ProviderDetail),
}

impl DiscoveryEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RequestProvider => REQUEST_PROVIDER_EVENT,
            Self::AnnounceProvider(_) => ANNOUNCE_PROVIDER_EVENT,
        }
    }
}

type BusListener = Arc<dyn Fn(&DiscoveryEvent) + Send + Sync>;

/// Synchronous publish/subscribe bus standing in for the page event target.
#[derive(Default)]
pub struct DiscoveryBus {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, BusListener)>>,
}

impl DiscoveryBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_listener(&self, listener: BusListener) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    pub fn remove_listener(&self, id: u64) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(existing, _)| *existing != id);
    }

    pub fn dispatch(&self, event: &DiscoveryEvent) {
        let snapshot: Vec<BusListener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(event);
        }
    }

    /// Wallet side: announce now and again on every discovery request.
    /// Returns the listener id so the wallet can withdraw.
    pub fn announce_provider(self: &Arc<Self>, detail: ProviderDetail) -> u64 {
        let weak_bus: Weak<Self> = Arc::downgrade(self);
        let announced = detail.clone();
        let id = self.add_listener(Arc::new(move |event| {
            if matches!(event, DiscoveryEvent::RequestProvider)
                && let Some(bus) = weak_bus.upgrade()
            {
                bus.dispatch(&DiscoveryEvent::AnnounceProvider(announced.clone()));
            }
        }));
        self.dispatch(&DiscoveryEvent::AnnounceProvider(detail));
        id
    }
}

/// Passive aggregate of announced providers, deduplicated by uuid.
pub struct ProviderRegistry {
    bus: Arc<DiscoveryBus>,
    providers: RwLock<Vec<ProviderDetail>>,
    listener: Mutex<Option<u64>>,
    count_tx: watch::Sender<usize>,
}

impl ProviderRegistry {
    /// Install the announcement listener and ask present providers to announce.
    pub fn start(bus: Arc<DiscoveryBus>) -> Arc<Self> {
        let (count_tx, _) = watch::channel(0);
        let registry = Arc::new(Self {
            bus: Arc::clone(&bus),
            providers: RwLock::new(Vec::new()),
            listener: Mutex::new(None),
            count_tx,
        });

        let weak: Weak<Self> = Arc::downgrade(&registry);
        let id = bus.add_listener(Arc::new(move |event| {
            if let DiscoveryEvent::AnnounceProvider(detail) = event
                && let Some(registry) = weak.upgrade()
            {
                registry.record(detail.clone());
            }
        }));
        *registry
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(id);

        bus.dispatch(&DiscoveryEvent::RequestProvider);
        registry
    }

    /// Remove the announcement listener. Known providers are kept.
    pub fn stop(&self) {
        if let Some(id) = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            self.bus.remove_listener(id);
        }
    }

    /// Re-broadcast a discovery request.
    pub fn refresh(&self) {
        self.bus.dispatch(&DiscoveryEvent::RequestProvider);
    }

    fn record(&self, detail: ProviderDetail) {
        let count = {
            let mut providers = self
                .providers
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            match providers
                .iter_mut()
                .find(|existing| existing.info.uuid == detail.info.uuid)
            {
                Some(existing) => *existing = detail,
                None => {
                    tracing::debug!(
                        rdns = %detail.info.rdns,
                        name = %detail.info.name,
                        "Wallet provider announced"
                    );
                    providers.push(detail);
                }
            }
            providers.len()
        };
        self.count_tx.send_replace(count);
    }

    pub fn list(&self) -> Vec<ProviderDetail> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn find_by_rdns(&self, rdns: &str) -> Option<ProviderDetail> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|p| p.info.rdns == rdns)
            .cloned()
    }

    pub fn find_by_uuid(&self, uuid: &str) -> Option<ProviderDetail> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|p| p.info.uuid == uuid)
            .cloned()
    }

    /// Watch the provider count; changes whenever an announcement lands.
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.count_tx.subscribe()
    }
}

impl Drop for ProviderRegistry {
    fn drop(&mut self) {
        self.stop();
    }
}
