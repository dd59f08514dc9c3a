//! Wallet discovery, connection and signing.

pub mod discovery;
pub mod http;
pub mod provider;
pub mod session;
pub mod signer;

pub use discovery::{DiscoveryBus, DiscoveryEvent, ProviderDetail, ProviderInfo, ProviderRegistry};
pub use http::RpcWalletProvider;
pub use provider::{
    Eip1193Provider, ListenerId, ListenerSet, ProviderEvent, ProviderListener, ProviderRpcError,
    RpcRequest,
};
pub use session::{ReconnectOutcome, SessionPhase, WalletSession, WalletSnapshot};
pub use signer::{LocalKeySigner, SessionSigner, TypedDataSigner};
