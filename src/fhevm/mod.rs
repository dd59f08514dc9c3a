//! FHE client runtime: capability construction, encrypted inputs and
//! authorized decryption.

pub mod abi;
pub mod decrypt;
pub mod factory;
pub mod handle;
pub mod input;
pub mod instance;
pub mod mock;
pub mod proof;
pub mod public_key;
pub mod relayer;
pub mod relayer_http;
pub mod types;

pub use decrypt::{
    DECRYPTION_VALIDITY_DAYS, DecryptedHandle, DecryptionSessionManager, DecryptionSignature,
    HandleOutcome, resolve_handle,
};
pub use factory::{FhevmInstanceConfig, FhevmInstanceFactory, FhevmRuntime};
pub use handle::Handle;
pub use input::{EncryptedInputBuilder, encrypt_independently};
pub use instance::{
    BackendKind, DecryptionKeypair, EncryptedData, FhevmBackend, FhevmInstance,
    HandleContractPair, MAX_INPUT_BITS, UserDecryptRequest,
};
pub use mock::{SimulationBackend, SimulationParams};
pub use public_key::PublicKeyFetcher;
pub use relayer::{
    BundleActivator, HttpBundleLoader, LazySdk, RelayerInstanceConfig, RelayerSdk, SdkLoader,
    StaticSdkLoader,
};
pub use relayer_http::{DEFAULT_RELAYER_URL, HttpRelayerSdk, RelayerNetwork};
pub use types::{FheType, FheValue};
