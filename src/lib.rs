//! Wallet-session and FHEVM client runtime.
//!
//! * [`wallet`]: EIP-6963 provider discovery, the connection state machine
//!   with silent reconnect, and typed-data signers.
//! * [`fhevm`]: capability construction per `(chain, account)`, encrypted
//!   inputs, and authorized user decryption.

pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod eip712;
pub mod error;
pub mod fhevm;
pub mod rpc;
pub mod settings;
pub mod storage;
pub mod wallet;

pub use error::{Error, Result};
