//! Command-line front end.
//!
//! The CLI drives the library with a local-key wallet announced over the
//! discovery bus, so every command exercises the same session and FHEVM
//! paths an embedding application would.

mod doctor;
mod fhe;
mod wallet;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use secrecy::SecretString;

use crate::bootstrap;
use crate::config::RuntimeConfig;
use crate::fhevm::mock::coprocessor_key;
use crate::settings::Settings;

pub use wallet::LOCAL_WALLET_RDNS;

#[derive(Parser, Debug)]
#[command(
    name = "fhevm-wallet",
    version,
    about = "Wallet session and FHEVM client runtime"
)]
pub struct Cli {
    /// TOML config file (default: ~/.fhevm-wallet/config.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List configured networks.
    Networks,

    /// Check configured endpoints and local state.
    Doctor {
        /// Exit with an error if any check fails.
        #[arg(long)]
        strict: bool,
    },

    /// Print the network public key for a chain.
    PublicKey {
        #[arg(long)]
        chain_id: u64,

        /// Ignore the cached key.
        #[arg(long)]
        refresh: bool,
    },

    /// Connect the local key wallet and persist the connection.
    Connect(WalletArgs),

    /// Forget the persisted wallet connection.
    Disconnect,

    /// Encrypt values for a contract.
    Encrypt(EncryptArgs),

    /// Reveal ciphertext handles readable by the wallet account.
    Decrypt(DecryptArgs),

    /// Manage the config file.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Args, Debug, Clone)]
pub struct WalletArgs {
    /// Hex secp256k1 key of the local wallet. A throwaway key is used if unset.
    #[arg(long, env = "FHEVM_WALLET_PRIVATE_KEY", hide_env_values = true)]
    pub private_key: Option<String>,

    /// Network whose RPC node backs the wallet.
    #[arg(long, default_value_t = crate::config::LOCAL_CHAIN_ID)]
    pub chain_id: u64,
}

#[derive(Args, Debug, Clone)]
pub struct EncryptArgs {
    #[command(flatten)]
    pub wallet: WalletArgs,

    /// Contract the input is bound to.
    #[arg(long)]
    pub contract: String,

    /// Typed value, e.g. `u32:1500`, `bool:true`, `address:0x...`. Repeatable.
    #[arg(long = "value", required = true)]
    pub values: Vec<String>,

    /// Encrypt every value as its own input.
    #[arg(long)]
    pub independent: bool,

    /// Reveal the produced handles right away.
    #[arg(long)]
    pub reveal: bool,
}

#[derive(Args, Debug, Clone)]
pub struct DecryptArgs {
    #[command(flatten)]
    pub wallet: WalletArgs,

    /// Contract that holds the handles.
    #[arg(long)]
    pub contract: String,

    /// Handle as 0x-prefixed hex. Repeatable.
    #[arg(long = "handle", required = true)]
    pub handles: Vec<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommand {
    /// Write a config file populated with the built-in networks.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,

        /// Coprocessor key for the simulation backend. Stored in the
        /// bootstrap `.env`, never in the TOML file.
        #[arg(long, value_name = "HEX")]
        simulation_signer_key: Option<String>,
    },

    /// Print the resolved configuration.
    Show,
}

/// Run a parsed command line.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config;
    let load = || RuntimeConfig::load(config_path.as_deref());
    match cli.command {
        Command::Networks => {
            print_networks(&load()?);
            Ok(())
        }
        Command::Doctor { strict } => {
            doctor::run_doctor_command(&load()?, config_path.as_deref(), strict).await
        }
        Command::PublicKey { chain_id, refresh } => {
            fhe::run_public_key(&load()?, chain_id, refresh).await
        }
        Command::Connect(args) => wallet::run_connect(&load()?, &args).await,
        Command::Disconnect => wallet::run_disconnect(&load()?),
        Command::Encrypt(args) => fhe::run_encrypt(&load()?, &args).await,
        Command::Decrypt(args) => fhe::run_decrypt(&load()?, &args).await,
        Command::Config { command } => {
            run_config_command(command, config_path.clone(), bootstrap::app_env_path())
        }
    }
}

fn print_networks(config: &RuntimeConfig) {
    let supported = config.wallet.effective_chains(&config.networks);
    println!(
        "{:<12} {:>10}  {:<10}  {:<9}  rpc",
        "name", "chain id", "backend", "supported"
    );
    for network in config.networks.iter() {
        println!(
            "{:<12} {:>10}  {:<10}  {:<9}  {}",
            network.name,
            network.chain_id,
            if network.is_mock { "simulation" } else { "relayer" },
            if supported.contains(&network.chain_id) { "yes" } else { "no" },
            network.rpc_url.as_deref().unwrap_or("-"),
        );
    }
}

fn run_config_command(
    command: ConfigCommand,
    path: Option<PathBuf>,
    env_path: PathBuf,
) -> anyhow::Result<()> {
    let path = path.unwrap_or_else(Settings::default_toml_path);
    match command {
        ConfigCommand::Init {
            force,
            simulation_signer_key,
        } => {
            if path.exists() && !force {
                anyhow::bail!(
                    "{} already exists; pass --force to overwrite",
                    path.display()
                );
            }
            if let Some(key) = &simulation_signer_key {
                coprocessor_key(Some(&SecretString::from(key.clone())))?;
            }
            Settings::with_default_networks()
                .save_toml(&path)
                .map_err(anyhow::Error::msg)?;
            println!("Wrote {}", path.display());

            if let Some(key) = simulation_signer_key {
                bootstrap::save_env_file(&env_path, &[("FHEVM_SIMULATION_SIGNER_KEY", &key)])
                    .with_context(|| format!("failed to write {}", env_path.display()))?;
                println!("Wrote {}", env_path.display());
            }
            Ok(())
        }
        ConfigCommand::Show => {
            let explicit = path.exists().then_some(path.as_path());
            let config = RuntimeConfig::load(explicit)?;
            println!("config file:      {}", path.display());
            println!("storage:          {}", config.storage.path.display());
            println!("relayer sdk:      {}", config.fhevm.relayer_sdk_url);
            println!("relayer:          {}", config.fhevm.relayer_url);
            println!("http timeout:     {:?}", config.fhevm.http_timeout);
            println!("public key ttl:   {:?}", config.fhevm.public_key_cache_ttl);
            println!(
                "simulation key:   {}",
                if config.fhevm.simulation_signer_key.is_some() {
                    "custom"
                } else {
                    "built-in"
                }
            );
            println!("auto reconnect:   {}", config.wallet.auto_reconnect);
            println!();
            print_networks(&config);
            Ok(())
        }
    }
}
