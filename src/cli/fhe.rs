//! `public-key`, `encrypt` and `decrypt` commands.

use std::sync::Arc;

use anyhow::Context;
use serde_json::json;

use super::wallet::{LocalWallet, connect_local_wallet, open_store};
use super::{DecryptArgs, EncryptArgs};
use crate::config::RuntimeConfig;
use crate::fhevm::{
    DecryptionSessionManager, EncryptedData, FheType, FheValue, FhevmInstance, FhevmInstanceFactory,
    FhevmRuntime, HandleContractPair, PublicKeyFetcher, encrypt_independently,
};

/// Parse `type:value`, e.g. `u32:1500`.
fn parse_value_arg(raw: &str) -> anyhow::Result<FheValue> {
    let (ty, value) = raw
        .split_once(':')
        .with_context(|| format!("expected type:value, got '{raw}'"))?;
    let ty: FheType = ty.parse()?;
    Ok(FheValue::parse(ty, value)?)
}

async fn wallet_instance(
    config: &RuntimeConfig,
    wallet: &LocalWallet,
) -> anyhow::Result<FhevmInstance> {
    let factory = FhevmInstanceFactory::from_config_with_relayer(config, Arc::clone(&wallet.store))?;
    let runtime = FhevmRuntime::new(factory);
    let instance = runtime
        .instance_for_wallet(&wallet.session.snapshot(), &config.networks)
        .await?
        .with_context(|| format!("wallet on '{}' reported no chain", wallet.network.name))?;
    Ok(instance)
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub(crate) async fn run_public_key(
    config: &RuntimeConfig,
    chain_id: u64,
    refresh: bool,
) -> anyhow::Result<()> {
    let client = reqwest::Client::builder()
        .timeout(config.fhevm.http_timeout)
        .build()?;
    let fetcher = PublicKeyFetcher::new(client, open_store(config)?, config.networks.public_key_urls())
        .with_ttl(config.fhevm.public_key_cache_ttl);
    if refresh {
        fetcher.invalidate(chain_id);
    }
    let public_key = fetcher.fetch(chain_id).await?;
    println!("{public_key}");
    Ok(())
}

pub(crate) async fn run_encrypt(config: &RuntimeConfig, args: &EncryptArgs) -> anyhow::Result<()> {
    let values = args
        .values
        .iter()
        .map(|raw| parse_value_arg(raw))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let wallet = connect_local_wallet(config, &args.wallet).await?;
    let user = wallet.session.account().context("wallet has no account")?;
    let instance = wallet_instance(config, &wallet).await?;

    let inputs: Vec<EncryptedData> = if args.independent {
        encrypt_independently(&instance, &args.contract, &user, &values).await?
    } else {
        let mut builder = instance.create_encrypted_input(&args.contract, &user)?;
        for value in &values {
            builder.add(value.clone());
        }
        vec![builder.encrypt().await?]
    };

    if !args.reveal {
        return print_json(&inputs);
    }

    let pairs: Vec<HandleContractPair> = inputs
        .iter()
        .flat_map(|input| input.handles.iter())
        .map(|handle| HandleContractPair::new(handle.to_hex(), args.contract.clone()))
        .collect();
    let manager = DecryptionSessionManager::new(instance, Arc::new(wallet.session.signer()));
    let revealed = manager.decrypt(&pairs).await?;
    print_json(&json!({ "inputs": inputs, "revealed": revealed }))
}

pub(crate) async fn run_decrypt(config: &RuntimeConfig, args: &DecryptArgs) -> anyhow::Result<()> {
    let wallet = connect_local_wallet(config, &args.wallet).await?;
    let instance = wallet_instance(config, &wallet).await?;

    let pairs: Vec<HandleContractPair> = args
        .handles
        .iter()
        .map(|handle| HandleContractPair::new(handle.clone(), args.contract.clone()))
        .collect();
    let manager = DecryptionSessionManager::new(instance, Arc::new(wallet.session.signer()));
    let revealed = manager.decrypt(&pairs).await?;
    print_json(&revealed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_args_carry_their_type() {
        assert_eq!(parse_value_arg("u32:1500").unwrap(), FheValue::U32(1500));
        assert_eq!(parse_value_arg("euint8:2").unwrap(), FheValue::U8(2));
        assert_eq!(parse_value_arg("bool:true").unwrap(), FheValue::Bool(true));
        assert_eq!(
            parse_value_arg("address:0x00000000000000000000000000000000000000AA").unwrap(),
            FheValue::Address("0x00000000000000000000000000000000000000aa".to_string())
        );
    }

    #[test]
    fn malformed_value_args_are_rejected() {
        assert!(parse_value_arg("1500").is_err());
        assert!(parse_value_arg("u8:300").is_err());
        assert!(parse_value_arg("u128:1").is_err());
    }
}
