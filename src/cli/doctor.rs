//! `fhevm-wallet doctor` - endpoint and local state diagnostics.
//!
//! Each check reports pass/fail with the detail needed to fix it.

use std::path::Path;
use std::time::Duration;

use serde_json::json;

use crate::config::{NetworkConfig, RuntimeConfig};
use crate::fhevm::mock::rpc::fetch_relayer_metadata;
use crate::rpc::{JsonRpcClient, parse_chain_id};
use crate::settings::Settings;
use crate::storage::{JsonFileStore, WalletStorage};

pub(crate) async fn run_doctor_command(
    config: &RuntimeConfig,
    config_path: Option<&Path>,
    strict: bool,
) -> anyhow::Result<()> {
    println!("fhevm-wallet doctor");
    println!("===================\n");

    let mut passed = 0u32;
    let mut failed = 0u32;

    check(
        "Config file",
        check_config_file(config_path),
        &mut passed,
        &mut failed,
    );
    check(
        "Storage",
        check_storage(&config.storage.path),
        &mut passed,
        &mut failed,
    );
    check(
        "Relayer",
        check_http_endpoint(
            "relayer",
            &format!("{}/v1/keyurl", config.fhevm.relayer_url.trim_end_matches('/')),
            config.fhevm.http_timeout,
        )
        .await,
        &mut passed,
        &mut failed,
    );

    for network in config.networks.iter() {
        check(
            &format!("{} RPC", network.name),
            check_rpc(network, config.fhevm.http_timeout).await,
            &mut passed,
            &mut failed,
        );
        let (label, result) = if network.is_mock {
            (
                format!("{} simulation metadata", network.name),
                check_relayer_metadata(network, config.fhevm.http_timeout).await,
            )
        } else {
            (
                format!("{} public key", network.name),
                match &network.public_key_url {
                    Some(url) => {
                        check_http_endpoint("public key", url, config.fhevm.http_timeout).await
                    }
                    None => CheckResult::Fail("no public_key_url configured".to_string()),
                },
            )
        };
        check(&label, result, &mut passed, &mut failed);
    }

    println!();
    println!("  {passed} passed, {failed} failed");

    if failed > 0 {
        println!("\n  Some checks failed. Networks you don't use can be removed from the config.");
        if strict {
            anyhow::bail!("doctor strict mode failed with {failed} check(s)");
        }
    }

    Ok(())
}

fn check(name: &str, result: CheckResult, passed: &mut u32, failed: &mut u32) {
    match result {
        CheckResult::Pass(detail) => {
            *passed += 1;
            println!("  [pass] {name}: {detail}");
        }
        CheckResult::Fail(detail) => {
            *failed += 1;
            println!("  [FAIL] {name}: {detail}");
        }
        CheckResult::Skip(reason) => {
            println!("  [skip] {name}: {reason}");
        }
    }
}

enum CheckResult {
    Pass(String),
    Fail(String),
    Skip(String),
}

fn check_config_file(explicit: Option<&Path>) -> CheckResult {
    let path = explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(Settings::default_toml_path);
    match Settings::load_toml(&path) {
        Ok(Some(settings)) => CheckResult::Pass(format!(
            "{} ({} network(s))",
            path.display(),
            settings.networks.len()
        )),
        Ok(None) => CheckResult::Skip(format!(
            "{} not found, using defaults",
            path.display()
        )),
        Err(e) => CheckResult::Fail(e),
    }
}

fn check_storage(path: &Path) -> CheckResult {
    match JsonFileStore::open(path) {
        Ok(store) => {
            let storage = WalletStorage::new(std::sync::Arc::new(store));
            let saved = match storage.last_connection() {
                Ok(connection) => connection
                    .active_connector()
                    .map(|rdns| format!("saved connection via {rdns}"))
                    .unwrap_or_else(|| "no saved connection".to_string()),
                Err(e) => return CheckResult::Fail(e.to_string()),
            };
            CheckResult::Pass(format!("{} ({saved})", path.display()))
        }
        Err(e) => CheckResult::Fail(e.to_string()),
    }
}

async fn check_rpc(network: &NetworkConfig, timeout: Duration) -> CheckResult {
    let Some(url) = network.rpc_url.as_deref() else {
        return CheckResult::Skip("no rpc_url configured".to_string());
    };
    let rpc = match JsonRpcClient::new(url, timeout) {
        Ok(rpc) => rpc,
        Err(e) => return CheckResult::Fail(format!("cannot construct RPC client: {e}")),
    };
    match rpc.call("eth_chainId", json!([])).await {
        Ok(value) => match parse_chain_id(&value) {
            Some(id) if id == network.chain_id => {
                CheckResult::Pass(format!("{} (chain {id})", redact_url_for_display(url)))
            }
            Some(id) => CheckResult::Fail(format!(
                "{} reports chain {id}, expected {}",
                redact_url_for_display(url),
                network.chain_id
            )),
            None => CheckResult::Fail(format!("unparseable eth_chainId result {value}")),
        },
        Err(e) => CheckResult::Fail(format!(
            "{} unreachable: {e}",
            redact_url_for_display(url)
        )),
    }
}

async fn check_relayer_metadata(network: &NetworkConfig, timeout: Duration) -> CheckResult {
    let Some(url) = network.rpc_url.as_deref() else {
        return CheckResult::Fail("simulation network without rpc_url".to_string());
    };
    let rpc = match JsonRpcClient::new(url, timeout) {
        Ok(rpc) => rpc,
        Err(e) => return CheckResult::Fail(format!("cannot construct RPC client: {e}")),
    };
    match fetch_relayer_metadata(&rpc).await {
        Ok(metadata) => CheckResult::Pass(format!("ACL at {}", metadata.acl_address)),
        Err(e) => CheckResult::Fail(e.to_string()),
    }
}

async fn check_http_endpoint(label: &str, endpoint: &str, timeout: Duration) -> CheckResult {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return CheckResult::Fail(format!("{label} endpoint is empty"));
    }

    let url = match reqwest::Url::parse(endpoint) {
        Ok(url) => url,
        Err(e) => {
            return CheckResult::Fail(format!(
                "{label} endpoint URL is invalid ({}): {e}",
                redact_url_for_display(endpoint)
            ));
        }
    };

    let client = match reqwest::Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(e) => return CheckResult::Fail(format!("cannot construct HTTP client: {e}")),
    };

    match client.head(url.clone()).send().await {
        Ok(response) => {
            let status = response.status();
            if status.is_server_error() || status == reqwest::StatusCode::NOT_FOUND {
                CheckResult::Fail(format!(
                    "{label} reachable but unavailable ({} at {})",
                    status,
                    redact_url_for_display(url.as_str())
                ))
            } else {
                CheckResult::Pass(format!(
                    "{} ({status})",
                    redact_url_for_display(url.as_str())
                ))
            }
        }
        Err(e) => CheckResult::Fail(format!(
            "{label} unreachable ({}): {e}",
            redact_url_for_display(url.as_str())
        )),
    }
}

fn redact_url_for_display(raw: &str) -> String {
    match reqwest::Url::parse(raw) {
        Ok(mut url) => {
            if !url.username().is_empty() {
                let _ = url.set_username("redacted");
            }
            if url.password().is_some() {
                let _ = url.set_password(Some("redacted"));
            }
            url.to_string()
        }
        Err(_) => "<invalid-url>".to_string(),
    }
}
