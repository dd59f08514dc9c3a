use clap::Parser;
use tracing_subscriber::EnvFilter;

use fhevm_wallet_runtime::bootstrap;
use fhevm_wallet_runtime::cli::{self, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    bootstrap::load_app_env();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "fhevm_wallet_runtime=info".into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if std::env::var("FHEVM_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }

    cli::run(Cli::parse()).await
}
