//! Bootstrap helpers for the wallet runtime.
//!
//! Env vars that must be known before any config file is read live in
//! `~/.fhevm-wallet/.env` (standard dotenvy format).

use std::path::{Path, PathBuf};

/// Base directory for all persisted runtime state: `~/.fhevm-wallet`.
pub fn app_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".fhevm-wallet")
}

/// Path to the runtime-specific `.env` file: `~/.fhevm-wallet/.env`.
pub fn app_env_path() -> PathBuf {
    app_dir().join(".env")
}

/// Load env vars from `~/.fhevm-wallet/.env`.
///
/// Call this **after** `dotenvy::dotenv()` so that `./.env` wins. dotenvy
/// never overwrites existing vars, so the effective priority is:
///
///   explicit env vars > `./.env` > `~/.fhevm-wallet/.env`
pub fn load_app_env() {
    let path = app_env_path();
    if path.exists()
        && let Err(e) = dotenvy::from_path(&path)
    {
        tracing::warn!("Failed to load {}: {}", path.display(), e);
    }
}

/// Write `vars` as a dotenv file at `path`, creating parent directories.
///
/// Values are double-quoted so `#` and other shell-special characters
/// survive dotenvy parsing.
pub fn save_env_file(path: &Path, vars: &[(&str, &str)]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut content = String::new();
    for (key, value) in vars {
        // Escape so a value cannot close its quotes and inject another var.
        let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
        content.push_str(&format!("{}=\"{}\"\n", key, escaped));
    }
    std::fs::write(path, content)
}
