//! Gateway configuration loader.
//!
//! Reads `colloquy.toml` from the data directory (`~/.colloquy/` by default,
//! overridable with `COLLOQUY_DATA_DIR`) and deserializes it into
//! [`GatewayConfig`]. Falls back to defaults when the file is missing or
//! malformed, so a fresh install runs without any setup.

use std::path::{Path, PathBuf};

use colloquy_types::config::GatewayConfig;

/// Resolve the data directory: `COLLOQUY_DATA_DIR` if set, else `~/.colloquy`.
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("COLLOQUY_DATA_DIR") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".colloquy")
}

/// SQLite URL for the gateway database inside `data_dir`.
pub fn database_url(data_dir: &Path) -> String {
    format!("sqlite://{}/colloquy.db?mode=rwc", data_dir.display())
}

/// Load gateway configuration from `{data_dir}/colloquy.toml`.
///
/// - If the file does not exist, returns [`GatewayConfig::default()`].
/// - If the file exists but cannot be read or parsed, logs a warning and
///   returns the default.
pub async fn load_gateway_config(data_dir: &Path) -> GatewayConfig {
    let config_path = data_dir.join("colloquy.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(
                "No colloquy.toml found at {}, using defaults",
                config_path.display()
            );
            return GatewayConfig::default();
        }
        Err(err) => {
            tracing::warn!(
                "Failed to read {}: {err}, using defaults",
                config_path.display()
            );
            return GatewayConfig::default();
        }
    };

    match toml::from_str::<GatewayConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            GatewayConfig::default()
        }
    }
}
