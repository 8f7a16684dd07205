pub mod config;
pub mod manager;

pub use config::{
    ClientConfig, Config, ConfigError, ConfigResult, LogLevel, LoggingConfig, ServerConfig,
};
pub use manager::ConfigManager;

use std::path::PathBuf;

/// `~/.parley`
pub fn parley_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".parley"))
}

pub fn default_config_path() -> Option<PathBuf> {
    parley_dir().map(|dir| dir.join("config.json"))
}

/// Local conversation store and saved credentials
pub fn default_data_dir() -> Option<PathBuf> {
    parley_dir().map(|dir| dir.join("data"))
}

pub fn default_log_path() -> Option<PathBuf> {
    parley_dir().map(|dir| dir.join("logs").join("parley.log"))
}

pub async fn init_parley_dirs() -> ConfigResult<()> {
    if let Some(parley) = parley_dir() {
        tokio::fs::create_dir_all(&parley).await?;
        tokio::fs::create_dir_all(parley.join("data")).await?;
        tokio::fs::create_dir_all(parley.join("logs")).await?;
    }
    Ok(())
}

/// Expand a leading `~/` to the home directory
pub fn expand_tilde(path: &str) -> Option<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir().map(|home| home.join(rest)),
        None => Some(PathBuf::from(path)),
    }
}
