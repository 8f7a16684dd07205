use crate::config::{Config, ConfigError, ConfigResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Ten years
const MAX_SESSION_TTL_SECS: u64 = 10 * 365 * 24 * 3600;

static ENV_VAR: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").ok());

/// Shared, persisted configuration
#[derive(Clone)]
pub struct ConfigManager {
    path: PathBuf,
    config: Arc<RwLock<Config>>,
}

impl ConfigManager {
    /// Load a config file, writing the defaults when it does not exist yet
    pub async fn load(path: &Path) -> ConfigResult<Self> {
        let config = if path.exists() {
            info!("Loading config from {:?}", path);
            let content = tokio::fs::read_to_string(path).await?;
            let content = Self::expand_env_vars(&content)?;
            let config: Config = serde_json::from_str(&content)?;
            Self::validate(&config)?;
            config
        } else {
            info!("Config file not found, creating default config at {:?}", path);
            let default_config = Config::default();
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let content = serde_json::to_string_pretty(&default_config)?;
            tokio::fs::write(path, &content).await?;
            default_config
        };

        Ok(Self {
            path: path.to_path_buf(),
            config: Arc::new(RwLock::new(config)),
        })
    }

    /// Load from `~/.parley/config.json`
    pub async fn load_default() -> ConfigResult<Self> {
        let config_path = Self::default_config_path()?;
        Self::load(&config_path).await
    }

    pub fn default_config_path() -> ConfigResult<PathBuf> {
        crate::default_config_path()
            .ok_or_else(|| ConfigError::InvalidPath("Could not find home directory".to_string()))
    }

    /// In-memory manager over an explicit config
    pub fn new(config: Config, path: PathBuf) -> Self {
        Self {
            path,
            config: Arc::new(RwLock::new(config)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> Arc<RwLock<Config>> {
        Arc::clone(&self.config)
    }

    /// Owned copy of the current config
    pub async fn snapshot(&self) -> Config {
        self.config.read().await.clone()
    }

    pub async fn save(&self) -> ConfigResult<()> {
        let config = self.config.read().await;
        let content = serde_json::to_string_pretty(&*config)?;
        drop(config);

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(&self.path, content).await?;
        info!("Config saved to {:?}", self.path);
        Ok(())
    }

    pub async fn reload(&self) -> ConfigResult<()> {
        if !self.path.exists() {
            return Err(ConfigError::InvalidPath(format!(
                "Config file not found: {:?}",
                self.path
            )));
        }

        let content = tokio::fs::read_to_string(&self.path).await?;
        let content = Self::expand_env_vars(&content)?;
        let new_config: Config = serde_json::from_str(&content)?;
        Self::validate(&new_config)?;

        *self.config.write().await = new_config;
        info!("Config reloaded from {:?}", self.path);
        Ok(())
    }

    /// Mutate, validate and persist. The in-memory config is left untouched
    /// when validation fails.
    pub async fn update<F>(&self, f: F) -> ConfigResult<()>
    where
        F: FnOnce(&mut Config) -> ConfigResult<()>,
    {
        let mut config = self.config.write().await;
        let mut next = config.clone();
        f(&mut next)?;
        Self::validate(&next)?;
        *config = next;
        drop(config);
        self.save().await
    }

    pub fn validate(config: &Config) -> ConfigResult<()> {
        if config.server.port == 0 {
            return Err(ConfigError::Validation(
                "Server port cannot be 0".to_string(),
            ));
        }

        if config.client.sync_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "client.sync_interval_secs must be greater than 0".to_string(),
            ));
        }

        if config.client.request_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "client.request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if !config.client.server_url.starts_with("http://")
            && !config.client.server_url.starts_with("https://")
        {
            return Err(ConfigError::Validation(format!(
                "client.server_url must be an http(s) URL: {}",
                config.client.server_url
            )));
        }

        if config.server.allowed_origins.is_empty() {
            return Err(ConfigError::Validation(
                "server.allowed_origins must list at least one origin".to_string(),
            ));
        }

        if config.server.session_ttl_secs == 0 {
            return Err(ConfigError::Validation(
                "server.session_ttl_secs must be greater than 0".to_string(),
            ));
        }

        if config.server.session_ttl_secs > MAX_SESSION_TTL_SECS {
            return Err(ConfigError::Validation(format!(
                "server.session_ttl_secs must be at most {}",
                MAX_SESSION_TTL_SECS
            )));
        }

        Ok(())
    }

    /// Expand `${VAR}` and `${VAR:-default}`
    fn expand_env_vars(content: &str) -> ConfigResult<String> {
        let Some(re) = ENV_VAR.as_ref() else {
            return Ok(content.to_string());
        };
        let mut result = content.to_string();

        for cap in re.captures_iter(content) {
            let (Some(full), Some(expr)) = (cap.get(0), cap.get(1)) else {
                continue;
            };
            let var_expr = expr.as_str();

            let (var_name, default_value) = match var_expr.split_once(":-") {
                Some((name, default)) => (name, Some(default)),
                None => (var_expr, None),
            };

            let replacement = match std::env::var(var_name) {
                Ok(val) => val,
                Err(_) => match default_value {
                    Some(default) => default.to_string(),
                    None => return Err(ConfigError::EnvVarNotFound(var_name.to_string())),
                },
            };

            debug!("Expanded config variable {}", var_name);
            result = result.replace(full.as_str(), &replacement);
        }

        Ok(result)
    }
}
