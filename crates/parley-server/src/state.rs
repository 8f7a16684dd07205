use std::sync::Arc;
use std::time::Duration;

use parley_config::ServerConfig;
use tracing::{info, warn};

use crate::auth::PBKDF2_ITERATIONS;
use crate::error::{ServerError, ServerResult};
use crate::kv::{KvStore, MemoryKv};

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(120);

/// Shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub kv: Arc<dyn KvStore>,
    pub http: reqwest::Client,
    /// Bearer key for the upstream completion API
    pub api_key: Option<String>,
    pub password_iterations: u32,
}

impl AppState {
    pub fn new(config: ServerConfig, kv: Arc<dyn KvStore>) -> ServerResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .build()
            .map_err(|e| ServerError::NotConfigured(format!("HTTP client: {}", e)))?;
        let api_key = config.api_key();
        if api_key.is_none() {
            warn!(
                "{} is not set, completion requests will be rejected",
                config.api_key_env
            );
        }

        Ok(Self {
            config,
            kv,
            http,
            api_key,
            password_iterations: PBKDF2_ITERATIONS,
        })
    }

    /// State over the configured snapshot file, or purely in memory when
    /// `data_path` is unset
    pub async fn open(config: ServerConfig) -> ServerResult<Self> {
        let kv: Arc<dyn KvStore> = match config.data_path.as_deref() {
            Some(raw) => {
                let path = parley_config::expand_tilde(raw).ok_or_else(|| {
                    ServerError::NotConfigured(format!("Invalid data path: {}", raw))
                })?;
                info!("Persisting server state to {:?}", path);
                Arc::new(MemoryKv::open(path).await?)
            }
            None => {
                info!("Server state is in memory only");
                Arc::new(MemoryKv::new())
            }
        };
        Self::new(config, kv)
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_password_iterations(mut self, iterations: u32) -> Self {
        self.password_iterations = iterations;
        self
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.config.session_ttl_secs)
    }

    /// Origin echoed in CORS headers: the request origin when listed,
    /// otherwise the first configured one
    pub fn allow_origin(&self, origin: Option<&str>) -> Option<&str> {
        let origins = &self.config.allowed_origins;
        origin
            .and_then(|o| origins.iter().find(|allowed| allowed.as_str() == o))
            .or_else(|| origins.first())
            .map(String::as_str)
    }

    pub fn is_preallowed(&self, username: &str) -> bool {
        self.config
            .allowed_users
            .iter()
            .any(|u| u.trim().eq_ignore_ascii_case(username))
    }
}
