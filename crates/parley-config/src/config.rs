use serde::{Deserialize, Serialize};

/// Top-level configuration shared by the client, the CLI and the edge proxy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            client: ClientConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Read a value by dotted key, e.g. `client.server_url`
    pub fn get_value(&self, key: &str) -> Option<String> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            ["version"] => Some(self.version.clone()),
            ["client", "server_url"] => Some(self.client.server_url.clone()),
            ["client", "model"] => Some(self.client.model.clone()),
            ["client", "data_dir"] => self.client.data_dir.clone(),
            ["client", "sync_interval_secs"] => Some(self.client.sync_interval_secs.to_string()),
            ["client", "request_timeout_secs"] => {
                Some(self.client.request_timeout_secs.to_string())
            }
            ["server", "host"] => Some(self.server.host.clone()),
            ["server", "port"] => Some(self.server.port.to_string()),
            ["server", "allowed_origins"] => Some(self.server.allowed_origins.join(",")),
            ["server", "allowed_users"] => Some(self.server.allowed_users.join(",")),
            ["server", "upstream_url"] => Some(self.server.upstream_url.clone()),
            ["server", "api_key_env"] => Some(self.server.api_key_env.clone()),
            ["server", "daily_token_limit"] => Some(self.server.daily_token_limit.to_string()),
            ["server", "session_ttl_secs"] => Some(self.server.session_ttl_secs.to_string()),
            ["server", "data_path"] => self.server.data_path.clone(),
            ["logging", "level"] => Some(self.logging.level.to_string()),
            ["logging", "json"] => Some(self.logging.json.to_string()),
            ["logging", "file"] => self.logging.file.clone(),
            _ => None,
        }
    }

    /// Set a value by dotted key. List values are comma separated.
    pub fn set_value(&mut self, key: &str, value: &str) -> ConfigResult<()> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            ["client", "server_url"] => self.client.server_url = value.to_string(),
            ["client", "model"] => self.client.model = value.to_string(),
            ["client", "data_dir"] => self.client.data_dir = Some(value.to_string()),
            ["client", "sync_interval_secs"] => {
                self.client.sync_interval_secs = parse_number(value)?;
            }
            ["client", "request_timeout_secs"] => {
                self.client.request_timeout_secs = parse_number(value)?;
            }
            ["server", "host"] => self.server.host = value.to_string(),
            ["server", "port"] => {
                self.server.port = value.parse().map_err(|_| {
                    ConfigError::Validation(format!("Invalid port number: {}", value))
                })?;
            }
            ["server", "allowed_origins"] => self.server.allowed_origins = split_list(value),
            ["server", "allowed_users"] => self.server.allowed_users = split_list(value),
            ["server", "upstream_url"] => self.server.upstream_url = value.to_string(),
            ["server", "api_key_env"] => self.server.api_key_env = value.to_string(),
            ["server", "daily_token_limit"] => {
                self.server.daily_token_limit = parse_number(value)?;
            }
            ["server", "session_ttl_secs"] => {
                self.server.session_ttl_secs = parse_number(value)?;
            }
            ["server", "data_path"] => self.server.data_path = Some(value.to_string()),
            ["logging", "level"] => self.logging.level = value.parse()?,
            ["logging", "json"] => {
                self.logging.json = value.parse().map_err(|_| {
                    ConfigError::Validation(format!("Invalid boolean: {}", value))
                })?;
            }
            ["logging", "file"] => self.logging.file = Some(value.to_string()),
            _ => return Err(ConfigError::KeyNotFound(key.to_string())),
        }
        Ok(())
    }
}

fn parse_number(value: &str) -> ConfigResult<u64> {
    value
        .parse()
        .map_err(|_| ConfigError::Validation(format!("Invalid number: {}", value)))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// Base URL of the edge proxy
    pub server_url: String,
    /// Model name sent with completion requests
    pub model: String,
    /// Directory for the local conversation store and credentials
    pub data_dir: Option<String>,
    /// Background sync period while signed in and visible
    pub sync_interval_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8787".to_string(),
            model: "gpt-5".to_string(),
            data_dir: Some("~/.parley/data".to_string()),
            sync_interval_secs: 30,
            request_timeout_secs: 120,
        }
    }
}

/// Edge proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// CORS origins; the first entry is the fallback for unknown origins
    pub allowed_origins: Vec<String>,
    /// Usernames allowed to register without an admin grant
    pub allowed_users: Vec<String>,
    /// Shared secret for `POST /admin/allow-user`; disabled when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_code: Option<String>,
    /// Chat completions endpoint requests are forwarded to
    pub upstream_url: String,
    /// Environment variable holding the upstream API key
    pub api_key_env: String,
    /// Tokens per UTC day across all users
    pub daily_token_limit: u64,
    pub session_ttl_secs: u64,
    /// JSON snapshot of the key-value store; in-memory only when unset
    pub data_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
            allowed_origins: vec![
                "http://127.0.0.1:5500".to_string(),
                "http://localhost:5500".to_string(),
                "http://localhost".to_string(),
                "http://127.0.0.1".to_string(),
            ],
            allowed_users: Vec::new(),
            admin_code: None,
            upstream_url: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            daily_token_limit: 100_000,
            session_ttl_secs: 30 * 24 * 3600,
            data_path: Some("~/.parley/server.json".to_string()),
        }
    }
}

impl ServerConfig {
    /// Upstream API key from the configured environment variable
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
    }
}

/// Log level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(ConfigError::Validation(format!("Invalid log level: {}", s))),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    pub level: LogLevel,
    /// Emit JSON lines instead of human-readable text
    #[serde(default)]
    pub json: bool,
    /// Daily-rolling log file; stderr only when unset
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json: false,
            file: None,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
