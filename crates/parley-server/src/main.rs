use clap::Parser;
use parley_config::ConfigManager;
use parley_server::{run_server_with_shutdown, AppState};

#[derive(Parser, Debug, Clone)]
#[command(name = "parley-server")]
#[command(about = "Parley edge proxy")]
#[command(version)]
struct Cli {
    /// Listen host (overrides config)
    #[arg(long, env = "PARLEY_HOST")]
    host: Option<String>,

    /// Listen port (overrides config)
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// Upstream completion URL (overrides config)
    #[arg(long, env = "PARLEY_UPSTREAM_URL")]
    upstream_url: Option<String>,

    /// Shared secret for the allow-user endpoint (overrides config)
    #[arg(long, env = "ADMIN_CODE", hide_env_values = true)]
    admin_code: Option<String>,

    /// Tokens per UTC day (overrides config)
    #[arg(long, env = "DAILY_TOKEN_LIMIT")]
    daily_limit: Option<u64>,

    /// Keep state in memory only
    #[arg(long, default_value = "false")]
    ephemeral: bool,

    /// Log level (overrides config)
    #[arg(long)]
    log_level: Option<String>,

    /// Config file path
    #[arg(long, env = "PARLEY_CONFIG", default_value = "~/.parley/config.json")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = parley_config::expand_tilde(&cli.config)
        .unwrap_or_else(|| std::path::PathBuf::from(&cli.config));

    if let Err(e) = parley_config::init_parley_dirs().await {
        eprintln!("Warning: Failed to init parley directories: {}", e);
    }

    let manager = ConfigManager::load(&config_path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load config from {:?}: {}", config_path, e))?;
    let config = manager.snapshot().await;

    let mut logging = config.logging.clone();
    if let Some(level) = &cli.log_level {
        logging.level = level
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid log level {:?}: {}", level, e))?;
    }
    let _log_manager = parley_observability::init_logging(&logging)?;
    tracing::info!("Config loaded from {:?}", config_path);

    let mut server = config.server;
    if let Some(host) = cli.host {
        server.host = host;
    }
    if let Some(port) = cli.port {
        server.port = port;
    }
    if let Some(url) = cli.upstream_url {
        server.upstream_url = url;
    }
    if let Some(code) = cli.admin_code {
        server.admin_code = Some(code);
    }
    if let Some(limit) = cli.daily_limit {
        server.daily_token_limit = limit;
    }
    if cli.ephemeral {
        server.data_path = None;
    }

    let state = AppState::open(server).await?;
    run_server_with_shutdown(state, async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutdown requested");
    })
    .await
}
