use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use parley_client::{Attachment, Confirm, ParleyClient};
use parley_config::{Config, ConfigManager, LogLevel};

mod chat;
mod prompt;
mod render;

use prompt::{read_line, AssumeYes, StdinConfirm};

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Chat client with conversations synced across devices")]
#[command(version)]
struct Cli {
    /// Edge proxy URL (overrides config)
    #[arg(long, env = "PARLEY_SERVER_URL")]
    server_url: Option<String>,

    /// Model name sent with completions (overrides config)
    #[arg(long, env = "PARLEY_MODEL")]
    model: Option<String>,

    /// Enable debug logging
    #[arg(long, short, default_value = "false")]
    debug: bool,

    /// Config file path
    #[arg(long, env = "PARLEY_CONFIG", default_value = "~/.parley/config.json")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and sync
    Login(AuthArgs),
    /// Create an account (the username must be allow-listed) and sync
    Register(AuthArgs),
    /// Sign out; local conversations are kept
    Logout,
    /// Show the signed-in user
    Whoami,
    /// List conversations
    List,
    /// Start a new conversation
    New,
    /// Switch to a conversation by list number or id
    Use { selector: String },
    /// Delete the active conversation
    Delete {
        /// Do not ask for confirmation
        #[arg(long, short, default_value = "false")]
        yes: bool,
    },
    /// Print the active conversation
    Show,
    /// Send one message to the active conversation and print the reply
    Send {
        message: String,
        /// File to attach; images are inlined, text files quoted
        #[arg(long = "attach", short = 'a', visible_aliases = ["image", "file"])]
        attachments: Vec<PathBuf>,
    },
    /// Interactive chat with background sync
    Chat,
    /// Merge with the server now
    Sync,
    /// Write the active conversation as a text transcript
    Export {
        /// Directory to write into
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Configuration management
    Config(ConfigArgs),
}

#[derive(Args, Clone)]
struct AuthArgs {
    username: String,
    /// Read from the terminal when omitted
    #[arg(long, env = "PARLEY_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

#[derive(Args, Clone)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Read a value (e.g. client.server_url)
    Get { key: String },
    /// Set a value (e.g. client.model gpt-5)
    Set { key: String, value: String },
    /// Write the default config
    Init {
        /// Overwrite an existing config
        #[arg(long, default_value = "false")]
        force: bool,
    },
    /// Print the current config
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path =
        parley_config::expand_tilde(&cli.config).unwrap_or_else(|| PathBuf::from(&cli.config));

    if let Commands::Config(args) = &cli.command {
        return handle_config(args.clone(), &config_path).await;
    }

    let manager = ConfigManager::load(&config_path).await?;
    let mut config = manager.snapshot().await;
    if let Some(url) = cli.server_url {
        config.client.server_url = url;
    }
    if let Some(model) = cli.model {
        config.client.model = model;
    }

    let mut logging = config.logging.clone();
    logging.level = if cli.debug {
        LogLevel::Debug
    } else {
        LogLevel::Warn
    };
    let _log_manager = parley_observability::init_logging(&logging)?;
    tracing::debug!("Config loaded from {:?}", config_path);

    let confirm: Arc<dyn Confirm> = match &cli.command {
        Commands::Delete { yes: true } => Arc::new(AssumeYes),
        _ => Arc::new(StdinConfirm),
    };
    let client = ParleyClient::open(&config.client, confirm)?;
    client.start().await?;

    let result = run_command(&client, cli.command).await;
    client.shutdown().await;
    result
}

async fn run_command(client: &ParleyClient, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Login(args) => {
            let password = password_for(&args).await?;
            let session = client.session().login(&args.username, &password).await?;
            println!("{}", format!("Signed in as {}", session.username).green());
            sync_now(client).await;
        }
        Commands::Register(args) => {
            let password = password_for(&args).await?;
            let session = client.session().register(&args.username, &password).await?;
            println!("{}", format!("Registered {}", session.username).green());
            sync_now(client).await;
        }
        Commands::Logout => {
            client.session().logout().await?;
            println!("{}", "Signed out".green());
        }
        Commands::Whoami => match client.session().current_session() {
            Some(session) => println!("{}", session.username),
            None => println!("{}", "Not signed in".yellow()),
        },
        Commands::List => {
            let state = client.controller().state().await?;
            for row in render::conversation_rows(&state) {
                println!("{}", row);
            }
        }
        Commands::New => {
            let conv = client.controller().create_conversation().await?;
            println!("{}", format!("Started {}", conv.id).green());
        }
        Commands::Use { selector } => {
            let state = client.controller().state().await?;
            let id = render::resolve_selector(&state, &selector)
                .ok_or_else(|| anyhow::anyhow!("No conversation {}", selector))?;
            client.controller().select_conversation(&id).await?;
            println!("{}", format!("Switched to {}", id).green());
        }
        Commands::Delete { .. } => match client.controller().delete_conversation().await? {
            Some(id) => println!("{}", format!("Deleted {}", id).green()),
            None => println!("{}", "Kept".dimmed()),
        },
        Commands::Show => {
            if let Some(active) = client.controller().active().await? {
                render::print_conversation(&active);
            }
        }
        Commands::Send {
            message,
            attachments,
        } => {
            let mut loaded = Vec::with_capacity(attachments.len());
            for path in &attachments {
                let attachment = Attachment::from_path(path)
                    .await
                    .map_err(|e| anyhow::anyhow!("Cannot attach {}: {}", path.display(), e))?;
                loaded.push(attachment);
            }
            let outcome = chat::send_interruptible(client, &message, loaded).await?;
            chat::report_send(Ok(outcome));
        }
        Commands::Chat => chat::run(client).await?,
        Commands::Sync => match client.sync().server_sync_merge().await?.done() {
            Some(report) => println!("{}", render::merge_summary(&report).green()),
            None => println!("{}", "Not signed in".yellow()),
        },
        Commands::Export { output } => match export_active(client, output.as_deref()).await? {
            Some(path) => println!("{}", format!("Wrote {}", path.display()).green()),
            None => println!("{}", "Nothing to export".yellow()),
        },
        Commands::Config(_) => unreachable!("handled before the client is opened"),
    }
    Ok(())
}

async fn password_for(args: &AuthArgs) -> anyhow::Result<String> {
    if let Some(password) = &args.password {
        return Ok(password.clone());
    }
    read_line("Password: ".to_string())
        .await?
        .ok_or_else(|| anyhow::anyhow!("No password given"))
}

/// Merge right after signing in; failures only warn
async fn sync_now(client: &ParleyClient) {
    match client.sync().server_sync_merge().await {
        Ok(outcome) => {
            if let Some(report) = outcome.done() {
                println!("{}", render::merge_summary(&report).dimmed());
            }
        }
        Err(e) => println!("{}", format!("Sync failed: {}", e).yellow()),
    }
}

/// Write the active conversation's transcript into `dir` (the working
/// directory by default)
pub(crate) async fn export_active(
    client: &ParleyClient,
    dir: Option<&Path>,
) -> anyhow::Result<Option<PathBuf>> {
    let Some(transcript) = client.controller().export_transcript().await? else {
        return Ok(None);
    };
    let dir = dir.unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(&transcript.file_name);
    tokio::fs::write(&path, transcript.body).await?;
    Ok(Some(path))
}

async fn handle_config(args: ConfigArgs, config_path: &Path) -> anyhow::Result<()> {
    match args.command {
        ConfigCommands::Get { key } => {
            let manager = ConfigManager::load(config_path).await?;
            let config = manager.snapshot().await;
            match config.get_value(&key) {
                Some(value) => println!("{}", format!("{} = {}", key, value).green()),
                None => anyhow::bail!("Key not found: {}", key),
            }
        }
        ConfigCommands::Set { key, value } => {
            let manager = ConfigManager::load(config_path).await?;
            manager.update(|config| config.set_value(&key, &value)).await?;
            println!("{}", format!("Set {} = {}", key, value).green());
        }
        ConfigCommands::Init { force } => {
            if config_path.exists() && !force {
                println!(
                    "{}",
                    format!("Config already exists at {:?}", config_path).yellow()
                );
                println!("{}", "Use --force to overwrite".dimmed());
                return Ok(());
            }
            parley_config::init_parley_dirs().await?;
            let manager = ConfigManager::new(Config::default(), config_path.to_path_buf());
            manager.save().await?;
            println!(
                "{}",
                format!("Config initialized at {:?}", config_path).green()
            );
        }
        ConfigCommands::Show => {
            let manager = ConfigManager::load(config_path).await?;
            let config = manager.snapshot().await;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }
    Ok(())
}
