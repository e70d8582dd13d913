use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use telecode_channels::{TelegramChannel, WorkspaceDispatcher};
use telecode_core::executors::{BinaryLocator, PathLocator};
use telecode_core::{ExecutorRegistry, WorkspaceHandler};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::TelecodeConfig;

#[derive(Parser)]
#[command(name = "telecode")]
#[command(version)]
#[command(about = "Telegram bots that drive claude and opencode in your projects")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start one bot per configured workspace
    Start,

    /// Write an example config file
    Init {
        /// Where to write it (default: ~/.telecode/config.yml)
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Show current configuration with tokens masked
    Config,

    /// Check which assistant CLIs are installed and whether the config loads
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging; RUST_LOG wins unless --debug is given
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Init { path } => cmd_init(path).await,
        Commands::Config => cmd_config(&cli.config).await,
        Commands::Doctor => cmd_doctor(&cli.config).await,
        Commands::Start => cmd_start(&cli.config).await,
    }
}

async fn cmd_init(path: Option<PathBuf>) -> Result<()> {
    let config_path = path.unwrap_or_else(|| config::config_dir().join(config::CONFIG_FILE_NAME));

    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
        println!("Config already exists at {}; leaving it untouched.", config_path.display());
        return Ok(());
    }

    if let Some(parent) = config_path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create config dir: {}", parent.display()))?;
    }

    tokio::fs::write(&config_path, config::EXAMPLE_CONFIG)
        .await
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    // The loader refuses files readable by group or other
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&config_path, std::fs::Permissions::from_mode(0o600)).await?;
    }

    info!("Created example config at {}", config_path.display());
    println!("Example config created at {}", config_path.display());
    println!("Edit it to add your workspaces and bot tokens.");
    Ok(())
}

async fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let (cfg, path) = TelecodeConfig::load(config_path)?;
    println!("# {}", path.display());
    println!("{}", serde_yml::to_string(&cfg.masked())?);
    Ok(())
}

async fn cmd_doctor(config_path: &Option<PathBuf>) -> Result<()> {
    let registry = ExecutorRegistry::with_defaults();
    let locator = PathLocator;

    println!("Assistant CLIs:");
    for name in registry.names() {
        let Some(executor) = registry.get(&name) else {
            continue;
        };
        match locator.locate(executor.binary()) {
            Some(path) => println!("  {:<10} installed ({})", name, path.display()),
            None => println!("  {:<10} not installed", name),
        }
    }

    println!("\nConfiguration:");
    match TelecodeConfig::load(config_path) {
        Ok((cfg, path)) => {
            println!("  {} ({} workspace(s))", path.display(), cfg.workspaces.len());
            for ws in cfg.to_workspaces() {
                let dir_state = if ws.working_dir.is_dir() {
                    "ok"
                } else {
                    "missing"
                };
                let backend_state = match registry.get(&ws.default_backend) {
                    Some(executor) if locator.locate(executor.binary()).is_some() => "installed",
                    _ => "NOT installed",
                };
                println!(
                    "  - {}: dir {} ({}), default CLI {} ({}), {} allowed chat(s)",
                    ws.name,
                    ws.working_dir.display(),
                    dir_state,
                    ws.default_backend,
                    backend_state,
                    ws.allowed_chats.len()
                );
            }
        }
        Err(e) => println!("  {:#}", e),
    }
    Ok(())
}

async fn cmd_start(config_path: &Option<PathBuf>) -> Result<()> {
    let (cfg, path) = TelecodeConfig::load(config_path)?;
    info!("Loaded config from {}", path.display());
    info!("Starting telecode with {} workspace(s)...", cfg.workspaces.len());

    let registry = Arc::new(ExecutorRegistry::with_defaults());
    for name in registry.names() {
        if let Some(executor) = registry.get(&name)
            && PathLocator.locate(executor.binary()).is_none()
        {
            warn!("{} CLI not found on PATH; chats using it will fail", name);
        }
    }

    let mut dispatcher = WorkspaceDispatcher::new();
    for workspace in cfg.to_workspaces() {
        if !workspace.working_dir.is_dir() {
            warn!(
                "Workspace {} working_dir {} does not exist",
                workspace.name,
                workspace.working_dir.display()
            );
        }
        let channel = TelegramChannel::new(workspace.name.clone(), workspace.bot_token.clone())
            .with_context(|| format!("Failed to set up Telegram for workspace {}", workspace.name))?;
        let handler = WorkspaceHandler::new(workspace, registry.clone());
        dispatcher.register(Arc::new(handler), Arc::new(channel));
    }

    let cancel = CancellationToken::new();
    let mut run = tokio::spawn(dispatcher.run(cancel.clone()));

    println!("telecode is running. Press Ctrl+C to stop.");

    tokio::select! {
        res = shutdown_signal() => {
            res?;
            info!("Shutdown signal received, stopping workspaces...");
            cancel.cancel();
            match run.await {
                Ok(Err(e)) => error!("Dispatcher error: {:#}", e),
                Err(e) => error!("Dispatcher task failed: {}", e),
                Ok(Ok(())) => {}
            }
        }
        finished = &mut run => {
            // Every workspace stopped on its own (e.g. all tokens rejected)
            match finished {
                Ok(res) => res?,
                Err(e) => return Err(e).context("Dispatcher task failed"),
            }
            warn!("All workspaces stopped");
        }
    }

    println!("telecode stopped.");
    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on Unix
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?;
        tokio::select! {
            res = signal::ctrl_c() => res.context("Failed to listen for Ctrl+C")?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
    Ok(())
}
