//! swarm-server - Swarm cursor overlay daemon
//!
//! Entry point for the daemon binary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use swarm_server::config::Config;
use swarm_server::input::VirtualPointer;
use swarm_server::server::SwarmServer;

/// Command-line arguments for swarm-server
#[derive(Parser, Debug)]
#[command(name = "swarm-server")]
#[command(version, about = "Swarm cursor overlay daemon", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/swarm-server/config.toml")]
    pub config: String,

    /// Command socket path
    #[arg(long, env = "SWARM_COMMAND_SOCKET")]
    pub command_socket: Option<PathBuf>,

    /// Event socket path
    #[arg(long, env = "SWARM_EVENT_SOCKET")]
    pub event_socket: Option<PathBuf>,

    /// Verbose logging (can be specified multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log format (json|pretty|compact)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,

    /// Write logs to file (in addition to stdout)
    #[arg(long)]
    pub log_file: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args)?;

    info!("════════════════════════════════════════════════════════");
    info!("  swarm-server v{}", env!("CARGO_PKG_VERSION"));
    info!("  Profile: {}", if cfg!(debug_assertions) { "debug" } else { "release" });
    info!("════════════════════════════════════════════════════════");

    // Load configuration
    let config = Config::load(&args.config).or_else(|e| {
        tracing::warn!("Failed to load config: {}, using defaults", e);
        Config::default_config()
    })?;

    // Override config with CLI args
    let config = config.with_overrides(args.command_socket.clone(), args.event_socket.clone());
    config.validate()?;

    info!("Configuration loaded successfully");
    tracing::debug!("Config: {:?}", config);

    let server = SwarmServer::new(Arc::new(config), Arc::new(VirtualPointer::new()));

    info!("Starting swarm server");
    server.run().await?;

    info!("Swarm server shut down");
    Ok(())
}

fn init_logging(args: &Args) -> Result<()> {
    use std::fs::File;

    let log_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new(format!("swarm_server={log_level},warn"))
        });

    // If log file is specified, write to both stdout and file
    if let Some(log_file_path) = &args.log_file {
        let file = File::create(log_file_path)?;

        match args.log_format.as_str() {
            "json" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(
                        tracing_subscriber::fmt::layer()
                            .json()
                            .with_writer(std::io::stdout),
                    )
                    .with(
                        tracing_subscriber::fmt::layer()
                            .json()
                            .with_writer(file)
                            .with_ansi(false),
                    )
                    .init();
            }
            "compact" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(
                        tracing_subscriber::fmt::layer()
                            .compact()
                            .with_writer(std::io::stdout),
                    )
                    .with(
                        tracing_subscriber::fmt::layer()
                            .compact()
                            .with_writer(file)
                            .with_ansi(false),
                    )
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(
                        tracing_subscriber::fmt::layer()
                            .pretty()
                            .with_writer(std::io::stdout),
                    )
                    .with(
                        tracing_subscriber::fmt::layer()
                            .with_writer(file)
                            .with_ansi(false),
                    )
                    .init();
            }
        }
        info!("Logging to file: {}", log_file_path);
    } else {
        // Stdout only
        match args.log_format.as_str() {
            "json" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().json())
                    .init();
            }
            "compact" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().compact())
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().pretty())
                    .init();
            }
        }
    }

    Ok(())
}
