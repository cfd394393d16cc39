//! swarm-watchdog - heartbeat supervisor for swarm-server
//!
//! Entry point for the watchdog binary. Deliberately synchronous: the whole
//! job is one poll per second.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use swarm_server::config::FilesConfig;
use swarm_server::watchdog::{SpawnedChild, Watchdog, WatchdogConfig};

/// Command-line arguments for swarm-watchdog
#[derive(Parser, Debug)]
#[command(name = "swarm-watchdog")]
#[command(version, about = "Heartbeat supervisor for swarm-server", long_about = None)]
pub struct Args {
    /// Daemon executable to supervise
    #[arg(long, default_value = "swarm-server")]
    pub exe: PathBuf,

    /// Heartbeat file the daemon stamps
    #[arg(long, env = "SWARM_HEARTBEAT_FILE")]
    pub heartbeat: Option<PathBuf>,

    /// Presence of this file makes the watchdog exit
    #[arg(long, alias = "stopFile")]
    pub stop_file: Option<PathBuf>,

    /// Milliseconds between polls
    #[arg(long, default_value = "1000")]
    pub interval: u64,

    /// Heartbeat older than this many milliseconds counts as stale
    #[arg(long, alias = "staleMs", default_value = "5000")]
    pub stale_ms: i64,

    /// Consecutive stale polls before a forced restart
    #[arg(long, default_value = "2")]
    pub retries: u32,

    /// Verbose logging (can be specified multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    // Default file locations mirror the daemon's.
    let files = FilesConfig::default();
    let config = WatchdogConfig {
        exe: args.exe,
        heartbeat_file: args.heartbeat.unwrap_or(files.heartbeat_file),
        stop_file: args
            .stop_file
            .unwrap_or_else(|| files.state_file.with_file_name("swarm_watchdog.stop")),
        poll_interval: Duration::from_millis(args.interval.max(1)),
        stale_after_ms: args.stale_ms,
        stale_retries: args.retries,
    };

    info!(
        exe = %config.exe.display(),
        heartbeat = %config.heartbeat_file.display(),
        interval_ms = config.poll_interval.as_millis() as u64,
        stale_ms = config.stale_after_ms,
        retries = config.stale_retries.max(1),
        "Watchdog starting"
    );

    let child = SpawnedChild::new(config.exe.clone());
    let mut watchdog = Watchdog::new(config, child);
    watchdog.run();

    info!("Watchdog exited");
    Ok(())
}

fn init_logging(args: &Args) {
    let log_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new(format!("swarm_server={log_level},warn"))
        });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .init();
}
