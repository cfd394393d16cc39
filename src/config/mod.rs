//! Configuration management
//!
//! Handles loading, validation, and merging of configuration from:
//! - TOML files
//! - Environment variables (via CLI)
//! - CLI arguments

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// IPC socket configuration
    #[serde(default)]
    pub ipc: IpcConfig,
    /// On-disk file locations
    #[serde(default)]
    pub files: FilesConfig,
    /// Simulation tick configuration
    #[serde(default)]
    pub tick: TickConfig,
    /// Script cursor configuration
    #[serde(default)]
    pub script: ScriptConfig,
}

/// IPC socket configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcConfig {
    /// Unix socket clients send commands to
    pub command_socket: PathBuf,
    /// Unix socket the single event subscriber reads from
    pub event_socket: PathBuf,
    /// Inbound listener pool size; worst-case concurrent clients
    pub listeners: usize,
}

/// On-disk file locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    /// Registry snapshot written by `save`, replayed by `load`
    pub state_file: PathBuf,
    /// Newline-delimited command file, hot-reloaded on mtime change
    pub command_file: PathBuf,
    /// Heartbeat file polled by swarm-watchdog
    pub heartbeat_file: PathBuf,
}

/// Simulation tick configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickConfig {
    /// Behavior update rate; best-effort, not a real-time guarantee
    pub rate_hz: u32,
}

/// Script cursor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptConfig {
    /// Interpreter launched for script cursors. Empty string executes the
    /// script path directly. Replaceable at runtime via `config/setAhk`.
    pub runner: String,
    /// Directory the per-cursor bridge sockets are created in
    pub socket_dir: PathBuf,
}

fn base_dir() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("swarm")
}

impl Default for IpcConfig {
    fn default() -> Self {
        let base = base_dir();
        Self {
            command_socket: base.join("swarm.sock"),
            event_socket: base.join("swarm-events.sock"),
            listeners: 8,
        }
    }
}

impl Default for FilesConfig {
    fn default() -> Self {
        let base = base_dir();
        Self {
            state_file: base.join("swarm_state.jsonl"),
            command_file: base.join("swarm_config.jsonl"),
            heartbeat_file: base.join("swarm_heartbeat.txt"),
        }
    }
}

impl Default for TickConfig {
    fn default() -> Self {
        Self { rate_hz: 60 }
    }
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            runner: String::new(),
            socket_dir: base_dir(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Create default configuration
    pub fn default_config() -> Result<Self> {
        let config = Config {
            ipc: IpcConfig::default(),
            files: FilesConfig::default(),
            tick: TickConfig::default(),
            script: ScriptConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.ipc.listeners == 0 {
            anyhow::bail!("ipc.listeners must be at least 1");
        }
        if self.ipc.command_socket == self.ipc.event_socket {
            anyhow::bail!("command and event sockets must differ");
        }
        if self.tick.rate_hz == 0 || self.tick.rate_hz > 240 {
            anyhow::bail!("tick.rate_hz must be in 1..=240, got {}", self.tick.rate_hz);
        }
        Ok(())
    }

    /// Override config with CLI arguments
    pub fn with_overrides(
        mut self,
        command_socket: Option<PathBuf>,
        event_socket: Option<PathBuf>,
    ) -> Self {
        if let Some(path) = command_socket {
            self.ipc.command_socket = path;
        }
        if let Some(path) = event_socket {
            self.ipc.event_socket = path;
        }
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ipc: IpcConfig::default(),
            files: FilesConfig::default(),
            tick: TickConfig::default(),
            script: ScriptConfig::default(),
        }
    }
}
