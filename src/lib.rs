//! # swarm-server
//!
//! Swarm cursor overlay daemon: a live, mutable collection of animated
//! virtual cursors exposed to external controllers over Unix-socket IPC,
//! supervised by a heartbeat watchdog.
//!
//! # Architecture
//!
//! ```text
//! swarm-server
//!   ├─> Inbound Command Server (listener pool, line-delimited commands)
//!   ├─> Command Dispatcher (typed operations → registry/bridge mutations)
//!   ├─> Cursor Registry (behavior simulation, ~60 Hz tick)
//!   ├─> Script Bridges (per-cursor socket + external script process)
//!   ├─> Outbound Event Broadcaster (single subscriber, JSON lines)
//!   ├─> State/Config Persistence (snapshot replay, hot reload)
//!   └─> Heartbeat Writer (liveness file for swarm-watchdog)
//! ```
//!
//! # Data Flow
//!
//! **Command Path:** Client → Inbound Server → Protocol → Dispatcher → Registry
//!
//! **Event Path:** Dispatcher → Event Broadcaster → Subscriber
//!
//! **Supervision Path:** Heartbeat file → swarm-watchdog → process restart
//!
//! The watchdog (`swarm-watchdog` binary) shares no memory with the daemon;
//! it observes only the heartbeat file and the child process exit status.

#![warn(clippy::all)]

/// Server configuration (TOML file + CLI overrides)
pub mod config;

/// Cursor registry and behavior simulation
pub mod registry;

/// Command/event wire protocol (line-delimited JSON)
pub mod protocol;

/// IPC servers and command dispatch
pub mod server;

/// Per-cursor script process bridges
pub mod script;

/// State snapshot persistence and command-file hot reload
pub mod state;

/// Heartbeat file writer
pub mod heartbeat;

/// Pointer seam between the simulation and the platform input layer
pub mod input;

/// Frame-time and command-rate metrics
pub mod perf;

/// Watchdog supervisor state machine
pub mod watchdog;
