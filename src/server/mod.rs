//! Server orchestration
//!
//! Wires the long-lived tasks together around one [`Dispatcher`]: the inbound
//! command listener pool, the outbound event socket, the heartbeat writer,
//! the command-file hot-reload poll, and the simulation tick loop. Everything
//! stops through a single cancellation token, tripped by `exit` or Ctrl-C.

mod dispatch;
pub mod inbound;
pub mod outbound;

pub use dispatch::{Dispatcher, OverlayFlags};
pub use inbound::MAX_COMMAND_LINE;
pub use outbound::EventBroadcaster;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::input::Pointer;

/// Poll period for command-file hot reload.
const HOT_RELOAD_POLL: Duration = Duration::from_millis(750);

/// The daemon: owns the dispatcher and runs its task set to completion.
pub struct SwarmServer {
    dispatcher: Arc<Dispatcher>,
}

impl SwarmServer {
    /// Assemble a server from configuration and a pointer implementation.
    pub fn new(config: Arc<Config>, pointer: Arc<dyn Pointer>) -> Self {
        Self {
            dispatcher: Dispatcher::new(config, pointer, CancellationToken::new()),
        }
    }

    /// The application context, for tests and embedders.
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Token that stops the whole server when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.dispatcher.shutdown.clone()
    }

    /// Run until `exit`, Ctrl-C, or external cancellation, then tear down
    /// script bridges and wait for every task to stop.
    pub async fn run(&self) -> Result<()> {
        let d = &self.dispatcher;
        let cancel = d.shutdown.clone();
        let config = &d.config;

        info!(
            command = %config.ipc.command_socket.display(),
            events = %config.ipc.event_socket.display(),
            rate_hz = config.tick.rate_hz,
            "Swarm server starting"
        );

        // Restore the last saved swarm so cursors survive a watchdog-forced
        // restart. A missing state file is a fresh start, not an error.
        if config.files.state_file.exists() {
            match crate::state::load(d, &config.files.state_file).await {
                Ok(count) => info!(count, "State restored"),
                Err(e) => warn!("State restore failed: {e:#}"),
            }
        }

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(inbound::run_inbound(
            config.ipc.command_socket.clone(),
            Arc::clone(d),
            config.ipc.listeners,
            cancel.clone(),
        )));
        tasks.push(tokio::spawn(outbound::run_outbound(
            config.ipc.event_socket.clone(),
            d.events.clone(),
            cancel.clone(),
        )));
        tasks.push(tokio::spawn(crate::heartbeat::run_heartbeat(
            config.files.heartbeat_file.clone(),
            Arc::clone(&d.perf),
            Arc::clone(&d.registry),
            cancel.clone(),
        )));
        tasks.push(tokio::spawn(hot_reload_loop(
            Arc::clone(d),
            cancel.clone(),
        )));

        {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Ctrl-C received, shutting down");
                    cancel.cancel();
                }
            });
        }

        self.tick_loop().await;

        d.bridges.teardown_all().await;
        for task in tasks {
            let _ = task.await;
        }
        info!("Swarm server stopped");
        Ok(())
    }

    /// Fixed-rate simulation loop. Behavior math uses measured wall-clock dt,
    /// so a delayed tick slows nothing down, it just coarsens the motion.
    async fn tick_loop(&self) {
        let d = &self.dispatcher;
        let period = Duration::from_secs_f64(1.0 / f64::from(d.config.tick.rate_hz));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last = Instant::now();
        loop {
            tokio::select! {
                _ = d.shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            let now = Instant::now();
            let dt = (now - last).as_secs_f64();
            last = now;
            d.registry.update(dt, d.pointer.position());
            d.perf.record_frame(dt);
        }
    }
}

async fn hot_reload_loop(dispatcher: Arc<Dispatcher>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(HOT_RELOAD_POLL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        if let Err(e) = dispatcher
            .command_watcher
            .reload_if_changed(&dispatcher, false)
            .await
        {
            warn!("Command file reload failed: {e:#}");
        }
    }
}
