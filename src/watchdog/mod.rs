//! Heartbeat watchdog
//!
//! Supervises the swarm daemon from outside its process: polls the heartbeat
//! file, relaunches the daemon when its process dies, and force-restarts it
//! when the heartbeat goes stale for enough consecutive polls. A stop file
//! makes the watchdog exit without touching the daemon, so an operator can
//! take the daemon down on purpose.
//!
//! The decision step is a pure function of (stop file, child liveness,
//! heartbeat age); process control sits behind [`ChildControl`] so the step
//! is unit-testable without spawning anything.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

/// Watchdog tuning, defaults matching the daemon's 1 Hz heartbeat.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// Daemon executable to supervise
    pub exe: PathBuf,
    /// Heartbeat file the daemon stamps
    pub heartbeat_file: PathBuf,
    /// Presence of this file makes the watchdog exit
    pub stop_file: PathBuf,
    /// Time between polls
    pub poll_interval: Duration,
    /// Heartbeat older than this counts as stale
    pub stale_after_ms: i64,
    /// Consecutive stale polls before a forced restart; clamped to >= 1
    pub stale_retries: u32,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            exe: PathBuf::from("swarm-server"),
            heartbeat_file: PathBuf::from("swarm_heartbeat.txt"),
            stop_file: PathBuf::from("swarm_watchdog.stop"),
            poll_interval: Duration::from_millis(1000),
            stale_after_ms: 5000,
            stale_retries: 2,
        }
    }
}

/// Process control seam: the watchdog logic only ever launches, probes, and
/// terminates through this.
pub trait ChildControl {
    /// Start the supervised process. Failure is logged by the impl; the
    /// watchdog simply tries again next poll.
    fn launch(&mut self);

    /// Whether the process is currently alive.
    fn is_running(&mut self) -> bool;

    /// Kill the process and reap it.
    fn terminate(&mut self);
}

/// Real child process spawned from a path.
pub struct SpawnedChild {
    exe: PathBuf,
    child: Option<std::process::Child>,
}

impl SpawnedChild {
    /// Controller for `exe`; nothing is spawned until the first `launch`.
    pub fn new(exe: PathBuf) -> Self {
        Self { exe, child: None }
    }
}

impl ChildControl for SpawnedChild {
    fn launch(&mut self) {
        if self.child.is_some() {
            return;
        }
        match std::process::Command::new(&self.exe).spawn() {
            Ok(child) => {
                info!(exe = %self.exe.display(), pid = child.id(), "Daemon launched");
                self.child = Some(child);
            }
            Err(e) => warn!(exe = %self.exe.display(), "Daemon launch failed: {e}"),
        }
    }

    fn is_running(&mut self) -> bool {
        match self.child.as_mut().map(|c| c.try_wait()) {
            Some(Ok(None)) => true,
            Some(Ok(Some(status))) => {
                info!(%status, "Daemon exited");
                self.child = None;
                false
            }
            Some(Err(e)) => {
                warn!("Daemon wait failed: {e}");
                self.child = None;
                false
            }
            None => false,
        }
    }

    fn terminate(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Read the first line of the heartbeat file as an epoch-milliseconds stamp.
/// Missing or unparseable files yield None and count as stale.
pub fn read_heartbeat_ts(path: &Path) -> Option<i64> {
    let content = std::fs::read_to_string(path).ok()?;
    content.lines().next()?.trim().parse().ok()
}

/// The supervision loop state.
pub struct Watchdog<C: ChildControl> {
    config: WatchdogConfig,
    child: C,
    stale_count: u32,
}

impl<C: ChildControl> Watchdog<C> {
    /// Watchdog over a child controller.
    pub fn new(mut config: WatchdogConfig, child: C) -> Self {
        config.stale_retries = config.stale_retries.max(1);
        Self {
            config,
            child,
            stale_count: 0,
        }
    }

    /// Consecutive stale polls so far.
    pub fn stale_count(&self) -> u32 {
        self.stale_count
    }

    /// One supervision step at `now_ms` (epoch milliseconds). Returns false
    /// when the stop file asks the watchdog to exit.
    pub fn poll(&mut self, now_ms: i64) -> bool {
        if self.config.stop_file.exists() {
            info!(path = %self.config.stop_file.display(), "Stop file present, exiting");
            return false;
        }

        if !self.child.is_running() {
            self.child.launch();
            self.stale_count = 0;
        }

        let age = read_heartbeat_ts(&self.config.heartbeat_file).map(|ts| now_ms - ts);
        let stale = match age {
            Some(age) => age > self.config.stale_after_ms,
            None => true,
        };

        if stale {
            self.stale_count += 1;
            warn!(
                age_ms = age.unwrap_or(-1),
                count = self.stale_count,
                "Stale heartbeat"
            );
            if self.stale_count >= self.config.stale_retries {
                warn!("Restarting daemon after stale heartbeat");
                self.child.terminate();
                self.child.launch();
                self.stale_count = 0;
            }
        } else if self.stale_count > 0 {
            info!("Heartbeat recovered");
            self.stale_count = 0;
        }
        true
    }

    /// Poll until the stop file appears. The stop file halts the watchdog
    /// only; the supervised child is left running.
    pub fn run(&mut self) {
        loop {
            let now_ms = chrono::Utc::now().timestamp_millis();
            if !self.poll(now_ms) {
                break;
            }
            std::thread::sleep(self.config.poll_interval);
        }
    }
}
