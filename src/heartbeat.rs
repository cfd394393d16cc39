//! Liveness heartbeat
//!
//! Once per second the daemon overwrites a small text file with three lines:
//! epoch timestamp in milliseconds, smoothed fps, live cursor count. The
//! companion `swarm-watchdog` binary polls the timestamp to decide whether
//! the daemon is alive; the other two lines are operator-facing diagnostics.
//! A write failure is logged and skipped, never fatal.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::perf::PerfStats;
use crate::registry::CursorRegistry;

/// Time between heartbeat writes.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Write one heartbeat stamp: `ts_ms\nfps\ncursor_count\n`.
pub fn write_heartbeat(path: &Path, fps: f64, cursor_count: usize) -> std::io::Result<()> {
    let ts = chrono::Utc::now().timestamp_millis();
    std::fs::write(path, format!("{ts}\n{fps:.1}\n{cursor_count}\n"))
}

/// Heartbeat loop; runs until cancellation.
pub async fn run_heartbeat(
    path: PathBuf,
    perf: Arc<PerfStats>,
    registry: Arc<CursorRegistry>,
    cancel: CancellationToken,
) {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        let snap = perf.snapshot();
        if let Err(e) = write_heartbeat(&path, snap.fps, registry.len()) {
            warn!(path = %path.display(), "Heartbeat write failed: {e}");
        }
    }
    debug!("Heartbeat loop stopped");
}
