//! Frame-time and command-rate metrics
//!
//! The tick loop feeds an exponential moving average of frame time; the
//! dispatcher counts accepted commands. Snapshotted on demand by `perf`.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
struct FrameStats {
    ema_ms: f64,
    fps: f64,
}

/// Shared performance counters.
#[derive(Debug)]
pub struct PerfStats {
    frame: Mutex<FrameStats>,
    api_count: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerfSnapshot {
    /// Smoothed frames per second
    pub fps: f64,
    /// EMA of frame time in milliseconds
    pub avg_frame_ms: f64,
    /// Commands accepted since startup
    pub api_count: u64,
}

impl PerfStats {
    /// Counters seeded at the nominal 60 Hz frame time.
    pub fn new() -> Self {
        Self {
            frame: Mutex::new(FrameStats {
                ema_ms: 16.0,
                fps: 60.0,
            }),
            api_count: AtomicU64::new(0),
        }
    }

    /// Record one tick of `dt` seconds.
    pub fn record_frame(&self, dt: f64) {
        let mut frame = self.frame.lock();
        frame.ema_ms = frame.ema_ms * 0.9 + dt * 1000.0 * 0.1;
        if frame.ema_ms > 0.01 {
            frame.fps = 1000.0 / frame.ema_ms;
        }
    }

    /// Count one accepted command.
    pub fn count_command(&self) {
        self.api_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current counters.
    pub fn snapshot(&self) -> PerfSnapshot {
        let frame = self.frame.lock();
        PerfSnapshot {
            fps: frame.fps,
            avg_frame_ms: frame.ema_ms,
            api_count: self.api_count.load(Ordering::Relaxed),
        }
    }
}

impl Default for PerfStats {
    fn default() -> Self {
        Self::new()
    }
}
