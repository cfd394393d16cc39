//! State persistence and command-file replay
//!
//! The state file is a newline-delimited list of `cursor/add` command lines,
//! one per cursor, written by `save` and fed back through the dispatcher by
//! `load`. Reusing the command grammar as the persistence format means the
//! loader is the parser: explicit ids survive the round trip and the id
//! allocator advances past them.
//!
//! The command file is the same grammar but operator-authored; it is replayed
//! whenever its mtime changes (hot reload) or on an explicit `reload`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, info};

use crate::registry::{Behavior, Cursor, CursorRegistry};
use crate::server::Dispatcher;

/// Serialize one cursor as the `cursor/add` line that recreates it.
fn cursor_line(cursor: &Cursor) -> String {
    let mut obj = serde_json::Map::new();
    obj.insert("op".into(), json!("cursor/add"));
    obj.insert("id".into(), json!(cursor.id));
    obj.insert("behavior".into(), json!(cursor.behavior.name()));
    obj.insert("x".into(), json!(cursor.target.x));
    obj.insert("y".into(), json!(cursor.target.y));
    obj.insert("size".into(), json!(cursor.size));
    obj.insert("color".into(), json!(cursor.color.to_hex()));
    match &cursor.behavior {
        Behavior::Mirror { offset_x, offset_y } => {
            obj.insert("offsetX".into(), json!(offset_x));
            obj.insert("offsetY".into(), json!(offset_y));
        }
        Behavior::Orbit { radius, speed, .. } => {
            obj.insert("radius".into(), json!(radius));
            obj.insert("speed".into(), json!(speed));
        }
        Behavior::FollowLag { lag_ms, .. } => {
            obj.insert("lagMs".into(), json!(lag_ms));
        }
        Behavior::Script { script_path } => {
            obj.insert("script".into(), json!(script_path));
        }
        Behavior::Static => {}
    }
    serde_json::Value::Object(obj).to_string()
}

/// Snapshot the registry to `path`, one command line per cursor. Returns the
/// number of cursors written.
pub fn save(registry: &CursorRegistry, path: &Path) -> Result<usize> {
    let cursors = registry.snapshot();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create state file {}", path.display()))?;
    for cursor in &cursors {
        writeln!(file, "{}", cursor_line(cursor)).context("Failed to write state line")?;
    }
    Ok(cursors.len())
}

/// Replay a command-line file through the dispatcher. Blank lines and lines
/// starting with `#` are skipped. Returns the number of lines replayed.
pub async fn replay_file(dispatcher: &Dispatcher, path: &Path) -> Result<usize> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut count = 0;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        dispatcher.handle_line(line).await;
        count += 1;
    }
    Ok(count)
}

/// Replay the state file into the registry. Loaded cursors are added to the
/// current set; script cursors relaunch their processes on the way in.
pub async fn load(dispatcher: &Dispatcher, path: &Path) -> Result<usize> {
    replay_file(dispatcher, path).await
}

/// Mtime-based watcher for the operator command file.
pub struct CommandFileWatcher {
    path: PathBuf,
    last_mtime: Mutex<Option<SystemTime>>,
}

impl CommandFileWatcher {
    /// Watcher for `path`; the first poll counts as a change.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            last_mtime: Mutex::new(None),
        }
    }

    /// Replay the command file if its mtime moved since the last replay (or
    /// unconditionally when `force` is set). A missing file is not an error;
    /// it simply reports no change.
    pub async fn reload_if_changed(&self, dispatcher: &Dispatcher, force: bool) -> Result<bool> {
        let mtime = match std::fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(mtime) => mtime,
            Err(_) => return Ok(false),
        };

        let changed = {
            let mut last = self.last_mtime.lock();
            let changed = *last != Some(mtime);
            if changed || force {
                *last = Some(mtime);
            }
            changed
        };
        if !changed && !force {
            return Ok(false);
        }

        let count = replay_file(dispatcher, &self.path).await?;
        if force {
            info!(path = %self.path.display(), count, "Command file reloaded");
        } else {
            debug!(path = %self.path.display(), count, "Command file changed, replayed");
        }
        Ok(true)
    }
}
