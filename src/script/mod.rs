//! Script Bridges
//!
//! A Script-behavior cursor is driven by an external process. Each one owns
//! a dedicated Unix socket named after the cursor id plus a spawned process
//! and a reader task translating the tiny script sub-protocol
//! (`pos`/`color`/`remove`/`log`) into registry mutations. The bridge is one
//! owned resource with explicit create/teardown, keyed by cursor id.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::net::UnixListener;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::protocol::Event;
use crate::registry::{Color, Vec2};
use crate::server::Dispatcher;

/// Scripts that exit within this window after teardown are reaped
/// gracefully; stragglers are killed.
const CHILD_GRACE: Duration = Duration::from_millis(500);

/// Script lines longer than this are a protocol violation; the bridge drops
/// the connection.
const MAX_SCRIPT_LINE: usize = 1024;

/// Bridge setup failure, mapped to `scriptError` codes.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Bridge socket could not be created (`createPipe`).
    #[error("failed to bind bridge socket: {0}")]
    Bind(#[source] std::io::Error),
    /// Script process could not be spawned (`launchFail`).
    #[error("failed to spawn script process: {0}")]
    Spawn(#[source] std::io::Error),
}

/// One parsed line of the script sub-protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptMsg {
    /// `pos <x> <y>`: set position and target directly.
    Pos(Vec2),
    /// `color <#RRGGBB>`: recolor the cursor.
    Color(Color),
    /// `remove`: the script asks for its own cursor's removal.
    Remove,
    /// `log <text>`: re-emitted verbatim as `scriptLog`.
    Log(String),
}

/// Parse one whitespace-delimited script line. Unknown or incomplete lines
/// yield None and are ignored.
pub fn parse_script_line(line: &str) -> Option<ScriptMsg> {
    let mut parts = line.split_whitespace();
    match parts.next()? {
        "pos" => {
            let x: f64 = parts.next()?.parse().ok()?;
            let y: f64 = parts.next()?.parse().ok()?;
            Some(ScriptMsg::Pos(Vec2::new(x, y)))
        }
        "color" => {
            let raw = parts.next()?;
            let bytes = raw.as_bytes();
            if bytes.len() == 7 && bytes[0] == b'#' {
                Some(ScriptMsg::Color(Color::parse(raw)))
            } else {
                None
            }
        }
        "remove" => Some(ScriptMsg::Remove),
        "log" => {
            let rest = line.trim_start().strip_prefix("log")?;
            Some(ScriptMsg::Log(
                rest.strip_prefix(' ').unwrap_or(rest).to_string(),
            ))
        }
        _ => None,
    }
}

/// Deterministic bridge socket path for a cursor id.
pub fn bridge_socket_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("swarm-script-{id}.sock"))
}

struct BridgeEntry {
    socket_path: PathBuf,
    cancel: CancellationToken,
    child: Option<Child>,
    // Kept so teardown can detach the reader; the cancel token stops it.
    _reader: JoinHandle<()>,
}

/// Registry of live script bridges, keyed by cursor id.
pub struct ScriptBridges {
    inner: Mutex<HashMap<u64, BridgeEntry>>,
    socket_dir: PathBuf,
}

impl ScriptBridges {
    /// Bridge registry creating sockets under `socket_dir`.
    pub fn new(socket_dir: PathBuf) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            socket_dir,
        }
    }

    /// Bind the bridge socket and start its reader, without spawning a
    /// process. Returns the socket path the script must connect to.
    pub fn register(&self, dispatcher: Arc<Dispatcher>, id: u64) -> Result<PathBuf, BridgeError> {
        let socket_path = bridge_socket_path(&self.socket_dir, id);
        let _ = std::fs::remove_file(&socket_path);
        if let Some(parent) = socket_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let listener = UnixListener::bind(&socket_path).map_err(BridgeError::Bind)?;

        let cancel = CancellationToken::new();
        let reader = tokio::spawn(run_reader(dispatcher, id, listener, cancel.clone()));
        self.inner.lock().insert(
            id,
            BridgeEntry {
                socket_path: socket_path.clone(),
                cancel,
                child: None,
                _reader: reader,
            },
        );
        Ok(socket_path)
    }

    /// Full bridge setup: socket, reader, and script process. A spawn
    /// failure leaves the bridge registered and waiting so the cursor stays
    /// usable; the caller reports `launchFail`.
    pub fn launch(
        &self,
        dispatcher: Arc<Dispatcher>,
        id: u64,
        script_path: &str,
        runner: &str,
    ) -> Result<(), BridgeError> {
        let socket_path = self.register(dispatcher, id)?;

        let mut command = if runner.is_empty() {
            Command::new(script_path)
        } else {
            let mut c = Command::new(runner);
            c.arg(script_path);
            c
        };
        command
            .arg(id.to_string())
            .arg(&socket_path)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let child = command.spawn().map_err(BridgeError::Spawn)?;
        info!(id, script = script_path, pid = child.id(), "Script launched");
        if let Some(entry) = self.inner.lock().get_mut(&id) {
            entry.child = Some(child);
        }
        Ok(())
    }

    /// Tear one bridge down: cancel reads, unlink the socket, reap the
    /// process (bounded grace wait, then kill), detach the reader. Returns
    /// false if no bridge exists for the id.
    pub async fn teardown(&self, id: u64) -> bool {
        let Some(entry) = self.inner.lock().remove(&id) else {
            return false;
        };
        entry.cancel.cancel();
        let _ = std::fs::remove_file(&entry.socket_path);
        if let Some(mut child) = entry.child {
            match tokio::time::timeout(CHILD_GRACE, child.wait()).await {
                Ok(Ok(status)) => debug!(id, %status, "Script exited"),
                Ok(Err(e)) => warn!(id, "Script wait failed: {e}"),
                Err(_) => {
                    warn!(id, "Script still alive after grace period, killing");
                    let _ = child.kill().await;
                }
            }
        }
        true
    }

    /// Tear down every bridge (used by `clear` and shutdown).
    pub async fn teardown_all(&self) {
        let ids: Vec<u64> = self.inner.lock().keys().copied().collect();
        for id in ids {
            self.teardown(id).await;
        }
    }
}

/// Per-bridge reader: accept the single script connection, then translate
/// sub-protocol lines until EOF or teardown.
async fn run_reader(
    dispatcher: Arc<Dispatcher>,
    id: u64,
    listener: UnixListener,
    cancel: CancellationToken,
) {
    let stream = tokio::select! {
        _ = cancel.cancelled() => return,
        accepted = listener.accept() => match accepted {
            Ok((stream, _)) => stream,
            Err(e) => {
                warn!(id, "Bridge accept failed: {e}");
                dispatcher
                    .events
                    .publish(&Event::ScriptError {
                        id,
                        code: "connect".into(),
                    })
                    .await;
                return;
            }
        },
    };

    dispatcher
        .events
        .publish(&Event::ScriptPipeConnected { id })
        .await;

    let mut lines = FramedRead::new(stream, LinesCodec::new_with_max_length(MAX_SCRIPT_LINE));
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next() => match line {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    warn!(id, "Bridge line error: {e}");
                    break;
                }
                None => break,
            },
        };

        match parse_script_line(&line) {
            Some(ScriptMsg::Pos(p)) => {
                dispatcher.registry.apply(id, |c| {
                    c.pos = p;
                    c.target = p;
                });
            }
            Some(ScriptMsg::Color(color)) => {
                dispatcher.registry.apply(id, |c| c.color = color);
            }
            Some(ScriptMsg::Remove) => {
                let remove = format!("{{\"cmd\":\"remove\",\"id\":{id}}}");
                dispatcher.handle_line(&remove).await;
                break;
            }
            Some(ScriptMsg::Log(msg)) => {
                dispatcher
                    .events
                    .publish(&Event::ScriptLog { id, msg })
                    .await;
            }
            None => debug!(id, line, "Ignoring unknown script line"),
        }
    }

    dispatcher.events.publish(&Event::ScriptExit { id }).await;
}
