//! Command Dispatcher
//!
//! Routes typed operations into registry and bridge mutations, emitting
//! exactly one outbound event per successful mutation. The dispatcher is the
//! application context everything else hangs off: registry, event
//! broadcaster, script bridges, perf counters, overlay flags, pointer seam,
//! and the shutdown token. No ambient singletons.

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::input::Pointer;
use crate::perf::PerfStats;
use crate::protocol::{
    self, behavior_from_patch, Command, CursorPatch, Event, MouseAction, Parsed, STRUCTURED_OPS,
};
use crate::registry::{Behavior, Cursor, CursorRegistry, Vec2};
use crate::script::{BridgeError, ScriptBridges};
use crate::server::outbound::EventBroadcaster;
use crate::state::CommandFileWatcher;

/// Overlay presentation flags toggled by `debug/mode`. The renderer (out of
/// scope) observes these; the dispatcher only records them.
#[derive(Debug)]
pub struct OverlayFlags {
    inner: Mutex<Flags>,
}

#[derive(Debug)]
struct Flags {
    solid: bool,
    topmost: bool,
}

impl OverlayFlags {
    fn new() -> Self {
        Self {
            inner: Mutex::new(Flags {
                solid: false,
                topmost: true,
            }),
        }
    }

    /// Apply one debug mode keyword; unknown keywords are logged and ignored.
    pub fn set_mode(&self, mode: &str) {
        let mut flags = self.inner.lock();
        match mode {
            "solidOn" => flags.solid = true,
            "solidOff" => flags.solid = false,
            "topOn" => flags.topmost = true,
            "topOff" => flags.topmost = false,
            "windowed" | "overlay" => {
                info!("Debug: windowed/overlay switching disabled (always overlay)");
            }
            "keysOn" | "keysOff" | "clickOn" | "clickOff" | "mouseOn" | "mouseOff" => {
                info!(mode, "Debug: input capture toggles are presentation-side no-ops");
            }
            other => debug!(mode = other, "Unknown debug mode ignored"),
        }
    }

    /// Solid (debug) background requested.
    pub fn solid(&self) -> bool {
        self.inner.lock().solid
    }

    /// Overlay requested topmost.
    pub fn topmost(&self) -> bool {
        self.inner.lock().topmost
    }
}

impl Default for OverlayFlags {
    fn default() -> Self {
        Self::new()
    }
}

/// Application context and command router.
pub struct Dispatcher {
    /// Loaded configuration
    pub config: Arc<Config>,
    /// Cursor registry
    pub registry: Arc<CursorRegistry>,
    /// Outbound event sink
    pub events: EventBroadcaster,
    /// Script bridge registry
    pub bridges: Arc<ScriptBridges>,
    /// Performance counters
    pub perf: Arc<PerfStats>,
    /// Overlay debug flags
    pub flags: OverlayFlags,
    /// Pointer seam for reference position and mouse actions
    pub pointer: Arc<dyn Pointer>,
    /// Root shutdown token, cancelled by `exit`
    pub shutdown: CancellationToken,
    /// Command-file watcher backing `reload` and hot reload
    pub command_watcher: CommandFileWatcher,
    runner: Mutex<String>,
    self_ref: Weak<Dispatcher>,
}

impl Dispatcher {
    /// Build the application context. Returns an `Arc` because script bridge
    /// readers feed commands back through the dispatcher.
    pub fn new(
        config: Arc<Config>,
        pointer: Arc<dyn Pointer>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Dispatcher {
            registry: Arc::new(CursorRegistry::new()),
            events: EventBroadcaster::new(),
            bridges: Arc::new(ScriptBridges::new(config.script.socket_dir.clone())),
            perf: Arc::new(PerfStats::new()),
            flags: OverlayFlags::new(),
            pointer,
            shutdown,
            command_watcher: CommandFileWatcher::new(config.files.command_file.clone()),
            runner: Mutex::new(config.script.runner.clone()),
            self_ref: self_ref.clone(),
            config,
        })
    }

    /// Current script runner path.
    pub fn runner(&self) -> String {
        self.runner.lock().clone()
    }

    /// Handle one raw command line. This is the single entry point for every
    /// command source: inbound clients, the state file, the command file,
    /// and script bridges. Boxed because `load` replays lines recursively.
    pub fn handle_line<'a>(&'a self, line: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let line = line.trim();
            if line.is_empty() {
                return;
            }
            match protocol::parse_line(line) {
                Parsed::Ignored => trace!(line, "Dropped unrecognized command line"),
                Parsed::UnknownOp(op) => {
                    self.events
                        .publish(&Event::Error {
                            msg: format!("unknown op {op}"),
                        })
                        .await;
                }
                Parsed::Command(command) => {
                    self.perf.count_command();
                    self.run(command).await;
                }
            }
        })
    }

    async fn run(&self, command: Command) {
        match command {
            Command::Add(cursor) => self.add_cursor(*cursor).await,
            Command::Remove { id } => {
                self.bridges.teardown(id).await;
                let ok = self.registry.remove(id);
                if !ok {
                    debug!(id, "Remove of unknown cursor");
                }
                self.events.publish(&Event::Removed { id, ok }).await;
            }
            Command::Set { id, patch } => {
                let behavior = self.registry.apply(id, |c| apply_set(c, &patch));
                if let Some(behavior) = behavior {
                    self.events
                        .publish(&Event::Updated {
                            id,
                            behavior: behavior.to_string(),
                        })
                        .await;
                }
            }
            Command::Tweak { id, patch } => {
                if self.registry.apply(id, |c| apply_tweak(c, &patch)).is_some() {
                    self.events.publish(&Event::Tweaked { id }).await;
                }
            }
            Command::Clear => {
                let removed = self.registry.clear();
                for cursor in &removed {
                    if matches!(cursor.behavior, Behavior::Script { .. }) {
                        self.bridges.teardown(cursor.id).await;
                    }
                }
                info!(count = removed.len(), "All cursors cleared");
                self.events.publish(&Event::Cleared).await;
            }
            Command::List => {
                for cursor in self.registry.snapshot() {
                    self.events
                        .publish(&Event::Cursor {
                            id: cursor.id,
                            behavior: cursor.behavior.name().to_string(),
                            x: cursor.pos.x,
                            y: cursor.pos.y,
                        })
                        .await;
                }
                self.events.publish(&Event::ListDone).await;
            }
            Command::Exit => {
                info!("Exit command received, shutting down");
                self.events.publish(&Event::Exiting).await;
                self.shutdown.cancel();
            }
            Command::Debug { mode } => self.flags.set_mode(&mode),
            Command::Save => {
                match crate::state::save(&self.registry, &self.config.files.state_file) {
                    Ok(count) => info!(count, path = %self.config.files.state_file.display(), "State saved"),
                    Err(e) => warn!("State save failed: {e:#}"),
                }
            }
            Command::Load => {
                match crate::state::load(self, &self.config.files.state_file).await {
                    Ok(count) => info!(count, "State loaded"),
                    Err(e) => warn!("State load failed: {e:#}"),
                }
            }
            Command::Reload => {
                if let Err(e) = self.command_watcher.reload_if_changed(self, true).await {
                    warn!("Command file reload failed: {e:#}");
                }
            }
            Command::Perf => {
                let snap = self.perf.snapshot();
                self.events
                    .publish(&Event::Perf {
                        fps: snap.fps,
                        avg_frame_ms: snap.avg_frame_ms,
                        cursor_count: self.registry.len(),
                        api_count: snap.api_count,
                    })
                    .await;
            }
            Command::SetRunner { path } => {
                info!(path, "Script runner path changed");
                *self.runner.lock() = path.clone();
                self.events.publish(&Event::AhkPath { path }).await;
            }
            Command::Mouse {
                action,
                id,
                button,
                absolute,
                delta,
            } => {
                let Some(pos) = self.registry.position_of(id) else {
                    debug!(id, "Mouse action on unknown cursor");
                    return;
                };
                match action {
                    MouseAction::Click => {
                        self.pointer.button(button, true, pos);
                        self.pointer.button(button, false, pos);
                    }
                    MouseAction::Down => self.pointer.button(button, true, pos),
                    MouseAction::Up => self.pointer.button(button, false, pos),
                    MouseAction::Drag => {
                        let target = absolute
                            .or_else(|| delta.map(|d| Vec2::new(pos.x + d.x, pos.y + d.y)))
                            .unwrap_or(pos);
                        self.pointer.button(button, true, pos);
                        self.pointer.set_position(target);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        self.pointer.button(button, false, target);
                    }
                }
            }
            Command::Help => {
                for op in STRUCTURED_OPS {
                    self.events
                        .publish(&Event::Help { op: op.to_string() })
                        .await;
                }
                self.events.publish(&Event::HelpDone).await;
            }
        }
    }

    async fn add_cursor(&self, cursor: Cursor) {
        let script_path = match &cursor.behavior {
            Behavior::Script { script_path } if !script_path.is_empty() => {
                Some(script_path.clone())
            }
            _ => None,
        };
        let behavior = cursor.behavior.name().to_string();
        let id = self.registry.add(cursor);

        if let Some(script) = script_path {
            match self.self_ref.upgrade() {
                Some(dispatcher) => {
                    match self.bridges.launch(dispatcher, id, &script, &self.runner()) {
                        Ok(()) => {
                            self.events.publish(&Event::ScriptLaunched { id }).await;
                        }
                        Err(BridgeError::Bind(e)) => {
                            warn!(id, "Bridge socket bind failed: {e}");
                            self.events
                                .publish(&Event::ScriptError {
                                    id,
                                    code: "createPipe".into(),
                                })
                                .await;
                        }
                        Err(BridgeError::Spawn(e)) => {
                            warn!(id, script, "Script launch failed: {e}");
                            self.events
                                .publish(&Event::ScriptError {
                                    id,
                                    code: "launchFail".into(),
                                })
                                .await;
                        }
                    }
                    // A concurrent remove may have won between the insert
                    // and the launch; the bridge must not outlive the cursor.
                    if !self.registry.contains(id) {
                        self.bridges.teardown(id).await;
                    }
                }
                None => warn!(id, "Dispatcher dropped during script launch"),
            }
        }

        self.events.publish(&Event::Added { id, behavior }).await;
    }
}

/// Apply a `set` patch: switch behavior when a different one is named,
/// otherwise mutate the current variant's parameters in place.
fn apply_set(cursor: &mut Cursor, patch: &CursorPatch) {
    if let Some(name) = &patch.behavior {
        let switched = behavior_from_patch(name, patch);
        if switched.name() != cursor.behavior.name() {
            cursor.behavior = switched;
        }
    }
    match &mut cursor.behavior {
        Behavior::Mirror { offset_x, offset_y } => {
            if let Some(v) = patch.offset_x {
                *offset_x = v;
            }
            if let Some(v) = patch.offset_y {
                *offset_y = v;
            }
        }
        Behavior::Orbit { radius, speed, .. } => {
            if let Some(v) = patch.radius {
                *radius = v;
            }
            if let Some(v) = patch.speed {
                *speed = v;
            }
        }
        Behavior::FollowLag { lag_ms, .. } => {
            if let Some(v) = patch.lag_ms {
                *lag_ms = v;
            }
        }
        Behavior::Static | Behavior::Script { .. } => {}
    }
    if let Some(x) = patch.x {
        cursor.target.x = x;
    }
    if let Some(y) = patch.y {
        cursor.target.y = y;
    }
    if let Some(color) = patch.color {
        cursor.color = color;
    }
    if let Some(size) = patch.size {
        cursor.size = size;
    }
}

/// Apply a `tweak` patch: absolute and `*Delta` additive adjustments to the
/// current variant's parameters.
fn apply_tweak(cursor: &mut Cursor, patch: &CursorPatch) {
    match &mut cursor.behavior {
        Behavior::Mirror { offset_x, offset_y } => {
            if let Some(v) = patch.offset_x {
                *offset_x = v;
            }
            if let Some(v) = patch.offset_y {
                *offset_y = v;
            }
        }
        Behavior::Orbit { radius, speed, .. } => {
            if let Some(v) = patch.radius {
                *radius = v;
            }
            if let Some(d) = patch.radius_delta {
                *radius += d;
            }
            if let Some(v) = patch.speed {
                *speed = v;
            }
            if let Some(d) = patch.speed_delta {
                *speed += d;
            }
        }
        Behavior::FollowLag { lag_ms, .. } => {
            if let Some(v) = patch.lag_ms {
                *lag_ms = v;
            }
        }
        Behavior::Static | Behavior::Script { .. } => {}
    }
    if let Some(color) = patch.color {
        cursor.color = color;
    }
    if let Some(size) = patch.size {
        cursor.size = size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::VirtualPointer;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::UnixStream;

    fn test_dispatcher() -> Arc<Dispatcher> {
        let dir = std::env::temp_dir().join(format!("swarm-test-{}", std::process::id()));
        let mut config = Config::default();
        config.script.socket_dir = dir.clone();
        config.files.state_file = dir.join("state.jsonl");
        config.files.command_file = dir.join("commands.jsonl");
        Dispatcher::new(
            Arc::new(config),
            Arc::new(VirtualPointer::new()),
            CancellationToken::new(),
        )
    }

    async fn attach_subscriber(
        d: &Dispatcher,
    ) -> tokio::io::Lines<BufReader<tokio::net::unix::OwnedReadHalf>> {
        let (client, server) = UnixStream::pair().unwrap();
        let (_, writer) = server.into_split();
        d.events.attach(writer).await;
        let (reader, _writer) = client.into_split();
        // Leak the client write half so the pair stays open.
        std::mem::forget(_writer);
        BufReader::new(reader).lines()
    }

    #[tokio::test]
    async fn add_emits_added_with_allocated_id() {
        let d = test_dispatcher();
        let mut lines = attach_subscriber(&d).await;
        d.handle_line("{\"cmd\":\"add\",\"behavior\":\"orbit\"}").await;
        let line = lines.next_line().await.unwrap().unwrap();
        assert_eq!(line, "{\"event\":\"added\",\"id\":1,\"behavior\":\"orbit\"}");
        assert_eq!(d.registry.len(), 1);
    }

    #[tokio::test]
    async fn remove_missing_reports_not_ok() {
        let d = test_dispatcher();
        let mut lines = attach_subscriber(&d).await;
        d.handle_line("{\"cmd\":\"remove\",\"id\":9}").await;
        let line = lines.next_line().await.unwrap().unwrap();
        assert_eq!(line, "{\"event\":\"removed\",\"id\":9,\"ok\":false}");
    }

    #[tokio::test]
    async fn list_streams_cursors_then_terminator() {
        let d = test_dispatcher();
        d.handle_line("{\"cmd\":\"add\",\"behavior\":\"static\",\"x\":5,\"y\":6}")
            .await;
        let mut lines = attach_subscriber(&d).await;
        d.handle_line("{\"op\":\"cursor/list\"}").await;
        let row = lines.next_line().await.unwrap().unwrap();
        assert!(row.contains("\"event\":\"cursor\""), "{row}");
        assert!(row.contains("\"x\":5.0"), "{row}");
        let done = lines.next_line().await.unwrap().unwrap();
        assert_eq!(done, "{\"event\":\"listDone\"}");
    }

    #[tokio::test]
    async fn unknown_op_emits_error_but_unknown_cmd_is_silent() {
        let d = test_dispatcher();
        let mut lines = attach_subscriber(&d).await;
        d.handle_line("{\"cmd\":\"bogus\"}").await;
        d.handle_line("{\"op\":\"bogus/op\"}").await;
        let line = lines.next_line().await.unwrap().unwrap();
        assert_eq!(line, "{\"event\":\"error\",\"msg\":\"unknown op bogus/op\"}");
    }

    #[tokio::test]
    async fn set_updates_and_tweak_adjusts() {
        let d = test_dispatcher();
        d.handle_line("{\"cmd\":\"add\",\"behavior\":\"orbit\",\"radius\":50}")
            .await;
        d.handle_line("{\"cmd\":\"set\",\"id\":1,\"radius\":80}").await;
        d.handle_line("{\"cmd\":\"tweak\",\"id\":1,\"radiusDelta\":-30}")
            .await;
        let snap = d.registry.snapshot();
        assert_eq!(
            snap[0].behavior,
            Behavior::Orbit {
                radius: 50.0,
                speed: 1.0,
                angle: 0.0
            },
            "set then tweak: 80 - 30"
        );
    }

    #[tokio::test]
    async fn set_switches_behavior_variant() {
        let d = test_dispatcher();
        d.handle_line("{\"cmd\":\"add\",\"behavior\":\"mirror\"}").await;
        d.handle_line("{\"cmd\":\"set\",\"id\":1,\"behavior\":\"follow\",\"lagMs\":250}")
            .await;
        assert_eq!(
            d.registry.snapshot()[0].behavior,
            Behavior::FollowLag {
                lag_ms: 250.0,
                initialized: false
            }
        );
    }

    #[tokio::test]
    async fn exit_emits_exiting_and_cancels() {
        let d = test_dispatcher();
        let mut lines = attach_subscriber(&d).await;
        d.handle_line("{\"op\":\"sys/exit\"}").await;
        assert_eq!(
            lines.next_line().await.unwrap().unwrap(),
            "{\"event\":\"exiting\"}"
        );
        assert!(d.shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn click_presses_and_releases_at_cursor_position() {
        let d = test_dispatcher();
        let pointer = Arc::new(VirtualPointer::new());
        let d = Dispatcher::new(
            d.config.clone(),
            pointer.clone() as Arc<dyn Pointer>,
            CancellationToken::new(),
        );
        d.handle_line("{\"cmd\":\"add\",\"behavior\":\"static\",\"x\":40,\"y\":50}")
            .await;
        d.handle_line("{\"op\":\"mouse/click\",\"id\":1}").await;
        assert_eq!(pointer.position(), Vec2::new(40.0, 50.0));
        assert!(pointer.buttons_down().is_empty());
    }

    #[tokio::test]
    async fn drag_moves_pointer_to_relative_target() {
        let d = test_dispatcher();
        let pointer = Arc::new(VirtualPointer::new());
        let d = Dispatcher::new(
            d.config.clone(),
            pointer.clone() as Arc<dyn Pointer>,
            CancellationToken::new(),
        );
        d.handle_line("{\"cmd\":\"add\",\"behavior\":\"static\",\"x\":10,\"y\":10}")
            .await;
        d.handle_line("{\"cmd\":\"dragId\",\"id\":1,\"dx\":15,\"dy\":-5}")
            .await;
        assert_eq!(pointer.position(), Vec2::new(25.0, 5.0));
        assert!(pointer.buttons_down().is_empty());
    }

    #[tokio::test]
    async fn help_lists_every_structured_op() {
        let d = test_dispatcher();
        let mut lines = attach_subscriber(&d).await;
        d.handle_line("{\"op\":\"help\"}").await;
        for op in STRUCTURED_OPS {
            let line = lines.next_line().await.unwrap().unwrap();
            assert!(line.contains(op), "{line} should mention {op}");
        }
        assert_eq!(
            lines.next_line().await.unwrap().unwrap(),
            "{\"event\":\"helpDone\"}"
        );
    }

    #[tokio::test]
    async fn concurrent_adds_allocate_unique_ids() {
        let d = test_dispatcher();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let d = d.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    d.handle_line("{\"cmd\":\"add\",\"behavior\":\"mirror\"}").await;
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let mut ids: Vec<u64> = d.registry.snapshot().iter().map(|c| c.id).collect();
        ids.sort_unstable();
        let before = ids.len();
        ids.dedup();
        assert_eq!(ids.len(), before);
        assert_eq!(d.registry.len(), 200);
    }

    #[tokio::test]
    async fn debug_modes_toggle_overlay_flags() {
        let d = test_dispatcher();
        assert!(!d.flags.solid());
        d.handle_line("{\"cmd\":\"debug\",\"mode\":\"solidOn\"}").await;
        assert!(d.flags.solid());
        d.handle_line("{\"op\":\"debug/mode\",\"mode\":\"topOff\"}").await;
        assert!(!d.flags.topmost());
        d.handle_line("{\"cmd\":\"debug\",\"mode\":\"nonsense\"}").await;
    }

    #[tokio::test]
    async fn set_runner_emits_ahk_path() {
        let d = test_dispatcher();
        let mut lines = attach_subscriber(&d).await;
        d.handle_line("{\"op\":\"config/setAhk\",\"path\":\"/usr/bin/lua\"}")
            .await;
        assert_eq!(
            lines.next_line().await.unwrap().unwrap(),
            "{\"event\":\"ahkPath\",\"path\":\"/usr/bin/lua\"}"
        );
        assert_eq!(d.runner(), "/usr/bin/lua");
    }

    #[test]
    fn tweak_ignores_mismatched_variant_fields() {
        let mut cursor = Cursor {
            behavior: Behavior::FollowLag {
                lag_ms: 100.0,
                initialized: true,
            },
            ..Default::default()
        };
        apply_tweak(
            &mut cursor,
            &CursorPatch {
                radius_delta: Some(10.0),
                lag_ms: Some(300.0),
                ..Default::default()
            },
        );
        assert_eq!(
            cursor.behavior,
            Behavior::FollowLag {
                lag_ms: 300.0,
                initialized: true
            }
        );
    }
}
