//! Command Protocol
//!
//! Parses line-delimited textual commands into typed operations. Two surface
//! conventions normalize to the same internal operation set: a legacy flat
//! `cmd` field and a structured dotted `op` field, the latter rewriting
//! itself to the legacy operation before dispatch.
//!
//! Parsing is deliberately permissive for forward/backward compatibility
//! with malformed or partial lines from flaky writers: lines that are not
//! JSON objects, lines with neither field, and unknown legacy commands are
//! silently dropped. Only an unknown structured `op` surfaces an error
//! event. All of that policy lives here, behind one validation boundary.

mod event;

pub use event::Event;

use serde_json::{Map, Value};

use crate::registry::{Behavior, Color, Cursor, Vec2};

/// Structured operations advertised by `help`, in reply order.
pub const STRUCTURED_OPS: [&str; 17] = [
    "cursor/add",
    "cursor/update",
    "cursor/remove",
    "cursor/clear",
    "cursor/list",
    "cursor/tweak",
    "mouse/click",
    "mouse/down",
    "mouse/up",
    "mouse/drag",
    "state/save",
    "state/load",
    "state/reload",
    "sys/exit",
    "sys/perf",
    "config/setAhk",
    "debug/mode",
];

/// Mouse button addressed by a mouse operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    /// Primary button (wire value 0)
    Left,
    /// Secondary button (wire value 1)
    Right,
    /// Middle button (wire value 2)
    Middle,
}

impl MouseButton {
    fn from_index(i: i64) -> Self {
        match i {
            1 => MouseButton::Right,
            2 => MouseButton::Middle,
            _ => MouseButton::Left,
        }
    }
}

/// Kind of mouse action to perform at a cursor's position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseAction {
    /// Press and release
    Click,
    /// Press only
    Down,
    /// Release only
    Up,
    /// Press, move to the target, release
    Drag,
}

/// Partial cursor mutation carried by `set` and `tweak`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CursorPatch {
    /// Replacement behavior name (`set` only)
    pub behavior: Option<String>,
    /// Mirror horizontal offset
    pub offset_x: Option<f64>,
    /// Mirror vertical offset
    pub offset_y: Option<f64>,
    /// Orbit radius
    pub radius: Option<f64>,
    /// Additive orbit radius adjustment (`tweak` only)
    pub radius_delta: Option<f64>,
    /// Orbit angular speed
    pub speed: Option<f64>,
    /// Additive speed adjustment (`tweak` only)
    pub speed_delta: Option<f64>,
    /// FollowLag time constant
    pub lag_ms: Option<f64>,
    /// Target x (`set` only)
    pub x: Option<f64>,
    /// Target y (`set` only)
    pub y: Option<f64>,
    /// Render color
    pub color: Option<Color>,
    /// Render size, already range-checked
    pub size: Option<u32>,
}

/// A typed operation, ready for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Register a cursor (id 0 allocates).
    Add(Box<Cursor>),
    /// Remove a cursor by id.
    Remove {
        /// Target cursor id
        id: u64,
    },
    /// Mutate cursor fields in place.
    Set {
        /// Target cursor id
        id: u64,
        /// Fields to change
        patch: CursorPatch,
    },
    /// Adjust cursor parameters, optionally additively.
    Tweak {
        /// Target cursor id
        id: u64,
        /// Fields to change
        patch: CursorPatch,
    },
    /// Remove every cursor.
    Clear,
    /// Stream one `cursor` event per live cursor, then `listDone`.
    List,
    /// Shut the daemon down.
    Exit,
    /// Toggle an overlay debug flag.
    Debug {
        /// Mode keyword, e.g. `solidOn`
        mode: String,
    },
    /// Snapshot the registry to the state file.
    Save,
    /// Replay the state file into the registry.
    Load,
    /// Force a command-file reload.
    Reload,
    /// Emit performance counters.
    Perf,
    /// Replace the script runner path.
    SetRunner {
        /// New runner executable path
        path: String,
    },
    /// Act with the pointer at a cursor's position.
    Mouse {
        /// Action kind
        action: MouseAction,
        /// Cursor whose position anchors the action
        id: u64,
        /// Button to press/release
        button: MouseButton,
        /// Absolute drag target
        absolute: Option<Vec2>,
        /// Relative drag target
        delta: Option<Vec2>,
    },
    /// List the structured operations.
    Help,
}

/// Outcome of parsing one input line.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    /// A recognized operation.
    Command(Command),
    /// Dropped without a reply (malformed, field-incomplete, or unknown
    /// legacy command).
    Ignored,
    /// Structured `op` nobody recognizes; reported as an `error` event.
    UnknownOp(String),
}

/// Parse one command line. Never fails; see [`Parsed`] for the policy.
pub fn parse_line(line: &str) -> Parsed {
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(line) else {
        return Parsed::Ignored;
    };

    let cmd = match text(&map, "op") {
        Some("help") => return Parsed::Command(Command::Help),
        Some(op) => match rewrite_op(op) {
            Some(cmd) => cmd,
            None => return Parsed::UnknownOp(op.to_string()),
        },
        None => match text(&map, "cmd") {
            Some(cmd) => cmd,
            None => return Parsed::Ignored,
        },
    };

    match cmd {
        "add" => Parsed::Command(Command::Add(Box::new(cursor_from(&map)))),
        "remove" => match id_field(&map) {
            Some(id) => Parsed::Command(Command::Remove { id }),
            None => Parsed::Ignored,
        },
        "set" => match id_field(&map) {
            Some(id) => Parsed::Command(Command::Set {
                id,
                patch: patch_from(&map, false),
            }),
            None => Parsed::Ignored,
        },
        "tweak" => match id_field(&map) {
            Some(id) => Parsed::Command(Command::Tweak {
                id,
                patch: patch_from(&map, true),
            }),
            None => Parsed::Ignored,
        },
        "clear" => Parsed::Command(Command::Clear),
        "list" => Parsed::Command(Command::List),
        "exit" => Parsed::Command(Command::Exit),
        "debug" => match text(&map, "mode") {
            Some(mode) => Parsed::Command(Command::Debug {
                mode: mode.to_string(),
            }),
            None => Parsed::Ignored,
        },
        "save" => Parsed::Command(Command::Save),
        "load" => Parsed::Command(Command::Load),
        "reload" => Parsed::Command(Command::Reload),
        "perf" => Parsed::Command(Command::Perf),
        "setAhk" => match text(&map, "path") {
            Some(path) => Parsed::Command(Command::SetRunner {
                path: path.to_string(),
            }),
            None => Parsed::Ignored,
        },
        "click" | "clickId" | "downId" | "upId" | "dragId" => {
            let action = match cmd {
                "downId" => MouseAction::Down,
                "upId" => MouseAction::Up,
                "dragId" => MouseAction::Drag,
                _ => MouseAction::Click,
            };
            let absolute = match (num(&map, "tx"), num(&map, "ty")) {
                (Some(x), Some(y)) => Some(Vec2::new(x, y)),
                _ => None,
            };
            let delta = match (num(&map, "dx"), num(&map, "dy")) {
                (Some(x), Some(y)) => Some(Vec2::new(x, y)),
                _ => None,
            };
            Parsed::Command(Command::Mouse {
                action,
                id: id_field(&map).unwrap_or(0),
                button: MouseButton::from_index(int(&map, "button").unwrap_or(0)),
                absolute,
                delta,
            })
        }
        _ => Parsed::Ignored,
    }
}

/// Map a structured op to its legacy operation name.
fn rewrite_op(op: &str) -> Option<&'static str> {
    Some(match op {
        "cursor/add" => "add",
        "cursor/update" => "set",
        "cursor/remove" => "remove",
        "cursor/clear" => "clear",
        "cursor/list" => "list",
        "cursor/tweak" => "tweak",
        "mouse/click" => "clickId",
        "mouse/down" => "downId",
        "mouse/up" => "upId",
        "mouse/drag" => "dragId",
        "state/save" => "save",
        "state/load" => "load",
        "state/reload" => "reload",
        "sys/exit" => "exit",
        "sys/perf" => "perf",
        "config/setAhk" => "setAhk",
        "debug/mode" => "debug",
        _ => return None,
    })
}

// ---------------------------------------------------------------------------
// Field coercion: best-effort textual-to-number conversion, invalid text
// yields zero, never a failure.
// ---------------------------------------------------------------------------

fn coerce_f64(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn num(map: &Map<String, Value>, key: &str) -> Option<f64> {
    map.get(key).map(coerce_f64)
}

fn int(map: &Map<String, Value>, key: &str) -> Option<i64> {
    map.get(key).map(|v| coerce_f64(v) as i64)
}

fn text<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key).and_then(Value::as_str)
}

fn id_field(map: &Map<String, Value>) -> Option<u64> {
    int(map, "id").map(|i| i.max(0) as u64)
}

fn size_field(map: &Map<String, Value>) -> Option<u32> {
    // Only (2, 400) applies; out-of-range sizes are ignored entirely.
    let s = int(map, "size")?;
    (s > 2 && s < 400).then_some(s as u32)
}

fn parse_behavior(name: &str, map: &Map<String, Value>) -> Behavior {
    match name {
        "static" => Behavior::Static,
        "orbit" => Behavior::Orbit {
            radius: num(map, "radius").unwrap_or(60.0),
            speed: num(map, "speed").unwrap_or(1.0),
            angle: 0.0,
        },
        "follow" | "followlag" => Behavior::FollowLag {
            lag_ms: num(map, "lagMs").unwrap_or(120.0),
            initialized: false,
        },
        "script" => Behavior::Script {
            script_path: text(map, "script").unwrap_or_default().to_string(),
        },
        _ => Behavior::Mirror {
            offset_x: num(map, "offsetX").unwrap_or(0.0),
            offset_y: num(map, "offsetY").unwrap_or(0.0),
        },
    }
}

/// Construct the cursor an `add` line describes.
fn cursor_from(map: &Map<String, Value>) -> Cursor {
    let mut cursor = Cursor {
        id: id_field(map).unwrap_or(0),
        behavior: parse_behavior(text(map, "behavior").unwrap_or("mirror"), map),
        ..Default::default()
    };
    if let Some(color) = text(map, "color") {
        cursor.color = Color::parse(color);
    }
    if let (Some(x), Some(y)) = (num(map, "x"), num(map, "y")) {
        cursor.target = Vec2::new(x, y);
    }
    if let Some(size) = size_field(map) {
        cursor.size = size;
    }
    // Static cursors render at their target from the first frame.
    if cursor.behavior == Behavior::Static {
        cursor.pos = cursor.target;
    }
    cursor
}

fn patch_from(map: &Map<String, Value>, deltas: bool) -> CursorPatch {
    CursorPatch {
        behavior: if deltas {
            None
        } else {
            text(map, "behavior").map(str::to_string)
        },
        offset_x: num(map, "offsetX"),
        offset_y: num(map, "offsetY"),
        radius: num(map, "radius"),
        radius_delta: if deltas { num(map, "radiusDelta") } else { None },
        speed: num(map, "speed"),
        speed_delta: if deltas { num(map, "speedDelta") } else { None },
        lag_ms: num(map, "lagMs"),
        x: if deltas { None } else { num(map, "x") },
        y: if deltas { None } else { num(map, "y") },
        color: text(map, "color").map(Color::parse),
        size: size_field(map),
    }
}

/// Build the behavior a `set` with a `behavior` field switches to, taking
/// parameters from the same patch and falling back to the documented
/// defaults (offset 0, radius 60, speed 1, lagMs 120).
pub fn behavior_from_patch(name: &str, patch: &CursorPatch) -> Behavior {
    match name {
        "static" => Behavior::Static,
        "orbit" => Behavior::Orbit {
            radius: patch.radius.unwrap_or(60.0),
            speed: patch.speed.unwrap_or(1.0),
            angle: 0.0,
        },
        "follow" | "followlag" => Behavior::FollowLag {
            lag_ms: patch.lag_ms.unwrap_or(120.0),
            initialized: false,
        },
        "script" => Behavior::Script {
            script_path: String::new(),
        },
        _ => Behavior::Mirror {
            offset_x: patch.offset_x.unwrap_or(0.0),
            offset_y: patch.offset_y.unwrap_or(0.0),
        },
    }
}
