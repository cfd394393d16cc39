//! Outbound events
//!
//! Every successful mutation emits exactly one event on the outbound channel,
//! serialized as one JSON line tagged by an `event` field.

use serde::Serialize;

/// Outbound event, one JSON line per value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum Event {
    /// A subscriber attached to the outbound channel.
    Connected,
    /// A cursor was added.
    #[serde(rename_all = "camelCase")]
    Added {
        /// Cursor id
        id: u64,
        /// Behavior wire name
        behavior: String,
    },
    /// A cursor was updated via `set`.
    #[serde(rename_all = "camelCase")]
    Updated {
        /// Cursor id
        id: u64,
        /// Behavior wire name after the update
        behavior: String,
    },
    /// Result of a `remove`.
    #[serde(rename_all = "camelCase")]
    Removed {
        /// Cursor id
        id: u64,
        /// False when the id was absent
        ok: bool,
    },
    /// All cursors were removed.
    Cleared,
    /// One cursor row of a `list` reply.
    #[serde(rename_all = "camelCase")]
    Cursor {
        /// Cursor id
        id: u64,
        /// Behavior wire name
        behavior: String,
        /// Current x position
        x: f64,
        /// Current y position
        y: f64,
    },
    /// Terminates a `list` reply.
    ListDone,
    /// The daemon is shutting down.
    Exiting,
    /// Performance counters.
    #[serde(rename_all = "camelCase")]
    Perf {
        /// Smoothed frames per second
        fps: f64,
        /// Exponential moving average of frame time
        avg_frame_ms: f64,
        /// Live cursor count
        cursor_count: usize,
        /// Commands accepted since startup
        api_count: u64,
    },
    /// A script process was spawned for a cursor.
    #[serde(rename_all = "camelCase")]
    ScriptLaunched {
        /// Cursor id
        id: u64,
    },
    /// A script bridge failed; `code` is one of `launchFail`, `connect`,
    /// `createPipe`.
    #[serde(rename_all = "camelCase")]
    ScriptError {
        /// Cursor id
        id: u64,
        /// Failure code
        code: String,
    },
    /// A script connected to its bridge socket.
    #[serde(rename_all = "camelCase")]
    ScriptPipeConnected {
        /// Cursor id
        id: u64,
    },
    /// Verbatim `log` line from a script.
    #[serde(rename_all = "camelCase")]
    ScriptLog {
        /// Cursor id
        id: u64,
        /// Message text
        msg: String,
    },
    /// A script bridge reached EOF.
    #[serde(rename_all = "camelCase")]
    ScriptExit {
        /// Cursor id
        id: u64,
    },
    /// The script runner path was changed.
    #[serde(rename_all = "camelCase")]
    AhkPath {
        /// New runner path
        path: String,
    },
    /// A cursor was adjusted via `tweak`.
    #[serde(rename_all = "camelCase")]
    Tweaked {
        /// Cursor id
        id: u64,
    },
    /// One row of a `help` reply.
    Help {
        /// Structured operation name
        op: String,
    },
    /// Terminates a `help` reply.
    HelpDone,
    /// Protocol-level error (unknown structured op).
    Error {
        /// Human-readable message
        msg: String,
    },
}

impl Event {
    /// Serialize to a single newline-terminated JSON line.
    pub fn to_line(&self) -> String {
        // Serialization of this enum cannot fail: no maps, no non-string keys.
        let mut line = serde_json::to_string(self).unwrap_or_default();
        line.push('\n');
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_tag_with_camel_case_names() {
        assert_eq!(
            Event::Connected.to_line(),
            "{\"event\":\"connected\"}\n"
        );
        assert_eq!(Event::ListDone.to_line(), "{\"event\":\"listDone\"}\n");
        assert_eq!(Event::HelpDone.to_line(), "{\"event\":\"helpDone\"}\n");
    }

    #[test]
    fn field_names_match_wire_format() {
        let line = Event::Perf {
            fps: 60.0,
            avg_frame_ms: 16.5,
            cursor_count: 3,
            api_count: 12,
        }
        .to_line();
        assert!(line.contains("\"avgFrameMs\":16.5"), "{line}");
        assert!(line.contains("\"cursorCount\":3"), "{line}");
        assert!(line.contains("\"apiCount\":12"), "{line}");

        let line = Event::ScriptPipeConnected { id: 4 }.to_line();
        assert!(line.starts_with("{\"event\":\"scriptPipeConnected\""), "{line}");

        let line = Event::Removed { id: 9, ok: false }.to_line();
        assert!(line.contains("\"ok\":false"), "{line}");
    }
}
