//! Outbound Event Broadcaster
//!
//! A single-subscriber Unix socket streaming JSON-line events. All event
//! emission in the daemon funnels through [`EventBroadcaster::publish`]; when
//! no subscriber is attached, publishes are dropped silently: at-most-once,
//! no history. Consumers that connect late miss prior events.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::protocol::Event;

/// Retry delay after a failed listener bind.
const BIND_RETRY: Duration = Duration::from_secs(2);

/// Shared handle to the (at most one) event subscriber.
#[derive(Clone, Default)]
pub struct EventBroadcaster {
    sink: Arc<tokio::sync::Mutex<Option<OwnedWriteHalf>>>,
}

impl EventBroadcaster {
    /// Broadcaster with no subscriber attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// The single publish primitive. Serializes the event to one JSON line
    /// and writes it fire-and-forget; with no subscriber, or on a write
    /// error, the event is dropped and the dead sink cleared.
    pub async fn publish(&self, event: &Event) {
        let mut sink = self.sink.lock().await;
        if let Some(writer) = sink.as_mut() {
            if let Err(e) = writer.write_all(event.to_line().as_bytes()).await {
                debug!("Subscriber write failed, detaching: {e}");
                *sink = None;
            }
        }
    }

    /// Attach a subscriber, replacing any previous one.
    pub async fn attach(&self, writer: OwnedWriteHalf) {
        *self.sink.lock().await = Some(writer);
    }

    /// Drop the current subscriber, if any.
    pub async fn detach(&self) {
        *self.sink.lock().await = None;
    }

    /// Whether a subscriber is currently attached.
    pub async fn is_attached(&self) -> bool {
        self.sink.lock().await.is_some()
    }
}

/// Accept loop for the outbound socket: at most one subscriber at a time.
/// On connect it publishes `connected`, then watches the read half for
/// disconnect; on disconnect it clears the sink and accepts the next
/// subscriber.
pub async fn run_outbound(
    path: PathBuf,
    events: EventBroadcaster,
    cancel: CancellationToken,
) {
    let listener = loop {
        let _ = std::fs::remove_file(&path);
        match UnixListener::bind(&path) {
            Ok(l) => break l,
            Err(e) => {
                warn!(path = %path.display(), "Outbound bind failed, retrying: {e}");
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(BIND_RETRY) => {}
                }
            }
        }
    };
    info!(path = %path.display(), "Event socket listening");

    loop {
        let stream = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(e) => {
                    warn!("Outbound accept failed: {e}");
                    tokio::time::sleep(BIND_RETRY).await;
                    continue;
                }
            },
        };

        let (mut reader, writer) = stream.into_split();
        events.attach(writer).await;
        events.publish(&Event::Connected).await;
        debug!("Event subscriber connected");

        // The subscriber never sends data; a read return means EOF (or a
        // stray byte we ignore while waiting for the disconnect).
        let mut scratch = [0u8; 64];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                read = reader.read(&mut scratch) => match read {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                },
            }
        }

        events.detach().await;
        debug!("Event subscriber disconnected");

        if cancel.is_cancelled() {
            break;
        }
    }

    let _ = std::fs::remove_file(&path);
}
