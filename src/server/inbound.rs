//! Inbound command listeners
//!
//! A fixed pool of workers accepting connections on the command socket. Each
//! worker owns at most one client at a time and feeds its newline-delimited
//! commands to the dispatcher, so the pool size is the worst case for
//! concurrent clients; further connectors queue in the listener backlog until
//! a worker frees up. Client disconnect recycles the worker, never the pool.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::net::{UnixListener, UnixStream};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::server::Dispatcher;

/// Command lines longer than this are discarded; the codec skips to the
/// next newline and the connection keeps serving.
pub const MAX_COMMAND_LINE: usize = 4096;

/// Retry delay after a failed listener bind or accept.
const BIND_RETRY: Duration = Duration::from_secs(2);

/// Bind the command socket and run the worker pool until cancellation.
pub async fn run_inbound(
    path: PathBuf,
    dispatcher: Arc<Dispatcher>,
    workers: usize,
    cancel: CancellationToken,
) {
    let listener = loop {
        let _ = std::fs::remove_file(&path);
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match UnixListener::bind(&path) {
            Ok(l) => break l,
            Err(e) => {
                warn!(path = %path.display(), "Command bind failed, retrying: {e}");
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(BIND_RETRY) => {}
                }
            }
        }
    };
    info!(path = %path.display(), workers, "Command socket listening");

    // Workers take turns accepting; the mutex is only held for the accept
    // itself, never while serving a client.
    let listener = Arc::new(tokio::sync::Mutex::new(listener));
    let mut handles = Vec::with_capacity(workers);
    for worker in 0..workers {
        handles.push(tokio::spawn(serve_worker(
            worker,
            Arc::clone(&listener),
            Arc::clone(&dispatcher),
            cancel.clone(),
        )));
    }
    for handle in handles {
        let _ = handle.await;
    }
    let _ = std::fs::remove_file(&path);
}

async fn accept_next(listener: &tokio::sync::Mutex<UnixListener>) -> std::io::Result<UnixStream> {
    let guard = listener.lock().await;
    let (stream, _) = guard.accept().await?;
    Ok(stream)
}

async fn serve_worker(
    worker: usize,
    listener: Arc<tokio::sync::Mutex<UnixListener>>,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
) {
    loop {
        let stream = tokio::select! {
            _ = cancel.cancelled() => return,
            accepted = accept_next(&listener) => match accepted {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(worker, "Command accept failed: {e}");
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(BIND_RETRY) => continue,
                    }
                }
            },
        };
        debug!(worker, "Command client connected");

        let mut lines = FramedRead::new(stream, LinesCodec::new_with_max_length(MAX_COMMAND_LINE));
        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => return,
                line = lines.next() => match line {
                    Some(Ok(line)) => line,
                    // The codec discards the rest of the oversize line and
                    // resumes at the next newline.
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        warn!(worker, "Oversize command line discarded");
                        continue;
                    }
                    Some(Err(e)) => {
                        warn!(worker, "Command read error, dropping client: {e}");
                        break;
                    }
                    None => break,
                },
            };
            dispatcher.handle_line(&line).await;
        }
        debug!(worker, "Command client disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::input::VirtualPointer;
    use tokio::io::AsyncWriteExt;

    fn dispatcher_in(dir: &std::path::Path) -> Arc<Dispatcher> {
        let mut config = Config::default();
        config.script.socket_dir = dir.to_path_buf();
        Dispatcher::new(
            Arc::new(config),
            Arc::new(VirtualPointer::new()),
            CancellationToken::new(),
        )
    }

    async fn connect_with_retry(path: &std::path::Path) -> UnixStream {
        for _ in 0..50 {
            if let Ok(stream) = UnixStream::connect(path).await {
                return stream;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("command socket never came up at {}", path.display());
    }

    async fn wait_for_count(d: &Dispatcher, count: usize) {
        for _ in 0..100 {
            if d.registry.len() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("registry never reached {count} cursors, at {}", d.registry.len());
    }

    #[tokio::test]
    async fn accepts_commands_and_recycles_after_disconnect() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("cmd.sock");
        let d = dispatcher_in(dir.path());
        let cancel = CancellationToken::new();
        let pool = tokio::spawn(run_inbound(
            socket.clone(),
            Arc::clone(&d),
            2,
            cancel.clone(),
        ));

        let mut client = connect_with_retry(&socket).await;
        client
            .write_all(b"{\"cmd\":\"add\",\"behavior\":\"static\"}\n")
            .await
            .unwrap();
        drop(client);
        wait_for_count(&d, 1).await;

        // The worker must accept again after the first client goes away.
        let mut client = connect_with_retry(&socket).await;
        client
            .write_all(b"{\"cmd\":\"add\",\"behavior\":\"orbit\"}\n")
            .await
            .unwrap();
        wait_for_count(&d, 2).await;

        cancel.cancel();
        pool.await.unwrap();
        assert!(!socket.exists(), "socket file must be removed on shutdown");
    }

    #[tokio::test]
    async fn oversize_line_is_discarded_without_dropping_the_client() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("cmd.sock");
        let d = dispatcher_in(dir.path());
        let cancel = CancellationToken::new();
        tokio::spawn(run_inbound(socket.clone(), Arc::clone(&d), 1, cancel.clone()));

        let mut client = connect_with_retry(&socket).await;
        let mut oversize = vec![b'x'; MAX_COMMAND_LINE + 512];
        oversize.push(b'\n');
        client.write_all(&oversize).await.unwrap();
        client
            .write_all(b"{\"cmd\":\"add\",\"behavior\":\"static\"}\n")
            .await
            .unwrap();

        // The valid line after the oversize one must still be served.
        wait_for_count(&d, 1).await;
        cancel.cancel();
    }

    #[tokio::test]
    async fn pool_serves_concurrent_clients() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("cmd.sock");
        let d = dispatcher_in(dir.path());
        let cancel = CancellationToken::new();
        tokio::spawn(run_inbound(socket.clone(), Arc::clone(&d), 4, cancel.clone()));

        let mut a = connect_with_retry(&socket).await;
        let mut b = connect_with_retry(&socket).await;
        for _ in 0..10 {
            a.write_all(b"{\"cmd\":\"add\",\"behavior\":\"mirror\"}\n")
                .await
                .unwrap();
            b.write_all(b"{\"cmd\":\"add\",\"behavior\":\"mirror\"}\n")
                .await
                .unwrap();
        }
        wait_for_count(&d, 20).await;

        let mut ids: Vec<u64> = d.registry.snapshot().iter().map(|c| c.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 20, "ids must be unique across clients");
        cancel.cancel();
    }
}
