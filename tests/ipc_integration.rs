//! IPC integration tests
//!
//! Drives a full server over its real Unix sockets: command clients on one
//! side, the event subscriber on the other.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use swarm_server::config::Config;
use swarm_server::input::{Pointer, VirtualPointer};
use swarm_server::server::SwarmServer;

struct Harness {
    server_task: tokio::task::JoinHandle<anyhow::Result<()>>,
    dispatcher: Arc<swarm_server::server::Dispatcher>,
    command_socket: std::path::PathBuf,
    event_socket: std::path::PathBuf,
    dir: tempfile::TempDir,
}

async fn start_server() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.ipc.command_socket = dir.path().join("cmd.sock");
    config.ipc.event_socket = dir.path().join("evt.sock");
    config.files.state_file = dir.path().join("state.jsonl");
    config.files.command_file = dir.path().join("commands.jsonl");
    config.files.heartbeat_file = dir.path().join("hb.txt");
    config.script.socket_dir = dir.path().to_path_buf();

    let command_socket = config.ipc.command_socket.clone();
    let event_socket = config.ipc.event_socket.clone();
    let server = SwarmServer::new(
        Arc::new(config),
        Arc::new(VirtualPointer::new()) as Arc<dyn Pointer>,
    );
    let dispatcher = server.dispatcher();
    let server_task = tokio::spawn(async move { server.run().await });

    Harness {
        server_task,
        dispatcher,
        command_socket,
        event_socket,
        dir,
    }
}

async fn connect_with_retry(path: &Path) -> UnixStream {
    for _ in 0..100 {
        if let Ok(stream) = UnixStream::connect(path).await {
            return stream;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("socket never came up at {}", path.display());
}

async fn read_line(
    lines: &mut tokio::io::Lines<BufReader<UnixStream>>,
) -> serde_json::Value {
    let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
        .await
        .expect("timed out waiting for event")
        .unwrap()
        .expect("event stream closed");
    serde_json::from_str(&line).expect("event must be JSON")
}

#[tokio::test]
async fn subscriber_gets_connected_then_mutation_events() {
    let h = start_server().await;

    let subscriber = connect_with_retry(&h.event_socket).await;
    let mut events = BufReader::new(subscriber).lines();
    assert_eq!(read_line(&mut events).await["event"], "connected");

    let mut client = connect_with_retry(&h.command_socket).await;
    client
        .write_all(b"{\"cmd\":\"add\",\"behavior\":\"orbit\",\"radius\":40}\n")
        .await
        .unwrap();

    let added = read_line(&mut events).await;
    assert_eq!(added["event"], "added");
    assert_eq!(added["behavior"], "orbit");
    let id = added["id"].as_u64().unwrap();

    client
        .write_all(format!("{{\"op\":\"cursor/remove\",\"id\":{id}}}\n").as_bytes())
        .await
        .unwrap();
    let removed = read_line(&mut events).await;
    assert_eq!(removed["event"], "removed");
    assert_eq!(removed["ok"], true);

    h.dispatcher.shutdown.cancel();
    h.server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn list_round_trip_over_the_wire() {
    let h = start_server().await;

    let mut client = connect_with_retry(&h.command_socket).await;
    client
        .write_all(
            b"{\"cmd\":\"add\",\"behavior\":\"static\",\"x\":10,\"y\":20}\n\
              {\"cmd\":\"add\",\"behavior\":\"mirror\"}\n",
        )
        .await
        .unwrap();

    // Attach after the adds so only the list reply arrives.
    for _ in 0..100 {
        if h.dispatcher.registry.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let subscriber = connect_with_retry(&h.event_socket).await;
    let mut events = BufReader::new(subscriber).lines();
    assert_eq!(read_line(&mut events).await["event"], "connected");

    client.write_all(b"{\"op\":\"cursor/list\"}\n").await.unwrap();
    let first = read_line(&mut events).await;
    assert_eq!(first["event"], "cursor");
    let second = read_line(&mut events).await;
    assert_eq!(second["event"], "cursor");
    assert_ne!(first["id"], second["id"]);
    assert_eq!(read_line(&mut events).await["event"], "listDone");

    h.dispatcher.shutdown.cancel();
    h.server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn concurrent_clients_get_unique_ids() {
    let h = start_server().await;

    let mut a = connect_with_retry(&h.command_socket).await;
    let mut b = connect_with_retry(&h.command_socket).await;
    for _ in 0..25 {
        a.write_all(b"{\"cmd\":\"add\",\"behavior\":\"mirror\"}\n")
            .await
            .unwrap();
        b.write_all(b"{\"cmd\":\"add\",\"behavior\":\"orbit\"}\n")
            .await
            .unwrap();
    }

    for _ in 0..200 {
        if h.dispatcher.registry.len() == 50 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let mut ids: Vec<u64> = h
        .dispatcher
        .registry
        .snapshot()
        .iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(ids.len(), 50);
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 50, "ids must be unique across clients");

    h.dispatcher.shutdown.cancel();
    h.server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn exit_command_shuts_the_server_down_and_cleans_sockets() {
    let h = start_server().await;

    let subscriber = connect_with_retry(&h.event_socket).await;
    let mut events = BufReader::new(subscriber).lines();
    assert_eq!(read_line(&mut events).await["event"], "connected");

    let mut client = connect_with_retry(&h.command_socket).await;
    client.write_all(b"{\"op\":\"sys/exit\"}\n").await.unwrap();

    assert_eq!(read_line(&mut events).await["event"], "exiting");
    tokio::time::timeout(Duration::from_secs(5), h.server_task)
        .await
        .expect("server must stop after exit")
        .unwrap()
        .unwrap();
    assert!(!h.command_socket.exists());
    assert!(!h.event_socket.exists());
}

#[tokio::test]
async fn heartbeat_file_appears_and_advances() {
    let h = start_server().await;

    let hb = h.dir.path().join("hb.txt");
    let mut first = None;
    for _ in 0..300 {
        if let Some(ts) = swarm_server::watchdog::read_heartbeat_ts(&hb) {
            first = Some(ts);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let first = first.expect("heartbeat never written");

    let mut advanced = false;
    for _ in 0..300 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if swarm_server::watchdog::read_heartbeat_ts(&hb).unwrap_or(first) > first {
            advanced = true;
            break;
        }
    }
    assert!(advanced, "heartbeat timestamp must advance");

    h.dispatcher.shutdown.cancel();
    h.server_task.await.unwrap().unwrap();
}
