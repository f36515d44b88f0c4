//! End-to-end server behaviour over real sockets

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tcp_hub::{
    AddressFamily, Callbacks, ClientHandler, Connection, ConnectionState, ServerConfig, TcpServer,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const WAIT: Duration = Duration::from_secs(3);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `cond` until it holds or the wait bound expires
async fn eventually<F: Fn() -> bool>(cond: F) {
    tokio::time::timeout(WAIT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Read until the peer closes, returning everything received
async fn read_to_eof(stream: &mut TcpStream) -> Vec<u8> {
    let mut out = Vec::new();
    let _ = tokio::time::timeout(WAIT, stream.read_to_end(&mut out))
        .await
        .expect("peer did not close");
    out
}

/// Consumes and discards input
struct Drain;

impl ClientHandler for Drain {
    async fn on_data(&self, conn: &Connection) -> bool {
        let _ = conn.read_bytes(1024).await;
        true
    }
}

async fn start<H: ClientHandler>(handler: H) -> (TcpServer<H>, SocketAddr) {
    let server = TcpServer::new(ServerConfig::default());
    let addr = server
        .start(AddressFamily::V4, handler, 0, "127.0.0.1")
        .await
        .unwrap();
    (server, addr)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn echo_one_byte_then_disconnect() {
    init_tracing();

    let handler = Callbacks::new(
        |_conn: Connection| async { true },
        |conn: Connection| async move {
            let mut byte = [0u8; 1];
            if let Ok(1) = conn.read(&mut byte).await {
                let _ = conn.send(&byte).await;
            }
            true
        },
        |_conn: Connection| async { false },
    );
    let (server, addr) = start(handler).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(&[0x41]).await.unwrap();

    let mut reply = [0u8; 1];
    tokio::time::timeout(WAIT, client.read_exact(&mut reply))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply[0], 0x41);
    assert_eq!(server.client_count(), 1);

    drop(client);
    eventually(|| server.client_count() == 0).await;

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_unblocks_idle_accept() {
    init_tracing();
    let (server, addr) = start(Drain).await;

    // Give the accept loop time to park in accept()
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(WAIT, server.stop())
        .await
        .expect("stop did not return");

    assert!(!server.is_running());
    assert!(server.local_addr().is_none());
    assert_eq!(server.client_count(), 0);
    assert_eq!(server.stats().total_connections, 0);

    // The listening socket is gone
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_drains_every_client() {
    init_tracing();
    let (server, addr) = start(Drain).await;

    let mut clients = Vec::new();
    for i in 0..10u8 {
        let mut client = TcpStream::connect(addr).await.unwrap();
        // Half of them are mid-traffic when stop lands
        if i % 2 == 0 {
            client.write_all(b"in flight").await.unwrap();
        }
        clients.push(client);
    }
    eventually(|| server.client_count() == 10).await;

    tokio::time::timeout(WAIT, server.stop())
        .await
        .expect("stop did not return");

    assert!(server.registry().is_empty());
    assert!(server.local_addr().is_none());

    for client in &mut clients {
        read_to_eof(client).await;
    }
}

/// Admission callback that refuses everyone
struct RejectAll;

impl ClientHandler for RejectAll {
    async fn on_connect(&self, _conn: &Connection) -> bool {
        false
    }

    async fn on_data(&self, _conn: &Connection) -> bool {
        unreachable!("rejected clients are never served")
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_connection_is_never_registered() {
    init_tracing();
    let (server, addr) = start(RejectAll).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    read_to_eof(&mut client).await;

    eventually(|| server.stats().rejected_connections == 1).await;
    assert_eq!(server.client_count(), 0);
    // Refused by the admission callback, not by the connection limit
    assert_eq!(server.stats().rejected_at_limit, 0);

    let report = server.send_to_all(b"anyone?").await;
    assert_eq!(report.recipients(), 0);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn broadcast_skips_closed_client_which_then_deregisters() {
    init_tracing();
    let (server, addr) = start(Drain).await;

    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(TcpStream::connect(addr).await.unwrap());
    }
    eventually(|| server.client_count() == 3).await;

    let ids = server.client_ids();
    let closed = ids[1];
    server.connection(closed).unwrap().close();

    let report = server.send_to_all_text("news").await;
    assert_eq!(report.delivered, 2);
    assert_eq!(report.failed, 1);

    eventually(|| !server.registry().contains(closed)).await;
    assert_eq!(server.client_count(), 2);

    // Registration order matches connect order here: skip the closed one
    for (i, client) in clients.iter_mut().enumerate() {
        if i == 1 {
            assert!(read_to_eof(client).await.is_empty());
        } else {
            let mut buf = [0u8; 4];
            client.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"news");
        }
    }

    server.stop().await;
}

/// Keeps connections whose peer stopped sending
struct Keeper {
    kept: Arc<Mutex<Vec<Connection>>>,
}

impl ClientHandler for Keeper {
    async fn on_data(&self, conn: &Connection) -> bool {
        let mut buf = [0u8; 64];
        let _ = conn.read(&mut buf).await;
        true
    }

    async fn on_shutdown(&self, conn: &Connection) -> bool {
        self.kept.lock().unwrap().push(conn.clone());
        true
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_callback_can_take_the_connection() {
    init_tracing();
    let kept = Arc::new(Mutex::new(Vec::new()));
    let (server, addr) = start(Keeper {
        kept: Arc::clone(&kept),
    })
    .await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    eventually(|| server.client_count() == 1).await;

    // Half-close: the client can still read
    client.shutdown().await.unwrap();
    eventually(|| server.client_count() == 0).await;

    let kept = kept.lock().unwrap().pop().expect("connection handed over");
    assert_eq!(kept.state(), ConnectionState::Detached);

    kept.send_text("goodbye").await.unwrap();
    kept.close();
    assert_eq!(read_to_eof(&mut client).await, b"goodbye");

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn broadcast_never_writes_into_a_handed_off_connection() {
    const LEN: usize = 32 * 1024 * 1024;
    init_tracing();
    let kept = Arc::new(Mutex::new(Vec::new()));
    let (server, addr) = start(Keeper {
        kept: Arc::clone(&kept),
    })
    .await;
    let server = Arc::new(server);

    // Registration order is slow first, then the one that will be handed off
    let mut slow = TcpStream::connect(addr).await.unwrap();
    eventually(|| server.client_count() == 1).await;
    let mut leaving = TcpStream::connect(addr).await.unwrap();
    eventually(|| server.client_count() == 2).await;

    // `slow` is not reading, so the broadcast stalls on it
    let broadcaster = Arc::clone(&server);
    let broadcast = tokio::spawn(async move { broadcaster.send_to_all(&vec![1u8; LEN]).await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    leaving.shutdown().await.unwrap();
    eventually(|| server.client_count() == 1).await;
    let handed_off = kept.lock().unwrap().pop().expect("connection handed over");
    assert_eq!(handed_off.state(), ConnectionState::Detached);

    let mut received = vec![0u8; LEN];
    tokio::time::timeout(WAIT, slow.read_exact(&mut received))
        .await
        .unwrap()
        .unwrap();

    let report = tokio::time::timeout(WAIT, broadcast).await.unwrap().unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(server.stats().broadcast_skipped, 1);

    // Only what the new owner wrote reaches the handed-off peer
    handed_off.send_text("yours now").await.unwrap();
    handed_off.close();
    assert_eq!(read_to_eof(&mut leaving).await, b"yours now");

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_clients_get_unique_ids() {
    init_tracing();
    let (server, addr) = start(Drain).await;
    let server = Arc::new(server);

    let mut tasks = Vec::new();
    for _ in 0..20 {
        tasks.push(tokio::spawn(async move {
            let mut client = TcpStream::connect(addr).await.unwrap();
            client.write_all(b"hello").await.unwrap();
            client
        }));
    }

    let mut clients = Vec::new();
    for task in tasks {
        clients.push(task.await.unwrap());
    }
    eventually(|| server.client_count() == 20).await;

    let ids: HashSet<_> = server.client_ids().into_iter().collect();
    assert_eq!(ids.len(), 20);

    // Disconnect half; the rest stay registered
    clients.truncate(10);
    eventually(|| server.client_count() == 10).await;

    let stats = server.stats();
    assert_eq!(stats.total_connections, 20);
    assert_eq!(stats.disconnected, 10);

    server.stop().await;
    assert!(server.registry().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connector_talks_to_server() {
    init_tracing();

    let handler = Callbacks::new(
        |_conn: Connection| async { true },
        |conn: Connection| async move {
            match conn.read_bytes(64).await {
                Ok(data) if !data.is_empty() => conn.send(&data).await.is_ok(),
                _ => true,
            }
        },
        |_conn: Connection| async { false },
    );
    let (server, addr) = start(handler).await;

    let conn = tcp_hub::client::connect("127.0.0.1", addr.port())
        .await
        .unwrap();
    conn.send_text("round trip").await.unwrap();

    let echoed = tokio::time::timeout(WAIT, conn.read_string(64))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(echoed, "round trip");

    conn.close();
    eventually(|| server.client_count() == 0).await;
    server.stop().await;
}
