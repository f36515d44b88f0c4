//! Server lifecycle and broadcast
//!
//! [`TcpServer`] owns the listening socket's accept loop and the client
//! registry. It can be started and stopped repeatedly; each start takes a
//! fresh handler.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::Mutex;

use crate::connection::{resolve, AddressFamily, Connection};
use crate::error::{Error, Result};
use crate::registry::{ClientId, ClientInfo, ClientRegistry};
use crate::server::config::ServerConfig;
use crate::server::handler::ClientHandler;
use crate::server::listener::{bind_listener, AcceptHandle, AcceptLoop};
use crate::stats::{BroadcastReport, ServerMetrics, ServerStats};

/// State that exists only while the server runs
struct Running {
    accept: AcceptHandle,
    local_addr: SocketAddr,
}

/// Multi-client TCP server
///
/// ```ignore
/// let server = TcpServer::new(ServerConfig::default());
/// let addr = server.start(AddressFamily::V4, Echo, 7000, "127.0.0.1").await?;
/// server.send_to_all_text("hello everyone\n").await;
/// server.stop().await;
/// ```
pub struct TcpServer<H: ClientHandler> {
    config: ServerConfig,
    registry: Arc<ClientRegistry>,
    metrics: Arc<ServerMetrics>,
    /// Serializes start and stop
    lifecycle: Mutex<Option<Running>>,
    /// Bound address, readable without waiting on `lifecycle`
    local_addr: StdMutex<Option<SocketAddr>>,
    /// Keeps concurrent broadcasts from interleaving
    broadcast_lock: Mutex<()>,
    _handler: std::marker::PhantomData<fn(H)>,
}

impl<H: ClientHandler> TcpServer<H> {
    /// Create a stopped server
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            registry: Arc::new(ClientRegistry::new()),
            metrics: Arc::new(ServerMetrics::new()),
            lifecycle: Mutex::new(None),
            local_addr: StdMutex::new(None),
            broadcast_lock: Mutex::new(()),
            _handler: std::marker::PhantomData,
        }
    }

    /// Start listening and accepting clients
    ///
    /// An empty `bind_addr` listens on the family's wildcard address. Port 0
    /// picks an ephemeral port; the bound address is returned. Fails with
    /// [`Error::AlreadyRunning`] if the server is running, and leaves the
    /// server stopped on any resolve, bind or listen failure.
    pub async fn start(
        &self,
        family: AddressFamily,
        handler: H,
        port: u16,
        bind_addr: &str,
    ) -> Result<SocketAddr> {
        let mut lifecycle = self.lifecycle.lock().await;

        if lifecycle.is_some() {
            return Err(Error::AlreadyRunning);
        }

        let addr = resolve(family, bind_addr, port).await?;
        let listener = bind_listener(family, addr, &self.config)?;
        let local_addr = listener.local_addr()?;

        self.registry.set_running(true);

        let accept = AcceptLoop::new(
            Arc::new(handler),
            Arc::clone(&self.registry),
            Arc::clone(&self.metrics),
            self.config.clone(),
        )
        .spawn(listener);

        *lifecycle = Some(Running { accept, local_addr });
        self.set_local_addr(Some(local_addr));

        tracing::info!(addr = %local_addr, family = %family, "Server listening");

        Ok(local_addr)
    }

    /// Stop the server and disconnect every client
    ///
    /// Stops admitting, closes the listening socket and waits for the accept
    /// loop, then closes every client connection and waits for its worker.
    /// Does nothing if the server is not running.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;

        let Some(running) = lifecycle.take() else {
            return;
        };

        self.registry.set_running(false);
        self.set_local_addr(None);
        running.accept.stop().await;

        let entries = self.registry.drain();
        let clients = entries.len();

        // Close everything first so workers unwind in parallel
        for entry in &entries {
            entry.connection().close();
        }
        for entry in entries {
            entry.shutdown().await;
        }

        tracing::info!(addr = %running.local_addr, clients, "Server stopped");
    }

    /// Whether the server is running
    pub fn is_running(&self) -> bool {
        self.registry.is_running()
    }

    /// Address of the listening socket, `None` while stopped
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_local_addr(&self, addr: Option<SocketAddr>) {
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner) = addr;
    }

    /// Send `data` to every registered client
    ///
    /// Recipients are the clients registered when the broadcast starts, in
    /// registration order. A recipient detached in the meantime is skipped
    /// and never written to. A failed send closes that client only; its
    /// worker then deregisters it.
    pub async fn send_to_all(&self, data: &[u8]) -> BroadcastReport {
        let _serial = self.broadcast_lock.lock().await;
        let mut report = BroadcastReport::default();

        for (id, connection) in self.registry.connections() {
            match connection.send_managed(data, self.config.send_timeout).await {
                Ok(true) => report.delivered += 1,
                Ok(false) => {
                    report.skipped += 1;
                    tracing::debug!(client_id = %id, "Broadcast skipped detached client");
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::debug!(client_id = %id, error = %e, "Broadcast send failed");
                }
            }
        }

        self.metrics.record_broadcast(&report, data.len());
        report
    }

    /// Send a UTF-8 string to every registered client
    pub async fn send_to_all_text(&self, text: &str) -> BroadcastReport {
        self.send_to_all(text.as_bytes()).await
    }

    /// Send `data` to a single registered client
    pub async fn send_to(&self, id: ClientId, data: &[u8]) -> io::Result<()> {
        let not_found =
            || io::Error::new(io::ErrorKind::NotFound, format!("{} is not connected", id));

        let connection = self.registry.get(id).ok_or_else(not_found)?;
        if connection.send_managed(data, self.config.send_timeout).await? {
            Ok(())
        } else {
            Err(not_found())
        }
    }

    /// Look up a registered client's connection
    pub fn connection(&self, id: ClientId) -> Option<Connection> {
        self.registry.get(id)
    }

    /// Number of registered clients
    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    /// Identifiers of registered clients, in registration order
    pub fn client_ids(&self) -> Vec<ClientId> {
        self.registry.ids()
    }

    /// Info about registered clients
    pub fn clients(&self) -> Vec<ClientInfo> {
        self.registry.clients()
    }

    /// The client registry
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Current statistics
    pub fn stats(&self) -> ServerStats {
        self.metrics.snapshot(self.registry.len())
    }

    /// Server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

impl<H: ClientHandler> Drop for TcpServer<H> {
    /// Stop without waiting: the accept loop is cancelled and every client
    /// is closed; workers notice and exit on their own.
    fn drop(&mut self) {
        let Some(running) = self.lifecycle.get_mut().take() else {
            return;
        };

        self.registry.set_running(false);
        running.accept.abort();

        for entry in self.registry.drain() {
            entry.connection().close();
        }

        tracing::debug!(addr = %running.local_addr, "Server dropped while running");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    struct Sink;

    impl ClientHandler for Sink {
        async fn on_data(&self, conn: &Connection) -> bool {
            let _ = conn.read_bytes(256).await;
            true
        }
    }

    async fn wait_for_clients(server: &TcpServer<Sink>, n: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while server.client_count() != n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let server = TcpServer::new(ServerConfig::default());
        assert_ok!(server.start(AddressFamily::V4, Sink, 0, "127.0.0.1").await);

        let second = server.start(AddressFamily::V4, Sink, 0, "127.0.0.1").await;
        assert!(matches!(second, Err(Error::AlreadyRunning)));
        assert!(server.is_running());

        server.stop().await;
    }

    #[tokio::test]
    async fn test_start_bind_failure_leaves_stopped() {
        let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = blocker.local_addr().unwrap().port();
        let server = TcpServer::new(ServerConfig::default().reuse_addr(false));

        assert_err!(server.start(AddressFamily::V4, Sink, port, "127.0.0.1").await);
        assert!(!server.is_running());
        assert!(server.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_restartable() {
        let server = TcpServer::new(ServerConfig::default());
        server.stop().await;

        assert_ok!(server.start(AddressFamily::V4, Sink, 0, "127.0.0.1").await);
        server.stop().await;
        server.stop().await;
        assert!(!server.is_running());

        assert_ok!(server.start(AddressFamily::V4, Sink, 0, "127.0.0.1").await);
        assert!(server.is_running());
        server.stop().await;
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_client() {
        let server = TcpServer::new(ServerConfig::default());
        let addr = server
            .start(AddressFamily::V4, Sink, 0, "127.0.0.1")
            .await
            .unwrap();

        let mut a = TcpStream::connect(addr).await.unwrap();
        let mut b = TcpStream::connect(addr).await.unwrap();
        wait_for_clients(&server, 2).await;

        let report = server.send_to_all_text("ping").await;
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 0);

        for client in [&mut a, &mut b] {
            let mut buf = [0u8; 4];
            client.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"ping");
        }

        assert_eq!(server.stats().total_bytes_broadcast, 8);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_send_to_single_client() {
        let server = TcpServer::new(ServerConfig::default());
        let addr = server
            .start(AddressFamily::V4, Sink, 0, "127.0.0.1")
            .await
            .unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        wait_for_clients(&server, 1).await;
        let id = server.client_ids()[0];

        server.send_to(id, b"hi").await.unwrap();
        let mut buf = [0u8; 2];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");

        let err = server.send_to(ClientId(999), b"x").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);

        client.write_all(b"bye").await.unwrap();
        server.stop().await;
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let server = TcpServer::new(ServerConfig::default().max_connections(1));
        let addr = server
            .start(AddressFamily::V4, Sink, 0, "127.0.0.1")
            .await
            .unwrap();

        let _first = TcpStream::connect(addr).await.unwrap();
        wait_for_clients(&server, 1).await;

        let mut second = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 1];
        // Over-limit connections are closed straight away
        let n = tokio::time::timeout(Duration::from_secs(2), second.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);
        assert_eq!(server.client_count(), 1);
        assert_eq!(server.stats().rejected_connections, 1);
        assert_eq!(server.stats().rejected_at_limit, 1);

        server.stop().await;
    }

    #[tokio::test]
    async fn test_drop_closes_clients() {
        let server = TcpServer::new(ServerConfig::default());
        let addr = server
            .start(AddressFamily::V4, Sink, 0, "127.0.0.1")
            .await
            .unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        wait_for_clients(&server, 1).await;
        drop(server);

        let mut buf = [0u8; 1];
        let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);
    }
}
