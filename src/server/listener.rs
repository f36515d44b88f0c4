//! Server listener
//!
//! Binds the listening socket and runs the accept loop that turns inbound
//! connections into registered clients.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use socket2::SockRef;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::connection::{AddressFamily, Connection};
use crate::error::{Error, Result};
use crate::registry::ClientRegistry;
use crate::server::config::ServerConfig;
use crate::server::handler::ClientHandler;
use crate::server::worker::ClientWorker;
use crate::stats::{RejectReason, ServerMetrics};

/// Create, bind and listen on a socket for `addr`
///
/// An IPv6 socket is dual-stack when `family` is [`AddressFamily::Any`]
/// and IPv6-only when it is [`AddressFamily::V6`].
pub(crate) fn bind_listener(
    family: AddressFamily,
    addr: SocketAddr,
    config: &ServerConfig,
) -> Result<TcpListener> {
    let bind_err = |source| Error::Bind { addr, source };

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(bind_err)?;

    if addr.is_ipv6() {
        SockRef::from(&socket)
            .set_only_v6(family == AddressFamily::V6)
            .map_err(bind_err)?;
    }
    if config.reuse_addr {
        socket.set_reuseaddr(true).map_err(bind_err)?;
    }

    socket.bind(addr).map_err(bind_err)?;
    socket
        .listen(config.backlog)
        .map_err(|source| Error::Listen { addr, source })
}

/// Source of inbound connections for the accept loop
pub(crate) trait Acceptor: Send + Sync + 'static {
    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;
}

impl Acceptor for TcpListener {
    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

/// Handle to a running accept loop
pub(crate) struct AcceptHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl AcceptHandle {
    /// Signal the loop, which drops the listening socket, and wait for it to exit
    pub(crate) async fn stop(self) {
        let _ = self.shutdown.send(());

        if let Err(e) = self.task.await {
            if e.is_panic() {
                tracing::error!("Accept loop panicked");
            }
        }
    }

    /// Cancel the loop without waiting
    pub(crate) fn abort(self) {
        let _ = self.shutdown.send(());
        self.task.abort();
    }
}

/// Accept loop state
pub(crate) struct AcceptLoop<H> {
    handler: Arc<H>,
    registry: Arc<ClientRegistry>,
    metrics: Arc<ServerMetrics>,
    config: ServerConfig,
}

impl<H: ClientHandler> AcceptLoop<H> {
    pub(crate) fn new(
        handler: Arc<H>,
        registry: Arc<ClientRegistry>,
        metrics: Arc<ServerMetrics>,
        config: ServerConfig,
    ) -> Self {
        Self {
            handler,
            registry,
            metrics,
            config,
        }
    }

    /// Run the loop on a new task
    pub(crate) fn spawn<L: Acceptor>(self, listener: L) -> AcceptHandle {
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(self.run(listener, shutdown_rx));
        AcceptHandle { shutdown, task }
    }

    async fn run<L: Acceptor>(self, listener: L, mut shutdown: oneshot::Receiver<()>) {
        let mut listener = Some(listener);

        while self.registry.is_running() {
            let Some(active) = listener.as_ref() else {
                // Listener closed after a fault; nothing left to accept on
                let _ = shutdown.await;
                break;
            };

            let accepted = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                accepted = active.accept() => accepted,
            };

            match accepted {
                Ok((socket, peer_addr)) => {
                    // A stop during admission drops the connection, closing it
                    tokio::select! {
                        biased;
                        _ = &mut shutdown => break,
                        _ = self.handle_connection(socket, peer_addr) => {}
                    }
                }
                Err(e) if self.registry.is_running() => {
                    tracing::error!(error = %e, "Accept failed, closing listener");
                    listener = None;
                }
                Err(_) => break,
            }
        }

        tracing::debug!("Accept loop stopped");
    }

    async fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        self.metrics.record_accept();

        if self.config.at_capacity(self.registry.len()) {
            self.reject(peer_addr, RejectReason::Limit);
            return;
        }

        if let Err(e) = self.configure_socket(&socket) {
            tracing::warn!(peer = %peer_addr, error = %e, "Failed to configure socket");
        }

        let connection = Connection::with_peer_addr(socket, peer_addr);

        if !self.handler.on_connect(&connection).await {
            connection.close();
            self.reject(peer_addr, RejectReason::Handler);
            return;
        }

        let inserted = self.registry.insert(connection, |id, connection| {
            ClientWorker::new(id, connection, Arc::clone(&self.handler))
                .spawn(Arc::clone(&self.registry), Arc::clone(&self.metrics))
        });

        match inserted {
            Ok(id) => {
                tracing::debug!(client_id = %id, peer = %peer_addr, "New client");
            }
            Err(connection) => {
                // Server stopped between accept and registration
                tracing::debug!(peer = %peer_addr, "Server stopping, dropping connection");
                connection.close();
            }
        }
    }

    fn reject(&self, peer_addr: SocketAddr, reason: RejectReason) {
        self.metrics.record_reject(reason);

        match reason {
            RejectReason::Limit => {
                tracing::warn!(peer = %peer_addr, reason = %reason, "Connection rejected")
            }
            RejectReason::Handler => {
                tracing::debug!(peer = %peer_addr, reason = %reason, "Connection rejected")
            }
        }
    }

    fn configure_socket(&self, socket: &TcpStream) -> io::Result<()> {
        if self.config.tcp_nodelay {
            socket.set_nodelay(true)?;
        }

        Ok(())
    }
}
