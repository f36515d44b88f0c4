//! Per-client worker
//!
//! One task per registered client. It waits for input, hands the
//! connection to the handler, and deregisters the client on every way out.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::connection::{Connection, PeekOutcome};
use crate::registry::{ClientId, ClientRegistry};
use crate::server::handler::ClientHandler;
use crate::stats::ServerMetrics;

/// Why a worker stopped serving its client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerExit {
    /// Peer closed; the handler took the connection over
    HandedOff,
    /// Peer closed; the server closed its side
    PeerClosed,
    /// `on_data` ended the session; the connection was detached
    Released,
    /// The connection was closed or detached locally (handler, broadcast failure, stop)
    Invalidated,
}

impl std::fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerExit::HandedOff => write!(f, "handed off"),
            WorkerExit::PeerClosed => write!(f, "peer closed"),
            WorkerExit::Released => write!(f, "released by handler"),
            WorkerExit::Invalidated => write!(f, "connection invalidated"),
        }
    }
}

/// Removes the client from the registry when the worker ends, panics included
struct Deregister {
    id: ClientId,
    registry: Arc<ClientRegistry>,
    metrics: Arc<ServerMetrics>,
}

impl Drop for Deregister {
    fn drop(&mut self) {
        self.metrics.record_disconnect();
        // false when shutdown already drained the entry
        self.registry.remove(self.id);
    }
}

pub(crate) struct ClientWorker<H> {
    id: ClientId,
    connection: Connection,
    handler: Arc<H>,
}

impl<H: ClientHandler> ClientWorker<H> {
    pub(crate) fn new(id: ClientId, connection: Connection, handler: Arc<H>) -> Self {
        Self {
            id,
            connection,
            handler,
        }
    }

    /// Start serving on a new task
    pub(crate) fn spawn(
        self,
        registry: Arc<ClientRegistry>,
        metrics: Arc<ServerMetrics>,
    ) -> JoinHandle<()> {
        // Spawning may run under the registry lock, and a future dropped
        // unpolled must not re-enter it: the guard only exists once running
        tokio::spawn(async move {
            let _guard = Deregister {
                id: self.id,
                registry,
                metrics,
            };
            let exit = self.serve().await;

            tracing::debug!(
                client_id = %self.id,
                peer = %self.connection.peer_addr(),
                reason = %exit,
                "Client worker finished"
            );
        })
    }

    pub(crate) async fn serve(&self) -> WorkerExit {
        while self.connection.is_open() {
            match self.connection.peek().await {
                PeekOutcome::Data => {}
                PeekOutcome::PeerClosed => return self.peer_gone().await,
                PeekOutcome::Reset(e) => {
                    tracing::debug!(client_id = %self.id, error = %e, "Client stream broken");
                    return self.peer_gone().await;
                }
                PeekOutcome::LocallyClosed => return WorkerExit::Invalidated,
            }

            // Closed concurrently between the peek and here
            if !self.connection.is_open() {
                return WorkerExit::Invalidated;
            }

            if !self.handler.on_data(&self.connection).await {
                self.connection.detach_after_writes().await;
                return WorkerExit::Released;
            }
        }

        WorkerExit::Invalidated
    }

    async fn peer_gone(&self) -> WorkerExit {
        if self.handler.on_shutdown(&self.connection).await {
            self.connection.detach_after_writes().await;
            WorkerExit::HandedOff
        } else {
            self.connection.close();
            WorkerExit::PeerClosed
        }
    }
}
