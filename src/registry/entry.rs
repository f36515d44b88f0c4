//! Client entry and identifier types
//!
//! This module defines the per-client record stored in the registry.

use std::net::SocketAddr;
use std::time::Instant;

use tokio::task::JoinHandle;

use crate::connection::Connection;

/// Identifier assigned to a registered client
///
/// Allocated from a per-registry counter starting at 1 and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub(crate) u64);

impl ClientId {
    /// Raw numeric value
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// A registered client: its connection and the worker serving it
pub struct ClientEntry {
    id: ClientId,
    connection: Connection,
    worker: Option<JoinHandle<()>>,
    connected_at: Instant,
}

impl ClientEntry {
    pub(super) fn new(id: ClientId, connection: Connection, worker: JoinHandle<()>) -> Self {
        Self {
            id,
            connection,
            worker: Some(worker),
            connected_at: Instant::now(),
        }
    }

    /// Client identifier
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// The client's connection
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// When the client was registered
    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    /// Snapshot of this entry
    pub fn info(&self) -> ClientInfo {
        ClientInfo {
            id: self.id,
            peer_addr: self.connection.peer_addr(),
            connected_at: self.connected_at,
        }
    }

    /// Close the connection and wait for the worker to finish
    ///
    /// Closing first is what unblocks a worker parked on a peek or read.
    pub async fn shutdown(mut self) {
        self.connection.close();

        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                if e.is_panic() {
                    tracing::warn!(client_id = %self.id, "Client worker panicked");
                }
            }
        }
    }
}

impl std::fmt::Debug for ClientEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientEntry")
            .field("id", &self.id)
            .field("connection", &self.connection)
            .field("has_worker", &self.worker.is_some())
            .finish()
    }
}

/// Read-only view of a registered client
#[derive(Debug, Clone)]
pub struct ClientInfo {
    /// Client identifier
    pub id: ClientId,
    /// Remote peer address
    pub peer_addr: SocketAddr,
    /// When the client was registered
    pub connected_at: Instant,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_display() {
        assert_eq!(ClientId(7).to_string(), "client-7");
        assert_eq!(ClientId(7).raw(), 7);
    }

    #[test]
    fn test_client_id_ordering() {
        assert!(ClientId(1) < ClientId(2));
    }
}
