//! Client handler trait
//!
//! Application logic plugs into the server through [`ClientHandler`]. The
//! server decides when each hook runs; the hooks decide what happens to the
//! client by their return value.

use std::future::Future;

use crate::connection::Connection;

/// Callbacks invoked by the server over a client's lifetime
///
/// ```ignore
/// struct Echo;
///
/// impl ClientHandler for Echo {
///     async fn on_data(&self, conn: &Connection) -> bool {
///         match conn.read_bytes(1024).await {
///             Ok(data) if !data.is_empty() => conn.send(&data).await.is_ok(),
///             _ => true, // the connection is closed; the worker notices
///         }
///     }
/// }
/// ```
pub trait ClientHandler: Send + Sync + 'static {
    /// A connection was just accepted
    ///
    /// Return `false` to close it without registering it.
    fn on_connect(&self, conn: &Connection) -> impl Future<Output = bool> + Send {
        let _ = conn;
        async { true }
    }

    /// Data is waiting on the connection
    ///
    /// Called repeatedly while the client is connected. The handler is
    /// expected to consume input; returning without reading makes the next
    /// call immediate. Return `false` to end the session: the server
    /// detaches the connection, leaving it to any clone the handler kept.
    fn on_data(&self, conn: &Connection) -> impl Future<Output = bool> + Send;

    /// The peer stopped sending
    ///
    /// Return `true` to take ownership of the still-open connection (the
    /// server detaches it); `false` lets the server close it.
    fn on_shutdown(&self, conn: &Connection) -> impl Future<Output = bool> + Send {
        let _ = conn;
        async { false }
    }
}

/// Handler assembled from three closures
///
/// Each closure receives a clone of the connection.
pub struct Callbacks<A, P, S> {
    admit: A,
    process: P,
    shutdown: S,
}

impl<A, P, S> Callbacks<A, P, S> {
    /// Build a handler from admission, processing and shutdown closures
    pub fn new(admit: A, process: P, shutdown: S) -> Self {
        Self {
            admit,
            process,
            shutdown,
        }
    }
}

impl<A, FA, P, FP, S, FS> ClientHandler for Callbacks<A, P, S>
where
    A: Fn(Connection) -> FA + Send + Sync + 'static,
    FA: Future<Output = bool> + Send + 'static,
    P: Fn(Connection) -> FP + Send + Sync + 'static,
    FP: Future<Output = bool> + Send + 'static,
    S: Fn(Connection) -> FS + Send + Sync + 'static,
    FS: Future<Output = bool> + Send + 'static,
{
    fn on_connect(&self, conn: &Connection) -> impl Future<Output = bool> + Send {
        (self.admit)(conn.clone())
    }

    fn on_data(&self, conn: &Connection) -> impl Future<Output = bool> + Send {
        (self.process)(conn.clone())
    }

    fn on_shutdown(&self, conn: &Connection) -> impl Future<Output = bool> + Send {
        (self.shutdown)(conn.clone())
    }
}
