//! Client registry implementation
//!
//! The authoritative table of connected clients. Presence of an entry is
//! what "connected" means to the server.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;

use super::entry::{ClientEntry, ClientId, ClientInfo};
use crate::connection::Connection;

struct RegistryState {
    /// Last identifier handed out
    last_id: u64,
    /// Live entries in insertion order
    entries: Vec<ClientEntry>,
}

/// Lock-guarded table of registered clients
///
/// Every mutation and whole-table traversal happens under one mutex, and no
/// operation holds it across an `.await`. The running flag is only written
/// while that mutex is held, so `insert` and `remove` observe it
/// consistently with `set_running`.
pub struct ClientRegistry {
    state: Mutex<RegistryState>,
    running: AtomicBool,
}

impl ClientRegistry {
    /// Create an empty, not-running registry
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState {
                last_id: 0,
                entries: Vec::new(),
            }),
            running: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // Entries are always left consistent, so a poisoned lock is still usable
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether new clients are being admitted
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Open or close the registry for inserts and removals
    pub fn set_running(&self, running: bool) {
        let _state = self.lock();
        self.running.store(running, Ordering::Release);
    }

    /// Register a connection and start its worker
    ///
    /// `start_worker` runs under the lock, after the identifier is assigned
    /// and before the entry becomes visible, so the worker cannot remove its
    /// own entry before it exists. If the registry is not running, the
    /// connection is handed back untouched for the caller to dispose of.
    pub fn insert<F>(&self, connection: Connection, start_worker: F) -> Result<ClientId, Connection>
    where
        F: FnOnce(ClientId, Connection) -> JoinHandle<()>,
    {
        let mut state = self.lock();

        if !self.is_running() {
            return Err(connection);
        }

        state.last_id += 1;
        let id = ClientId(state.last_id);
        let worker = start_worker(id, connection.clone());

        tracing::debug!(
            client_id = %id,
            peer = %connection.peer_addr(),
            clients = state.entries.len() + 1,
            "Client registered"
        );

        state.entries.push(ClientEntry::new(id, connection, worker));
        Ok(id)
    }

    /// Deregister a client
    ///
    /// The worker handle is detached, never awaited: workers call this on
    /// themselves. Returns `false` if the client is unknown or the registry
    /// is not running.
    pub fn remove(&self, id: ClientId) -> bool {
        let mut state = self.lock();

        if !self.is_running() {
            return false;
        }

        match state.entries.iter().position(|entry| entry.id() == id) {
            Some(index) => {
                // Dropping the JoinHandle detaches the task
                let entry = state.entries.remove(index);
                tracing::debug!(
                    client_id = %id,
                    peer = %entry.connection().peer_addr(),
                    clients = state.entries.len(),
                    "Client removed"
                );
                true
            }
            None => false,
        }
    }

    /// Apply `f` to every registered connection, in insertion order
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(ClientId, &Connection),
    {
        let state = self.lock();
        for entry in &state.entries {
            f(entry.id(), entry.connection());
        }
    }

    /// Consistent snapshot of every registered connection
    pub fn connections(&self) -> Vec<(ClientId, Connection)> {
        let mut snapshot = Vec::new();
        self.for_each(|id, conn| snapshot.push((id, conn.clone())));
        snapshot
    }

    /// Look up a registered connection
    pub fn get(&self, id: ClientId) -> Option<Connection> {
        self.lock()
            .entries
            .iter()
            .find(|entry| entry.id() == id)
            .map(|entry| entry.connection().clone())
    }

    /// Info about every registered client
    pub fn clients(&self) -> Vec<ClientInfo> {
        self.lock().entries.iter().map(ClientEntry::info).collect()
    }

    /// Identifiers of every registered client
    pub fn ids(&self) -> Vec<ClientId> {
        self.lock().entries.iter().map(ClientEntry::id).collect()
    }

    /// Check whether a client is registered
    pub fn contains(&self, id: ClientId) -> bool {
        self.lock().entries.iter().any(|entry| entry.id() == id)
    }

    /// Number of registered clients
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Check whether no client is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take every entry out of the registry
    ///
    /// Used by shutdown; the caller closes each connection and awaits its
    /// worker after the lock is released.
    pub fn drain(&self) -> Vec<ClientEntry> {
        std::mem::take(&mut self.lock().entries)
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}
