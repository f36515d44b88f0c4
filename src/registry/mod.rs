//! Client registry
//!
//! The registry owns every registered client: its [`Connection`](crate::Connection)
//! and the handle of the worker task serving it.
//!
//! # Architecture
//!
//! ```text
//!                        Arc<ClientRegistry>
//!                   ┌───────────────────────────┐
//!                   │ Mutex<{                   │
//!                   │   last_id,                │
//!                   │   entries: Vec<ClientEntry│
//!                   │     { id, conn, worker }> │
//!                   │ }>                        │
//!                   └─────────────┬─────────────┘
//!                                 │
//!         ┌───────────────────────┼───────────────────────┐
//!         │                       │                       │
//!         ▼                       ▼                       ▼
//!    [Accept loop]          [Client worker]          [TcpServer]
//!    insert()               remove(self id)          for_each() / drain()
//! ```
//!
//! A worker removes its own entry, so `remove` only detaches the worker
//! handle. Awaiting workers is left to shutdown, after the entries have
//! been drained and the lock released.

pub mod entry;
pub mod store;

pub use entry::{ClientEntry, ClientId, ClientInfo};
pub use store::ClientRegistry;
