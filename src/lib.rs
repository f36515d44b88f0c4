//! Multi-client TCP server library
//!
//! `tcp-hub` accepts TCP connections, runs one worker task per connected
//! client, and lets the application react to each client through a
//! [`ClientHandler`] or broadcast to all of them at once. The byte stream is
//! opaque: there is no framing, protocol parsing or queuing.
//!
//! # Example
//!
//! ```ignore
//! use tcp_hub::{AddressFamily, ClientHandler, Connection, ServerConfig, TcpServer};
//!
//! struct Echo;
//!
//! impl ClientHandler for Echo {
//!     async fn on_data(&self, conn: &Connection) -> bool {
//!         if let Ok(data) = conn.read_bytes(4096).await {
//!             let _ = conn.send(&data).await;
//!         }
//!         true
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> tcp_hub::Result<()> {
//!     let server = TcpServer::new(ServerConfig::default());
//!     let addr = server.start(AddressFamily::Any, Echo, 7000, "").await?;
//!     println!("listening on {}", addr);
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.stop().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod connection;
pub mod error;
pub mod registry;
pub mod server;
pub mod stats;

pub use client::TcpConnector;
pub use connection::{AddressFamily, Connection, ConnectionState, PeekOutcome};
pub use error::{Error, Result};
pub use registry::{ClientId, ClientInfo, ClientRegistry};
pub use server::{Callbacks, ClientHandler, ServerConfig, TcpServer};
pub use stats::{BroadcastReport, RejectReason, ServerStats};
