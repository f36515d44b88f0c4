//! TCP server
//!
//! Accepts connections, runs one worker task per registered client, and
//! broadcasts to every client.
//!
//! ```text
//!  TcpServer::start ──► bind_listener ──► AcceptLoop (task)
//!                                             │ accept()
//!                                             ▼
//!                                  ClientHandler::on_connect
//!                                             │ true
//!                                             ▼
//!                        ClientRegistry::insert ──► ClientWorker (task)
//!                                                       │ peek()
//!                                                       ▼
//!                                   on_data / on_shutdown ──► remove(self)
//! ```

pub mod config;
pub mod controller;
pub mod handler;
pub(crate) mod listener;
pub(crate) mod worker;

pub use config::ServerConfig;
pub use controller::TcpServer;
pub use handler::{Callbacks, ClientHandler};
