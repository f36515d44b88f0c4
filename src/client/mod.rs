//! TCP client side
//!
//! Outbound connections produce the same [`Connection`](crate::Connection)
//! handle the server gives its handlers.

pub mod connector;

pub use connector::{connect, TcpConnector};
