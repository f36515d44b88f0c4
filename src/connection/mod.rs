//! Client connections
//!
//! [`Connection`] is the byte-stream endpoint handed to handler callbacks.
//! Its [`ConnectionState`] records whether the server still manages it.

pub mod address;
pub mod handle;
pub mod state;

pub use address::{resolve, resolve_all, AddressFamily};
pub use handle::{Connection, PeekOutcome};
pub use state::ConnectionState;
