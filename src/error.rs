//! Error types
//!
//! Errors surfaced by server lifecycle and client connect operations.
//! Per-connection I/O reports `std::io::Error` directly.

use std::net::SocketAddr;

use crate::connection::AddressFamily;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for server and connector operations
#[derive(Debug)]
pub enum Error {
    /// Host name could not be resolved
    Resolve {
        host: String,
        source: std::io::Error,
    },
    /// Resolution succeeded but produced no address of the requested family
    NoAddress { host: String, family: AddressFamily },
    /// Creating or binding the listening socket failed
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    /// Switching the bound socket into listening mode failed
    Listen {
        addr: SocketAddr,
        source: std::io::Error,
    },
    /// Every resolved address refused the outbound connection
    Connect {
        host: String,
        port: u16,
        source: std::io::Error,
    },
    /// `start` was called on a server that is already running
    AlreadyRunning,
    /// Other I/O failure
    Io(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Resolve { host, source } => {
                write!(f, "Failed to resolve '{}': {}", host, source)
            }
            Error::NoAddress { host, family } => {
                write!(f, "No {} address found for '{}'", family, host)
            }
            Error::Bind { addr, source } => write!(f, "Bind failed on {}: {}", addr, source),
            Error::Listen { addr, source } => write!(f, "Listen failed on {}: {}", addr, source),
            Error::Connect { host, port, source } => {
                write!(f, "Connect to {}:{} failed: {}", host, port, source)
            }
            Error::AlreadyRunning => write!(f, "Server is already running"),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Resolve { source, .. }
            | Error::Bind { source, .. }
            | Error::Listen { source, .. }
            | Error::Connect { source, .. } => Some(source),
            Error::Io(e) => Some(e),
            Error::NoAddress { .. } | Error::AlreadyRunning => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}
