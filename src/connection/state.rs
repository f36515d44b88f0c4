//! Connection ownership state
//!
//! Tracks who is responsible for a client socket. A connection starts
//! `Open` under server management and ends either `Closed` (the socket was
//! shut down) or `Detached` (the server handed it to the application).

/// Lifecycle state of a [`Connection`](super::Connection)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Live and managed by the server
    Open,
    /// Shut down; every further read or write fails
    Closed,
    /// Released by the server without closing; the holder of a clone owns it
    Detached,
}

impl ConnectionState {
    /// Whether moving to `next` is allowed
    ///
    /// `Closed` is terminal. A detached connection can still be closed by
    /// its new owner, but never re-attached.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        matches!(
            (self, next),
            (ConnectionState::Open, ConnectionState::Closed)
                | (ConnectionState::Open, ConnectionState::Detached)
                | (ConnectionState::Detached, ConnectionState::Closed)
        )
    }

    /// Whether the socket is still usable for I/O
    pub fn is_usable(self) -> bool {
        !matches!(self, ConnectionState::Closed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Closed => write!(f, "closed"),
            ConnectionState::Detached => write!(f, "detached"),
        }
    }
}
