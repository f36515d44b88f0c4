//! Server configuration

use std::time::Duration;

/// Listen backlog used when none is configured (matches tokio's `TcpListener::bind`)
pub const DEFAULT_BACKLOG: u32 = 1024;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum concurrent clients (0 = unlimited)
    pub max_connections: usize,

    /// Pending-connection queue length for the listening socket
    pub backlog: u32,

    /// Set SO_REUSEADDR on the listening socket
    pub reuse_addr: bool,

    /// Enable TCP_NODELAY on accepted sockets (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Per-recipient limit for broadcast sends (None = wait indefinitely)
    ///
    /// A recipient that does not accept the data in time is closed.
    pub send_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 0, // Unlimited
            backlog: DEFAULT_BACKLOG,
            reuse_addr: true,
            tcp_nodelay: true,
            send_timeout: None,
        }
    }
}

impl ServerConfig {
    /// Set maximum concurrent clients
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set listen backlog
    pub fn backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog.max(1);
        self
    }

    /// Enable or disable SO_REUSEADDR
    pub fn reuse_addr(mut self, enabled: bool) -> Self {
        self.reuse_addr = enabled;
        self
    }

    /// Enable or disable TCP_NODELAY
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }

    /// Set broadcast send timeout
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    /// Whether a new client would exceed the connection limit
    pub fn at_capacity(&self, current: usize) -> bool {
        self.max_connections > 0 && current >= self.max_connections
    }
}
