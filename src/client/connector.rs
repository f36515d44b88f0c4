//! Outbound TCP connector
//!
//! Resolves a host and connects to the first address that accepts,
//! optionally from a fixed local port.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::net::{TcpSocket, TcpStream};

use crate::connection::{resolve_all, AddressFamily, Connection};
use crate::error::{Error, Result};

/// Connection options for outbound clients
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    family: AddressFamily,
    bind_port: Option<u16>,
    tcp_nodelay: bool,
}

impl TcpConnector {
    /// Connector restricted to one address family
    pub fn new(family: AddressFamily) -> Self {
        Self {
            family,
            ..Default::default()
        }
    }

    /// Bind the local end to `port` before connecting
    pub fn bind_port(mut self, port: u16) -> Self {
        self.bind_port = Some(port);
        self
    }

    /// Enable TCP_NODELAY on the connected socket
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }

    /// Connect to `host:port`
    ///
    /// Every resolved address of the configured family is tried in order;
    /// the error from the last attempt is reported if none succeeds.
    pub async fn connect(&self, host: &str, port: u16) -> Result<Connection> {
        let addrs = resolve_all(self.family, host, port).await?;
        let mut last_err = None;

        for addr in addrs {
            match self.connect_addr(addr).await {
                Ok(stream) => {
                    tracing::debug!(host = host, peer = %addr, "Connected");
                    return Ok(Connection::with_peer_addr(stream, addr));
                }
                Err(e) => {
                    tracing::debug!(host = host, peer = %addr, error = %e, "Connect attempt failed");
                    last_err = Some(e);
                }
            }
        }

        Err(Error::Connect {
            host: host.to_string(),
            port,
            source: last_err
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address to try")),
        })
    }

    async fn connect_addr(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };

        if let Some(port) = self.bind_port {
            let local = if addr.is_ipv4() {
                SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), port)
            } else {
                SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), port)
            };
            socket.set_reuseaddr(true)?;
            socket.bind(local)?;
        }

        let stream = socket.connect(addr).await?;
        if self.tcp_nodelay {
            stream.set_nodelay(true)?;
        }

        Ok(stream)
    }
}

/// Connect to `host:port` over either address family
pub async fn connect(host: &str, port: u16) -> Result<Connection> {
    TcpConnector::new(AddressFamily::Any).connect(host, port).await
}
