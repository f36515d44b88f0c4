//! Address family selection and host resolution

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::error::{Error, Result};

/// IP family a server listens on or a client connects over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressFamily {
    /// IPv4 only
    V4,
    /// IPv6 only
    V6,
    /// Either family; a wildcard listener is dual-stack
    #[default]
    Any,
}

impl AddressFamily {
    /// Check whether an address belongs to this family
    pub fn matches(self, addr: &SocketAddr) -> bool {
        match self {
            AddressFamily::V4 => addr.is_ipv4(),
            AddressFamily::V6 => addr.is_ipv6(),
            AddressFamily::Any => true,
        }
    }

    /// Wildcard address for this family
    pub fn unspecified(self, port: u16) -> SocketAddr {
        let ip = match self {
            AddressFamily::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            AddressFamily::V6 | AddressFamily::Any => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        SocketAddr::new(ip, port)
    }
}

impl std::fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressFamily::V4 => write!(f, "IPv4"),
            AddressFamily::V6 => write!(f, "IPv6"),
            AddressFamily::Any => write!(f, "IPv4/IPv6"),
        }
    }
}

/// Resolve `host:port` into every address matching `family`
///
/// An empty host yields the family's wildcard address.
pub async fn resolve_all(family: AddressFamily, host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    if host.is_empty() {
        return Ok(vec![family.unspecified(port)]);
    }

    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|source| Error::Resolve {
            host: host.to_string(),
            source,
        })?
        .filter(|addr| family.matches(addr))
        .collect();

    if addrs.is_empty() {
        return Err(Error::NoAddress {
            host: host.to_string(),
            family,
        });
    }

    Ok(addrs)
}

/// Resolve `host:port` into the first address matching `family`
pub async fn resolve(family: AddressFamily, host: &str, port: u16) -> Result<SocketAddr> {
    let addrs = resolve_all(family, host, port).await?;
    // resolve_all never returns an empty list
    Ok(addrs[0])
}
