//! Universal address parsing (§4.D): the `h1.h2.h3.h4.p1.p2` /
//! `h1::h2.p1.p2` format NFSv4 clients hand the server in SETCLIENTID's
//! `cb_location`.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use crate::error::Kind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniversalAddress {
    pub ip: IpAddr,
    pub port: u16,
}

impl UniversalAddress {
    pub fn socket_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::new(self.ip, self.port)
    }
}

impl fmt::Display for UniversalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl FromStr for UniversalAddress {
    type Err = Kind;

    /// Splits from the right: the last two dot-separated tokens are the
    /// port's high/low bytes (`port = p1*256 + p2`); everything before
    /// that is the host. A host containing `:` is parsed as IPv6 as-is
    /// (rejoining its tokens restores the original colon notation, since
    /// splitting on `.` never touches a `:`); otherwise it must be exactly
    /// four dot-separated octets (IPv4).
    fn from_str(addr: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = addr.split('.').collect();
        if parts.len() < 3 {
            return Err(Kind::Infrastructure);
        }
        let (host_parts, port_parts) = parts.split_at(parts.len() - 2);
        let p1: u16 = port_parts[0].parse().map_err(|_| Kind::Infrastructure)?;
        let p2: u16 = port_parts[1].parse().map_err(|_| Kind::Infrastructure)?;
        let port = p1 * 256 + p2;

        let host = host_parts.join(".");
        let ip = if host.contains(':') {
            IpAddr::V6(Ipv6Addr::from_str(&host).map_err(|_| Kind::Infrastructure)?)
        } else {
            IpAddr::V4(Ipv4Addr::from_str(&host).map_err(|_| Kind::Infrastructure)?)
        };

        Ok(Self { ip, port })
    }
}
