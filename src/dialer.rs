//! Datacenter resolution and outbound dialing
//!
//! A routing id maps to one of a small fixed set of datacenter endpoints.
//! Exactly one connection attempt is made per session: no retry, no fallback.

use socket2::{SockRef, TcpKeepalive};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;

use crate::error::{ProxyError, Result};
use crate::logger::log;

pub const TG_DATACENTER_PORT: u16 = 443;

const TG_DATACENTERS_V4: [Ipv4Addr; 5] = [
    Ipv4Addr::new(149, 154, 175, 50),
    Ipv4Addr::new(149, 154, 167, 51),
    Ipv4Addr::new(149, 154, 175, 100),
    Ipv4Addr::new(149, 154, 167, 91),
    Ipv4Addr::new(149, 154, 171, 5),
];

const TG_DATACENTERS_V6: [Ipv6Addr; 5] = [
    Ipv6Addr::new(0x2001, 0x0b28, 0xf23d, 0xf001, 0, 0, 0, 0x000a),
    Ipv6Addr::new(0x2001, 0x067c, 0x04e8, 0xf002, 0, 0, 0, 0x000a),
    Ipv6Addr::new(0x2001, 0x0b28, 0xf23d, 0xf003, 0, 0, 0, 0x000a),
    Ipv6Addr::new(0x2001, 0x067c, 0x04e8, 0xf004, 0, 0, 0, 0x000a),
    Ipv6Addr::new(0x2001, 0x0b28, 0xf23f, 0xf005, 0, 0, 0, 0x000a),
];

/// TCP keepalive interval for proxied sockets
pub(crate) const TCP_KEEPALIVE_SECS: u64 = 15;

/// Known datacenter endpoints plus operator overrides
#[derive(Debug, Clone)]
pub struct DatacenterTable {
    v4: Vec<SocketAddr>,
    v6: Vec<SocketAddr>,
    overrides: HashMap<i16, SocketAddr>,
}

impl Default for DatacenterTable {
    fn default() -> Self {
        Self::telegram()
    }
}

impl DatacenterTable {
    /// The public production datacenters
    pub fn telegram() -> Self {
        let v4 = TG_DATACENTERS_V4
            .iter()
            .map(|ip| SocketAddr::new(IpAddr::V4(*ip), TG_DATACENTER_PORT))
            .collect();
        let v6 = TG_DATACENTERS_V6
            .iter()
            .map(|ip| SocketAddr::new(IpAddr::V6(*ip), TG_DATACENTER_PORT))
            .collect();
        Self::new(v4, v6)
    }

    /// Custom table; entry `i` serves datacenter `i + 1`
    pub fn new(v4: Vec<SocketAddr>, v6: Vec<SocketAddr>) -> Self {
        Self {
            v4,
            v6,
            overrides: HashMap::new(),
        }
    }

    /// Route `dc` to `addr` regardless of address family
    pub fn with_override(mut self, dc: i16, addr: SocketAddr) -> Self {
        self.overrides.insert(dc, addr);
        self
    }

    /// Resolve a routing id. Negative ids share the endpoint of their
    /// absolute value; an exact override wins over both.
    pub fn resolve(&self, dc: i16, prefer_ipv6: bool) -> Result<SocketAddr> {
        if let Some(addr) = self.overrides.get(&dc) {
            return Ok(*addr);
        }
        if let Some(addr) = self.overrides.get(&(dc.unsigned_abs() as i16)) {
            return Ok(*addr);
        }

        let table = if prefer_ipv6 { &self.v6 } else { &self.v4 };
        let idx = dc.unsigned_abs() as usize;
        if idx == 0 || idx > table.len() {
            return Err(ProxyError::Dial(format!("unknown datacenter {}", dc)));
        }
        Ok(table[idx - 1])
    }
}

/// Apply TCP_NODELAY and keepalive to a proxied socket. Failures are ignored.
pub(crate) fn tune_socket(stream: &TcpStream, tcp_nodelay: bool) {
    if tcp_nodelay {
        let _ = stream.set_nodelay(true);
    }
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(TCP_KEEPALIVE_SECS))
        .with_interval(Duration::from_secs(TCP_KEEPALIVE_SECS));
    let _ = SockRef::from(stream).set_tcp_keepalive(&keepalive);
}

/// Open a single TCP connection bounded by `timeout`.
pub async fn dial(addr: SocketAddr, timeout: Duration, tcp_nodelay: bool) -> Result<TcpStream> {
    let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            log::debug!(remote = %addr, error = %e, "TCP connect failed");
            return Err(ProxyError::Dial(format!("cannot connect to {}: {}", addr, e)));
        }
        Err(_) => {
            log::debug!(remote = %addr, "TCP connect timeout");
            return Err(ProxyError::Dial(format!(
                "connect to {} timed out after {:?}",
                addr, timeout
            )));
        }
    };
    tune_socket(&stream, tcp_nodelay);
    Ok(stream)
}

/// Resolve `dc` and connect to it.
pub async fn dial_datacenter(
    table: &DatacenterTable,
    dc: i16,
    prefer_ipv6: bool,
    timeout: Duration,
    tcp_nodelay: bool,
) -> Result<(TcpStream, SocketAddr)> {
    let addr = table.resolve(dc, prefer_ipv6)?;
    let stream = dial(addr, timeout, tcp_nodelay).await?;
    log::debug!(dc = dc, remote = %addr, "Connected to datacenter");
    Ok((stream, addr))
}
