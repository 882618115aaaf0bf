//! TCP liveness scanning.
//!
//! Checks which hosts of an address range accept connections on a port,
//! using a bounded fan-out of connect probes.

use crate::error::GrabError;
use futures_util::stream::{self, StreamExt};
use ipnet::IpNet;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;

/// Largest number of addresses a single scan will expand to.
pub const MAX_SCAN_HOSTS: usize = 65_536;

/// Whether `ip:port` accepts a TCP connection within `timeout`.
pub async fn scan_host(ip: IpAddr, port: u16, timeout: Duration) -> bool {
    let addr = SocketAddr::new(ip, port);
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

/// Expand a range expression into addresses.
///
/// Accepted forms:
/// - CIDR: `192.168.1.0/24` (network and broadcast addresses excluded)
/// - Dash range on the last octet: `192.168.1.10-20`
/// - A single address
pub fn parse_range(range: &str) -> Result<Vec<IpAddr>, GrabError> {
    let range = range.trim();
    let bad = |reason: &str| GrabError::invalid_argument("range", format!("'{}': {}", range, reason));

    if range.contains('/') {
        let net: IpNet = range.parse().map_err(|_| bad("invalid CIDR"))?;
        let host_bits = net.max_prefix_len() - net.prefix_len();
        if host_bits > 16 {
            return Err(bad("range is too large to scan"));
        }
        return Ok(net.hosts().collect());
    }

    if let Some((start, end)) = range.split_once('-') {
        let start: Ipv4Addr = start.trim().parse().map_err(|_| bad("invalid start address"))?;
        let last: u8 = end.trim().parse().map_err(|_| bad("range end must be an octet"))?;
        let [a, b, c, first] = start.octets();
        if last < first {
            return Err(bad("range end is before its start"));
        }
        return Ok((first..=last)
            .map(|d| IpAddr::V4(Ipv4Addr::new(a, b, c, d)))
            .collect());
    }

    let ip: IpAddr = range.parse().map_err(|_| bad("not an address, CIDR or dash range"))?;
    Ok(vec![ip])
}

/// Probe every address of `range` and return the ones that answered.
///
/// At most `limit` probes are in flight at a time.
///
/// # Errors
///
/// Returns `InvalidArgument` for unparsable or oversized ranges and for a
/// zero `limit`.
pub async fn scan_range(
    range: &str,
    port: u16,
    timeout: Duration,
    limit: usize,
) -> Result<HashSet<IpAddr>, GrabError> {
    if limit == 0 {
        return Err(GrabError::invalid_argument("limit", "limit must be at least 1"));
    }
    let hosts = parse_range(range)?;
    if hosts.len() > MAX_SCAN_HOSTS {
        return Err(GrabError::invalid_argument("range", "range is too large to scan"));
    }
    tracing::debug!(range, port, hosts = hosts.len(), "scanning");

    let alive = stream::iter(hosts)
        .map(|ip| async move { (ip, scan_host(ip, port, timeout).await) })
        .buffer_unordered(limit)
        .filter_map(|(ip, up)| async move { up.then_some(ip) })
        .collect::<HashSet<_>>()
        .await;

    Ok(alive)
}
