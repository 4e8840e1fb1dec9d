use crate::errors::{DaemonError, Result};
use futures_util::future::join_all;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

const SCAN_BATCH_SIZE: usize = 32;
const SCAN_CONNECT_TIMEOUT: Duration = Duration::from_millis(180);

#[derive(Debug, Clone, PartialEq)]
pub struct ScanResult {
    pub prefix: String,
    pub hits: Vec<String>,
}

/// Probe all 254 addresses on the host's local /24 for an open `port`.
pub async fn scan_port(port: u16) -> Result<ScanResult> {
    let local_ip = select_local_ipv4()?;
    let octets = local_ip.octets();
    let prefix = format!("{}.{}.{}.", octets[0], octets[1], octets[2]);

    let mut hits = Vec::new();

    for batch_start in (1..=254u16).step_by(SCAN_BATCH_SIZE) {
        let batch_end = (batch_start + SCAN_BATCH_SIZE as u16 - 1).min(254);
        let probes = (batch_start..=batch_end).map(|i| {
            let candidate = format!("{}{}", prefix, i);
            probe_one(candidate, port)
        });

        let results = join_all(probes).await;
        for hit in results.into_iter().flatten() {
            hits.push(hit);
        }
    }

    debug!(%prefix, port, hits = hits.len(), "subnet scan complete");
    Ok(ScanResult { prefix, hits })
}

async fn probe_one(ip: String, port: u16) -> Option<String> {
    let addr = format!("{}:{}", ip, port);
    match tokio::time::timeout(SCAN_CONNECT_TIMEOUT, TcpStream::connect(&addr)).await {
        Ok(Ok(_stream)) => Some(ip),
        _ => None,
    }
}

/// Detect the host's local IPv4 address, re-evaluated on every call.
pub fn detect_local_ip() -> Result<Ipv4Addr> {
    select_local_ipv4()
}

/// Enumerate the host's non-loopback IPv4 addresses and pick the first one
/// in a private range (10/8, 172.16/12, 192.168/16); fall back to the first
/// IPv4 address found; fail with `NoLocalIpv4` if there are none.
fn select_local_ipv4() -> Result<Ipv4Addr> {
    let candidates = local_ipv4_addresses()?;

    if let Some(private) = candidates.iter().find(|ip| is_private(ip)) {
        return Ok(*private);
    }

    candidates.into_iter().next().ok_or(DaemonError::NoLocalIpv4)
}

fn is_private(ip: &Ipv4Addr) -> bool {
    let o = ip.octets();
    o[0] == 10 || (o[0] == 172 && (16..=31).contains(&o[1])) || (o[0] == 192 && o[1] == 168)
}

/// Enumerate non-loopback IPv4 addresses bound to local interfaces.
fn local_ipv4_addresses() -> Result<Vec<Ipv4Addr>> {
    let interfaces = local_ip_address::list_afinet_netifas().map_err(|_| DaemonError::NoLocalIpv4)?;

    let mut found = Vec::new();
    for (_name, addr) in interfaces {
        if let IpAddr::V4(ip) = addr {
            if !ip.is_loopback() && !found.contains(&ip) {
                found.push(ip);
            }
        }
    }

    if found.is_empty() {
        return Err(DaemonError::NoLocalIpv4);
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_ranges_recognized() {
        assert!(is_private(&Ipv4Addr::new(10, 0, 0, 5)));
        assert!(is_private(&Ipv4Addr::new(172, 16, 0, 1)));
        assert!(is_private(&Ipv4Addr::new(172, 31, 255, 255)));
        assert!(!is_private(&Ipv4Addr::new(172, 32, 0, 1)));
        assert!(is_private(&Ipv4Addr::new(192, 168, 1, 37)));
        assert!(!is_private(&Ipv4Addr::new(8, 8, 8, 8)));
    }

    #[tokio::test]
    async fn scan_hits_an_open_listener_in_range() {
        // This test binds a listener on 127.0.0.1 rather than a real LAN
        // address, so it exercises probe_one/batching directly rather than
        // select_local_ipv4 (which requires a real network route).
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                if listener.accept().await.is_err() {
                    break;
                }
            }
        });

        let hit = probe_one("127.0.0.1".to_string(), port).await;
        assert_eq!(hit, Some("127.0.0.1".to_string()));

        let miss = probe_one("127.0.0.1".to_string(), 1).await;
        assert_eq!(miss, None);
    }

    #[tokio::test]
    async fn batches_cover_all_254_addresses() {
        let mut total = 0;
        for batch_start in (1..=254u16).step_by(SCAN_BATCH_SIZE) {
            let batch_end = (batch_start + SCAN_BATCH_SIZE as u16 - 1).min(254);
            total += (batch_end - batch_start + 1) as usize;
        }
        assert_eq!(total, 254);
    }
}
