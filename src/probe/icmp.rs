//! ICMP echo prober backed by `surge-ping`.

use std::net::IpAddr;
use std::time::Duration;

use surge_ping::{Client, Config, PingIdentifier, PingSequence, ICMP};
use tokio::time::timeout;

use super::{ProbeReport, Prober};

/// Resolve a hostname to an IP address.
///
/// IP literals are parsed directly; anything else goes through the system
/// resolver. Hostnames are re-resolved on every probe so address changes are
/// picked up without restarting the engine.
async fn resolve_host(host: &str) -> Result<IpAddr, std::io::Error> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }

    let addrs = tokio::net::lookup_host(format!("{host}:0")).await?;
    addrs
        .into_iter()
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses found"))
}

/// ICMP echo prober.
///
/// Sends one echo request per [`probe`](Prober::probe) call and measures the
/// round trip. Requires the platform privileges `surge-ping` needs for its
/// sockets (raw or unprivileged ICMP, depending on the OS).
#[derive(Debug, Default)]
pub struct IcmpProber;

impl IcmpProber {
    /// Create a new ICMP prober.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Prober for IcmpProber {
    async fn probe(&self, host: &str, probe_timeout: Duration) -> ProbeReport {
        let ip_addr = match resolve_host(host).await {
            Ok(ip) => ip,
            Err(e) => {
                tracing::debug!(host = %host, error = %e, "Hostname resolution failed");
                return ProbeReport::error(format!("dns resolution failed: {e}"), None);
            }
        };

        let client = match ip_addr {
            IpAddr::V4(_) => Client::new(&Config::default()),
            IpAddr::V6(_) => Client::new(&Config::builder().kind(ICMP::V6).build()),
        };
        let client = match client {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!(host = %host, error = %e, "ICMP client creation failed");
                return ProbeReport::error(format!("icmp client: {e}"), Some(ip_addr));
            }
        };

        let mut pinger = client.pinger(ip_addr, PingIdentifier(rand::random())).await;
        pinger.timeout(probe_timeout);

        match timeout(probe_timeout, pinger.ping(PingSequence(0), &[])).await {
            Ok(Ok((_, rtt))) => ProbeReport::reply(rtt, ip_addr),
            Ok(Err(surge_ping::SurgeError::Timeout { .. })) | Err(_) => {
                ProbeReport::timeout(ip_addr)
            }
            Ok(Err(e)) => ProbeReport::error(e.to_string(), Some(ip_addr)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_host_ipv4_literal() {
        let ip = resolve_host("127.0.0.1").await.unwrap();
        assert_eq!(ip, IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));
    }

    #[tokio::test]
    async fn test_resolve_host_ipv6_literal() {
        let ip = resolve_host("::1").await.unwrap();
        assert_eq!(ip, IpAddr::V6(std::net::Ipv6Addr::LOCALHOST));
    }

    #[tokio::test]
    async fn test_resolve_host_localhost() {
        let ip = resolve_host("localhost").await.unwrap();
        assert!(ip.is_loopback());
    }
}
