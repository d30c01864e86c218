//! Probe primitive: send one echo request, await one reply or timeout.
//!
//! The engine treats probing as an external contract behind the [`Prober`]
//! trait. Probe failures (timeout, unreachable, DNS error) are observation
//! results, not errors: they come back as [`ProbeOutcome`] variants and feed
//! availability tracking. Only infrastructure problems surface as errors
//! elsewhere in the engine.

mod icmp;

use std::net::IpAddr;
use std::time::Duration;

pub use icmp::IcmpProber;

/// Result of a single probe attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    /// The target replied within the timeout.
    Reply(Duration),
    /// No reply within the timeout.
    Timeout,
    /// The probe could not be carried out (DNS failure, unreachable network,
    /// missing raw-socket privileges, ...).
    Error(String),
}

impl ProbeOutcome {
    /// Whether this outcome is a successful reply.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Reply(_))
    }

    /// Round-trip time in milliseconds, if the probe succeeded.
    pub fn rtt_ms(&self) -> Option<f64> {
        match self {
            Self::Reply(rtt) => Some(rtt.as_secs_f64() * 1000.0),
            _ => None,
        }
    }
}

/// One probe attempt plus the address it was carried out against.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    /// What happened.
    pub outcome: ProbeOutcome,
    /// The address the host resolved to, when resolution succeeded.
    pub resolved: Option<IpAddr>,
}

impl ProbeReport {
    /// A successful reply from `addr`.
    pub fn reply(rtt: Duration, addr: IpAddr) -> Self {
        Self {
            outcome: ProbeOutcome::Reply(rtt),
            resolved: Some(addr),
        }
    }

    /// A timed-out probe against `addr`.
    pub fn timeout(addr: IpAddr) -> Self {
        Self {
            outcome: ProbeOutcome::Timeout,
            resolved: Some(addr),
        }
    }

    /// A probe that failed before or during transmission.
    pub fn error(message: impl Into<String>, addr: Option<IpAddr>) -> Self {
        Self {
            outcome: ProbeOutcome::Error(message.into()),
            resolved: addr,
        }
    }
}

/// Contract for issuing a single echo probe to one host.
///
/// Implementations must never block longer than `timeout` and must report
/// network-level failures through the outcome rather than panicking.
#[async_trait::async_trait]
pub trait Prober: Send + Sync + 'static {
    /// Probe `host` once, bounded by `timeout`.
    async fn probe(&self, host: &str, timeout: Duration) -> ProbeReport;
}
