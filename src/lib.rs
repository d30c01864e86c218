//! icmpmon - concurrent ICMP latency monitoring engine.
//!
//! Probes many hosts in parallel, keeps a bounded rolling latency history
//! per target, classifies each new sample against a Z-score baseline, and
//! publishes a live stream of per-probe events for renderers and alerters.
//!
//! # Architecture
//!
//! - [`probe`]: the probe primitive — one echo request, one reply or timeout
//! - [`stats`]: bounded latency window with O(1) online mean/variance
//! - [`registry`]: arena of targets with stable handles and availability
//!   hysteresis
//! - [`scheduler`]: one independent periodic probe task per target
//! - [`event`]: broadcast event stream, lossy under consumer overload
//! - [`config`]: YAML configuration with fail-fast validation
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use icmpmon::{
//!     AppConfig, IcmpProber, ProbeScheduler, TargetConfig, TargetRegistry,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::with_default_targets();
//!     let registry = Arc::new(TargetRegistry::new(config.engine.clone()));
//!     let scheduler = ProbeScheduler::new(
//!         Arc::clone(&registry),
//!         Arc::new(IcmpProber::new()),
//!         config.engine.clone(),
//!     );
//!
//!     let mut stream = scheduler.subscribe();
//!     scheduler.add(TargetConfig::new("cloudflare", "1.1.1.1")).await?;
//!
//!     while let Some(event) = stream.recv().await {
//!         println!("{}: {:?} ({})", event.target_name, event.sample.rtt_ms, event.classification);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod event;
pub mod probe;
pub mod registry;
pub mod scheduler;
pub mod stats;

pub use config::{AppConfig, ConfigError, EngineConfig, TargetConfig};
pub use event::{Event, EventBus, EventStream, Sample};
pub use probe::{IcmpProber, ProbeOutcome, ProbeReport, Prober};
pub use registry::{
    Availability, AvailabilityTransition, RegistryError, TargetInfo, TargetRegistry,
};
pub use scheduler::ProbeScheduler;
pub use stats::{Classification, ClassifyPolicy, LatencyWindow, WindowSnapshot};
