//! Target registry: the authoritative arena of monitored hosts.
//!
//! Targets are addressed by stable `Uuid` handles, never by position, so a
//! probe task holding a handle across a concurrent removal degrades to a
//! discarded result instead of touching another target's slot. Each entry
//! guards its own statistics window and availability state behind a
//! per-entry lock; there is no lock shared across targets beyond the
//! registry map itself.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::{EngineConfig, TargetConfig};
use crate::event::Sample;
use crate::probe::ProbeReport;
use crate::stats::{Classification, ClassifyPolicy, LatencyWindow, WindowSnapshot};

/// Errors from registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The target definition was rejected at registration.
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// No target with this handle exists.
    #[error("unknown target: {0}")]
    UnknownTarget(Uuid),
}

// =============================================================================
// Availability
// =============================================================================

/// Reachability state of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    /// No probe has completed yet.
    Unknown,
    /// The target is answering probes.
    Up,
    /// Enough consecutive probes failed to declare the target down.
    Down,
}

impl std::fmt::Display for Availability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Unknown => "unknown",
            Self::Up => "up",
            Self::Down => "down",
        })
    }
}

/// A state change produced by applying one probe result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityTransition {
    /// The target crossed the consecutive-failure threshold.
    WentDown,
    /// The target answered again after being down.
    Recovered,
}

/// Consecutive-failure/success hysteresis over probe results.
///
/// Declaring Down requires `fail_threshold` consecutive failures; recovery
/// requires `recover_threshold` consecutive successes (1 by default). The
/// asymmetry is deliberate: recover fast, declare down slowly, so a single
/// lost packet never flaps the state.
#[derive(Debug, Clone)]
struct AvailabilityTracker {
    state: Availability,
    consecutive_failures: u32,
    consecutive_successes: u32,
    fail_threshold: u32,
    recover_threshold: u32,
}

impl AvailabilityTracker {
    fn new(fail_threshold: u32, recover_threshold: u32) -> Self {
        Self {
            state: Availability::Unknown,
            consecutive_failures: 0,
            consecutive_successes: 0,
            fail_threshold: fail_threshold.max(1),
            recover_threshold: recover_threshold.max(1),
        }
    }

    fn state(&self) -> Availability {
        self.state
    }

    /// Apply one probe result; returns the new state and any transition.
    fn record(&mut self, success: bool) -> (Availability, Option<AvailabilityTransition>) {
        let mut transition = None;
        if success {
            self.consecutive_failures = 0;
            self.consecutive_successes += 1;
            match self.state {
                Availability::Down if self.consecutive_successes >= self.recover_threshold => {
                    self.state = Availability::Up;
                    transition = Some(AvailabilityTransition::Recovered);
                }
                Availability::Unknown => {
                    self.state = Availability::Up;
                }
                _ => {}
            }
        } else {
            self.consecutive_successes = 0;
            self.consecutive_failures += 1;
            if self.state != Availability::Down && self.consecutive_failures >= self.fail_threshold
            {
                self.state = Availability::Down;
                transition = Some(AvailabilityTransition::WentDown);
            }
        }
        (self.state, transition)
    }
}

// =============================================================================
// Target entries
// =============================================================================

/// Result of applying one probe report to a target.
#[derive(Debug, Clone)]
pub struct IngestResult {
    /// The recorded sample.
    pub sample: Sample,
    /// Classification against the pre-ingestion baseline.
    pub classification: Classification,
    /// Availability state after this sample.
    pub availability: Availability,
    /// State transition triggered by this sample, if any.
    pub transition: Option<AvailabilityTransition>,
    /// Rolling statistics after ingestion.
    pub snapshot: WindowSnapshot,
}

/// Mutable per-target state, guarded by the entry lock.
#[derive(Debug)]
struct TargetState {
    window: LatencyWindow,
    availability: AvailabilityTracker,
}

/// One registered target.
///
/// The statistics window is mutated only from the owning probe task's
/// completion path; `snapshot` may be called concurrently from readers.
#[derive(Debug)]
pub struct TargetEntry {
    id: Uuid,
    config: TargetConfig,
    state: Mutex<TargetState>,
}

impl TargetEntry {
    /// Stable handle of this target.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The target's configuration.
    pub fn config(&self) -> &TargetConfig {
        &self.config
    }

    /// Apply a completed probe: build the sample, ingest, classify, and
    /// advance the availability state machine, all under one lock so readers
    /// never observe a half-applied update.
    pub fn ingest(&self, report: &ProbeReport) -> IngestResult {
        let mut state = self.state.lock().expect("target state lock poisoned");

        let (sample, classification) = match report.outcome.rtt_ms() {
            Some(rtt_ms) => (Sample::success(rtt_ms), state.window.ingest_success(rtt_ms)),
            None => (Sample::failure(), state.window.ingest_failure()),
        };
        let (availability, transition) = state.availability.record(sample.success);

        IngestResult {
            sample,
            classification,
            availability,
            transition,
            snapshot: state.window.snapshot(),
        }
    }

    /// Consistent read of availability and rolling statistics.
    pub fn snapshot(&self) -> (Availability, WindowSnapshot) {
        let state = self.state.lock().expect("target state lock poisoned");
        (state.availability.state(), state.window.snapshot())
    }
}

/// Read-only description of a registered target, for listings.
#[derive(Debug, Clone, Serialize)]
pub struct TargetInfo {
    /// Stable handle.
    pub id: Uuid,
    /// Configured name.
    pub name: String,
    /// Configured host.
    pub host: String,
    /// Optional description.
    pub description: Option<String>,
    /// Current availability.
    pub availability: Availability,
    /// Current rolling statistics.
    pub snapshot: WindowSnapshot,
}

// =============================================================================
// Registry
// =============================================================================

/// Arena of monitored targets, keyed by stable handles.
pub struct TargetRegistry {
    targets: RwLock<HashMap<Uuid, Arc<TargetEntry>>>,
    engine: EngineConfig,
}

impl TargetRegistry {
    /// Create an empty registry; window and hysteresis parameters come from
    /// the engine configuration.
    pub fn new(engine: EngineConfig) -> Self {
        Self {
            targets: RwLock::new(HashMap::new()),
            engine,
        }
    }

    /// Register a target with a fresh empty statistics window.
    ///
    /// # Errors
    /// `RegistryError::InvalidTarget` if the name or host is empty.
    pub async fn register(&self, config: TargetConfig) -> Result<Uuid, RegistryError> {
        if config.name.trim().is_empty() {
            return Err(RegistryError::InvalidTarget(
                "target name cannot be empty".to_string(),
            ));
        }
        if config.host.trim().is_empty() {
            return Err(RegistryError::InvalidTarget(format!(
                "target '{}' has an empty host",
                config.name
            )));
        }

        let id = Uuid::new_v4();
        let entry = Arc::new(TargetEntry {
            id,
            config,
            state: Mutex::new(TargetState {
                window: LatencyWindow::new(
                    self.engine.window_capacity,
                    ClassifyPolicy {
                        min_samples: self.engine.min_samples,
                        z_threshold: self.engine.z_threshold,
                    },
                ),
                availability: AvailabilityTracker::new(
                    self.engine.fail_threshold,
                    self.engine.recover_threshold,
                ),
            }),
        });

        let name = entry.config.name.clone();
        self.targets.write().await.insert(id, entry);
        tracing::info!(target = %name, id = %id, "Target registered");
        Ok(id)
    }

    /// Remove a target.
    ///
    /// An in-flight probe for it runs to completion; its result is discarded
    /// when the handle no longer resolves.
    pub async fn deregister(&self, id: &Uuid) -> Result<(), RegistryError> {
        match self.targets.write().await.remove(id) {
            Some(entry) => {
                tracing::info!(target = %entry.config.name, id = %id, "Target deregistered");
                Ok(())
            }
            None => Err(RegistryError::UnknownTarget(*id)),
        }
    }

    /// Snapshot of current target handles.
    ///
    /// Mutations racing this call may or may not be reflected; the returned
    /// set is internally consistent.
    pub async fn list(&self) -> Vec<Uuid> {
        self.targets.read().await.keys().copied().collect()
    }

    /// Snapshot of current targets with availability and statistics.
    pub async fn describe(&self) -> Vec<TargetInfo> {
        let targets = self.targets.read().await;
        targets
            .values()
            .map(|entry| {
                let (availability, snapshot) = entry.snapshot();
                TargetInfo {
                    id: entry.id,
                    name: entry.config.name.clone(),
                    host: entry.config.host.clone(),
                    description: entry.config.description.clone(),
                    availability,
                    snapshot,
                }
            })
            .collect()
    }

    /// Look up a target by handle.
    pub async fn get(&self, id: &Uuid) -> Option<Arc<TargetEntry>> {
        self.targets.read().await.get(id).cloned()
    }

    /// Number of registered targets.
    pub async fn len(&self) -> usize {
        self.targets.read().await.len()
    }

    /// Whether no targets are registered.
    pub async fn is_empty(&self) -> bool {
        self.targets.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeOutcome;
    use std::time::Duration;

    fn engine() -> EngineConfig {
        EngineConfig::default()
    }

    fn failure_report() -> ProbeReport {
        ProbeReport {
            outcome: ProbeOutcome::Timeout,
            resolved: None,
        }
    }

    fn success_report(rtt_ms: u64) -> ProbeReport {
        ProbeReport::reply(
            Duration::from_millis(rtt_ms),
            "192.0.2.7".parse().unwrap(),
        )
    }

    #[tokio::test]
    async fn test_register_and_list() {
        let registry = TargetRegistry::new(engine());
        let a = registry
            .register(TargetConfig::new("dns-a", "1.1.1.1"))
            .await
            .unwrap();
        let b = registry
            .register(TargetConfig::new("dns-b", "8.8.8.8"))
            .await
            .unwrap();

        let mut handles = registry.list().await;
        handles.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(handles, expected);
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_register_rejects_empty_fields() {
        let registry = TargetRegistry::new(engine());
        assert!(matches!(
            registry.register(TargetConfig::new("", "1.1.1.1")).await,
            Err(RegistryError::InvalidTarget(_))
        ));
        assert!(matches!(
            registry.register(TargetConfig::new("no-host", "  ")).await,
            Err(RegistryError::InvalidTarget(_))
        ));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_deregister_unknown() {
        let registry = TargetRegistry::new(engine());
        let err = registry.deregister(&Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, RegistryError::UnknownTarget(_)));
    }

    #[tokio::test]
    async fn test_handle_stable_across_removal() {
        let registry = TargetRegistry::new(engine());
        let a = registry
            .register(TargetConfig::new("a", "192.0.2.1"))
            .await
            .unwrap();
        let b = registry
            .register(TargetConfig::new("b", "192.0.2.2"))
            .await
            .unwrap();

        registry.deregister(&a).await.unwrap();
        // Removing one target never disturbs another's handle.
        assert!(registry.get(&a).await.is_none());
        let entry = registry.get(&b).await.unwrap();
        assert_eq!(entry.config().name, "b");
    }

    #[tokio::test]
    async fn test_ingest_updates_snapshot() {
        let registry = TargetRegistry::new(engine());
        let id = registry
            .register(TargetConfig::new("t", "192.0.2.1"))
            .await
            .unwrap();
        let entry = registry.get(&id).await.unwrap();

        let result = entry.ingest(&success_report(12));
        assert!(result.sample.success);
        assert_eq!(result.availability, Availability::Up);
        assert_eq!(result.snapshot.count, 1);
        assert_eq!(result.snapshot.mean, 12.0);

        let (availability, snapshot) = entry.snapshot();
        assert_eq!(availability, Availability::Up);
        assert_eq!(snapshot.successes, 1);
    }

    #[tokio::test]
    async fn test_describe_reports_state() {
        let registry = TargetRegistry::new(engine());
        let id = registry
            .register(TargetConfig::new("dns", "1.1.1.1").with_description("Cloudflare"))
            .await
            .unwrap();
        registry.get(&id).await.unwrap().ingest(&success_report(9));

        let infos = registry.describe().await;
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].name, "dns");
        assert_eq!(infos[0].description.as_deref(), Some("Cloudflare"));
        assert_eq!(infos[0].availability, Availability::Up);
        assert_eq!(infos[0].snapshot.successes, 1);
    }

    #[tokio::test]
    async fn test_ingest_failure_is_anomalous_and_skips_history() {
        let registry = TargetRegistry::new(engine());
        let id = registry
            .register(TargetConfig::new("t", "192.0.2.1"))
            .await
            .unwrap();
        let entry = registry.get(&id).await.unwrap();

        entry.ingest(&success_report(10));
        let result = entry.ingest(&failure_report());
        assert!(!result.sample.success);
        assert_eq!(result.classification, Classification::Anomalous);
        assert_eq!(result.snapshot.count, 1);
        assert_eq!(result.snapshot.failures, 1);
    }

    #[test]
    fn test_hysteresis_declares_down_after_three_failures() {
        let mut tracker = AvailabilityTracker::new(3, 1);
        assert_eq!(tracker.record(true), (Availability::Up, None));
        assert_eq!(tracker.record(false), (Availability::Up, None));
        assert_eq!(tracker.record(false), (Availability::Up, None));
        assert_eq!(
            tracker.record(false),
            (Availability::Down, Some(AvailabilityTransition::WentDown))
        );
        // One success recovers immediately.
        assert_eq!(
            tracker.record(true),
            (Availability::Up, Some(AvailabilityTransition::Recovered))
        );
    }

    #[test]
    fn test_hysteresis_interleaved_failures_never_flap() {
        let mut tracker = AvailabilityTracker::new(3, 1);
        tracker.record(true);
        for _ in 0..10 {
            assert_eq!(tracker.record(false).0, Availability::Up);
            assert_eq!(tracker.record(false).0, Availability::Up);
            assert_eq!(tracker.record(true).0, Availability::Up);
        }
    }

    #[test]
    fn test_hysteresis_from_unknown() {
        let mut tracker = AvailabilityTracker::new(3, 1);
        assert_eq!(tracker.state(), Availability::Unknown);
        // Failures from a cold start also count toward Down.
        tracker.record(false);
        tracker.record(false);
        assert_eq!(
            tracker.record(false),
            (Availability::Down, Some(AvailabilityTransition::WentDown))
        );
    }

    #[test]
    fn test_hysteresis_slow_recovery() {
        let mut tracker = AvailabilityTracker::new(2, 2);
        tracker.record(false);
        tracker.record(false);
        assert_eq!(tracker.state(), Availability::Down);
        assert_eq!(tracker.record(true), (Availability::Down, None));
        assert_eq!(
            tracker.record(true),
            (Availability::Up, Some(AvailabilityTransition::Recovered))
        );
    }
}
