//! Per-target probe scheduling.
//!
//! Every registered target gets its own repeating timer task, so one slow or
//! black-holed host can never stall another's probes. A firing that lands
//! while the previous probe is still running is skipped outright (the tick
//! behavior, not a failure sample), and a global semaphore bounds the number
//! of probes in flight at once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::config::{EngineConfig, TargetConfig};
use crate::event::{Event, EventBus, EventStream};
use crate::probe::{ProbeOutcome, Prober};
use crate::registry::{AvailabilityTransition, RegistryError, TargetRegistry};

/// Default timeout for graceful shutdown (5 seconds).
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to one target's probe task.
struct ProbeTask {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Drives concurrent periodic probing of every registered target.
pub struct ProbeScheduler {
    registry: Arc<TargetRegistry>,
    prober: Arc<dyn Prober>,
    events: EventBus,
    limiter: Arc<Semaphore>,
    engine: EngineConfig,
    tasks: RwLock<HashMap<Uuid, ProbeTask>>,
}

impl ProbeScheduler {
    /// Create a scheduler over the given registry and probe primitive.
    pub fn new(
        registry: Arc<TargetRegistry>,
        prober: Arc<dyn Prober>,
        engine: EngineConfig,
    ) -> Self {
        Self {
            registry,
            prober,
            events: EventBus::new(engine.event_capacity),
            limiter: Arc::new(Semaphore::new(engine.max_in_flight)),
            engine,
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// The event bus probe results are published to.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe to the live probe event feed.
    pub fn subscribe(&self) -> EventStream {
        self.events.subscribe()
    }

    /// Register a target and start probing it.
    pub async fn add(&self, config: TargetConfig) -> Result<Uuid, RegistryError> {
        let id = self.registry.register(config).await?;
        self.spawn(id).await;
        Ok(id)
    }

    /// Start probe tasks for every registered target that lacks one.
    pub async fn spawn_all(&self) {
        for id in self.registry.list().await {
            if !self.tasks.read().await.contains_key(&id) {
                self.spawn(id).await;
            }
        }
    }

    /// Stop probing a target and deregister it.
    ///
    /// The pending timer is cancelled immediately; an in-flight probe runs to
    /// completion and its result is discarded.
    pub async fn remove(&self, id: &Uuid) -> Result<(), RegistryError> {
        if let Some(task) = self.tasks.write().await.remove(id) {
            let _ = task.cancel.send(true);
        }
        self.registry.deregister(id).await
    }

    /// Number of running probe tasks.
    pub async fn task_count(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// Gracefully stop all probe tasks with the default timeout.
    pub async fn shutdown(self) {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await;
    }

    /// Gracefully stop all probe tasks, waiting at most `timeout`.
    ///
    /// Tasks still running at the deadline are aborted.
    pub async fn shutdown_with_timeout(self, timeout: Duration) {
        let tasks = std::mem::take(&mut *self.tasks.write().await);
        let count = tasks.len();

        for task in tasks.values() {
            let _ = task.cancel.send(true);
        }

        let deadline = Instant::now() + timeout;
        let mut timed_out = false;
        for (id, task) in tasks {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let abort = task.handle.abort_handle();
            match tokio::time::timeout(remaining, task.handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(target = %id, error = %e, "Probe task failed");
                }
                Err(_) => {
                    abort.abort();
                    timed_out = true;
                }
            }
        }

        if timed_out {
            tracing::warn!(count, "Scheduler shutdown timed out, remaining tasks aborted");
        } else {
            tracing::info!(count, "Scheduler shutdown complete");
        }
    }

    async fn spawn(&self, id: Uuid) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(probe_loop(
            Arc::clone(&self.registry),
            Arc::clone(&self.prober),
            self.events.clone(),
            Arc::clone(&self.limiter),
            self.engine.interval,
            self.engine.timeout,
            id,
            cancel_rx,
        ));
        self.tasks.write().await.insert(
            id,
            ProbeTask {
                cancel: cancel_tx,
                handle,
            },
        );
    }
}

impl std::fmt::Debug for ProbeScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeScheduler")
            .field("interval", &self.engine.interval)
            .field("timeout", &self.engine.timeout)
            .finish_non_exhaustive()
    }
}

/// One target's probe loop: tick, probe, ingest, publish.
#[allow(clippy::too_many_arguments)]
async fn probe_loop(
    registry: Arc<TargetRegistry>,
    prober: Arc<dyn Prober>,
    events: EventBus,
    limiter: Arc<Semaphore>,
    probe_interval: Duration,
    probe_timeout: Duration,
    id: Uuid,
    mut cancel: watch::Receiver<bool>,
) {
    let mut ticker = interval(probe_interval);
    // A firing that lands while the previous probe is still running is
    // skipped for this target; skipped firings leave no trace in the history.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        let Some(entry) = registry.get(&id).await else {
            break;
        };

        let permit = match limiter.acquire().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let report = prober.probe(&entry.config().host, probe_timeout).await;
        drop(permit);

        // Deregistration may have raced the probe; a handle that no longer
        // resolves means the result is discarded, not applied.
        if registry.get(&id).await.is_none() {
            tracing::debug!(target = %entry.config().name, "Discarding probe result for removed target");
            break;
        }

        let result = entry.ingest(&report);
        let name = entry.config().name.as_str();

        match &report.outcome {
            ProbeOutcome::Reply(rtt) => {
                tracing::debug!(
                    target = %name,
                    rtt_ms = rtt.as_secs_f64() * 1000.0,
                    classification = %result.classification,
                    "Probe reply"
                );
            }
            ProbeOutcome::Timeout => {
                tracing::debug!(target = %name, timeout_ms = probe_timeout.as_millis() as u64, "Probe timed out");
            }
            ProbeOutcome::Error(e) => {
                tracing::debug!(target = %name, error = %e, "Probe failed");
            }
        }

        match result.transition {
            Some(AvailabilityTransition::WentDown) => {
                tracing::warn!(target = %name, "Target went down");
            }
            Some(AvailabilityTransition::Recovered) => {
                tracing::info!(target = %name, "Target recovered");
            }
            None => {}
        }

        events.publish(Event {
            target: id,
            target_name: entry.config().name.clone(),
            host: entry.config().host.clone(),
            resolved: report.resolved,
            sample: result.sample,
            classification: result.classification,
            availability: result.availability,
            transition: result.transition,
            snapshot: result.snapshot,
        });
    }

    tracing::debug!(target = %id, "Probe task stopped");
}
