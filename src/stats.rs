//! Rolling latency statistics and anomaly classification.
//!
//! Each monitored target owns one [`LatencyWindow`]: a bounded history of the
//! most recent successful round-trip times plus incrementally maintained
//! mean/variance. New samples are classified with a Z-score against the
//! baseline that existed *before* they were ingested, so a single outlier
//! cannot inflate the baseline it is measured against.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Classification of one probe sample against a target's rolling baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Within the configured Z-score threshold of the baseline.
    Normal,
    /// Latency outlier, or a failed probe (anomalous by availability).
    Anomalous,
    /// The window holds too few samples for a meaningful baseline.
    InsufficientData,
}

impl Classification {
    /// Stable lowercase label, used in log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Anomalous => "anomalous",
            Self::InsufficientData => "insufficient_data",
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a target's statistics.
///
/// `count`, `mean` and `stddev` describe exactly the samples currently held
/// in the bounded window. `min`/`max` and the success counters cover the
/// whole lifetime of the target, matching what an operator-facing table
/// reports alongside the rolling average.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowSnapshot {
    /// Samples currently in the window.
    pub count: usize,
    /// Mean RTT over the window, in milliseconds.
    pub mean: f64,
    /// Population standard deviation over the window, in milliseconds.
    pub stddev: f64,
    /// Lowest successful RTT observed, in milliseconds.
    pub min: Option<f64>,
    /// Highest successful RTT observed, in milliseconds.
    pub max: Option<f64>,
    /// Total probes attempted (successes + failures).
    pub total_probes: u64,
    /// Probes that returned a reply.
    pub successes: u64,
    /// Probes that timed out or errored.
    pub failures: u64,
    /// Percentage of probes that succeeded (0.0 when nothing was probed yet).
    pub success_rate: f64,
}

/// Classification policy applied by a [`LatencyWindow`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassifyPolicy {
    /// Minimum samples in the window before a Z-score is meaningful.
    pub min_samples: usize,
    /// Absolute Z-score at or above which a sample is anomalous.
    pub z_threshold: f64,
}

/// Bounded rolling window of successful RTTs with O(1) ingestion.
///
/// Mean and variance are maintained with Welford's online update plus its
/// sliding-window removal rule, so inserting into a full window evicts the
/// oldest sample and adjusts the sufficient statistics without recomputing
/// over the whole window. Variance is the population variance, matching the
/// small-N determinism the classifier needs.
#[derive(Debug, Clone)]
pub struct LatencyWindow {
    samples: VecDeque<f64>,
    capacity: usize,
    policy: ClassifyPolicy,
    mean: f64,
    m2: f64,
    min: Option<f64>,
    max: Option<f64>,
    total_probes: u64,
    successes: u64,
    failures: u64,
}

impl LatencyWindow {
    /// Create an empty window.
    ///
    /// `capacity` is clamped to at least 1 sample.
    pub fn new(capacity: usize, policy: ClassifyPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            policy,
            mean: 0.0,
            m2: 0.0,
            min: None,
            max: None,
            total_probes: 0,
            successes: 0,
            failures: 0,
        }
    }

    /// Number of samples currently retained.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the window holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Mean RTT over the retained samples, in milliseconds.
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Population standard deviation over the retained samples.
    pub fn stddev(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        (self.m2 / self.samples.len() as f64).max(0.0).sqrt()
    }

    /// Ingest a successful probe's RTT and classify it.
    ///
    /// The sample is classified against the window as it was before the
    /// insertion, then pushed (evicting the oldest sample at capacity).
    pub fn ingest_success(&mut self, rtt_ms: f64) -> Classification {
        let classification = self.classify(rtt_ms);

        self.total_probes += 1;
        self.successes += 1;
        self.min = Some(self.min.map_or(rtt_ms, |m| m.min(rtt_ms)));
        self.max = Some(self.max.map_or(rtt_ms, |m| m.max(rtt_ms)));

        if self.samples.len() == self.capacity {
            if let Some(oldest) = self.samples.pop_front() {
                self.remove(oldest);
            }
        }
        self.samples.push_back(rtt_ms);
        self.add(rtt_ms);

        classification
    }

    /// Record a failed probe.
    ///
    /// Failures never enter the latency history; they are anomalous by
    /// availability, a distinct signal from a latency outlier.
    pub fn ingest_failure(&mut self) -> Classification {
        self.total_probes += 1;
        self.failures += 1;
        Classification::Anomalous
    }

    /// Classify an RTT against the current baseline without ingesting it.
    ///
    /// The candidate sample counts toward the minimum, so with a minimum of
    /// three the third sample is already classified (against the two prior).
    pub fn classify(&self, rtt_ms: f64) -> Classification {
        if self.samples.len() + 1 < self.policy.min_samples {
            return Classification::InsufficientData;
        }
        let stddev = self.stddev();
        if stddev == 0.0 {
            // All retained samples are identical. A matching RTT is normal;
            // any deviation from a perfectly flat baseline is anomalous.
            return if rtt_ms == self.mean {
                Classification::Normal
            } else {
                Classification::Anomalous
            };
        }
        let z = (rtt_ms - self.mean) / stddev;
        if z.abs() >= self.policy.z_threshold {
            Classification::Anomalous
        } else {
            Classification::Normal
        }
    }

    /// Consistent copy of the current statistics.
    pub fn snapshot(&self) -> WindowSnapshot {
        WindowSnapshot {
            count: self.samples.len(),
            mean: self.mean,
            stddev: self.stddev(),
            min: self.min,
            max: self.max,
            total_probes: self.total_probes,
            successes: self.successes,
            failures: self.failures,
            success_rate: if self.total_probes == 0 {
                0.0
            } else {
                self.successes as f64 * 100.0 / self.total_probes as f64
            },
        }
    }

    /// Welford online update after pushing `x`.
    fn add(&mut self, x: f64) {
        let n = self.samples.len() as f64;
        let delta = x - self.mean;
        self.mean += delta / n;
        self.m2 += delta * (x - self.mean);
    }

    /// Reverse Welford update after evicting `x`.
    ///
    /// Called before the replacement is added, so `samples` no longer
    /// contains `x` but the statistics still do.
    fn remove(&mut self, x: f64) {
        let n = self.samples.len() as f64 + 1.0;
        if n <= 1.0 {
            self.mean = 0.0;
            self.m2 = 0.0;
            return;
        }
        let old_mean = self.mean;
        self.mean = (n * self.mean - x) / (n - 1.0);
        self.m2 -= (x - old_mean) * (x - self.mean);
        // Eviction can leave a tiny negative residue from rounding.
        if self.m2 < 0.0 {
            self.m2 = 0.0;
        }
    }
}
