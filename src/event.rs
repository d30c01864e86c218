//! Probe outcome events and the live event stream.
//!
//! Every completed probe produces one [`Event`] carrying the sample, its
//! classification and the target's availability state. Events are delivered
//! over a bounded broadcast ring: producers never wait for consumers, and a
//! subscriber that falls behind loses the oldest undelivered events rather
//! than stalling probing. The stream is a live feed, not a replay log.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::registry::{Availability, AvailabilityTransition};
use crate::stats::{Classification, WindowSnapshot};

/// One probe outcome as recorded: timestamp, RTT (on success), success flag.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// When the probe completed.
    pub ts: DateTime<Utc>,
    /// Round-trip time in milliseconds, present only on success.
    pub rtt_ms: Option<f64>,
    /// Whether the probe received a reply.
    pub success: bool,
}

impl Sample {
    /// A successful probe with the given RTT.
    pub fn success(rtt_ms: f64) -> Self {
        Self {
            ts: Utc::now(),
            rtt_ms: Some(rtt_ms),
            success: true,
        }
    }

    /// A failed probe (timeout or network error).
    pub fn failure() -> Self {
        Self {
            ts: Utc::now(),
            rtt_ms: None,
            success: false,
        }
    }
}

/// A completed probe for one target, ready for a renderer or alerter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Stable handle of the target this probe belongs to.
    pub target: Uuid,
    /// Target name from configuration.
    pub target_name: String,
    /// Configured host (IP literal or hostname).
    pub host: String,
    /// Address the host resolved to for this probe, if resolution succeeded.
    pub resolved: Option<IpAddr>,
    /// The probe outcome.
    pub sample: Sample,
    /// Classification of the sample against the target's baseline.
    pub classification: Classification,
    /// Availability state after applying this sample.
    pub availability: Availability,
    /// State transition triggered by this sample, if any.
    pub transition: Option<AvailabilityTransition>,
    /// Rolling statistics after ingestion.
    pub snapshot: WindowSnapshot,
}

/// Broadcast fan-out of probe events to any number of subscribers.
///
/// Backed by `tokio::sync::broadcast`: the ring holds `capacity` events and
/// evicts the oldest undelivered entry per lagging subscriber. Publishing
/// never blocks.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a bus with the given ring capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to the live feed. Only events published after this call are
    /// delivered.
    pub fn subscribe(&self) -> EventStream {
        EventStream {
            rx: self.tx.subscribe(),
            dropped: 0,
        }
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish an event. A bus with no subscribers simply discards it.
    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

/// A subscriber's view of the event feed.
pub struct EventStream {
    rx: broadcast::Receiver<Event>,
    dropped: u64,
}

impl EventStream {
    /// Receive the next event.
    ///
    /// Returns `None` once the bus is closed and the backlog is drained.
    /// When this subscriber lagged, the skip is counted in
    /// [`dropped`](Self::dropped) and reception continues with the oldest
    /// event still available.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.dropped += n;
                    tracing::warn!(skipped = n, "Event stream consumer lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Total events this subscriber lost to lag.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{ClassifyPolicy, LatencyWindow};

    fn sample_event(name: &str, rtt_ms: f64) -> Event {
        let window = LatencyWindow::new(
            10,
            ClassifyPolicy {
                min_samples: 3,
                z_threshold: 3.0,
            },
        );
        Event {
            target: Uuid::new_v4(),
            target_name: name.to_string(),
            host: "192.0.2.1".to_string(),
            resolved: Some("192.0.2.1".parse().unwrap()),
            sample: Sample::success(rtt_ms),
            classification: Classification::InsufficientData,
            availability: Availability::Up,
            transition: None,
            snapshot: window.snapshot(),
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut stream = bus.subscribe();

        bus.publish(sample_event("a", 1.0));
        bus.publish(sample_event("b", 2.0));

        assert_eq!(stream.recv().await.unwrap().target_name, "a");
        assert_eq!(stream.recv().await.unwrap().target_name, "b");
        assert_eq!(stream.dropped(), 0);
    }

    #[tokio::test]
    async fn test_lagged_subscriber_drops_oldest() {
        let bus = EventBus::new(4);
        let mut stream = bus.subscribe();

        for i in 0..10 {
            bus.publish(sample_event(&format!("e{i}"), i as f64));
        }

        // The ring held the newest 4 events; the rest were dropped.
        let first = stream.recv().await.unwrap();
        assert_eq!(first.target_name, "e6");
        assert_eq!(stream.dropped(), 6);

        for i in 7..10 {
            assert_eq!(stream.recv().await.unwrap().target_name, format!("e{i}"));
        }
    }

    #[tokio::test]
    async fn test_no_subscribers_discards() {
        let bus = EventBus::new(4);
        assert_eq!(bus.subscriber_count(), 0);
        // Must not error or block.
        bus.publish(sample_event("quiet", 1.0));
    }

    #[tokio::test]
    async fn test_closed_bus_ends_stream() {
        let bus = EventBus::new(4);
        let mut stream = bus.subscribe();
        bus.publish(sample_event("last", 1.0));
        drop(bus);

        // Backlog is drained before the stream ends.
        assert_eq!(stream.recv().await.unwrap().target_name, "last");
        assert!(stream.recv().await.is_none());
    }

    #[test]
    fn test_event_serializes_to_json() {
        let event = sample_event("json", 5.0);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["target_name"], "json");
        assert_eq!(json["sample"]["success"], true);
        assert_eq!(json["classification"], "insufficient_data");
    }
}
