//! Queue profiling hooks.
//!
//! Instrumented channels report one [`QueueObservation`] per send and receive to
//! a [`MetricsSink`]. Recording is fire-and-forget: the pipeline never looks at
//! what a sink does with an observation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::channel::ChannelLabel;
use crate::pipeline::StageId;

/// Which side of the channel an observation was taken on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Send,
    Receive,
}

/// A single queue depth/latency sample.
#[derive(Debug, Clone)]
pub struct QueueObservation {
    /// Downstream stage and position of the link.
    pub label: ChannelLabel,
    pub direction: Direction,
    /// Items buffered right after the operation completed.
    pub depth: usize,
    /// How long the operation was suspended.
    pub waited: Duration,
    pub at: SystemTime,
}

/// Receiver of queue observations.
pub trait MetricsSink: Send + Sync + 'static {
    fn record(&self, observation: QueueObservation);
}

/// Emits every observation as a `trace` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn record(&self, observation: QueueObservation) {
        trace!(
            link = %observation.label,
            direction = ?observation.direction,
            depth = observation.depth,
            waited_us = observation.waited.as_micros() as u64,
            "Queue observation"
        );
    }
}

/// Aggregated statistics for one link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkStats {
    pub position: usize,
    pub stage: String,
    pub sends: u64,
    pub receives: u64,
    pub max_depth: u64,
    pub send_wait_total_us: u64,
    pub receive_wait_total_us: u64,
}

impl LinkStats {
    /// Mean time a send spent waiting for free capacity.
    pub fn mean_send_wait_us(&self) -> f64 {
        if self.sends == 0 {
            0.0
        } else {
            self.send_wait_total_us as f64 / self.sends as f64
        }
    }

    /// Mean time a receive spent waiting for an item.
    pub fn mean_receive_wait_us(&self) -> f64 {
        if self.receives == 0 {
            0.0
        } else {
            self.receive_wait_total_us as f64 / self.receives as f64
        }
    }
}

#[derive(Debug)]
struct LinkCounters {
    stage: String,
    sends: AtomicU64,
    receives: AtomicU64,
    max_depth: AtomicU64,
    send_wait_us: AtomicU64,
    receive_wait_us: AtomicU64,
}

impl LinkCounters {
    fn new(stage: String) -> Self {
        Self {
            stage,
            sends: AtomicU64::new(0),
            receives: AtomicU64::new(0),
            max_depth: AtomicU64::new(0),
            send_wait_us: AtomicU64::new(0),
            receive_wait_us: AtomicU64::new(0),
        }
    }
}

/// In-memory sink aggregating observations per link.
///
/// Links are keyed by position and downstream stage, so one collector can be
/// shared by several runs without mixing their counters.
#[derive(Debug, Default)]
pub struct QueueMetrics {
    links: DashMap<(usize, StageId), LinkCounters>,
}

impl QueueMetrics {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Statistics for the link feeding `stage` at `position`.
    pub fn link(&self, stage: StageId, position: usize) -> Option<LinkStats> {
        self.links
            .get(&(position, stage))
            .map(|counters| Self::stats(position, &counters))
    }

    /// Statistics for every link seen so far, ordered by position.
    pub fn snapshot(&self) -> Vec<LinkStats> {
        let mut links: Vec<((usize, StageId), LinkStats)> = self
            .links
            .iter()
            .map(|entry| (*entry.key(), Self::stats(entry.key().0, entry.value())))
            .collect();
        links.sort_by_key(|(key, _)| *key);
        links.into_iter().map(|(_, stats)| stats).collect()
    }

    fn stats(position: usize, counters: &LinkCounters) -> LinkStats {
        LinkStats {
            position,
            stage: counters.stage.clone(),
            sends: counters.sends.load(Ordering::Relaxed),
            receives: counters.receives.load(Ordering::Relaxed),
            max_depth: counters.max_depth.load(Ordering::Relaxed),
            send_wait_total_us: counters.send_wait_us.load(Ordering::Relaxed),
            receive_wait_total_us: counters.receive_wait_us.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSink for QueueMetrics {
    fn record(&self, observation: QueueObservation) {
        let counters = self
            .links
            .entry((observation.label.position, observation.label.stage))
            .or_insert_with(|| LinkCounters::new(observation.label.name.clone()));
        let waited = observation.waited.as_micros() as u64;
        match observation.direction {
            Direction::Send => {
                counters.sends.fetch_add(1, Ordering::Relaxed);
                counters.send_wait_us.fetch_add(waited, Ordering::Relaxed);
            }
            Direction::Receive => {
                counters.receives.fetch_add(1, Ordering::Relaxed);
                counters.receive_wait_us.fetch_add(waited, Ordering::Relaxed);
            }
        }
        counters
            .max_depth
            .fetch_max(observation.depth as u64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::StageSet;
    use crate::test_utils::Forward;

    fn observation(
        stage: StageId,
        position: usize,
        direction: Direction,
        depth: usize,
        waited_us: u64,
    ) -> QueueObservation {
        QueueObservation {
            label: ChannelLabel {
                stage,
                name: format!("stage-{position}"),
                position,
            },
            direction,
            depth,
            waited: Duration::from_micros(waited_us),
            at: SystemTime::now(),
        }
    }

    #[test]
    fn test_queue_metrics_aggregates_per_link() {
        let mut set = StageSet::<u32>::new();
        let (first, second) = (set.add(Forward), set.add(Forward));
        let metrics = QueueMetrics::new();
        metrics.record(observation(second, 2, Direction::Send, 1, 10));
        metrics.record(observation(second, 2, Direction::Send, 4, 30));
        metrics.record(observation(second, 2, Direction::Receive, 3, 5));
        metrics.record(observation(first, 1, Direction::Receive, 0, 100));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].position, 1);
        assert_eq!(snapshot[1].position, 2);

        let link = &snapshot[1];
        assert_eq!(link.stage, "stage-2");
        assert_eq!(link.sends, 2);
        assert_eq!(link.receives, 1);
        assert_eq!(link.max_depth, 4);
        assert_eq!(link.send_wait_total_us, 40);
        assert_eq!(link.mean_send_wait_us(), 20.0);
        assert_eq!(link.mean_receive_wait_us(), 5.0);
    }

    #[test]
    fn test_empty_link_means_are_zero() {
        let mut set = StageSet::<u32>::new();
        let stage = set.add(Forward);
        let metrics = QueueMetrics::new();
        metrics.record(observation(stage, 1, Direction::Send, 1, 0));
        let link = metrics.link(stage, 1).unwrap();
        assert_eq!(link.mean_receive_wait_us(), 0.0);
        assert!(metrics.link(stage, 5).is_none());
    }

    #[test]
    fn test_links_of_different_stages_stay_apart() {
        let mut set = StageSet::<u32>::new();
        let (a, b) = (set.add(Forward), set.add(Forward));
        let metrics = QueueMetrics::new();
        metrics.record(observation(a, 1, Direction::Send, 1, 0));
        metrics.record(observation(b, 1, Direction::Send, 1, 0));
        metrics.record(observation(b, 1, Direction::Send, 2, 0));

        assert_eq!(metrics.snapshot().len(), 2);
        assert_eq!(metrics.link(a, 1).unwrap().sends, 1);
        assert_eq!(metrics.link(b, 1).unwrap().sends, 2);
    }

    #[test]
    fn test_link_stats_serialize() {
        let mut set = StageSet::<u32>::new();
        let stage = set.add(Forward);
        let metrics = QueueMetrics::new();
        metrics.record(observation(stage, 1, Direction::Send, 2, 7));
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json[0]["position"], 1);
        assert_eq!(json[0]["sends"], 1);
        assert_eq!(json[0]["max_depth"], 2);
    }
}
