//! Non-blocking status observation.
//!
//! Display and monitoring paths must never stall the simulation, so every
//! read goes through `try_lock`. A contended component is reported with its
//! last known good value, tagged [`Freshness::Stale`], instead of waiting.

use serde::{Deserialize, Serialize};

use crate::core::allocator::{ResourceAllocator, ResourceSnapshot};
use crate::core::lane::{LaneProcess, LaneSnapshot, NUM_LANES};
use crate::core::metrics::{Metrics, MetricsSnapshot};
use crate::core::scheduler::{Scheduler, SchedulerSnapshot};
use crate::runtime::intersection::Intersection;

/// A component that can be read without blocking.
pub trait PollSnapshot {
    /// Copy produced by a successful poll.
    type Snapshot: Clone;

    /// A consistent copy if the component's lock is free right now.
    fn try_snapshot(&self) -> Option<Self::Snapshot>;
}

impl PollSnapshot for LaneProcess {
    type Snapshot = LaneSnapshot;

    fn try_snapshot(&self) -> Option<LaneSnapshot> {
        Self::try_snapshot(self)
    }
}

impl PollSnapshot for Scheduler {
    type Snapshot = SchedulerSnapshot;

    fn try_snapshot(&self) -> Option<SchedulerSnapshot> {
        Self::try_snapshot(self)
    }
}

impl PollSnapshot for ResourceAllocator {
    type Snapshot = ResourceSnapshot;

    fn try_snapshot(&self) -> Option<ResourceSnapshot> {
        Self::try_snapshot(self)
    }
}

impl PollSnapshot for Metrics {
    type Snapshot = MetricsSnapshot;

    fn try_snapshot(&self) -> Option<MetricsSnapshot> {
        Self::try_snapshot(self)
    }
}

/// Whether a value was read on this poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    /// Read on this poll.
    Fresh,
    /// Repeated from an earlier poll because the lock was busy.
    Stale,
}

/// A value together with its freshness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observed<T> {
    /// The value.
    pub value: T,
    /// Whether it was read on this poll.
    pub freshness: Freshness,
}

impl<T> Observed<T> {
    /// Whether the value was read on this poll.
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.freshness == Freshness::Fresh
    }
}

/// Last good value of one component.
#[derive(Debug, Clone)]
pub struct LastKnown<T> {
    value: Option<T>,
}

impl<T: Clone> LastKnown<T> {
    /// Nothing observed yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { value: None }
    }

    /// Fold one poll attempt in. `None` means the lock was busy.
    ///
    /// Returns `None` only when nothing has ever been observed.
    pub fn observe(&mut self, attempt: Option<T>) -> Option<Observed<T>> {
        match attempt {
            Some(value) => {
                self.value = Some(value.clone());
                Some(Observed {
                    value,
                    freshness: Freshness::Fresh,
                })
            }
            None => self.value.clone().map(|value| Observed {
                value,
                freshness: Freshness::Stale,
            }),
        }
    }

    /// Poll `source` and fold the result in.
    pub fn poll<S>(&mut self, source: &S) -> Option<Observed<T>>
    where
        S: PollSnapshot<Snapshot = T> + ?Sized,
    {
        self.observe(source.try_snapshot())
    }
}

impl<T: Clone> Default for LastKnown<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Whole-intersection status assembled from one non-blocking poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Driver steps taken.
    pub tick: u64,
    /// Whether the simulation is paused.
    pub paused: bool,
    /// Per-lane state, `None` until first observed.
    pub lanes: [Option<Observed<LaneSnapshot>>; NUM_LANES],
    /// Scheduler state.
    pub scheduler: Option<Observed<SchedulerSnapshot>>,
    /// Quadrant allocation.
    pub resources: Option<Observed<ResourceSnapshot>>,
    /// Global metrics.
    pub metrics: Option<Observed<MetricsSnapshot>>,
    /// Pending emergencies, `None` if the lock was busy.
    pub pending_emergencies: Option<usize>,
    /// Invariant violations recorded so far.
    pub violations: u64,
}

impl StatusSnapshot {
    /// Whether every component was read on this poll.
    #[must_use]
    pub fn is_fully_fresh(&self) -> bool {
        self.lanes
            .iter()
            .all(|l| l.as_ref().is_some_and(Observed::is_fresh))
            && self.scheduler.as_ref().is_some_and(Observed::is_fresh)
            && self.resources.as_ref().is_some_and(Observed::is_fresh)
            && self.metrics.as_ref().is_some_and(Observed::is_fresh)
    }
}

/// Polls an intersection, remembering the last good value of each component.
#[derive(Debug, Default)]
pub struct StatusReader {
    lanes: [LastKnown<LaneSnapshot>; NUM_LANES],
    scheduler: LastKnown<SchedulerSnapshot>,
    resources: LastKnown<ResourceSnapshot>,
    metrics: LastKnown<MetricsSnapshot>,
}

impl StatusReader {
    /// Reader with nothing observed yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read every component without blocking.
    pub fn poll(&mut self, intersection: &Intersection) -> StatusSnapshot {
        let mut lanes: [Option<Observed<LaneSnapshot>>; NUM_LANES] = Default::default();
        for ((slot, last), lane) in lanes
            .iter_mut()
            .zip(self.lanes.iter_mut())
            .zip(intersection.lanes())
        {
            *slot = last.poll(lane);
        }
        StatusSnapshot {
            tick: intersection.tick_count(),
            paused: intersection.is_paused(),
            lanes,
            scheduler: self.scheduler.poll(intersection.scheduler()),
            resources: self.resources.poll(intersection.allocator()),
            metrics: self.metrics.poll(intersection.metrics()),
            pending_emergencies: intersection.emergency().try_pending_count(),
            violations: intersection.monitor().count(),
        }
    }
}

/// Destination for periodic status snapshots.
pub trait StatusSink: Send {
    /// Deliver one snapshot.
    fn publish(&mut self, status: &StatusSnapshot);
}

/// Logs a one-line summary of each snapshot.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl StatusSink for TracingSink {
    fn publish(&mut self, status: &StatusSnapshot) {
        let queues: Vec<Option<usize>> = status
            .lanes
            .iter()
            .map(|l| l.as_ref().map(|o| o.value.queue_length))
            .collect();
        let current = status
            .scheduler
            .as_ref()
            .and_then(|s| s.value.current.map(|l| l.name()));
        let processed = status.metrics.as_ref().map(|m| m.value.total_processed);
        tracing::debug!(
            tick = status.tick,
            paused = status.paused,
            current = ?current,
            queues = ?queues,
            processed = ?processed,
            fresh = status.is_fully_fresh(),
            "intersection status"
        );
    }
}

/// Collects snapshots in memory.
#[derive(Debug, Default, Clone)]
pub struct VecSink {
    /// Snapshots published so far.
    pub published: Vec<StatusSnapshot>,
}

impl StatusSink for VecSink {
    fn publish(&mut self, status: &StatusSnapshot) {
        self.published.push(status.clone());
    }
}

#[cfg(feature = "tokio-runtime")]
pub use watch_feed::{watch_channel, WatchSink};

#[cfg(feature = "tokio-runtime")]
mod watch_feed {
    use tokio::sync::watch;

    use super::{StatusSink, StatusSnapshot};

    /// Publishes snapshots to a `tokio::sync::watch` channel for async consumers.
    #[derive(Debug)]
    pub struct WatchSink {
        sender: watch::Sender<Option<StatusSnapshot>>,
    }

    impl StatusSink for WatchSink {
        fn publish(&mut self, status: &StatusSnapshot) {
            // No receivers left is fine; the feed is optional.
            let _ = self.sender.send(Some(status.clone()));
        }
    }

    /// A sink and the receiver that observes it.
    #[must_use]
    pub fn watch_channel() -> (WatchSink, watch::Receiver<Option<StatusSnapshot>>) {
        let (sender, receiver) = watch::channel(None);
        (WatchSink { sender }, receiver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::IntersectionBuilder;
    use crate::config::SimulationConfig;
    use crate::core::lane::LaneId;

    #[test]
    fn test_last_known_marks_stale() {
        let mut last = LastKnown::new();
        assert_eq!(last.observe(None), None);
        assert!(last.observe(Some(5)).unwrap().is_fresh());
        let stale = last.observe(None).unwrap();
        assert_eq!(stale.value, 5);
        assert_eq!(stale.freshness, Freshness::Stale);
    }

    #[test]
    fn test_uncontended_poll_is_fresh() {
        let ix = IntersectionBuilder::new(SimulationConfig::default())
            .build()
            .unwrap();
        ix.generate_arrival(LaneId::EAST, None).unwrap();
        let status = StatusReader::new().poll(&ix);
        assert!(status.is_fully_fresh());
        assert_eq!(status.lanes[2].as_ref().unwrap().value.queue_length, 1);
        assert_eq!(status.pending_emergencies, Some(0));
    }

    #[test]
    fn test_contended_lane_reports_last_known() {
        let ix = IntersectionBuilder::new(SimulationConfig::default())
            .build()
            .unwrap();
        let mut reader = StatusReader::new();
        reader.poll(&ix);

        let guard = ix.lane(LaneId::NORTH).lock();
        let status = reader.poll(&ix);
        drop(guard);

        let north = status.lanes[0].as_ref().unwrap();
        assert_eq!(north.freshness, Freshness::Stale);
        assert!(status.lanes[1].as_ref().unwrap().is_fresh());
        assert!(!status.is_fully_fresh());
    }

    #[test]
    fn test_vec_sink_collects() {
        let ix = IntersectionBuilder::new(SimulationConfig::default())
            .build()
            .unwrap();
        let mut sink = VecSink::default();
        sink.publish(&StatusReader::new().poll(&ix));
        assert_eq!(sink.published.len(), 1);
        assert_eq!(sink.published[0].tick, 0);
    }
}
