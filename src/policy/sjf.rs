//! Shortest-job-first family.
//!
//! All variants rank READY lanes by an estimated cost in seconds and pick the
//! cheapest; equal costs fall back to earliest arrival, then lane index.

use crate::core::lane::{LaneId, LaneSnapshot};
use crate::policy::{min_cost_ready, PolicyId, SchedulingPolicy, SystemSnapshot};

/// Weight of a READY tick in [`AgingSjf`].
pub const AGING_FACTOR: f64 = 0.1;
/// Weight of a READY tick in [`WeightedSjf`].
pub const WEIGHTED_WAIT_FACTOR: f64 = 0.2;
/// Weight of the lane's average wait (seconds) in [`WeightedSjf`].
pub const WEIGHTED_HISTORY_FACTOR: f64 = 0.1;

#[allow(clippy::cast_precision_loss)]
fn processing_time(lane: &LaneSnapshot, cross_time_secs: f64) -> f64 {
    lane.queue_length as f64 * cross_time_secs
}

/// Plain SJF: `queue_length × cross_time`. Non-preemptive.
#[derive(Debug, Clone, Copy)]
pub struct ShortestJobFirst {
    cross_time_secs: f64,
}

impl ShortestJobFirst {
    /// Policy with the given per-vehicle crossing time.
    #[must_use]
    pub const fn new(cross_time_secs: f64) -> Self {
        Self { cross_time_secs }
    }

    /// Cost of serving `lane` to completion.
    #[must_use]
    pub fn cost(&self, lane: &LaneSnapshot) -> f64 {
        processing_time(lane, self.cross_time_secs)
    }
}

impl SchedulingPolicy for ShortestJobFirst {
    fn id(&self) -> PolicyId {
        PolicyId::Sjf
    }

    fn select_next(&self, snapshot: &SystemSnapshot) -> Option<LaneId> {
        min_cost_ready(snapshot, |l| self.cost(l)).map(|(lane, _)| lane)
    }
}

/// SRTF: SJF cost, evaluated every tick.
///
/// While a lane is RUNNING, a READY lane is returned only when its cost is
/// strictly below the running lane's remaining cost.
#[derive(Debug, Clone, Copy)]
pub struct ShortestRemainingTime {
    cross_time_secs: f64,
}

impl ShortestRemainingTime {
    /// Policy with the given per-vehicle crossing time.
    #[must_use]
    pub const fn new(cross_time_secs: f64) -> Self {
        Self { cross_time_secs }
    }
}

impl SchedulingPolicy for ShortestRemainingTime {
    fn id(&self) -> PolicyId {
        PolicyId::Srtf
    }

    fn is_preemptive(&self) -> bool {
        true
    }

    fn select_next(&self, snapshot: &SystemSnapshot) -> Option<LaneId> {
        let (best, best_cost) =
            min_cost_ready(snapshot, |l| processing_time(l, self.cross_time_secs))?;
        match snapshot.running_lane() {
            Some(running)
                if processing_time(running, self.cross_time_secs) <= best_cost =>
            {
                None
            }
            _ => Some(best),
        }
    }
}

/// SJF with aging: `queue_length × cross_time − waiting_time × 0.1`.
#[derive(Debug, Clone, Copy)]
pub struct AgingSjf {
    cross_time_secs: f64,
}

impl AgingSjf {
    /// Policy with the given per-vehicle crossing time.
    #[must_use]
    pub const fn new(cross_time_secs: f64) -> Self {
        Self { cross_time_secs }
    }

    /// Aged cost of `lane`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn cost(&self, lane: &LaneSnapshot) -> f64 {
        processing_time(lane, self.cross_time_secs) - lane.waiting_time as f64 * AGING_FACTOR
    }
}

impl SchedulingPolicy for AgingSjf {
    fn id(&self) -> PolicyId {
        PolicyId::AgingSjf
    }

    fn select_next(&self, snapshot: &SystemSnapshot) -> Option<LaneId> {
        min_cost_ready(snapshot, |l| self.cost(l)).map(|(lane, _)| lane)
    }
}

/// Weighted SJF: `processing_time − waiting_time × 0.2 + average_wait × 0.1`.
#[derive(Debug, Clone, Copy)]
pub struct WeightedSjf {
    cross_time_secs: f64,
}

impl WeightedSjf {
    /// Policy with the given per-vehicle crossing time.
    #[must_use]
    pub const fn new(cross_time_secs: f64) -> Self {
        Self { cross_time_secs }
    }

    /// Weighted cost of `lane`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn cost(&self, lane: &LaneSnapshot) -> f64 {
        processing_time(lane, self.cross_time_secs)
            - lane.waiting_time as f64 * WEIGHTED_WAIT_FACTOR
            + lane.average_wait_secs * WEIGHTED_HISTORY_FACTOR
    }
}

impl SchedulingPolicy for WeightedSjf {
    fn id(&self) -> PolicyId {
        PolicyId::WeightedSjf
    }

    fn select_next(&self, snapshot: &SystemSnapshot) -> Option<LaneId> {
        min_cost_ready(snapshot, |l| self.cost(l)).map(|(lane, _)| lane)
    }
}

/// Predictive SJF: `queue_length × (60 / throughput)` once the lane has served
/// vehicles, otherwise the static crossing time.
#[derive(Debug, Clone, Copy)]
pub struct PredictiveSjf {
    cross_time_secs: f64,
}

impl PredictiveSjf {
    /// Policy with the given fallback crossing time.
    #[must_use]
    pub const fn new(cross_time_secs: f64) -> Self {
        Self { cross_time_secs }
    }

    /// Predicted cost of `lane`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn cost(&self, lane: &LaneSnapshot) -> f64 {
        let per_vehicle = if lane.total_served > 0 {
            60.0 / lane.total_served as f64
        } else {
            self.cross_time_secs
        };
        lane.queue_length as f64 * per_vehicle
    }
}

impl SchedulingPolicy for PredictiveSjf {
    fn id(&self) -> PolicyId {
        PolicyId::PredictiveSjf
    }

    fn select_next(&self, snapshot: &SystemSnapshot) -> Option<LaneId> {
        min_cost_ready(snapshot, |l| self.cost(l)).map(|(lane, _)| lane)
    }
}
