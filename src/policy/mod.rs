//! Scheduling policies.
//!
//! A policy is a pure function from a consistent [`SystemSnapshot`] to the
//! next lane to run. Policies never mutate lanes and never select a lane that
//! is not READY; they return `None` when nothing is eligible. New policies only
//! implement [`SchedulingPolicy`]; the scheduler core does not change.

pub mod multilevel;
pub mod priority_rr;
pub mod sjf;

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::lane::{LaneId, LaneSnapshot, LaneState, NUM_LANES};
use crate::core::TrafficError;

pub use multilevel::MultilevelFeedback;
pub use priority_rr::PriorityRoundRobin;
pub use sjf::{AgingSjf, PredictiveSjf, ShortestJobFirst, ShortestRemainingTime, WeightedSjf};

/// Consistent view of every lane, taken one lane lock at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    /// Per-lane snapshots indexed by lane id.
    pub lanes: [LaneSnapshot; NUM_LANES],
    /// Lane the scheduler currently considers running.
    pub current: Option<LaneId>,
    /// Scheduler tick at snapshot time.
    pub tick: u64,
}

impl SystemSnapshot {
    /// Snapshot of four idle lanes.
    #[must_use]
    pub const fn idle() -> Self {
        Self {
            lanes: [
                LaneSnapshot::empty(LaneId::NORTH),
                LaneSnapshot::empty(LaneId::SOUTH),
                LaneSnapshot::empty(LaneId::EAST),
                LaneSnapshot::empty(LaneId::WEST),
            ],
            current: None,
            tick: 0,
        }
    }

    /// Snapshot of one lane.
    #[must_use]
    pub const fn lane(&self, lane: LaneId) -> &LaneSnapshot {
        &self.lanes[lane.index()]
    }

    /// Lanes currently READY, in index order.
    pub fn ready_lanes(&self) -> impl Iterator<Item = &LaneSnapshot> + '_ {
        self.lanes.iter().filter(|l| l.state == LaneState::Ready)
    }

    /// First lane observed RUNNING.
    #[must_use]
    pub fn running_lane(&self) -> Option<&LaneSnapshot> {
        self.lanes.iter().find(|l| l.state == LaneState::Running)
    }

    /// Number of lanes observed RUNNING.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.lanes
            .iter()
            .filter(|l| l.state == LaneState::Running)
            .count()
    }
}

/// Strategy interface for lane selection.
pub trait SchedulingPolicy: Send + Sync {
    /// Identifier of this policy.
    fn id(&self) -> PolicyId;

    /// Whether the policy is consulted every tick and may displace a RUNNING lane.
    fn is_preemptive(&self) -> bool {
        false
    }

    /// Pick the next lane to run, or `None` when no READY lane qualifies.
    fn select_next(&self, snapshot: &SystemSnapshot) -> Option<LaneId>;
}

/// Tunables shared by the policy family.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolicyParams {
    /// Seconds for one vehicle to cross.
    pub cross_time_secs: f64,
    /// Time slices a lane may hold the intersection before re-evaluation.
    pub time_quantum: u32,
    /// Levels in the multilevel feedback queue.
    pub mlfq_levels: u32,
    /// READY ticks after which a multilevel lane is boosted back to the top.
    pub aging_threshold: u64,
}

impl Default for PolicyParams {
    fn default() -> Self {
        Self {
            cross_time_secs: 3.0,
            time_quantum: 3,
            mlfq_levels: 3,
            aging_threshold: 50,
        }
    }
}

/// Available policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyId {
    /// Shortest job first.
    Sjf,
    /// Shortest remaining time first (preemptive SJF).
    Srtf,
    /// SJF with aging.
    AgingSjf,
    /// SJF weighted by wait history.
    WeightedSjf,
    /// SJF using observed throughput.
    PredictiveSjf,
    /// Multilevel feedback queue.
    MultilevelFeedback,
    /// Static-priority round robin.
    PriorityRoundRobin,
}

impl PolicyId {
    /// Every policy, in menu order.
    pub const ALL: [Self; 7] = [
        Self::Sjf,
        Self::Srtf,
        Self::AgingSjf,
        Self::WeightedSjf,
        Self::PredictiveSjf,
        Self::MultilevelFeedback,
        Self::PriorityRoundRobin,
    ];

    /// Stable short name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sjf => "sjf",
            Self::Srtf => "srtf",
            Self::AgingSjf => "aging_sjf",
            Self::WeightedSjf => "weighted_sjf",
            Self::PredictiveSjf => "predictive_sjf",
            Self::MultilevelFeedback => "multilevel_feedback",
            Self::PriorityRoundRobin => "priority_round_robin",
        }
    }

    /// Instantiate the policy.
    #[must_use]
    pub fn build(self, params: &PolicyParams) -> Box<dyn SchedulingPolicy> {
        let cross = params.cross_time_secs;
        match self {
            Self::Sjf => Box::new(ShortestJobFirst::new(cross)),
            Self::Srtf => Box::new(ShortestRemainingTime::new(cross)),
            Self::AgingSjf => Box::new(AgingSjf::new(cross)),
            Self::WeightedSjf => Box::new(WeightedSjf::new(cross)),
            Self::PredictiveSjf => Box::new(PredictiveSjf::new(cross)),
            Self::MultilevelFeedback => Box::new(MultilevelFeedback::new(
                params.mlfq_levels,
                params.time_quantum,
                params.aging_threshold,
            )),
            Self::PriorityRoundRobin => Box::new(PriorityRoundRobin),
        }
    }
}

impl fmt::Display for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyId {
    type Err = TrafficError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        let id = match normalized.as_str() {
            "sjf" => Self::Sjf,
            "srtf" => Self::Srtf,
            "aging" | "aging_sjf" => Self::AgingSjf,
            "weighted" | "weighted_sjf" => Self::WeightedSjf,
            "predictive" | "predictive_sjf" => Self::PredictiveSjf,
            "mlfq" | "multilevel" | "multilevel_feedback" => Self::MultilevelFeedback,
            "priority_rr" | "priority_round_robin" => Self::PriorityRoundRobin,
            _ => {
                return Err(TrafficError::InitializationFailure(format!(
                    "unknown policy '{s}'"
                )))
            }
        };
        Ok(id)
    }
}

/// Deterministic tie-break shared by all policies: earliest arrival, then lowest index.
pub(crate) fn fifo_order(a: &LaneSnapshot, b: &LaneSnapshot) -> Ordering {
    a.arrival_ms
        .cmp(&b.arrival_ms)
        .then_with(|| a.lane.cmp(&b.lane))
}

/// READY lane with the lowest `cost`, ties broken by [`fifo_order`].
pub(crate) fn min_cost_ready<F>(snapshot: &SystemSnapshot, cost: F) -> Option<(LaneId, f64)>
where
    F: Fn(&LaneSnapshot) -> f64,
{
    snapshot
        .ready_lanes()
        .map(|lane| (lane, cost(lane)))
        .min_by(|(a, ca), (b, cb)| ca.total_cmp(cb).then_with(|| fifo_order(a, b)))
        .map(|(lane, c)| (lane.lane, c))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Snapshot with the given per-lane `(state, queue_length, arrival_ms)`.
    pub(crate) fn snapshot_of(lanes: [(LaneState, usize, u128); NUM_LANES]) -> SystemSnapshot {
        let mut snap = SystemSnapshot::idle();
        for (slot, (state, queue_length, arrival_ms)) in snap.lanes.iter_mut().zip(lanes) {
            slot.state = state;
            slot.queue_length = queue_length;
            slot.arrival_ms = arrival_ms;
        }
        snap
    }
}
