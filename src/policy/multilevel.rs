//! Multilevel feedback queue.
//!
//! A lane's level is derived from how many time slices it has consumed since
//! it last drained: every `quantum` slices demote it one level, down to the
//! bottom. A READY lane that has waited `aging_threshold` ticks is boosted
//! back to the top. The policy keeps no state of its own.

use std::cmp::Ordering;

use crate::core::lane::{LaneId, LaneSnapshot};
use crate::policy::{fifo_order, PolicyId, SchedulingPolicy, SystemSnapshot};

/// Multilevel feedback policy.
#[derive(Debug, Clone, Copy)]
pub struct MultilevelFeedback {
    levels: u32,
    quantum: u32,
    aging_threshold: u64,
}

impl MultilevelFeedback {
    /// Policy with `levels` queues, demoting every `quantum` slices.
    #[must_use]
    pub fn new(levels: u32, quantum: u32, aging_threshold: u64) -> Self {
        Self {
            levels: levels.max(1),
            quantum: quantum.max(1),
            aging_threshold,
        }
    }

    /// Queue level of `lane`; `0` is the highest priority.
    #[must_use]
    pub fn level(&self, lane: &LaneSnapshot) -> u32 {
        if lane.waiting_time >= self.aging_threshold {
            return 0;
        }
        (lane.slices_consumed / self.quantum).min(self.levels - 1)
    }
}

/// Least recently served first; never-served lanes count as oldest.
pub(crate) fn service_order(a: &LaneSnapshot, b: &LaneSnapshot) -> Ordering {
    a.last_service_ms.cmp(&b.last_service_ms)
}

impl SchedulingPolicy for MultilevelFeedback {
    fn id(&self) -> PolicyId {
        PolicyId::MultilevelFeedback
    }

    fn select_next(&self, snapshot: &SystemSnapshot) -> Option<LaneId> {
        snapshot
            .ready_lanes()
            .min_by(|a, b| {
                self.level(a)
                    .cmp(&self.level(b))
                    .then_with(|| service_order(a, b))
                    .then_with(|| fifo_order(a, b))
            })
            .map(|l| l.lane)
    }
}
