//! Static-priority round robin.
//!
//! The most urgent static priority wins; lanes sharing a priority rotate by
//! least recent service, so each gets the intersection in turn.

use crate::core::lane::LaneId;
use crate::policy::multilevel::service_order;
use crate::policy::{fifo_order, PolicyId, SchedulingPolicy, SystemSnapshot};

/// Priority round-robin policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriorityRoundRobin;

impl SchedulingPolicy for PriorityRoundRobin {
    fn id(&self) -> PolicyId {
        PolicyId::PriorityRoundRobin
    }

    fn select_next(&self, snapshot: &SystemSnapshot) -> Option<LaneId> {
        snapshot
            .ready_lanes()
            .min_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| service_order(a, b))
                    .then_with(|| fifo_order(a, b))
            })
            .map(|l| l.lane)
    }
}
