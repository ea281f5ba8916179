//! Deadlock detection and recovery.
//!
//! Periodic fallback behind the allocator's safety check. A wait-for edge
//! `i -> j` exists when lane `i` is BLOCKED on a request larger than what is
//! available and lane `j` holds quadrants. A cycle in that graph is broken by
//! force-releasing one victim's quadrants and moving it to WAITING.
//!
//! Lane snapshots, the allocator snapshot and metrics are each taken under
//! their own lock, one at a time.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::allocator::{ResourceAllocator, ResourceSnapshot};
use crate::core::invariant::{InvariantMonitor, ViolationKind};
use crate::core::lane::{LaneId, LaneProcess, LaneSnapshot, LaneState, NUM_LANES};
use crate::core::metrics::Metrics;
use crate::core::TrafficError;

/// How the resolver picks the lane to sacrifice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VictimStrategy {
    /// Fewest quadrants held; cheapest to roll back.
    #[default]
    SmallestAllocation,
    /// Oldest queued vehicle; unblocks the longest waiter.
    LongestWait,
}

impl fmt::Display for VictimStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SmallestAllocation => f.write_str("smallest_allocation"),
            Self::LongestWait => f.write_str("longest_wait"),
        }
    }
}

impl FromStr for VictimStrategy {
    type Err = TrafficError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "smallest_allocation" | "smallest" => Ok(Self::SmallestAllocation),
            "longest_wait" | "longest" => Ok(Self::LongestWait),
            other => Err(TrafficError::InitializationFailure(format!(
                "unknown victim strategy '{other}'"
            ))),
        }
    }
}

/// Directed wait-for graph over the four lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WaitForGraph {
    edges: [[bool; NUM_LANES]; NUM_LANES],
}

impl WaitForGraph {
    /// Build the graph from lane states and the allocator vectors.
    #[must_use]
    pub fn build(lanes: &[LaneSnapshot; NUM_LANES], resources: &ResourceSnapshot) -> Self {
        let mut graph = Self::default();
        for waiter in lanes {
            let i = waiter.lane.index();
            if waiter.state != LaneState::Blocked || resources.request[i] <= resources.available {
                continue;
            }
            for j in 0..NUM_LANES {
                if j != i && resources.allocation[j] > 0 {
                    graph.edges[i][j] = true;
                }
            }
        }
        graph
    }

    /// Whether `from` waits on `to`.
    #[must_use]
    pub const fn has_edge(&self, from: LaneId, to: LaneId) -> bool {
        self.edges[from.index()][to.index()]
    }

    /// Add an edge.
    pub fn add_edge(&mut self, from: LaneId, to: LaneId) {
        if from != to {
            self.edges[from.index()][to.index()] = true;
        }
    }

    /// First cycle found by depth-first search, as the lanes along it.
    #[must_use]
    pub fn find_cycle(&self) -> Option<Vec<LaneId>> {
        let mut color = [Color::White; NUM_LANES];
        let mut path = Vec::with_capacity(NUM_LANES);
        for start in 0..NUM_LANES {
            if color[start] == Color::White {
                if let Some(cycle) = self.visit(start, &mut color, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn visit(&self, node: usize, color: &mut [Color; NUM_LANES], path: &mut Vec<usize>) -> Option<Vec<LaneId>> {
        color[node] = Color::Grey;
        path.push(node);
        for next in 0..NUM_LANES {
            if !self.edges[node][next] {
                continue;
            }
            match color[next] {
                Color::Grey => {
                    let from = path.iter().position(|n| *n == next).unwrap_or(0);
                    return Some(path[from..].iter().map(|&i| LaneId::ALL[i]).collect());
                }
                Color::White => {
                    if let Some(cycle) = self.visit(next, color, path) {
                        return Some(cycle);
                    }
                }
                Color::Black => {}
            }
        }
        path.pop();
        color[node] = Color::Black;
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Grey,
    Black,
}

/// One broken cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// Lanes that formed the cycle.
    pub cycle: Vec<LaneId>,
    /// Lane whose quadrants were released.
    pub victim: LaneId,
    /// Quadrants returned to the pool.
    pub released: u8,
}

/// Periodic deadlock sweep.
#[derive(Debug)]
pub struct DeadlockDetector {
    strategy: VictimStrategy,
    monitor: Arc<InvariantMonitor>,
}

impl DeadlockDetector {
    /// Detector using `strategy` to choose victims.
    #[must_use]
    pub const fn new(strategy: VictimStrategy, monitor: Arc<InvariantMonitor>) -> Self {
        Self { strategy, monitor }
    }

    /// Victim selection strategy.
    #[must_use]
    pub const fn strategy(&self) -> VictimStrategy {
        self.strategy
    }

    /// Current wait-for graph.
    #[must_use]
    pub fn graph(lanes: &[LaneProcess; NUM_LANES], allocator: &ResourceAllocator) -> WaitForGraph {
        let snapshots = [
            lanes[0].snapshot(),
            lanes[1].snapshot(),
            lanes[2].snapshot(),
            lanes[3].snapshot(),
        ];
        WaitForGraph::build(&snapshots, &allocator.snapshot())
    }

    /// Pick the victim among `cycle`.
    #[must_use]
    pub fn select_victim(
        &self,
        cycle: &[LaneId],
        lanes: &[LaneSnapshot; NUM_LANES],
        resources: &ResourceSnapshot,
    ) -> Option<LaneId> {
        let members = cycle.iter().copied();
        match self.strategy {
            VictimStrategy::SmallestAllocation => {
                members.min_by_key(|l| (resources.allocation[l.index()], *l))
            }
            VictimStrategy::LongestWait => {
                members.min_by_key(|l| (lanes[l.index()].arrival_ms, *l))
            }
        }
    }

    /// Find and break every wait cycle.
    ///
    /// Each victim's quadrants are force-released, the lane moves from
    /// BLOCKED to WAITING and a resolved deadlock is counted.
    ///
    /// # Errors
    ///
    /// `TrafficError::InvariantViolation` when a cycle exists but no victim
    /// can be chosen; the violation is also recorded with the monitor.
    pub fn detect_and_resolve(
        &self,
        lanes: &[LaneProcess; NUM_LANES],
        allocator: &ResourceAllocator,
        metrics: &Metrics,
    ) -> Result<Vec<Resolution>, TrafficError> {
        let mut resolutions = Vec::new();
        // Each resolution removes the victim's outgoing and incoming edges
        for _ in 0..NUM_LANES {
            let snapshots = [
                lanes[0].snapshot(),
                lanes[1].snapshot(),
                lanes[2].snapshot(),
                lanes[3].snapshot(),
            ];
            let resources = allocator.snapshot();
            let Some(cycle) = WaitForGraph::build(&snapshots, &resources).find_cycle() else {
                break;
            };

            let Some(victim) = self.select_victim(&cycle, &snapshots, &resources) else {
                let detail = format!("wait cycle {cycle:?} has no eligible victim");
                self.monitor.record(ViolationKind::NoDeadlockVictim, detail.clone());
                return Err(TrafficError::InvariantViolation(detail));
            };

            let released = allocator.release_quadrants(victim);
            {
                let process = &lanes[victim.index()];
                let mut data = process.lock();
                data.allocated_quadrants = 0;
                data.requested_quadrants = 0;
                if data.state == LaneState::Blocked {
                    data.transition(victim, LaneState::Waiting)?;
                }
            }
            metrics.record_deadlock_resolved();
            tracing::warn!(
                cycle = ?cycle,
                victim = %victim,
                released,
                strategy = %self.strategy,
                "deadlock resolved"
            );
            resolutions.push(Resolution {
                cycle,
                victim,
                released,
            });
        }
        Ok(resolutions)
    }
}
