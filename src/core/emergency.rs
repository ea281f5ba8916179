//! Emergency preemption.
//!
//! Pending events sit behind the emergency lock; the scheduler consults them
//! before running its policy. Repeated triggers for a lane that has not run
//! yet coalesce into the existing event.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::invariant::InvariantMonitor;
use crate::core::lane::{LaneId, NUM_LANES};
use crate::core::lock_order::{LockLevel, OrderedMutex};

/// Class of emergency vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyKind {
    /// Ambulance.
    Ambulance,
    /// Fire truck.
    FireTruck,
    /// Police car.
    Police,
}

impl EmergencyKind {
    /// Preemption weight; higher is served first.
    #[must_use]
    pub const fn weight(self) -> u8 {
        match self {
            Self::Ambulance => 3,
            Self::FireTruck => 2,
            Self::Police => 1,
        }
    }
}

impl fmt::Display for EmergencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ambulance => "ambulance",
            Self::FireTruck => "fire truck",
            Self::Police => "police",
        };
        f.write_str(name)
    }
}

/// A pending request to preempt normal scheduling for one lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyEvent {
    /// Lane to promote.
    pub lane: LaneId,
    /// Scheduler tick at which the event was raised.
    pub arrival_tick: u64,
    /// Preemption weight.
    pub priority: u8,
    /// Vehicle class.
    pub kind: EmergencyKind,
    /// Set once the lane has been promoted.
    pub resolved: bool,
}

#[derive(Debug, Default)]
struct PendingEmergencies {
    slots: [Option<EmergencyEvent>; NUM_LANES],
}

/// Holds pending emergencies, at most one per lane.
#[derive(Debug)]
pub struct EmergencyPreemptor {
    pending: OrderedMutex<PendingEmergencies>,
}

impl EmergencyPreemptor {
    /// Preemptor with nothing pending.
    #[must_use]
    pub fn new(monitor: Arc<InvariantMonitor>) -> Self {
        Self {
            pending: OrderedMutex::new(
                LockLevel::Emergency,
                monitor,
                PendingEmergencies::default(),
            ),
        }
    }

    /// Raise an emergency for `lane` at `tick`.
    ///
    /// Returns `false` when an event for the lane was already pending; the
    /// pending event keeps its arrival tick and takes the higher weight.
    pub fn trigger(&self, lane: LaneId, kind: EmergencyKind, tick: u64) -> bool {
        let mut pending = self.pending.lock();
        let slot = &mut pending.slots[lane.index()];
        if let Some(event) = slot {
            if kind.weight() > event.priority {
                event.priority = kind.weight();
                event.kind = kind;
            }
            tracing::debug!(lane = %lane, kind = %kind, "emergency coalesced");
            return false;
        }
        *slot = Some(EmergencyEvent {
            lane,
            arrival_tick: tick,
            priority: kind.weight(),
            kind,
            resolved: false,
        });
        tracing::info!(lane = %lane, kind = %kind, tick, "emergency triggered");
        true
    }

    /// Highest-weight pending event, earliest arrival first among equals.
    #[must_use]
    pub fn peek_next(&self) -> Option<EmergencyEvent> {
        self.peek_next_where(|_| true)
    }

    /// Like [`peek_next`](Self::peek_next), considering only lanes accepted
    /// by `eligible`.
    pub fn peek_next_where<F>(&self, eligible: F) -> Option<EmergencyEvent>
    where
        F: Fn(LaneId) -> bool,
    {
        self.pending
            .lock()
            .slots
            .iter()
            .flatten()
            .copied()
            .filter(|event| eligible(event.lane))
            .min_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then_with(|| a.arrival_tick.cmp(&b.arrival_tick))
                    .then_with(|| a.lane.cmp(&b.lane))
            })
    }

    /// Consume the event for `lane`, marking it resolved.
    ///
    /// Called once the lane has crossed; a promoted lane that is then denied
    /// its quadrants keeps its event.
    pub fn resolve(&self, lane: LaneId) -> Option<EmergencyEvent> {
        let mut event = self.pending.lock().slots[lane.index()].take()?;
        event.resolved = true;
        Some(event)
    }

    /// Whether an event is pending for `lane`.
    #[must_use]
    pub fn is_pending(&self, lane: LaneId) -> bool {
        self.pending.lock().slots[lane.index()].is_some()
    }

    /// Number of pending events.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().slots.iter().flatten().count()
    }

    /// Pending count if the lock is free; never blocks.
    #[must_use]
    pub fn try_pending_count(&self) -> Option<usize> {
        self.pending
            .try_lock()
            .map(|p| p.slots.iter().flatten().count())
    }
}
