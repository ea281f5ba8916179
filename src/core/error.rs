//! Error types for intersection scheduling and allocation.

use thiserror::Error;

use crate::core::lane::{LaneId, LaneState};

/// Errors produced by lanes, the scheduler and the quadrant allocator.
///
/// `QueueFull`, `QueueEmpty` and `ResourceDenied` are transient: callers handle
/// them at the call site and skip or retry. `InvariantViolation` means a
/// correctness bug was observed. `InitializationFailure` aborts startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrafficError {
    /// Vehicle queue is at capacity.
    #[error("queue full (capacity {capacity})")]
    QueueFull {
        /// Capacity of the queue that rejected the vehicle.
        capacity: usize,
    },
    /// Vehicle queue has nothing to dequeue.
    #[error("queue empty")]
    QueueEmpty,
    /// Allocator refused a grant that was unavailable or unsafe.
    #[error("resource denied: lane {lane} requested {requested}, available {available}")]
    ResourceDenied {
        /// Requesting lane.
        lane: LaneId,
        /// Quadrants requested.
        requested: u8,
        /// Quadrants available at the time of the request.
        available: u8,
    },
    /// Request can never be satisfied (zero or beyond the intersection total).
    #[error("invalid request: lane {lane} requested {requested}: {reason}")]
    InvalidRequest {
        /// Requesting lane.
        lane: LaneId,
        /// Quadrants requested.
        requested: u8,
        /// Why the request was rejected.
        reason: String,
    },
    /// Lane state change not permitted by the lane state machine.
    #[error("invalid transition on lane {lane}: {from} -> {to}")]
    InvalidTransition {
        /// Lane whose state was being changed.
        lane: LaneId,
        /// State before the attempted change.
        from: LaneState,
        /// Rejected target state.
        to: LaneState,
    },
    /// Lane index outside `0..4`.
    #[error("invalid lane index {0}")]
    InvalidLane(usize),
    /// A correctness invariant was broken (multiple RUNNING lanes, lock order, ...).
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    /// Startup allocation or setup failed before any thread started.
    #[error("initialization failure: {0}")]
    InitializationFailure(String),
}

impl TrafficError {
    /// Whether the error is local and non-fatal: the caller skips this tick.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::QueueFull { .. } | Self::QueueEmpty | Self::ResourceDenied { .. }
        )
    }

    /// Process exit code for an error that reaches the top level.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        1
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
