//! Quadrant allocator with deadlock avoidance.
//!
//! The intersection has a fixed number of quadrants. Lanes request some
//! before crossing and release them afterwards. Every grant is simulated
//! first and committed only if the resulting state is safe: some order exists
//! in which every lane's pending need can be met from what is available plus
//! what finishing lanes give back.
//!
//! All state lives behind one allocator-wide lock at
//! [`LockLevel::Allocator`], the highest level. Nothing else is acquired
//! while it is held.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::invariant::InvariantMonitor;
use crate::core::lane::{LaneId, NUM_LANES};
use crate::core::lock_order::{LockLevel, OrderedMutex};
use crate::core::TrafficError;

/// Quadrants in a four-way intersection.
pub const TOTAL_QUADRANTS: u8 = 4;

/// Allocation and request vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    /// Quadrants in the intersection.
    pub total: u8,
    /// Quadrants not held by any lane.
    pub available: u8,
    /// Quadrants held per lane.
    pub allocation: [u8; NUM_LANES],
    /// Pending (ungranted) requests per lane.
    pub request: [u8; NUM_LANES],
}

#[derive(Debug, Clone)]
struct ResourceState {
    total: u8,
    allocation: [u8; NUM_LANES],
    request: [u8; NUM_LANES],
}

impl ResourceState {
    fn available(&self) -> u8 {
        let held: u8 = self.allocation.iter().sum();
        self.total.saturating_sub(held)
    }

    fn snapshot(&self) -> ResourceSnapshot {
        ResourceSnapshot {
            total: self.total,
            available: self.available(),
            allocation: self.allocation,
            request: self.request,
        }
    }
}

/// Safety sweep over an allocation state.
///
/// Repeatedly finishes any lane whose remaining `need` fits in the working
/// pool, returning its allocation to the pool. Safe iff every lane finishes.
#[must_use]
pub fn is_safe_state(total: u8, allocation: &[u8; NUM_LANES], need: &[u8; NUM_LANES]) -> bool {
    let held: u16 = allocation.iter().map(|a| u16::from(*a)).sum();
    if held > u16::from(total) {
        return false;
    }
    let mut work = u16::from(total) - held;
    let mut finished = [false; NUM_LANES];
    loop {
        let next = (0..NUM_LANES).find(|&i| !finished[i] && u16::from(need[i]) <= work);
        match next {
            Some(i) => {
                work += u16::from(allocation[i]);
                finished[i] = true;
            }
            None => return finished.iter().all(|f| *f),
        }
    }
}

/// Banker's-style quadrant allocator.
#[derive(Debug)]
pub struct ResourceAllocator {
    state: OrderedMutex<ResourceState>,
}

impl ResourceAllocator {
    /// Allocator over the standard four quadrants.
    #[must_use]
    pub fn new(monitor: Arc<InvariantMonitor>) -> Self {
        Self::with_total(TOTAL_QUADRANTS, monitor)
    }

    /// Allocator over `total` quadrants.
    #[must_use]
    pub fn with_total(total: u8, monitor: Arc<InvariantMonitor>) -> Self {
        Self {
            state: OrderedMutex::new(
                LockLevel::Allocator,
                monitor,
                ResourceState {
                    total,
                    allocation: [0; NUM_LANES],
                    request: [0; NUM_LANES],
                },
            ),
        }
    }

    /// Ask for `count` more quadrants for `lane`.
    ///
    /// The request is recorded as pending, then granted only if enough
    /// quadrants are free and the simulated grant leaves a safe state. Returns
    /// the quadrants still available after the grant.
    ///
    /// # Errors
    ///
    /// - `TrafficError::InvalidRequest` for a zero request or one that would
    ///   take the lane beyond the intersection total.
    /// - `TrafficError::ResourceDenied` when the grant is unavailable or unsafe;
    ///   the request stays pending for a later retry.
    pub fn request_quadrants(&self, lane: LaneId, count: u8) -> Result<u8, TrafficError> {
        let mut state = self.state.lock();
        let idx = lane.index();
        if count == 0 {
            return Err(TrafficError::InvalidRequest {
                lane,
                requested: count,
                reason: "must request at least one quadrant".to_string(),
            });
        }
        if u16::from(state.allocation[idx]) + u16::from(count) > u16::from(state.total) {
            return Err(TrafficError::InvalidRequest {
                lane,
                requested: count,
                reason: format!("exceeds the {} quadrants of the intersection", state.total),
            });
        }

        state.request[idx] = count;
        let available = state.available();
        if count > available {
            tracing::debug!(lane = %lane, requested = count, available, "quadrants unavailable");
            return Err(TrafficError::ResourceDenied {
                lane,
                requested: count,
                available,
            });
        }

        let mut allocation = state.allocation;
        let mut need = state.request;
        allocation[idx] += count;
        need[idx] = 0;
        if !is_safe_state(state.total, &allocation, &need) {
            tracing::warn!(lane = %lane, requested = count, available, "unsafe grant denied");
            return Err(TrafficError::ResourceDenied {
                lane,
                requested: count,
                available,
            });
        }

        state.allocation = allocation;
        state.request[idx] = 0;
        let remaining = state.available();
        tracing::debug!(lane = %lane, granted = count, available = remaining, "quadrants granted");
        Ok(remaining)
    }

    /// Retry the pending request of `lane`, if it has one.
    ///
    /// Returns `Ok(None)` when nothing is pending.
    ///
    /// # Errors
    ///
    /// As [`ResourceAllocator::request_quadrants`].
    pub fn retry_pending(&self, lane: LaneId) -> Result<Option<u8>, TrafficError> {
        let pending = self.state.lock().request[lane.index()];
        if pending == 0 {
            return Ok(None);
        }
        self.request_quadrants(lane, pending).map(Some)
    }

    /// Return everything `lane` holds and drop its pending request.
    ///
    /// Always succeeds; returns the number of quadrants released.
    pub fn release_quadrants(&self, lane: LaneId) -> u8 {
        let mut state = self.state.lock();
        let idx = lane.index();
        let released = state.allocation[idx];
        state.allocation[idx] = 0;
        state.request[idx] = 0;
        if released > 0 {
            tracing::debug!(lane = %lane, released, available = state.available(), "quadrants released");
        }
        released
    }

    /// Quadrants not held by any lane.
    #[must_use]
    pub fn available(&self) -> u8 {
        self.state.lock().available()
    }

    /// Quadrants held by `lane`.
    #[must_use]
    pub fn allocation(&self, lane: LaneId) -> u8 {
        self.state.lock().allocation[lane.index()]
    }

    /// Pending request of `lane`.
    #[must_use]
    pub fn pending_request(&self, lane: LaneId) -> u8 {
        self.state.lock().request[lane.index()]
    }

    /// Whether the current state, pending requests included, is safe.
    #[must_use]
    pub fn is_safe(&self) -> bool {
        let state = self.state.lock();
        is_safe_state(state.total, &state.allocation, &state.request)
    }

    /// Copy of both vectors; blocks on the allocator lock.
    #[must_use]
    pub fn snapshot(&self) -> ResourceSnapshot {
        self.state.lock().snapshot()
    }

    /// Copy of both vectors if the lock is free; never blocks.
    #[must_use]
    pub fn try_snapshot(&self) -> Option<ResourceSnapshot> {
        self.state.try_lock().map(|s| s.snapshot())
    }
}
