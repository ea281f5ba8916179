//! Lane processes: one per intersection approach.
//!
//! A lane owns its vehicle queue, its state machine and its counters. All
//! mutation happens under the lane's own [`OrderedMutex`] at
//! [`LockLevel::Lane`]; the cached queue length is updated under the same
//! guard as the queue itself.
//!
//! State machine:
//!
//! ```text
//! WAITING --enqueue/tick--> READY --scheduler--> RUNNING
//! RUNNING --slice done, non-empty--> READY
//! RUNNING --drained--> WAITING
//! any --denial/deadlock--> BLOCKED --grant--> READY | --resolved--> WAITING
//! ```

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::invariant::InvariantMonitor;
use crate::core::lock_order::{LockLevel, OrderedGuard, OrderedMutex};
use crate::core::vehicle_queue::{Vehicle, VehicleId, VehicleQueue};
use crate::core::TrafficError;
use crate::util::clock::now_ms;

/// Number of approaches at the intersection.
pub const NUM_LANES: usize = 4;

/// Default static priority (lower is more urgent).
pub const NORMAL_PRIORITY: u8 = 2;

/// Index of a lane, `0..4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LaneId(u8);

impl LaneId {
    /// Northern approach.
    pub const NORTH: Self = Self(0);
    /// Southern approach.
    pub const SOUTH: Self = Self(1);
    /// Eastern approach.
    pub const EAST: Self = Self(2);
    /// Western approach.
    pub const WEST: Self = Self(3);
    /// All lanes in index order.
    pub const ALL: [Self; NUM_LANES] = [Self::NORTH, Self::SOUTH, Self::EAST, Self::WEST];

    /// Validate a raw index.
    ///
    /// # Errors
    ///
    /// `TrafficError::InvalidLane` when `index >= 4`.
    pub fn new(index: usize) -> Result<Self, TrafficError> {
        u8::try_from(index)
            .ok()
            .filter(|i| usize::from(*i) < NUM_LANES)
            .map(Self)
            .ok_or(TrafficError::InvalidLane(index))
    }

    /// Raw index for array access.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Compass name of the approach.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self.0 {
            0 => "North",
            1 => "South",
            2 => "East",
            _ => "West",
        }
    }
}

impl fmt::Display for LaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lane process state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LaneState {
    /// No vehicles queued.
    Waiting,
    /// Vehicles queued, eligible for selection.
    Ready,
    /// Holding the intersection.
    Running,
    /// Denied resources or caught in a deadlock.
    Blocked,
}

impl LaneState {
    /// Whether the state machine permits `self -> next` given queue emptiness.
    ///
    /// Staying in the same state is always permitted.
    #[must_use]
    pub fn can_transition_to(self, next: Self, queue_empty: bool) -> bool {
        if self == next {
            return true;
        }
        match (self, next) {
            (_, Self::Blocked) | (Self::Ready, Self::Running) | (Self::Blocked, Self::Waiting) => {
                true
            }
            (Self::Waiting | Self::Running | Self::Blocked, Self::Ready) => !queue_empty,
            (Self::Running | Self::Ready, Self::Waiting) => queue_empty,
            _ => false,
        }
    }
}

impl fmt::Display for LaneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Waiting => "WAITING",
            Self::Ready => "READY",
            Self::Running => "RUNNING",
            Self::Blocked => "BLOCKED",
        };
        f.write_str(name)
    }
}

/// Read-only copy of one lane, taken under its lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaneSnapshot {
    /// Lane identifier.
    pub lane: LaneId,
    /// State at snapshot time.
    pub state: LaneState,
    /// Vehicles queued.
    pub queue_length: usize,
    /// Queue capacity.
    pub capacity: usize,
    /// Arrival of the oldest queued vehicle, or of the last arrival when empty.
    pub arrival_ms: u128,
    /// Most recent arrival.
    pub last_arrival_ms: u128,
    /// Most recent service completion.
    pub last_service_ms: Option<u128>,
    /// Lane ticks spent READY since the lane last ran.
    pub waiting_time: u64,
    /// Vehicles ever admitted.
    pub total_arrivals: u64,
    /// Vehicles served.
    pub total_served: u64,
    /// Accumulated per-vehicle wait in milliseconds.
    pub total_wait_ms: u128,
    /// Mean wait per served vehicle in seconds.
    pub average_wait_secs: f64,
    /// Static priority, lower is more urgent.
    pub priority: u8,
    /// Time slices consumed since the lane last drained.
    pub slices_consumed: u32,
    /// Quadrants requested and not yet granted.
    pub requested_quadrants: u8,
    /// Quadrants currently held.
    pub allocated_quadrants: u8,
    /// Whether an emergency vehicle is queued.
    pub has_emergency: bool,
}

impl LaneSnapshot {
    /// Snapshot of an idle lane; convenient base for struct-update syntax.
    #[must_use]
    pub const fn empty(lane: LaneId) -> Self {
        Self {
            lane,
            state: LaneState::Waiting,
            queue_length: 0,
            capacity: 0,
            arrival_ms: 0,
            last_arrival_ms: 0,
            last_service_ms: None,
            waiting_time: 0,
            total_arrivals: 0,
            total_served: 0,
            total_wait_ms: 0,
            average_wait_secs: 0.0,
            priority: NORMAL_PRIORITY,
            slices_consumed: 0,
            requested_quadrants: 0,
            allocated_quadrants: 0,
            has_emergency: false,
        }
    }
}

/// Lane state guarded by the lane lock.
#[derive(Debug)]
pub(crate) struct LaneData {
    pub(crate) queue: VehicleQueue,
    /// Cached `queue.len()`, kept in step with the queue.
    pub(crate) queue_length: usize,
    pub(crate) state: LaneState,
    pub(crate) priority: u8,
    pub(crate) waiting_time: u64,
    pub(crate) last_arrival_ms: u128,
    pub(crate) last_service_ms: Option<u128>,
    pub(crate) total_arrivals: u64,
    pub(crate) total_served: u64,
    pub(crate) total_wait_ms: u128,
    pub(crate) slices_consumed: u32,
    pub(crate) requested_quadrants: u8,
    pub(crate) allocated_quadrants: u8,
}

impl LaneData {
    fn new(capacity: usize, priority: u8) -> Self {
        Self {
            queue: VehicleQueue::new(capacity),
            queue_length: 0,
            state: LaneState::Waiting,
            priority,
            waiting_time: 0,
            last_arrival_ms: now_ms(),
            last_service_ms: None,
            total_arrivals: 0,
            total_served: 0,
            total_wait_ms: 0,
            slices_consumed: 0,
            requested_quadrants: 0,
            allocated_quadrants: 0,
        }
    }

    pub(crate) fn enqueue(&mut self, vehicle: Vehicle) -> Result<LaneState, TrafficError> {
        self.queue.enqueue(vehicle)?;
        self.queue_length = self.queue.len();
        self.last_arrival_ms = vehicle.arrived_at_ms;
        self.total_arrivals += 1;
        if self.state == LaneState::Waiting {
            self.state = LaneState::Ready;
        }
        Ok(self.state)
    }

    pub(crate) fn dequeue(&mut self) -> Result<Vehicle, TrafficError> {
        let vehicle = self.queue.dequeue()?;
        self.queue_length = self.queue.len();
        Ok(vehicle)
    }

    /// Validated state change.
    pub(crate) fn transition(&mut self, lane: LaneId, next: LaneState) -> Result<(), TrafficError> {
        if !self.state.can_transition_to(next, self.queue_length == 0) {
            return Err(TrafficError::InvalidTransition {
                lane,
                from: self.state,
                to: next,
            });
        }
        if next == LaneState::Running && self.state != LaneState::Running {
            self.waiting_time = 0;
        }
        if next == LaneState::Waiting && self.queue_length == 0 {
            self.slices_consumed = 0;
        }
        self.state = next;
        Ok(())
    }

    /// Emergency promotion: RUNNING from any state.
    pub(crate) fn force_running(&mut self) {
        if self.state != LaneState::Running {
            self.waiting_time = 0;
            self.state = LaneState::Running;
        }
    }

    /// State a RUNNING lane falls back to when it gives up the intersection.
    pub(crate) const fn yield_state(&self) -> LaneState {
        if self.queue_length > 0 {
            LaneState::Ready
        } else {
            LaneState::Waiting
        }
    }

    fn average_wait_secs(&self) -> f64 {
        if self.total_served == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let avg_ms = self.total_wait_ms as f64 / self.total_served as f64;
        avg_ms / 1000.0
    }

    pub(crate) fn snapshot(&self, lane: LaneId) -> LaneSnapshot {
        LaneSnapshot {
            lane,
            state: self.state,
            queue_length: self.queue_length,
            capacity: self.queue.capacity(),
            arrival_ms: self
                .queue
                .peek()
                .map_or(self.last_arrival_ms, |v| v.arrived_at_ms),
            last_arrival_ms: self.last_arrival_ms,
            last_service_ms: self.last_service_ms,
            waiting_time: self.waiting_time,
            total_arrivals: self.total_arrivals,
            total_served: self.total_served,
            total_wait_ms: self.total_wait_ms,
            average_wait_secs: self.average_wait_secs(),
            priority: self.priority,
            slices_consumed: self.slices_consumed,
            requested_quadrants: self.requested_quadrants,
            allocated_quadrants: self.allocated_quadrants,
            has_emergency: self.queue.has_emergency(),
        }
    }
}

/// One approach to the intersection, modelled as a process.
pub struct LaneProcess {
    id: LaneId,
    data: OrderedMutex<LaneData>,
}

impl LaneProcess {
    /// Create a WAITING lane with an empty queue of `capacity`.
    #[must_use]
    pub fn new(id: LaneId, capacity: usize, monitor: Arc<InvariantMonitor>) -> Self {
        Self::with_priority(id, capacity, NORMAL_PRIORITY, monitor)
    }

    /// Create a lane with an explicit static priority.
    #[must_use]
    pub fn with_priority(
        id: LaneId,
        capacity: usize,
        priority: u8,
        monitor: Arc<InvariantMonitor>,
    ) -> Self {
        Self {
            id,
            data: OrderedMutex::new(LockLevel::Lane, monitor, LaneData::new(capacity, priority)),
        }
    }

    /// Lane identifier.
    #[must_use]
    pub const fn id(&self) -> LaneId {
        self.id
    }

    /// Admit a regular vehicle arriving now.
    ///
    /// # Errors
    ///
    /// `TrafficError::QueueFull` when the lane is at capacity.
    pub fn enqueue_vehicle(&self, id: VehicleId) -> Result<LaneState, TrafficError> {
        self.enqueue(Vehicle::new(id, now_ms()))
    }

    /// Admit a vehicle. Promotes WAITING to READY; returns the resulting state.
    ///
    /// # Errors
    ///
    /// `TrafficError::QueueFull` when the lane is at capacity.
    pub fn enqueue(&self, vehicle: Vehicle) -> Result<LaneState, TrafficError> {
        let result = self.data.lock().enqueue(vehicle);
        match &result {
            Ok(state) => tracing::trace!(lane = %self.id, vehicle = vehicle.id, state = %state, "vehicle queued"),
            Err(e) => tracing::debug!(lane = %self.id, vehicle = vehicle.id, error = %e, "vehicle rejected"),
        }
        result
    }

    /// Remove the vehicle at the head of the queue.
    ///
    /// # Errors
    ///
    /// `TrafficError::QueueEmpty` when no vehicle is queued.
    pub fn dequeue_vehicle(&self) -> Result<Vehicle, TrafficError> {
        self.data.lock().dequeue()
    }

    /// One iteration of the lane's own loop.
    ///
    /// Promotes WAITING to READY when vehicles are queued, falls back from
    /// READY to WAITING when the queue is empty, and ages READY lanes.
    /// RUNNING and BLOCKED lanes are left to the scheduler and allocator.
    ///
    /// # Errors
    ///
    /// Propagates a rejected state transition.
    pub fn tick(&self) -> Result<LaneState, TrafficError> {
        let mut data = self.data.lock();
        match data.state {
            LaneState::Waiting if data.queue_length > 0 => {
                data.transition(self.id, LaneState::Ready)?;
            }
            LaneState::Ready if data.queue_length == 0 => {
                data.transition(self.id, LaneState::Waiting)?;
            }
            _ => {}
        }
        if data.state == LaneState::Ready {
            data.waiting_time += 1;
        }
        Ok(data.state)
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> LaneState {
        self.data.lock().state
    }

    /// Current queue length.
    #[must_use]
    pub fn queue_length(&self) -> usize {
        self.data.lock().queue_length
    }

    /// Static priority.
    #[must_use]
    pub fn priority(&self) -> u8 {
        self.data.lock().priority
    }

    /// Quadrants currently held.
    #[must_use]
    pub fn allocated_quadrants(&self) -> u8 {
        self.data.lock().allocated_quadrants
    }

    /// Mean wait per served vehicle in seconds.
    #[must_use]
    pub fn average_wait_secs(&self) -> f64 {
        self.data.lock().average_wait_secs()
    }

    /// Consistent copy of the lane, blocking on the lane lock.
    #[must_use]
    pub fn snapshot(&self) -> LaneSnapshot {
        self.data.lock().snapshot(self.id)
    }

    /// Consistent copy if the lock is free right now; never blocks.
    #[must_use]
    pub fn try_snapshot(&self) -> Option<LaneSnapshot> {
        self.data.try_lock().map(|data| data.snapshot(self.id))
    }

    /// Validated state change.
    ///
    /// Inside the crate only the scheduler (READY/RUNNING), the allocator glue
    /// (BLOCKED) and the deadlock resolver (WAITING) call this. Mutual
    /// exclusion across lanes is checked by the scheduler, not here.
    ///
    /// # Errors
    ///
    /// `TrafficError::InvalidTransition` when the state machine forbids the change.
    pub fn set_state(&self, next: LaneState) -> Result<(), TrafficError> {
        self.data.lock().transition(self.id, next)
    }

    /// Record quadrant bookkeeping mirrored from the allocator.
    pub(crate) fn set_quadrants(&self, allocated: u8, requested: u8) {
        let mut data = self.data.lock();
        data.allocated_quadrants = allocated;
        data.requested_quadrants = requested;
    }

    /// Block the lane after a denied request, keeping its current allocation.
    pub(crate) fn block_on_request(&self, requested: u8) {
        let mut data = self.data.lock();
        data.requested_quadrants = requested;
        data.state = LaneState::Blocked;
    }

    /// Leave BLOCKED once the pending request is settled. A lane in any
    /// other state is left alone.
    pub(crate) fn unblock(&self) -> Result<LaneState, TrafficError> {
        let mut data = self.data.lock();
        if data.state == LaneState::Blocked {
            data.requested_quadrants = 0;
            let next = data.yield_state();
            data.transition(self.id, next)?;
        }
        Ok(data.state)
    }

    /// Direct guard for multi-field updates under one acquisition.
    pub(crate) fn lock(&self) -> OrderedGuard<'_, LaneData> {
        self.data.lock()
    }
}

impl fmt::Debug for LaneProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaneProcess")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
