//! The shared intersection context.
//!
//! One explicitly constructed value owns every lane, the scheduler, the
//! allocator, the emergency preemptor and the metrics. Thread loops hold it
//! through an `Arc`; tests build isolated instances with
//! [`IntersectionBuilder`](crate::builders::IntersectionBuilder). Fields are
//! declared in reverse construction order so they are torn down in reverse.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::SimulationConfig;
use crate::core::allocator::ResourceAllocator;
use crate::core::deadlock::{DeadlockDetector, Resolution};
use crate::core::emergency::{EmergencyKind, EmergencyPreemptor};
use crate::core::history::ExecutionRecord;
use crate::core::invariant::InvariantMonitor;
use crate::core::lane::{LaneId, LaneProcess, LaneState, NUM_LANES};
use crate::core::metrics::Metrics;
use crate::core::scheduler::{Decision, Scheduler};
use crate::core::vehicle_queue::{Vehicle, VehicleId};
use crate::core::TrafficError;
use crate::policy::PolicyId;
use crate::runtime::generator::ArrivalTiming;
use crate::util::clock::now_ms;
use crate::util::shutdown::ShutdownSignal;

/// What one driver step did.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The simulation is paused; nothing ran.
    Paused,
    /// A scheduling pass ran.
    Ran {
        /// Scheduler decision.
        decision: Decision,
        /// Slice executed by the selected lane, if it was admitted.
        record: Option<ExecutionRecord>,
        /// Whether the selected lane was denied its quadrants.
        denied: bool,
        /// Cycles broken by a deadlock sweep on this step.
        resolutions: Vec<Resolution>,
    },
}

/// Shared simulation state.
pub struct Intersection {
    metrics: Metrics,
    emergency: EmergencyPreemptor,
    detector: DeadlockDetector,
    allocator: ResourceAllocator,
    scheduler: Scheduler,
    lanes: [LaneProcess; NUM_LANES],
    monitor: Arc<InvariantMonitor>,
    shutdown: ShutdownSignal,
    paused: AtomicBool,
    tick: AtomicU64,
    next_vehicle_id: AtomicU64,
    arrival: ArrivalTiming,
    config: SimulationConfig,
}

/// Components assembled by the builder, in construction order.
pub(crate) struct IntersectionParts {
    pub(crate) config: SimulationConfig,
    pub(crate) arrival: ArrivalTiming,
    pub(crate) monitor: Arc<InvariantMonitor>,
    pub(crate) lanes: [LaneProcess; NUM_LANES],
    pub(crate) scheduler: Scheduler,
    pub(crate) allocator: ResourceAllocator,
    pub(crate) detector: DeadlockDetector,
    pub(crate) emergency: EmergencyPreemptor,
    pub(crate) metrics: Metrics,
}

impl Intersection {
    pub(crate) fn from_parts(parts: IntersectionParts) -> Self {
        Self {
            metrics: parts.metrics,
            emergency: parts.emergency,
            detector: parts.detector,
            allocator: parts.allocator,
            scheduler: parts.scheduler,
            lanes: parts.lanes,
            monitor: parts.monitor,
            shutdown: ShutdownSignal::new(),
            paused: AtomicBool::new(false),
            tick: AtomicU64::new(0),
            next_vehicle_id: AtomicU64::new(0),
            arrival: parts.arrival,
            config: parts.config,
        }
    }

    /// All four lanes.
    #[must_use]
    pub const fn lanes(&self) -> &[LaneProcess; NUM_LANES] {
        &self.lanes
    }

    /// One lane.
    #[must_use]
    pub const fn lane(&self, id: LaneId) -> &LaneProcess {
        &self.lanes[id.index()]
    }

    /// The scheduler.
    #[must_use]
    pub const fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// The quadrant allocator.
    #[must_use]
    pub const fn allocator(&self) -> &ResourceAllocator {
        &self.allocator
    }

    /// The deadlock detector.
    #[must_use]
    pub const fn detector(&self) -> &DeadlockDetector {
        &self.detector
    }

    /// Pending emergencies.
    #[must_use]
    pub const fn emergency(&self) -> &EmergencyPreemptor {
        &self.emergency
    }

    /// Global metrics.
    #[must_use]
    pub const fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Invariant monitor shared by every lock in this context.
    #[must_use]
    pub const fn monitor(&self) -> &Arc<InvariantMonitor> {
        &self.monitor
    }

    /// Cooperative cancellation flag.
    #[must_use]
    pub const fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// Normalized configuration.
    #[must_use]
    pub const fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Inter-arrival timing for the generator.
    #[must_use]
    pub const fn arrival_timing(&self) -> ArrivalTiming {
        self.arrival
    }

    /// Driver steps taken.
    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.tick.load(Ordering::Acquire)
    }

    /// Whether the simulation is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Pause every loop. Idempotent; returns `true` if this call paused.
    pub fn pause(&self) -> bool {
        let changed = !self.paused.swap(true, Ordering::AcqRel);
        if changed {
            tracing::info!("simulation paused");
        }
        changed
    }

    /// Resume after a pause. Idempotent; returns `true` if this call resumed.
    pub fn resume(&self) -> bool {
        let changed = self.paused.swap(false, Ordering::AcqRel);
        if changed {
            tracing::info!("simulation resumed");
        }
        changed
    }

    /// Swap the scheduling policy.
    ///
    /// # Errors
    ///
    /// Propagates a rejected lane transition while demoting the running lane.
    pub fn set_policy(&self, policy: PolicyId) -> Result<(), TrafficError> {
        self.scheduler.set_policy(policy, &self.lanes)
    }

    /// Raise an emergency for `lane`; returns `false` if one was already pending.
    ///
    /// The event is stamped with the scheduler's pass counter, the same clock
    /// its response time is measured against.
    pub fn trigger_emergency(&self, lane: LaneId, kind: EmergencyKind) -> bool {
        self.emergency.trigger(lane, kind, self.scheduler.tick())
    }

    /// Ask every loop to stop. Returns `true` for the first request only.
    pub fn request_shutdown(&self) -> bool {
        let first = self.shutdown.request_stop();
        if first {
            tracing::info!("shutdown requested");
        }
        first
    }

    /// Whether loops should keep running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shutdown.is_running()
    }

    /// Admit a new vehicle to `lane`.
    ///
    /// An emergency vehicle also raises a preemption for its lane. A full lane
    /// drops the vehicle and counts an overflow.
    ///
    /// # Errors
    ///
    /// `TrafficError::QueueFull` when the lane is at capacity.
    pub fn generate_arrival(
        &self,
        lane: LaneId,
        emergency: Option<EmergencyKind>,
    ) -> Result<VehicleId, TrafficError> {
        let id = self.next_vehicle_id.fetch_add(1, Ordering::AcqRel);
        self.metrics.record_generated();
        let arrived = now_ms();
        let vehicle = if emergency.is_some() {
            Vehicle::emergency(id, arrived)
        } else {
            Vehicle::new(id, arrived)
        };
        if let Err(e) = self.lane(lane).enqueue(vehicle) {
            self.metrics.record_overflow();
            tracing::warn!(lane = %lane, vehicle = id, "lane full, vehicle dropped");
            return Err(e);
        }
        if let Some(kind) = emergency {
            self.trigger_emergency(lane, kind);
        }
        Ok(id)
    }

    /// One driver iteration: retry blocked emergency lanes, schedule, charge
    /// switch overhead, admit the lane through the allocator, run its slice,
    /// resolve its emergency, release its quadrants, and every
    /// `deadlock_check_interval` steps sweep for deadlocks and retry blocked
    /// requests.
    ///
    /// An emergency lane denied its quadrants keeps its event and is retried
    /// on every step until it crosses.
    ///
    /// # Errors
    ///
    /// `TrafficError::InvariantViolation` from the scheduler or detector, or a
    /// rejected lane transition.
    pub fn step(&self) -> Result<StepOutcome, TrafficError> {
        if self.is_paused() {
            return Ok(StepOutcome::Paused);
        }
        let tick = self.tick.fetch_add(1, Ordering::AcqRel) + 1;
        self.readmit_emergency_lanes()?;

        let decision = self
            .scheduler
            .schedule_next(&self.lanes, &self.metrics, &self.emergency)?;
        if decision.is_switch() {
            self.shutdown
                .sleep(Duration::from_millis(self.scheduler.settings().context_switch_ms));
        }

        let mut record = None;
        let mut denied = false;
        if let Some(lane) = decision.lane() {
            if self.admit(lane) {
                record = self.scheduler.execute_time_slice(
                    &self.lanes,
                    &self.metrics,
                    &self.shutdown,
                    lane,
                )?;
                if record.is_some() {
                    self.scheduler
                        .complete_emergency(lane, &self.emergency, &self.metrics);
                }
                self.release(lane);
            } else {
                denied = true;
            }
        }

        let mut resolutions = Vec::new();
        if tick % self.config.deadlock_check_interval == 0 {
            resolutions = self.deadlock_sweep()?;
            self.revalidate_blocked()?;
        }

        Ok(StepOutcome::Ran {
            decision,
            record,
            denied,
            resolutions,
        })
    }

    /// Acquire the crossing quadrants for `lane`, blocking it on denial.
    fn admit(&self, lane: LaneId) -> bool {
        let needed = self.config.quadrants_per_crossing;
        let held = self.allocator.allocation(lane);
        if held >= needed {
            return true;
        }
        match self.allocator.request_quadrants(lane, needed - held) {
            Ok(_) => {
                self.lane(lane).set_quadrants(needed, 0);
                true
            }
            Err(TrafficError::ResourceDenied { requested, .. }) => {
                self.metrics.record_denial();
                self.lane(lane).block_on_request(requested);
                tracing::debug!(lane = %lane, requested, "lane blocked on quadrants");
                false
            }
            Err(e) => {
                tracing::warn!(lane = %lane, error = %e, "quadrant request rejected");
                false
            }
        }
    }

    fn release(&self, lane: LaneId) {
        self.allocator.release_quadrants(lane);
        self.lane(lane).set_quadrants(0, 0);
    }

    /// Run the deadlock detector now.
    ///
    /// # Errors
    ///
    /// `TrafficError::InvariantViolation` when a cycle has no victim.
    pub fn deadlock_sweep(&self) -> Result<Vec<Resolution>, TrafficError> {
        self.detector
            .detect_and_resolve(&self.lanes, &self.allocator, &self.metrics)
    }

    /// Retry the pending request of every BLOCKED lane; granted lanes return
    /// to READY or WAITING. Returns the lanes unblocked.
    ///
    /// # Errors
    ///
    /// Propagates a rejected lane transition.
    pub fn revalidate_blocked(&self) -> Result<Vec<LaneId>, TrafficError> {
        let mut unblocked = Vec::new();
        for lane in &self.lanes {
            if self.revalidate(lane)? {
                unblocked.push(lane.id());
            }
        }
        if !unblocked.is_empty() {
            tracing::debug!(lanes = ?unblocked, "blocked lanes re-admitted");
        }
        Ok(unblocked)
    }

    fn readmit_emergency_lanes(&self) -> Result<(), TrafficError> {
        for lane in &self.lanes {
            if self.emergency.is_pending(lane.id()) && self.revalidate(lane)? {
                tracing::debug!(lane = %lane.id(), "emergency lane re-admitted");
            }
        }
        Ok(())
    }

    /// Retry the pending request of `lane` if it is BLOCKED; `true` when it
    /// left BLOCKED.
    fn revalidate(&self, lane: &LaneProcess) -> Result<bool, TrafficError> {
        if lane.state() != LaneState::Blocked {
            return Ok(false);
        }
        let id = lane.id();
        match self.allocator.retry_pending(id) {
            Ok(_) => {
                lane.set_quadrants(self.allocator.allocation(id), 0);
                lane.unblock()?;
                Ok(true)
            }
            Err(TrafficError::ResourceDenied { .. }) => Ok(false),
            Err(e) => {
                tracing::warn!(lane = %id, error = %e, "dropping unsatisfiable request");
                self.release(id);
                lane.unblock()?;
                Ok(true)
            }
        }
    }
}

impl std::fmt::Debug for Intersection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Intersection")
            .field("tick", &self.tick_count())
            .field("paused", &self.is_paused())
            .finish_non_exhaustive()
    }
}
