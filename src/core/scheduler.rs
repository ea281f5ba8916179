//! Scheduler: lane selection, context switches and time slices.
//!
//! The scheduler is the only component that moves a lane into RUNNING. Its
//! fields live behind one [`OrderedMutex`] at [`LockLevel::Scheduler`], the
//! lowest level, so it may go on to take the emergency, metrics and lane
//! locks (one lane at a time) while selecting. Time slices never hold the
//! scheduler lock while a crossing is in progress.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::emergency::{EmergencyEvent, EmergencyPreemptor};
use crate::core::history::{ExecutionRecord, HistoryRing};
use crate::core::invariant::{InvariantMonitor, ViolationKind};
use crate::core::lane::{LaneId, LaneProcess, LaneSnapshot, LaneState, NUM_LANES};
use crate::core::lock_order::{LockLevel, OrderedGuard, OrderedMutex};
use crate::core::metrics::Metrics;
use crate::core::TrafficError;
use crate::policy::{PolicyId, PolicyParams, SchedulingPolicy, SystemSnapshot};
use crate::util::clock::{elapsed_ms, now_ms};
use crate::util::shutdown::ShutdownSignal;

/// Maximum entries in the ready queue view.
pub const READY_QUEUE_CAPACITY: usize = 20;

/// Fixed scheduler parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Slices a lane may hold the intersection under a non-preemptive policy.
    pub time_quantum: u32,
    /// Overhead charged per context switch, in milliseconds.
    pub context_switch_ms: u64,
    /// Time for one batch to cross, in milliseconds.
    pub cross_time_ms: u64,
    /// Vehicles cleared per slice.
    pub batch_size: u32,
    /// Execution records retained.
    pub history_capacity: usize,
    /// Multilevel feedback levels.
    pub mlfq_levels: u32,
    /// READY ticks before a multilevel lane is boosted.
    pub aging_threshold: u64,
}

impl SchedulerSettings {
    /// Policy tunables derived from these settings.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn policy_params(&self) -> PolicyParams {
        PolicyParams {
            cross_time_secs: self.cross_time_ms as f64 / 1000.0,
            time_quantum: self.time_quantum,
            mlfq_levels: self.mlfq_levels,
            aging_threshold: self.aging_threshold,
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            time_quantum: 3,
            context_switch_ms: 500,
            cross_time_ms: 3000,
            batch_size: 3,
            history_capacity: 1000,
            mlfq_levels: 3,
            aging_threshold: 50,
        }
    }
}

/// Result of one scheduling pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// No lane is RUNNING and none is READY.
    Idle,
    /// The RUNNING lane keeps the intersection.
    Continue(LaneId),
    /// A context switch happened.
    Switch {
        /// Lane demoted, if one was running.
        from: Option<LaneId>,
        /// Lane promoted to RUNNING.
        to: LaneId,
        /// Whether the switch was forced by an emergency.
        emergency: bool,
    },
}

impl Decision {
    /// Lane holding the intersection after the pass.
    #[must_use]
    pub const fn lane(&self) -> Option<LaneId> {
        match self {
            Self::Idle => None,
            Self::Continue(lane) | Self::Switch { to: lane, .. } => Some(*lane),
        }
    }

    /// Whether a context switch happened.
    #[must_use]
    pub const fn is_switch(&self) -> bool {
        matches!(self, Self::Switch { .. })
    }
}

/// Read-only view of the scheduler for status consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    /// Active policy.
    pub policy: PolicyId,
    /// Lane the scheduler last promoted.
    pub current: Option<LaneId>,
    /// Slices used by the current lane in its quantum.
    pub slice_count: u32,
    /// READY lanes ordered by arrival.
    pub ready_queue: Vec<LaneId>,
    /// Context switches performed.
    pub context_switches: u64,
    /// Scheduling passes performed.
    pub tick: u64,
    /// Most recent execution records, oldest first.
    pub recent: Vec<ExecutionRecord>,
    /// Vehicles per minute across the retained history.
    pub window_throughput_per_min: f64,
}

struct SchedulerState {
    policy: Box<dyn SchedulingPolicy>,
    current: Option<LaneId>,
    slice_count: u32,
    ready_queue: VecDeque<LaneId>,
    history: HistoryRing<ExecutionRecord>,
    context_switches: u64,
    tick: u64,
}

impl SchedulerState {
    fn rebuild_ready_queue(&mut self, snapshot: &SystemSnapshot) {
        let mut ready: Vec<&LaneSnapshot> = snapshot.ready_lanes().collect();
        ready.sort_by(|a, b| crate::policy::fifo_order(a, b));
        self.ready_queue.clear();
        self.ready_queue
            .extend(ready.into_iter().take(READY_QUEUE_CAPACITY).map(|l| l.lane));
    }

    fn snapshot(&self, recent: usize) -> SchedulerSnapshot {
        let skip = self.history.len().saturating_sub(recent);
        SchedulerSnapshot {
            policy: self.policy.id(),
            current: self.current,
            slice_count: self.slice_count,
            ready_queue: self.ready_queue.iter().copied().collect(),
            context_switches: self.context_switches,
            tick: self.tick,
            recent: self.history.iter().skip(skip).copied().collect(),
            window_throughput_per_min: self.history.window_throughput_per_min(),
        }
    }
}

/// Number of records included in [`SchedulerSnapshot::recent`].
const RECENT_RECORDS: usize = 10;

/// The intersection scheduler.
pub struct Scheduler {
    settings: SchedulerSettings,
    monitor: Arc<InvariantMonitor>,
    state: OrderedMutex<SchedulerState>,
}

impl Scheduler {
    /// Scheduler running `policy` with `settings`.
    #[must_use]
    pub fn new(policy: PolicyId, settings: SchedulerSettings, monitor: Arc<InvariantMonitor>) -> Self {
        let state = SchedulerState {
            policy: policy.build(&settings.policy_params()),
            current: None,
            slice_count: 0,
            ready_queue: VecDeque::with_capacity(READY_QUEUE_CAPACITY),
            history: HistoryRing::new(settings.history_capacity),
            context_switches: 0,
            tick: 0,
        };
        Self {
            settings,
            state: OrderedMutex::new(LockLevel::Scheduler, Arc::clone(&monitor), state),
            monitor,
        }
    }

    /// Fixed parameters.
    #[must_use]
    pub const fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Active policy.
    #[must_use]
    pub fn policy(&self) -> PolicyId {
        self.state.lock().policy.id()
    }

    /// Lane last promoted to RUNNING.
    #[must_use]
    pub fn current(&self) -> Option<LaneId> {
        self.state.lock().current
    }

    /// Context switches performed.
    #[must_use]
    pub fn context_switches(&self) -> u64 {
        self.state.lock().context_switches
    }

    /// Execution history, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<ExecutionRecord> {
        self.state.lock().history.iter().copied().collect()
    }

    /// View for status consumers; blocks on the scheduler lock.
    #[must_use]
    pub fn snapshot(&self) -> SchedulerSnapshot {
        self.state.lock().snapshot(RECENT_RECORDS)
    }

    /// View if the scheduler lock is free; never blocks.
    #[must_use]
    pub fn try_snapshot(&self) -> Option<SchedulerSnapshot> {
        self.state.try_lock().map(|s| s.snapshot(RECENT_RECORDS))
    }

    /// Consistent view of every lane, one lane lock at a time.
    #[must_use]
    pub fn snapshot_lanes(lanes: &[LaneProcess; NUM_LANES], current: Option<LaneId>, tick: u64) -> SystemSnapshot {
        SystemSnapshot {
            lanes: [
                lanes[0].snapshot(),
                lanes[1].snapshot(),
                lanes[2].snapshot(),
                lanes[3].snapshot(),
            ],
            current,
            tick,
        }
    }

    /// Scheduling passes taken; emergencies are stamped with this counter.
    #[must_use]
    pub fn tick(&self) -> u64 {
        self.state.lock().tick
    }

    /// One scheduling pass.
    ///
    /// A pending emergency whose lane is not BLOCKED is served first through
    /// a forced context switch. The event stays pending until
    /// [`complete_emergency`](Self::complete_emergency) is called for the
    /// lane after it crosses.
    /// Otherwise a RUNNING lane keeps the intersection until it drains or uses
    /// its quantum (non-preemptive policies), and the policy picks among READY
    /// lanes. The pass ends by checking that at most one lane is RUNNING.
    ///
    /// # Errors
    ///
    /// `TrafficError::InvariantViolation` when more than one lane is RUNNING;
    /// the violation is also recorded with the monitor.
    pub fn schedule_next(
        &self,
        lanes: &[LaneProcess; NUM_LANES],
        metrics: &Metrics,
        emergency: &EmergencyPreemptor,
    ) -> Result<Decision, TrafficError> {
        let mut state = self.state.lock();
        state.tick += 1;
        let tick = state.tick;

        // A BLOCKED target waits for its quadrants; other lanes keep running
        // so the holders can release them.
        let blocked = LaneId::ALL.map(|id| lanes[id.index()].state() == LaneState::Blocked);
        if let Some(event) = emergency.peek_next_where(|lane| !blocked[lane.index()]) {
            let target = event.lane;
            let from = state.current;
            let decision = if lanes[target.index()].state() == LaneState::Running {
                state.current = Some(target);
                Decision::Continue(target)
            } else {
                self.context_switch(&mut state, lanes, metrics, from, target, true)?;
                Decision::Switch {
                    from,
                    to: target,
                    emergency: true,
                }
            };
            tracing::info!(lane = %target, kind = %event.kind, tick, "emergency preemption");
            return Ok(decision);
        }

        let snapshot = Self::snapshot_lanes(lanes, state.current, tick);
        state.rebuild_ready_queue(&snapshot);
        let running = snapshot.running_lane().map(|l| l.lane);

        if let Some(lane) = running {
            if !state.policy.is_preemptive() && state.slice_count < self.settings.time_quantum {
                return Ok(Decision::Continue(lane));
            }
        }

        match state.policy.select_next(&snapshot) {
            Some(next) if Some(next) != running => {
                let from = running.or(state.current);
                if self.context_switch(&mut state, lanes, metrics, from, next, false)? {
                    Ok(Decision::Switch {
                        from,
                        to: next,
                        emergency: false,
                    })
                } else {
                    Ok(running.map_or(Decision::Idle, Decision::Continue))
                }
            }
            _ => match running {
                Some(lane) => {
                    if state.slice_count >= self.settings.time_quantum {
                        state.slice_count = 0;
                    }
                    Ok(Decision::Continue(lane))
                }
                None => Ok(Decision::Idle),
            },
        }
    }

    /// Resolve the pending emergency for `lane` once it has crossed, recording
    /// the response time in scheduling passes.
    pub fn complete_emergency(
        &self,
        lane: LaneId,
        emergency: &EmergencyPreemptor,
        metrics: &Metrics,
    ) -> Option<EmergencyEvent> {
        let tick = self.tick();
        let event = emergency.resolve(lane)?;
        let response = tick.saturating_sub(event.arrival_tick);
        metrics.record_emergency_handled(response);
        tracing::info!(lane = %lane, kind = %event.kind, response_ticks = response, "emergency served");
        Some(event)
    }

    /// Demote `from` if it is RUNNING, promote `to`, and account for the switch.
    ///
    /// A forced switch promotes `to` from any state. An unforced switch is
    /// abandoned (returning `false`) when `to` stopped being READY after the
    /// snapshot was taken.
    fn context_switch(
        &self,
        state: &mut OrderedGuard<'_, SchedulerState>,
        lanes: &[LaneProcess; NUM_LANES],
        metrics: &Metrics,
        from: Option<LaneId>,
        to: LaneId,
        forced: bool,
    ) -> Result<bool, TrafficError> {
        if let Some(prev) = from.filter(|p| *p != to) {
            let mut data = lanes[prev.index()].lock();
            if data.state == LaneState::Running {
                let next = data.yield_state();
                data.transition(prev, next)?;
            }
        }

        {
            let mut data = lanes[to.index()].lock();
            if forced {
                data.force_running();
            } else if data.state == LaneState::Ready {
                data.transition(to, LaneState::Running)?;
            } else {
                tracing::debug!(lane = %to, state = %data.state, "switch target no longer ready");
                state.current = None;
                return Ok(false);
            }
        }

        state.current = Some(to);
        state.slice_count = 0;
        state.context_switches += 1;
        metrics.record_context_switch(u128::from(self.settings.context_switch_ms));
        tracing::debug!(
            from = ?from.map(LaneId::name),
            to = %to,
            forced,
            switches = state.context_switches,
            "context switch"
        );

        self.check_mutual_exclusion(lanes)?;
        Ok(true)
    }

    /// Verify that at most one lane is RUNNING.
    ///
    /// # Errors
    ///
    /// `TrafficError::InvariantViolation` listing the RUNNING lanes.
    pub fn check_mutual_exclusion(&self, lanes: &[LaneProcess; NUM_LANES]) -> Result<(), TrafficError> {
        let running: Vec<LaneId> = lanes
            .iter()
            .filter(|lane| lane.state() == LaneState::Running)
            .map(LaneProcess::id)
            .collect();
        if running.len() > 1 {
            let detail = format!("lanes {running:?} are RUNNING at once");
            self.monitor.record(ViolationKind::MultipleRunning, detail.clone());
            return Err(TrafficError::InvariantViolation(detail));
        }
        Ok(())
    }

    /// Let `lane` use the intersection for one slice.
    ///
    /// Clears up to `batch_size` vehicles, waits one crossing time with no lock
    /// held, then records the slice. The lane falls back to WAITING only if its
    /// queue is empty; otherwise it stays RUNNING for the next pass. Returns
    /// `None` when `lane` was not RUNNING.
    ///
    /// # Errors
    ///
    /// Propagates a rejected state transition.
    pub fn execute_time_slice(
        &self,
        lanes: &[LaneProcess; NUM_LANES],
        metrics: &Metrics,
        shutdown: &ShutdownSignal,
        lane: LaneId,
    ) -> Result<Option<ExecutionRecord>, TrafficError> {
        let process = &lanes[lane.index()];
        let start_ms = now_ms();

        let served = {
            let mut totals = metrics.lock();
            let mut data = process.lock();
            if data.state != LaneState::Running {
                return Ok(None);
            }
            let mut served = 0_u32;
            while served < self.settings.batch_size {
                let Ok(vehicle) = data.dequeue() else { break };
                let wait = elapsed_ms(vehicle.arrived_at_ms, start_ms);
                data.total_served += 1;
                data.total_wait_ms += wait;
                totals.record_served(lane, wait);
                served += 1;
            }
            if served > 0 {
                data.last_service_ms = Some(start_ms);
            }
            data.slices_consumed += 1;
            drop(data);
            drop(totals);
            served
        };

        if served > 0 {
            shutdown.sleep(Duration::from_millis(self.settings.cross_time_ms));
        }
        let end_ms = now_ms();

        {
            let mut totals = metrics.lock();
            let mut data = process.lock();
            if data.state == LaneState::Running && data.queue_length == 0 {
                data.transition(lane, LaneState::Waiting)?;
            }
            totals.record_busy(elapsed_ms(start_ms, end_ms));
            drop(data);
            drop(totals);
        }

        let record = ExecutionRecord {
            lane,
            start_ms,
            end_ms,
            vehicles_processed: served,
        };
        {
            let mut state = self.state.lock();
            state.history.push(record);
            if state.current == Some(lane) {
                state.slice_count += 1;
            }
        }
        tracing::debug!(lane = %lane, vehicles = served, duration_ms = %record.duration_ms(), "time slice complete");
        Ok(Some(record))
    }

    /// Swap the active policy.
    ///
    /// Resets the current lane and demotes any RUNNING lane to READY or WAITING.
    pub fn set_policy(&self, policy: PolicyId, lanes: &[LaneProcess; NUM_LANES]) -> Result<(), TrafficError> {
        let mut state = self.state.lock();
        state.policy = policy.build(&self.settings.policy_params());
        state.current = None;
        state.slice_count = 0;
        state.ready_queue.clear();
        for lane in lanes {
            let mut data = lane.lock();
            if data.state == LaneState::Running {
                let next = data.yield_state();
                data.transition(lane.id(), next)?;
            }
        }
        tracing::info!(policy = %policy, "scheduling policy changed");
        Ok(())
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
