//! Global simulation metrics.
//!
//! Counters live behind one [`OrderedMutex`] at [`LockLevel::Metrics`]. Code
//! that updates both metrics and a lane takes the metrics guard first and
//! drops it last.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::invariant::InvariantMonitor;
use crate::core::lane::{LaneId, NUM_LANES};
use crate::core::lock_order::{LockLevel, OrderedGuard, OrderedMutex};
use crate::util::clock::{elapsed_ms, now_ms};

/// Raw counters guarded by the metrics lock.
#[derive(Debug, Clone)]
pub(crate) struct MetricsData {
    started_ms: u128,
    total_processed: u64,
    total_generated: u64,
    lane_throughput: [u64; NUM_LANES],
    lane_wait_ms: [u128; NUM_LANES],
    context_switches: u64,
    switch_overhead_ms: u128,
    deadlocks_prevented: u64,
    deadlocks_resolved: u64,
    queue_overflows: u64,
    emergencies_handled: u64,
    emergency_response_ticks: u64,
    busy_ms: u128,
}

impl MetricsData {
    fn new(started_ms: u128) -> Self {
        Self {
            started_ms,
            total_processed: 0,
            total_generated: 0,
            lane_throughput: [0; NUM_LANES],
            lane_wait_ms: [0; NUM_LANES],
            context_switches: 0,
            switch_overhead_ms: 0,
            deadlocks_prevented: 0,
            deadlocks_resolved: 0,
            queue_overflows: 0,
            emergencies_handled: 0,
            emergency_response_ticks: 0,
            busy_ms: 0,
        }
    }

    /// One vehicle crossed on `lane` after waiting `wait_ms`.
    pub(crate) fn record_served(&mut self, lane: LaneId, wait_ms: u128) {
        self.total_processed += 1;
        self.lane_throughput[lane.index()] += 1;
        self.lane_wait_ms[lane.index()] += wait_ms;
    }

    pub(crate) fn record_busy(&mut self, ms: u128) {
        self.busy_ms += ms;
    }

    pub(crate) fn record_context_switch(&mut self, overhead_ms: u128) {
        self.context_switches += 1;
        self.switch_overhead_ms += overhead_ms;
    }

    fn snapshot(&self, now: u128) -> MetricsSnapshot {
        let elapsed = elapsed_ms(self.started_ms, now);
        #[allow(clippy::cast_precision_loss)]
        let (vehicles_per_minute, average_wait_secs, utilization, avg_response) = {
            let minutes = elapsed as f64 / 60_000.0;
            let vpm = if minutes > 0.0 {
                self.total_processed as f64 / minutes
            } else {
                0.0
            };
            let total_wait: u128 = self.lane_wait_ms.iter().sum();
            let avg_wait = if self.total_processed > 0 {
                total_wait as f64 / self.total_processed as f64 / 1000.0
            } else {
                0.0
            };
            let util = if elapsed > 0 {
                (self.busy_ms as f64 / elapsed as f64).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let response = if self.emergencies_handled > 0 {
                self.emergency_response_ticks as f64 / self.emergencies_handled as f64
            } else {
                0.0
            };
            (vpm, avg_wait, util, response)
        };
        MetricsSnapshot {
            elapsed_ms: elapsed,
            total_processed: self.total_processed,
            total_generated: self.total_generated,
            lane_throughput: self.lane_throughput,
            lane_wait_ms: self.lane_wait_ms,
            context_switches: self.context_switches,
            switch_overhead_ms: self.switch_overhead_ms,
            deadlocks_prevented: self.deadlocks_prevented,
            deadlocks_resolved: self.deadlocks_resolved,
            queue_overflows: self.queue_overflows,
            emergencies_handled: self.emergencies_handled,
            average_emergency_response_ticks: avg_response,
            busy_ms: self.busy_ms,
            vehicles_per_minute,
            average_wait_secs,
            utilization,
            fairness_index: jain_fairness(&self.lane_throughput),
        }
    }
}

/// Jain's fairness index over per-lane throughput. `1.0` when nothing was served.
#[must_use]
pub fn jain_fairness(values: &[u64]) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let (sum, sum_sq) = values.iter().fold((0.0_f64, 0.0_f64), |(s, sq), v| {
        let v = *v as f64;
        (s + v, sq + v * v)
    });
    if sum_sq == 0.0 || values.is_empty() {
        return 1.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    (sum * sum) / (n * sum_sq)
}

/// Point-in-time copy of the metrics with derived statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Milliseconds since the metrics were created.
    pub elapsed_ms: u128,
    /// Vehicles that crossed.
    pub total_processed: u64,
    /// Vehicles generated, including those dropped on overflow.
    pub total_generated: u64,
    /// Vehicles served per lane.
    pub lane_throughput: [u64; NUM_LANES],
    /// Accumulated vehicle wait per lane in milliseconds.
    pub lane_wait_ms: [u128; NUM_LANES],
    /// Context switches performed.
    pub context_switches: u64,
    /// Accumulated context-switch overhead in milliseconds.
    pub switch_overhead_ms: u128,
    /// Quadrant requests denied by the allocator.
    pub deadlocks_prevented: u64,
    /// Wait cycles broken by the deadlock resolver.
    pub deadlocks_resolved: u64,
    /// Vehicles dropped because their lane was full.
    pub queue_overflows: u64,
    /// Emergency events resolved.
    pub emergencies_handled: u64,
    /// Mean ticks from emergency trigger to lane RUNNING.
    pub average_emergency_response_ticks: f64,
    /// Milliseconds the intersection was occupied.
    pub busy_ms: u128,
    /// Vehicles processed per minute of elapsed time.
    pub vehicles_per_minute: f64,
    /// Mean wait per processed vehicle in seconds.
    pub average_wait_secs: f64,
    /// Fraction of elapsed time the intersection was busy.
    pub utilization: f64,
    /// Jain's fairness index over lane throughput.
    pub fairness_index: f64,
}

/// Shared metrics for one intersection.
#[derive(Debug)]
pub struct Metrics {
    data: OrderedMutex<MetricsData>,
}

impl Metrics {
    /// Fresh metrics starting now.
    #[must_use]
    pub fn new(monitor: Arc<InvariantMonitor>) -> Self {
        Self::starting_at(now_ms(), monitor)
    }

    /// Fresh metrics with an explicit start time.
    #[must_use]
    pub fn starting_at(started_ms: u128, monitor: Arc<InvariantMonitor>) -> Self {
        Self {
            data: OrderedMutex::new(LockLevel::Metrics, monitor, MetricsData::new(started_ms)),
        }
    }

    /// A vehicle was generated.
    pub fn record_generated(&self) {
        self.data.lock().total_generated += 1;
    }

    /// A generated vehicle was dropped on a full queue.
    pub fn record_overflow(&self) {
        self.data.lock().queue_overflows += 1;
    }

    /// A context switch happened, costing `overhead_ms`.
    pub fn record_context_switch(&self, overhead_ms: u128) {
        self.data.lock().record_context_switch(overhead_ms);
    }

    /// The allocator denied an unsafe or unavailable grant.
    pub fn record_denial(&self) {
        self.data.lock().deadlocks_prevented += 1;
    }

    /// The resolver broke a wait cycle.
    pub fn record_deadlock_resolved(&self) {
        self.data.lock().deadlocks_resolved += 1;
    }

    /// An emergency was served `response_ticks` after it was raised.
    pub fn record_emergency_handled(&self, response_ticks: u64) {
        let mut data = self.data.lock();
        data.emergencies_handled += 1;
        data.emergency_response_ticks += response_ticks;
    }

    /// Point-in-time copy; blocks on the metrics lock.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = now_ms();
        self.data.lock().snapshot(now)
    }

    /// Point-in-time copy if the lock is free; never blocks.
    #[must_use]
    pub fn try_snapshot(&self) -> Option<MetricsSnapshot> {
        let now = now_ms();
        self.data.try_lock().map(|data| data.snapshot(now))
    }

    pub(crate) fn lock(&self) -> OrderedGuard<'_, MetricsData> {
        self.data.lock()
    }
}
