//! Builder to construct an intersection from configuration.

use std::sync::Arc;

use crate::config::SimulationConfig;
use crate::core::allocator::ResourceAllocator;
use crate::core::deadlock::DeadlockDetector;
use crate::core::emergency::EmergencyPreemptor;
use crate::core::invariant::InvariantMonitor;
use crate::core::lane::{LaneId, LaneProcess, NORMAL_PRIORITY, NUM_LANES};
use crate::core::metrics::Metrics;
use crate::core::scheduler::Scheduler;
use crate::core::TrafficError;
use crate::runtime::generator::ArrivalTiming;
use crate::runtime::intersection::{Intersection, IntersectionParts};

/// Assembles an [`Intersection`], validating the configuration first.
///
/// Components are constructed lanes first, then scheduler, allocator,
/// emergency preemptor and metrics; they are torn down in reverse.
#[derive(Debug, Clone)]
pub struct IntersectionBuilder {
    config: SimulationConfig,
    monitor: Option<Arc<InvariantMonitor>>,
    arrival: Option<ArrivalTiming>,
    priorities: [u8; NUM_LANES],
}

impl IntersectionBuilder {
    /// Start from `config`; out-of-range values are normalized at build time.
    #[must_use]
    pub const fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            monitor: None,
            arrival: None,
            priorities: [NORMAL_PRIORITY; NUM_LANES],
        }
    }

    /// Share an existing invariant monitor.
    #[must_use]
    pub fn with_monitor(mut self, monitor: Arc<InvariantMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Panic on the first invariant violation.
    #[must_use]
    pub fn strict(mut self) -> Self {
        self.config.strict_invariants = true;
        self
    }

    /// Override the whole-second arrival timing derived from the configuration.
    #[must_use]
    pub fn with_arrival_timing(mut self, timing: ArrivalTiming) -> Self {
        self.arrival = Some(timing);
        self
    }

    /// Static priority of one lane for round-robin scheduling; lower runs first.
    #[must_use]
    pub fn with_lane_priority(mut self, lane: LaneId, priority: u8) -> Self {
        self.priorities[lane.index()] = priority;
        self
    }

    /// Build the intersection.
    ///
    /// # Errors
    ///
    /// `TrafficError::InitializationFailure` when the normalized configuration
    /// is still invalid.
    pub fn build(self) -> Result<Intersection, TrafficError> {
        let config = self.config.normalized();
        config
            .validate()
            .map_err(|e| TrafficError::InitializationFailure(format!("config invalid: {e}")))?;

        let monitor = self
            .monitor
            .unwrap_or_else(|| Arc::new(InvariantMonitor::with_strictness(config.strict_invariants)));
        let arrival = self
            .arrival
            .unwrap_or_else(|| ArrivalTiming::from_config(&config));

        let lanes = LaneId::ALL.map(|id| {
            LaneProcess::with_priority(
                id,
                config.queue_capacity,
                self.priorities[id.index()],
                Arc::clone(&monitor),
            )
        });
        let scheduler = Scheduler::new(
            config.initial_policy,
            config.scheduler_settings(),
            Arc::clone(&monitor),
        );
        let allocator = ResourceAllocator::new(Arc::clone(&monitor));
        let detector = DeadlockDetector::new(config.victim_strategy, Arc::clone(&monitor));
        let emergency = EmergencyPreemptor::new(Arc::clone(&monitor));
        let metrics = Metrics::new(Arc::clone(&monitor));

        tracing::info!(
            policy = %config.initial_policy,
            quantum = config.time_quantum,
            duration_secs = config.duration_secs,
            "intersection initialized"
        );

        Ok(Intersection::from_parts(IntersectionParts {
            config,
            arrival,
            monitor,
            lanes,
            scheduler,
            allocator,
            detector,
            emergency,
            metrics,
        }))
    }
}
