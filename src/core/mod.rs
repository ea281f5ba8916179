//! Core intersection model: lanes, scheduler, allocator and recovery.

pub mod allocator;
pub mod deadlock;
pub mod emergency;
pub mod error;
pub mod history;
pub mod invariant;
pub mod lane;
pub mod lock_order;
pub mod metrics;
pub mod scheduler;
pub mod vehicle_queue;

pub use allocator::{is_safe_state, ResourceAllocator, ResourceSnapshot, TOTAL_QUADRANTS};
pub use deadlock::{DeadlockDetector, Resolution, VictimStrategy, WaitForGraph};
pub use emergency::{EmergencyEvent, EmergencyKind, EmergencyPreemptor};
pub use error::{AppResult, TrafficError};
pub use history::{ExecutionRecord, HistoryRing};
pub use invariant::{InvariantMonitor, Violation, ViolationKind};
pub use lane::{LaneId, LaneProcess, LaneSnapshot, LaneState, NORMAL_PRIORITY, NUM_LANES};
pub use lock_order::{LockLevel, OrderedGuard, OrderedMutex};
pub use metrics::{jain_fairness, Metrics, MetricsSnapshot};
pub use scheduler::{Decision, Scheduler, SchedulerSettings, SchedulerSnapshot};
pub use vehicle_queue::{Vehicle, VehicleId, VehicleQueue};
