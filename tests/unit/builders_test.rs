//! Tests for builder modules

use std::sync::Arc;

use trafficguru::builders::IntersectionBuilder;
use trafficguru::config::SimulationConfig;
use trafficguru::core::{InvariantMonitor, LaneId, LaneState, VictimStrategy, NUM_LANES};
use trafficguru::policy::PolicyId;
use trafficguru::runtime::ArrivalTiming;

#[test]
fn test_builder_defaults() {
    let ix = IntersectionBuilder::new(SimulationConfig::default())
        .build()
        .unwrap();
    assert_eq!(ix.lanes().len(), NUM_LANES);
    for (i, lane) in ix.lanes().iter().enumerate() {
        assert_eq!(lane.id().index(), i);
        assert_eq!(lane.state(), LaneState::Waiting);
        assert_eq!(lane.queue_length(), 0);
    }
    assert_eq!(ix.scheduler().policy(), PolicyId::Sjf);
    assert_eq!(ix.scheduler().current(), None);
    assert_eq!(ix.detector().strategy(), VictimStrategy::SmallestAllocation);
    assert!(!ix.monitor().is_strict());
    assert!(!ix.is_paused());
    assert!(ix.is_running());
}

#[test]
fn test_builder_applies_config() {
    let ix = IntersectionBuilder::new(SimulationConfig {
        initial_policy: PolicyId::AgingSjf,
        victim_strategy: VictimStrategy::LongestWait,
        queue_capacity: 4,
        ..SimulationConfig::default()
    })
    .strict()
    .build()
    .unwrap();
    assert_eq!(ix.scheduler().policy(), PolicyId::AgingSjf);
    assert_eq!(ix.detector().strategy(), VictimStrategy::LongestWait);
    assert_eq!(ix.lane(LaneId::SOUTH).snapshot().capacity, 4);
    assert!(ix.monitor().is_strict());
}

#[test]
fn test_builder_shares_monitor() {
    let monitor = Arc::new(InvariantMonitor::new());
    let a = IntersectionBuilder::new(SimulationConfig::default())
        .with_monitor(Arc::clone(&monitor))
        .build()
        .unwrap();
    let b = IntersectionBuilder::new(SimulationConfig::default())
        .build()
        .unwrap();
    assert!(Arc::ptr_eq(a.monitor(), &monitor));
    assert!(!Arc::ptr_eq(b.monitor(), &monitor));
}

#[test]
fn test_arrival_timing_override() {
    let timing = ArrivalTiming::from_millis(5, 10, 2);
    let ix = IntersectionBuilder::new(SimulationConfig::default())
        .with_arrival_timing(timing)
        .build()
        .unwrap();
    assert_eq!(ix.arrival_timing(), timing);

    let derived = IntersectionBuilder::new(SimulationConfig::default())
        .build()
        .unwrap();
    assert_eq!(derived.arrival_timing().min_ms, 3000);
    assert_eq!(derived.arrival_timing().max_ms, 8000);
}
