//! Tests for the bounded execution history

use trafficguru::core::{ExecutionRecord, HistoryRing, LaneId};

fn record(lane: LaneId, start_ms: u128, end_ms: u128, vehicles: u32) -> ExecutionRecord {
    ExecutionRecord {
        lane,
        start_ms,
        end_ms,
        vehicles_processed: vehicles,
    }
}

#[test]
fn test_ring_overwrites_oldest() {
    let mut ring = HistoryRing::new(3);
    for i in 0..5_u128 {
        ring.push(record(LaneId::NORTH, i * 10, i * 10 + 5, 1));
    }
    assert_eq!(ring.len(), 3);
    let starts: Vec<u128> = ring.iter().map(|r| r.start_ms).collect();
    assert_eq!(starts, vec![20, 30, 40]);
    assert_eq!(ring.latest().unwrap().start_ms, 40);
}

#[test]
fn test_zero_capacity_retains_nothing() {
    let mut ring = HistoryRing::new(0);
    ring.push(record(LaneId::WEST, 0, 1, 1));
    assert!(ring.is_empty());
    assert!(ring.latest().is_none());
}

#[test]
fn test_window_throughput() {
    let mut ring = HistoryRing::new(10);
    ring.push(record(LaneId::NORTH, 0, 10_000, 3));
    ring.push(record(LaneId::SOUTH, 10_000, 30_000, 2));
    assert_eq!(ring.vehicles_in_window(), 5);
    // five vehicles over thirty seconds
    assert!((ring.window_throughput_per_min() - 10.0).abs() < 1e-9);
}

#[test]
fn test_record_duration() {
    assert_eq!(record(LaneId::EAST, 100, 350, 0).duration_ms(), 250);
}
