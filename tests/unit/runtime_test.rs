//! Tests for the runtime surface: commands, status reads and stepping

use trafficguru::builders::IntersectionBuilder;
use trafficguru::config::SimulationConfig;
use trafficguru::core::{EmergencyKind, LaneId, LaneState, TrafficError};
use trafficguru::policy::PolicyId;
use trafficguru::runtime::{Command, Intersection, StatusReader, StepOutcome};

fn intersection() -> Intersection {
    IntersectionBuilder::new(SimulationConfig {
        cross_time_ms: 0,
        context_switch_ms: 0,
        emergency_probability: 0,
        ..SimulationConfig::default()
    })
    .strict()
    .build()
    .unwrap()
}

#[test]
fn test_idle_step() {
    let ix = intersection();
    let outcome = ix.step().unwrap();
    assert!(matches!(
        outcome,
        StepOutcome::Ran {
            record: None,
            denied: false,
            ..
        }
    ));
    assert_eq!(ix.tick_count(), 1);
}

#[test]
fn test_steps_drain_every_lane() {
    let ix = intersection();
    for lane in LaneId::ALL {
        for _ in 0..4 {
            ix.generate_arrival(lane, None).unwrap();
        }
    }
    for _ in 0..40 {
        ix.step().unwrap();
    }
    assert!(ix.lanes().iter().all(|l| l.queue_length() == 0));
    let metrics = ix.metrics().snapshot();
    assert_eq!(metrics.total_processed, 16);
    assert_eq!(metrics.lane_throughput, [4, 4, 4, 4]);
    assert!((metrics.fairness_index - 1.0).abs() < 1e-9);
    assert!(ix.lanes().iter().all(|l| l.state() == LaneState::Waiting));
    assert_eq!(ix.allocator().available(), 4);
    assert!(!ix.scheduler().history().is_empty());
}

#[test]
fn test_vehicle_ids_are_sequential() {
    let ix = intersection();
    let a = ix.generate_arrival(LaneId::NORTH, None).unwrap();
    let b = ix.generate_arrival(LaneId::SOUTH, None).unwrap();
    assert_eq!(b, a + 1);
}

#[test]
fn test_command_round_trip_over_json() {
    let ix = intersection();
    let commands: Vec<Command> = serde_json::from_str(
        r#"[
            {"command": "pause"},
            {"command": "set_policy", "policy": "weighted_sjf"},
            {"command": "trigger_emergency", "lane": 3, "kind": "ambulance"},
            {"command": "resume"}
        ]"#,
    )
    .unwrap();
    for command in commands {
        assert!(command.apply(&ix).unwrap());
    }
    assert_eq!(ix.scheduler().policy(), PolicyId::WeightedSjf);
    assert!(ix.emergency().is_pending(LaneId::WEST));
    assert!(!ix.is_paused());
}

#[test]
fn test_bad_lane_command_is_rejected() {
    let ix = intersection();
    let err = Command::TriggerEmergency {
        lane: 4,
        kind: EmergencyKind::Police,
    }
    .apply(&ix)
    .unwrap_err();
    assert_eq!(err, TrafficError::InvalidLane(4));
    assert_eq!(ix.emergency().pending_count(), 0);
}

#[test]
fn test_status_reader_tracks_progress() {
    let ix = intersection();
    let mut reader = StatusReader::new();
    let before = reader.poll(&ix);
    ix.generate_arrival(LaneId::EAST, None).unwrap();
    ix.step().unwrap();
    let after = reader.poll(&ix);

    assert_eq!(before.tick, 0);
    assert_eq!(after.tick, 1);
    assert!(after.is_fully_fresh());
    let scheduler = &after.scheduler.as_ref().unwrap().value;
    assert_eq!(scheduler.context_switches, 1);
    assert_eq!(after.metrics.as_ref().unwrap().value.total_processed, 1);
    let json = serde_json::to_string(&after).unwrap();
    assert!(json.contains("\"freshness\":\"fresh\""));
}
