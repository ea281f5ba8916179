//! Tests for error types

use trafficguru::core::{LaneId, LaneState, TrafficError};

#[test]
fn test_queue_errors_display() {
    let err = TrafficError::QueueFull { capacity: 20 };
    assert_eq!(format!("{err}"), "queue full (capacity 20)");
    assert_eq!(format!("{}", TrafficError::QueueEmpty), "queue empty");
}

#[test]
fn test_resource_denied_display() {
    let err = TrafficError::ResourceDenied {
        lane: LaneId::EAST,
        requested: 2,
        available: 1,
    };
    assert_eq!(
        format!("{err}"),
        "resource denied: lane East requested 2, available 1"
    );
}

#[test]
fn test_invalid_transition_display() {
    let err = TrafficError::InvalidTransition {
        lane: LaneId::NORTH,
        from: LaneState::Waiting,
        to: LaneState::Running,
    };
    assert_eq!(
        format!("{err}"),
        "invalid transition on lane North: WAITING -> RUNNING"
    );
}

#[test]
fn test_transient_classification() {
    assert!(TrafficError::QueueEmpty.is_transient());
    assert!(TrafficError::QueueFull { capacity: 1 }.is_transient());
    assert!(!TrafficError::InvariantViolation("two lanes".into()).is_transient());
    assert!(!TrafficError::InitializationFailure("bad".into()).is_transient());
}

#[test]
fn test_exit_code_for_fatal_errors() {
    assert_eq!(TrafficError::InitializationFailure("x".into()).exit_code(), 1);
    assert_eq!(TrafficError::InvalidLane(7).exit_code(), 1);
}

#[test]
fn test_errors_convert_to_anyhow() {
    fn fails() -> trafficguru::core::AppResult<()> {
        Err(TrafficError::InvalidLane(5).into())
    }
    let err = fails().unwrap_err();
    assert_eq!(err.to_string(), "invalid lane index 5");
    assert_eq!(
        err.downcast_ref::<TrafficError>(),
        Some(&TrafficError::InvalidLane(5))
    );
}
