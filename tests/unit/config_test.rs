//! Tests for configuration loading and clamping

use std::collections::HashMap;

use trafficguru::config::{SimulationConfig, ENV_PREFIX};
use trafficguru::core::{TrafficError, VictimStrategy};
use trafficguru::policy::PolicyId;

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (format!("{ENV_PREFIX}{k}"), (*v).to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_defaults_are_valid() {
    let cfg = SimulationConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.normalized(), cfg);
    assert_eq!(cfg.duration().as_secs(), 300);
}

#[test]
fn test_out_of_range_values_clamp() {
    let cfg = SimulationConfig {
        duration_secs: 5,
        min_arrival_secs: 0,
        max_arrival_secs: -3,
        time_quantum: -1,
        queue_capacity: 0,
        quadrants_per_crossing: 9,
        ..SimulationConfig::default()
    };
    assert!(cfg.validate().is_err());
    let fixed = cfg.normalized();
    assert_eq!(fixed.duration_secs, 10);
    assert_eq!(fixed.min_arrival_secs, 1);
    assert_eq!(fixed.max_arrival_secs, 5);
    assert_eq!(fixed.time_quantum, 3);
    assert_eq!(fixed.queue_capacity, 20);
    assert_eq!(fixed.quadrants_per_crossing, 2);
    assert!(fixed.validate().is_ok());

    let long = SimulationConfig {
        duration_secs: 10_000,
        ..SimulationConfig::default()
    };
    assert_eq!(long.normalized().duration_secs, 3600);
}

#[test]
fn test_reversed_arrival_bounds_swap() {
    let cfg = SimulationConfig {
        min_arrival_secs: 9,
        max_arrival_secs: 2,
        ..SimulationConfig::default()
    }
    .normalized();
    assert_eq!((cfg.min_arrival_secs, cfg.max_arrival_secs), (2, 9));
}

#[test]
fn test_json_partial_config() {
    let cfg = SimulationConfig::from_json_str(
        r#"{"duration_secs": 60, "initial_policy": "priority_round_robin", "victim_strategy": "longest_wait"}"#,
    )
    .unwrap();
    assert_eq!(cfg.duration_secs, 60);
    assert_eq!(cfg.initial_policy, PolicyId::PriorityRoundRobin);
    assert_eq!(cfg.victim_strategy, VictimStrategy::LongestWait);
    assert_eq!(cfg.time_quantum, 3);
}

#[test]
fn test_json_parse_error_is_initialization_failure() {
    let err = SimulationConfig::from_json_str("{not json").unwrap_err();
    assert!(matches!(err, TrafficError::InitializationFailure(_)));
}

#[test]
fn test_lookup_overrides_defaults() {
    let cfg = SimulationConfig::from_lookup(lookup(&[
        ("DURATION_SECS", "120"),
        ("TIME_QUANTUM", "5"),
        ("POLICY", "mlfq"),
        ("DEBUG", "true"),
        ("SEED", "42"),
    ]))
    .unwrap();
    assert_eq!(cfg.duration_secs, 120);
    assert_eq!(cfg.time_quantum, 5);
    assert_eq!(cfg.initial_policy, PolicyId::MultilevelFeedback);
    assert!(cfg.debug);
    assert_eq!(cfg.seed, Some(42));
}

#[test]
fn test_lookup_clamps_rather_than_rejects() {
    let cfg = SimulationConfig::from_lookup(lookup(&[("DURATION_SECS", "-4")])).unwrap();
    assert_eq!(cfg.duration_secs, 300);
}

#[test]
fn test_lookup_rejects_garbage() {
    let err = SimulationConfig::from_lookup(lookup(&[("TIME_QUANTUM", "three")])).unwrap_err();
    assert!(matches!(err, TrafficError::InitializationFailure(_)));
}

#[test]
fn test_scheduler_settings_follow_config() {
    let cfg = SimulationConfig {
        time_quantum: 4,
        cross_time_ms: 1500,
        ..SimulationConfig::default()
    };
    let settings = cfg.scheduler_settings();
    assert_eq!(settings.time_quantum, 4);
    assert_eq!(settings.cross_time_ms, 1500);
    assert!((settings.policy_params().cross_time_secs - 1.5).abs() < 1e-9);
}
