//! Behavioural properties of the intersection, exercised through the public API.
//!
//! Every intersection here is built with a strict invariant monitor, so any
//! recorded violation (two RUNNING lanes, a lock-order breach, a cycle with no
//! victim) panics the test.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use trafficguru::builders::IntersectionBuilder;
use trafficguru::config::SimulationConfig;
use trafficguru::core::{
    Decision, EmergencyKind, InvariantMonitor, LaneId, LaneSnapshot, LaneState,
    ResourceAllocator, ResourceSnapshot, TrafficError, Vehicle, VehicleQueue, WaitForGraph,
};
use trafficguru::policy::{PolicyId, PolicyParams, SystemSnapshot};
use trafficguru::runtime::{Command, Intersection, StepOutcome};

fn fast_config() -> SimulationConfig {
    SimulationConfig {
        cross_time_ms: 1,
        context_switch_ms: 0,
        deadlock_check_interval: 2,
        emergency_probability: 0,
        ..SimulationConfig::default()
    }
}

fn intersection(config: SimulationConfig) -> Intersection {
    IntersectionBuilder::new(config).strict().build().unwrap()
}

/// Everything a pause must leave untouched. Time-derived rates are left out.
#[derive(Debug, PartialEq)]
struct FrozenState {
    tick: u64,
    lanes: Vec<LaneSnapshot>,
    policy: PolicyId,
    current: Option<LaneId>,
    slice_count: u32,
    ready_queue: Vec<LaneId>,
    scheduler_tick: u64,
    context_switches: u64,
    resources: ResourceSnapshot,
    processed: u64,
    generated: u64,
    pending_emergencies: usize,
}

fn frozen_state(ix: &Intersection) -> FrozenState {
    let scheduler = ix.scheduler().snapshot();
    let metrics = ix.metrics().snapshot();
    FrozenState {
        tick: ix.tick_count(),
        lanes: ix.lanes().iter().map(|l| l.snapshot()).collect(),
        policy: scheduler.policy,
        current: scheduler.current,
        slice_count: scheduler.slice_count,
        ready_queue: scheduler.ready_queue,
        scheduler_tick: scheduler.tick,
        context_switches: scheduler.context_switches,
        resources: ix.allocator().snapshot(),
        processed: metrics.total_processed,
        generated: metrics.total_generated,
        pending_emergencies: ix.emergency().pending_count(),
    }
}

fn running_lanes(ix: &Intersection) -> usize {
    ix.lanes()
        .iter()
        .filter(|l| l.state() == LaneState::Running)
        .count()
}

#[test]
fn mutual_exclusion_holds_under_random_operations() {
    let ix = intersection(SimulationConfig {
        cross_time_ms: 0,
        batch_size: 1,
        queue_capacity: 5,
        ..fast_config()
    });
    let mut rng = StdRng::seed_from_u64(0x7a11);
    let kinds = [
        EmergencyKind::Ambulance,
        EmergencyKind::FireTruck,
        EmergencyKind::Police,
    ];

    for _ in 0..2_000 {
        let lane = LaneId::ALL[rng.random_range(0..4)];
        match rng.random_range(0..100) {
            0..=39 => {
                let _ = ix.generate_arrival(lane, None);
            }
            40..=79 => {
                ix.step().unwrap();
            }
            80..=84 => {
                let policy = PolicyId::ALL[rng.random_range(0..PolicyId::ALL.len())];
                ix.set_policy(policy).unwrap();
            }
            85..=91 => {
                ix.trigger_emergency(lane, kinds[rng.random_range(0..3)]);
            }
            92..=95 => {
                ix.lane(lane).tick().unwrap();
            }
            _ => {
                if ix.is_paused() {
                    ix.resume();
                } else {
                    ix.pause();
                }
            }
        }
        assert!(running_lanes(&ix) <= 1);
    }
    assert_eq!(ix.monitor().count(), 0);
}

#[test]
fn sjf_selects_shortest_queue() {
    let ix = intersection(fast_config());
    for (lane, count) in [(LaneId::NORTH, 3), (LaneId::SOUTH, 1), (LaneId::EAST, 2)] {
        for _ in 0..count {
            ix.generate_arrival(lane, None).unwrap();
        }
    }
    let decision = ix
        .scheduler()
        .schedule_next(ix.lanes(), ix.metrics(), ix.emergency())
        .unwrap();
    assert_eq!(
        decision,
        Decision::Switch {
            from: None,
            to: LaneId::SOUTH,
            emergency: false
        }
    );
}

#[test]
fn sjf_costs_scale_with_crossing_time() {
    let mut snapshot = SystemSnapshot::idle();
    for (i, len) in [3_usize, 1, 2].into_iter().enumerate() {
        let lane = &mut snapshot.lanes[i];
        lane.state = LaneState::Ready;
        lane.queue_length = len;
        lane.arrival_ms = 100;
    }
    let policy = PolicyId::Sjf.build(&PolicyParams {
        cross_time_secs: 3.0,
        ..PolicyParams::default()
    });
    assert_eq!(policy.select_next(&snapshot), Some(LaneId::SOUTH));
}

#[test]
fn equal_queues_break_ties_by_arrival() {
    let ix = intersection(fast_config());
    ix.lane(LaneId::EAST).enqueue(Vehicle::new(1, 200)).unwrap();
    ix.lane(LaneId::WEST).enqueue(Vehicle::new(2, 100)).unwrap();
    let decision = ix
        .scheduler()
        .schedule_next(ix.lanes(), ix.metrics(), ix.emergency())
        .unwrap();
    assert_eq!(decision.lane(), Some(LaneId::WEST));

    let mut snapshot = SystemSnapshot::idle();
    for lane in [LaneId::NORTH, LaneId::SOUTH] {
        let s: &mut LaneSnapshot = &mut snapshot.lanes[lane.index()];
        s.state = LaneState::Ready;
        s.queue_length = 2;
        s.arrival_ms = 50;
    }
    for id in PolicyId::ALL {
        let policy = id.build(&PolicyParams::default());
        assert_eq!(
            policy.select_next(&snapshot),
            Some(LaneId::NORTH),
            "{id} should fall back to lane order"
        );
    }
}

#[test]
fn allocator_grant_deny_release_retry() {
    let allocator = ResourceAllocator::new(Arc::new(InvariantMonitor::strict()));
    let a = LaneId::NORTH;
    let b = LaneId::EAST;
    assert_eq!(allocator.available(), 4);

    assert_eq!(allocator.request_quadrants(a, 3), Ok(1));
    assert_eq!(
        allocator.request_quadrants(b, 2),
        Err(TrafficError::ResourceDenied {
            lane: b,
            requested: 2,
            available: 1
        })
    );
    assert_eq!(allocator.release_quadrants(a), 3);
    assert_eq!(allocator.available(), 4);
    assert_eq!(allocator.retry_pending(b), Ok(Some(2)));
    assert_eq!(allocator.allocation(b), 2);
    assert!(allocator.is_safe());
}

#[test]
fn queue_respects_bounds() {
    let mut queue = VehicleQueue::new(3);
    assert_eq!(queue.dequeue(), Err(TrafficError::QueueEmpty));
    for id in 0..3 {
        queue.enqueue(Vehicle::new(id, 0)).unwrap();
    }
    assert_eq!(
        queue.enqueue(Vehicle::new(9, 0)),
        Err(TrafficError::QueueFull { capacity: 3 })
    );
    assert_eq!(queue.len(), 3);
    for id in 0..3 {
        assert_eq!(queue.dequeue().unwrap().id, id);
    }
    assert!(queue.is_empty());
    assert_eq!(queue.dequeue(), Err(TrafficError::QueueEmpty));
}

#[test]
fn emergency_preempts_running_lane() {
    let ix = intersection(SimulationConfig {
        batch_size: 1,
        ..fast_config()
    });
    for _ in 0..3 {
        ix.generate_arrival(LaneId::EAST, None).unwrap();
    }
    ix.step().unwrap();
    assert_eq!(ix.lane(LaneId::EAST).state(), LaneState::Running);

    ix.generate_arrival(LaneId::WEST, None).unwrap();
    assert!(ix.trigger_emergency(LaneId::WEST, EmergencyKind::Ambulance));
    let StepOutcome::Ran { decision, record, .. } = ix.step().unwrap() else {
        panic!("simulation should not be paused");
    };
    assert_eq!(
        decision,
        Decision::Switch {
            from: Some(LaneId::EAST),
            to: LaneId::WEST,
            emergency: true
        }
    );
    assert_eq!(record.unwrap().lane, LaneId::WEST);
    assert_eq!(ix.lane(LaneId::EAST).state(), LaneState::Ready);
    assert_eq!(ix.lane(LaneId::WEST).state(), LaneState::Waiting);
    assert!(!ix.emergency().is_pending(LaneId::WEST));
    assert_eq!(ix.metrics().snapshot().emergencies_handled, 1);
}

#[test]
fn denied_emergency_stays_pending_until_it_crosses() {
    let ix = intersection(SimulationConfig {
        quadrants_per_crossing: 2,
        ..fast_config()
    });
    ix.allocator().request_quadrants(LaneId::WEST, 3).unwrap();
    ix.generate_arrival(LaneId::NORTH, Some(EmergencyKind::Ambulance))
        .unwrap();

    let StepOutcome::Ran { decision, record, denied, .. } = ix.step().unwrap() else {
        panic!("simulation should not be paused");
    };
    assert_eq!(
        decision,
        Decision::Switch {
            from: None,
            to: LaneId::NORTH,
            emergency: true
        }
    );
    assert!(denied);
    assert!(record.is_none());
    assert_eq!(ix.lane(LaneId::NORTH).state(), LaneState::Blocked);
    assert!(ix.emergency().is_pending(LaneId::NORTH));
    assert_eq!(ix.metrics().snapshot().emergencies_handled, 0);

    // Still short of quadrants: the event waits and nothing is counted.
    ix.step().unwrap();
    assert!(ix.emergency().is_pending(LaneId::NORTH));
    assert_eq!(ix.metrics().snapshot().emergencies_handled, 0);

    ix.allocator().release_quadrants(LaneId::WEST);
    let StepOutcome::Ran { decision, record, denied, .. } = ix.step().unwrap() else {
        panic!("simulation should not be paused");
    };
    assert!(!denied);
    assert_eq!(decision.lane(), Some(LaneId::NORTH));
    let record = record.unwrap();
    assert_eq!(record.lane, LaneId::NORTH);
    assert_eq!(record.vehicles_processed, 1);

    assert!(!ix.emergency().is_pending(LaneId::NORTH));
    assert_eq!(ix.lane(LaneId::NORTH).snapshot().total_served, 1);
    assert_eq!(ix.lane(LaneId::NORTH).state(), LaneState::Waiting);
    let metrics = ix.metrics().snapshot();
    assert_eq!(metrics.emergencies_handled, 1);
    assert!((metrics.average_emergency_response_ticks - 3.0).abs() < f64::EPSILON);
    assert_eq!(ix.allocator().available(), 4);
}

#[test]
fn synthetic_wait_cycle_is_found() {
    let mut graph = WaitForGraph::default();
    graph.add_edge(LaneId::NORTH, LaneId::EAST);
    graph.add_edge(LaneId::EAST, LaneId::SOUTH);
    assert!(graph.find_cycle().is_none());
    graph.add_edge(LaneId::SOUTH, LaneId::NORTH);
    let cycle = graph.find_cycle().unwrap();
    assert_eq!(cycle.len(), 3);
    assert!(cycle.contains(&LaneId::NORTH));
}

#[test]
fn blocked_cycle_is_resolved_with_one_victim() {
    let ix = intersection(SimulationConfig {
        quadrants_per_crossing: 3,
        ..fast_config()
    });
    let allocator = ix.allocator();
    allocator.request_quadrants(LaneId::NORTH, 2).unwrap();
    allocator.request_quadrants(LaneId::SOUTH, 2).unwrap();
    ix.generate_arrival(LaneId::NORTH, None).unwrap();
    ix.generate_arrival(LaneId::SOUTH, None).unwrap();

    // First pass: NORTH is selected and denied its third quadrant.
    let StepOutcome::Ran { denied, resolutions, .. } = ix.step().unwrap() else {
        panic!("simulation should not be paused");
    };
    assert!(denied);
    assert!(resolutions.is_empty());
    assert_eq!(ix.lane(LaneId::NORTH).state(), LaneState::Blocked);

    // Second pass: SOUTH is denied too, closing the cycle before the sweep.
    let StepOutcome::Ran { denied, resolutions, .. } = ix.step().unwrap() else {
        panic!("simulation should not be paused");
    };
    assert!(denied);
    assert_eq!(resolutions.len(), 1);
    let resolution = &resolutions[0];
    assert_eq!(resolution.victim, LaneId::NORTH);
    assert_eq!(resolution.released, 2);
    assert_eq!(resolution.cycle.len(), 2);

    assert_eq!(allocator.allocation(LaneId::NORTH), 0);
    assert_eq!(allocator.allocation(LaneId::SOUTH), 3);
    assert_eq!(ix.lane(LaneId::NORTH).state(), LaneState::Waiting);
    assert_eq!(ix.lane(LaneId::SOUTH).state(), LaneState::Ready);
    assert!(ix.deadlock_sweep().unwrap().is_empty());

    let metrics = ix.metrics().snapshot();
    assert_eq!(metrics.deadlocks_resolved, 1);
    assert_eq!(metrics.deadlocks_prevented, 2);
}

#[test]
fn pause_and_resume_are_idempotent() {
    let ix = intersection(fast_config());
    ix.generate_arrival(LaneId::NORTH, None).unwrap();

    assert!(Command::Pause.apply(&ix).unwrap());
    assert!(!Command::Pause.apply(&ix).unwrap());
    assert_eq!(ix.step().unwrap(), StepOutcome::Paused);
    assert_eq!(ix.tick_count(), 0);

    assert!(Command::Resume.apply(&ix).unwrap());
    assert!(!Command::Resume.apply(&ix).unwrap());
    assert!(matches!(ix.step().unwrap(), StepOutcome::Ran { .. }));
    assert_eq!(ix.tick_count(), 1);
}

#[test]
fn resume_restores_pre_pause_state() {
    let ix = intersection(SimulationConfig {
        batch_size: 1,
        ..fast_config()
    });
    for _ in 0..3 {
        ix.generate_arrival(LaneId::NORTH, None).unwrap();
    }
    ix.step().unwrap();
    ix.generate_arrival(LaneId::EAST, None).unwrap();
    ix.generate_arrival(LaneId::SOUTH, None).unwrap();
    ix.allocator().request_quadrants(LaneId::WEST, 2).unwrap();

    let before = frozen_state(&ix);
    assert_eq!(before.lanes[0].state, LaneState::Running);
    assert_eq!(before.current, Some(LaneId::NORTH));
    assert_eq!(before.resources.allocation[LaneId::WEST.index()], 2);

    assert!(ix.pause());
    assert!(!Command::Pause.apply(&ix).unwrap());
    for _ in 0..5 {
        assert_eq!(ix.step().unwrap(), StepOutcome::Paused);
    }
    assert!(ix.resume());

    assert_eq!(frozen_state(&ix), before);
    assert!(matches!(ix.step().unwrap(), StepOutcome::Ran { .. }));
    assert_eq!(ix.tick_count(), before.tick + 1);
}
