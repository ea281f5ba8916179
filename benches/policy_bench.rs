//! Benchmarks for the scheduling hot paths.
//!
//! Benchmarks cover:
//! - Policy selection over a four-lane snapshot
//! - The Banker's safety check
//! - Vehicle queue enqueue/dequeue
//! - A full scheduling step with zero crossing time

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;

use trafficguru::builders::IntersectionBuilder;
use trafficguru::config::SimulationConfig;
use trafficguru::core::{is_safe_state, LaneId, LaneState, Vehicle, VehicleQueue};
use trafficguru::policy::{PolicyId, PolicyParams, SystemSnapshot};

// ============================================================================
// Fixtures
// ============================================================================

fn busy_snapshot() -> SystemSnapshot {
    let mut snapshot = SystemSnapshot::idle();
    for (i, lane) in snapshot.lanes.iter_mut().enumerate() {
        lane.state = if i == 1 { LaneState::Running } else { LaneState::Ready };
        lane.queue_length = 7 - i;
        lane.arrival_ms = 1_000 + i as u128 * 10;
        lane.waiting_time = i as u64 * 20;
        lane.total_served = i as u64 * 3;
        lane.slices_consumed = i as u32 * 2;
        lane.last_service_ms = (i % 2 == 0).then_some(500 + i as u128);
    }
    snapshot.current = Some(LaneId::SOUTH);
    snapshot
}

// ============================================================================
// Policy selection
// ============================================================================

fn bench_policy_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("policy_select");
    let snapshot = busy_snapshot();
    let params = PolicyParams::default();

    for id in PolicyId::ALL {
        let policy = id.build(&params);
        group.bench_with_input(BenchmarkId::from_parameter(id), &snapshot, |b, snapshot| {
            b.iter(|| black_box(policy.select_next(black_box(snapshot))));
        });
    }
    group.finish();
}

// ============================================================================
// Allocator safety check
// ============================================================================

fn bench_safety_check(c: &mut Criterion) {
    let mut group = c.benchmark_group("bankers_safety");
    let cases = [
        ("safe", [1_u8, 1, 0, 0], [1_u8, 0, 2, 0]),
        ("unsafe", [2_u8, 2, 0, 0], [1_u8, 1, 0, 0]),
        ("idle", [0_u8; 4], [0_u8; 4]),
    ];
    for (name, allocation, need) in cases {
        group.bench_function(name, |b| {
            b.iter(|| black_box(is_safe_state(4, black_box(&allocation), black_box(&need))));
        });
    }
    group.finish();
}

// ============================================================================
// Queue operations
// ============================================================================

fn bench_queue_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("vehicle_queue");
    for size in [5_u64, 20, 100] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut queue = VehicleQueue::new(size as usize);
                for id in 0..size {
                    let _ = queue.enqueue(Vehicle::new(id, u128::from(id)));
                }
                while let Ok(vehicle) = queue.dequeue() {
                    black_box(vehicle);
                }
            });
        });
    }
    group.finish();
}

// ============================================================================
// Scheduling step
// ============================================================================

fn bench_step(c: &mut Criterion) {
    let ix = IntersectionBuilder::new(SimulationConfig {
        cross_time_ms: 0,
        context_switch_ms: 0,
        queue_capacity: 1_000,
        ..SimulationConfig::default()
    })
    .build()
    .expect("bench intersection");

    c.bench_function("intersection_step", |b| {
        b.iter(|| {
            for lane in LaneId::ALL {
                let _ = ix.generate_arrival(lane, None);
            }
            black_box(ix.step().expect("step"));
        });
    });
}

criterion_group!(
    benches,
    bench_policy_select,
    bench_safety_check,
    bench_queue_cycle,
    bench_step
);
criterion_main!(benches);
