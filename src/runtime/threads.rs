//! Native thread runtime for a simulation run.
//!
//! One named OS thread per lane, plus a vehicle generator, the scheduler
//! driver and a status publisher. Every loop checks the shared shutdown
//! signal at each iteration boundary and sleeps through it, so a stop
//! request is observed within one iteration.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Context;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::builders::IntersectionBuilder;
use crate::config::SimulationConfig;
use crate::core::invariant::Violation;
use crate::core::metrics::MetricsSnapshot;
use crate::core::{AppResult, TrafficError};
use crate::runtime::commands::Command;
use crate::runtime::generator::ArrivalGenerator;
use crate::runtime::intersection::{Intersection, StepOutcome};
use crate::runtime::status::{StatusReader, StatusSink, TracingSink};

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    /// Identifier of the run, also attached to its log lines.
    pub run_id: Uuid,
    /// Wall-clock run time.
    pub elapsed_ms: u128,
    /// Final metrics.
    pub metrics: MetricsSnapshot,
    /// Invariant violations recorded during the run.
    pub violations: Vec<Violation>,
    /// Threads that panicked instead of exiting cleanly.
    pub panicked_threads: Vec<String>,
}

impl SimulationReport {
    /// Process exit code for this run.
    ///
    /// Recorded invariant violations are tolerated at runtime, so only a
    /// panicked thread makes the run fail.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.panicked_threads.is_empty())
    }
}

/// A running simulation.
#[derive(Debug)]
pub struct SimulationHandle {
    run_id: Uuid,
    started: Instant,
    intersection: Arc<Intersection>,
    commands: Sender<Command>,
    threads: Vec<JoinHandle<()>>,
}

impl SimulationHandle {
    /// Build an intersection from `config` and start it.
    ///
    /// # Errors
    ///
    /// Fails when the configuration cannot be turned into an intersection or a
    /// thread cannot be spawned; the error names the failing stage.
    pub fn launch(config: SimulationConfig) -> AppResult<Self> {
        let intersection = IntersectionBuilder::new(config)
            .build()
            .context("building the intersection")?;
        Self::start(Arc::new(intersection)).context("starting simulation threads")
    }

    /// Start every loop, logging status through `tracing`.
    ///
    /// # Errors
    ///
    /// `TrafficError::InitializationFailure` if a thread cannot be spawned;
    /// threads already started are stopped and joined first.
    pub fn start(intersection: Arc<Intersection>) -> Result<Self, TrafficError> {
        Self::start_with_sink(intersection, TracingSink)
    }

    /// Start every loop, publishing status to `sink`.
    ///
    /// # Errors
    ///
    /// As [`SimulationHandle::start`].
    pub fn start_with_sink<S>(intersection: Arc<Intersection>, sink: S) -> Result<Self, TrafficError>
    where
        S: StatusSink + 'static,
    {
        let run_id = Uuid::new_v4();
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut threads = Vec::with_capacity(7);

        let spawned = spawn_all(&intersection, rx, sink, &mut threads);
        if let Err(e) = spawned {
            error!(run_id = %run_id, error = %e, "failed to start simulation");
            intersection.request_shutdown();
            join_all(threads);
            return Err(e);
        }

        info!(
            run_id = %run_id,
            policy = %intersection.scheduler().policy(),
            duration_secs = intersection.config().duration_secs,
            threads = threads.len(),
            "simulation started"
        );
        Ok(Self {
            run_id,
            started: Instant::now(),
            intersection,
            commands: tx,
            threads,
        })
    }

    /// Identifier of this run.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// The shared intersection.
    #[must_use]
    pub const fn intersection(&self) -> &Arc<Intersection> {
        &self.intersection
    }

    /// A sender for delivering commands to the driver from other threads.
    #[must_use]
    pub fn commands(&self) -> Sender<Command> {
        self.commands.clone()
    }

    /// Queue a command for the driver.
    pub fn send(&self, command: Command) {
        // The driver only drops its receiver on exit; late commands are moot.
        if self.commands.send(command).is_err() {
            debug!(command = ?command, "driver already stopped");
        }
    }

    /// Block until the run ends on its own, then report.
    #[must_use]
    pub fn wait(self) -> SimulationReport {
        let panicked_threads = join_all(self.threads);
        let elapsed = self.started.elapsed();
        let report = SimulationReport {
            run_id: self.run_id,
            elapsed_ms: elapsed.as_millis(),
            metrics: self.intersection.metrics().snapshot(),
            violations: self.intersection.monitor().violations(),
            panicked_threads,
        };
        info!(
            run_id = %report.run_id,
            elapsed_ms = %report.elapsed_ms,
            processed = report.metrics.total_processed,
            generated = report.metrics.total_generated,
            context_switches = report.metrics.context_switches,
            violations = report.violations.len(),
            "simulation finished"
        );
        report
    }

    /// Stop every loop, join the threads and report.
    #[must_use]
    pub fn shutdown(self) -> SimulationReport {
        self.intersection.request_shutdown();
        self.wait()
    }
}

fn spawn_named<F>(name: String, f: F) -> Result<JoinHandle<()>, TrafficError>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.clone())
        .spawn(f)
        .map_err(|e| TrafficError::InitializationFailure(format!("failed to spawn {name}: {e}")))
}

fn spawn_all<S>(
    intersection: &Arc<Intersection>,
    commands: Receiver<Command>,
    sink: S,
    threads: &mut Vec<JoinHandle<()>>,
) -> Result<(), TrafficError>
where
    S: StatusSink + 'static,
{
    for lane in intersection.lanes() {
        let id = lane.id();
        let ix = Arc::clone(intersection);
        threads.push(spawn_named(format!("lane-{}", id.name().to_lowercase()), move || {
            lane_loop(&ix, id.index());
        })?);
    }

    let ix = Arc::clone(intersection);
    threads.push(spawn_named("generator".to_string(), move || generator_loop(&ix))?);

    let ix = Arc::clone(intersection);
    threads.push(spawn_named("driver".to_string(), move || driver_loop(&ix, &commands))?);

    let ix = Arc::clone(intersection);
    threads.push(spawn_named("status".to_string(), move || status_loop(&ix, sink))?);
    Ok(())
}

/// Join every thread, returning the names of those that panicked.
fn join_all(threads: Vec<JoinHandle<()>>) -> Vec<String> {
    let mut panicked = Vec::new();
    for handle in threads {
        let name = handle.thread().name().unwrap_or("unnamed").to_string();
        if handle.join().is_ok() {
            debug!(thread = %name, "thread joined");
        } else {
            warn!(thread = %name, "thread panicked");
            panicked.push(name);
        }
    }
    panicked
}

fn lane_loop(ix: &Intersection, index: usize) {
    let lane = &ix.lanes()[index];
    let period = Duration::from_millis(ix.config().lane_tick_ms);
    debug!(lane = %lane.id(), "lane loop started");
    while ix.is_running() {
        if !ix.is_paused() {
            if let Err(e) = lane.tick() {
                warn!(lane = %lane.id(), error = %e, "lane tick rejected");
            }
        }
        if !ix.shutdown_signal().sleep(period) {
            break;
        }
    }
    debug!(lane = %lane.id(), "lane loop stopped");
}

fn generator_loop(ix: &Intersection) {
    let cfg = ix.config();
    let mut generator = ArrivalGenerator::new(ix.arrival_timing(), cfg.emergency_probability, cfg.seed);
    debug!("generator started");
    while ix.is_running() {
        if !ix.shutdown_signal().sleep(generator.next_delay()) {
            break;
        }
        if ix.is_paused() {
            continue;
        }
        let lane = generator.next_lane();
        let emergency = generator.next_emergency();
        // A full lane is already counted and logged as an overflow.
        if let Ok(vehicle) = ix.generate_arrival(lane, emergency) {
            debug!(lane = %lane, vehicle, emergency = ?emergency, "vehicle arrived");
        }
    }
    debug!("generator stopped");
}

fn driver_loop(ix: &Intersection, commands: &Receiver<Command>) {
    let deadline = Instant::now() + ix.config().duration();
    let period = Duration::from_millis(ix.config().tick_interval_ms);
    debug!("driver started");
    while ix.is_running() {
        loop {
            match commands.try_recv() {
                Ok(command) => {
                    if let Err(e) = command.apply(ix) {
                        warn!(command = ?command, error = %e, "command rejected");
                    }
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        if !ix.is_running() {
            break;
        }
        if Instant::now() >= deadline {
            info!("simulation duration elapsed");
            ix.request_shutdown();
            break;
        }
        match ix.step() {
            Ok(StepOutcome::Ran { resolutions, .. }) if !resolutions.is_empty() => {
                info!(count = resolutions.len(), "deadlocks resolved");
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "scheduling pass failed"),
        }
        if !ix.shutdown_signal().sleep(period) {
            break;
        }
    }
    debug!("driver stopped");
}

fn status_loop<S: StatusSink>(ix: &Intersection, mut sink: S) {
    let period = Duration::from_millis(ix.config().status_interval_ms);
    let mut reader = StatusReader::new();
    while ix.shutdown_signal().sleep(period) {
        sink.publish(&reader.poll(ix));
    }
    sink.publish(&reader.poll(ix));
    debug!("status publisher stopped");
}
