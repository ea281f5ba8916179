//! Simulation runtime: the shared intersection, operator commands, arrival
//! generation, status observation and the native thread loops.

pub mod commands;
pub mod generator;
pub mod intersection;
pub mod status;
#[cfg(not(target_arch = "wasm32"))]
pub mod threads;

pub use commands::Command;
pub use generator::{ArrivalGenerator, ArrivalTiming};
pub use intersection::{Intersection, StepOutcome};
pub use status::{
    Freshness, LastKnown, Observed, PollSnapshot, StatusReader, StatusSink, StatusSnapshot,
    TracingSink, VecSink,
};
#[cfg(feature = "tokio-runtime")]
pub use status::{watch_channel, WatchSink};
#[cfg(not(target_arch = "wasm32"))]
pub use threads::{SimulationHandle, SimulationReport};
