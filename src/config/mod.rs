//! Configuration for simulation runs.

pub mod simulation;

pub use simulation::{SimulationConfig, ENV_PREFIX};
