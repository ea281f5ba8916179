//! Startup configuration for a simulation run.
//!
//! Out-of-range values never abort startup: [`SimulationConfig::normalized`]
//! replaces them with documented defaults and logs a warning for each.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::allocator::TOTAL_QUADRANTS;
use crate::core::deadlock::VictimStrategy;
use crate::core::scheduler::SchedulerSettings;
use crate::core::TrafficError;
use crate::policy::PolicyId;

/// Default simulation duration in seconds.
pub const DEFAULT_DURATION_SECS: i64 = 300;
/// Shortest permitted simulation.
pub const MIN_DURATION_SECS: i64 = 10;
/// Longest permitted simulation.
pub const MAX_DURATION_SECS: i64 = 3600;
/// Default time quantum in slices.
pub const DEFAULT_TIME_QUANTUM: i64 = 3;

/// Prefix of the environment variables read by [`SimulationConfig::from_env`].
pub const ENV_PREFIX: &str = "TRAFFICGURU_";

/// Simulation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Run length in seconds (10..=3600).
    pub duration_secs: i64,
    /// Shortest gap between arrivals, in seconds.
    pub min_arrival_secs: i64,
    /// Longest gap between arrivals, in seconds.
    pub max_arrival_secs: i64,
    /// Slices a lane may run before re-evaluation.
    pub time_quantum: i64,
    /// Policy at startup.
    pub initial_policy: PolicyId,
    /// Verbose logging.
    pub debug: bool,
    /// Crossing time of one batch, in milliseconds.
    pub cross_time_ms: u64,
    /// Overhead per context switch, in milliseconds.
    pub context_switch_ms: u64,
    /// Pause between scheduler passes, in milliseconds.
    pub tick_interval_ms: u64,
    /// Pause between lane loop iterations, in milliseconds.
    pub lane_tick_ms: u64,
    /// Pause between status polls, in milliseconds.
    pub status_interval_ms: u64,
    /// Vehicles a lane can queue.
    pub queue_capacity: usize,
    /// Vehicles cleared per slice.
    pub batch_size: u32,
    /// Execution records retained.
    pub history_capacity: usize,
    /// Scheduler passes between deadlock sweeps.
    pub deadlock_check_interval: u64,
    /// Quadrants a lane needs to cross.
    pub quadrants_per_crossing: u8,
    /// One arrival in this many brings an emergency vehicle; `0` disables them.
    pub emergency_probability: u32,
    /// Multilevel feedback levels.
    pub mlfq_levels: u32,
    /// READY ticks before a multilevel lane is boosted.
    pub aging_threshold: u64,
    /// Deadlock victim selection.
    pub victim_strategy: VictimStrategy,
    /// Panic on invariant violations instead of logging them.
    pub strict_invariants: bool,
    /// Seed for the arrival generator; random when absent.
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            duration_secs: DEFAULT_DURATION_SECS,
            min_arrival_secs: 3,
            max_arrival_secs: 8,
            time_quantum: DEFAULT_TIME_QUANTUM,
            initial_policy: PolicyId::Sjf,
            debug: false,
            cross_time_ms: 3000,
            context_switch_ms: 500,
            tick_interval_ms: 300,
            lane_tick_ms: 100,
            status_interval_ms: 100,
            queue_capacity: 20,
            batch_size: 3,
            history_capacity: 1000,
            deadlock_check_interval: 100,
            quadrants_per_crossing: 2,
            emergency_probability: 100,
            mlfq_levels: 3,
            aging_threshold: 50,
            victim_strategy: VictimStrategy::SmallestAllocation,
            strict_invariants: false,
            seed: None,
        }
    }
}

impl SimulationConfig {
    /// Copy with every out-of-range value replaced by its default.
    #[must_use]
    pub fn normalized(&self) -> Self {
        let defaults = Self::default();
        let mut cfg = self.clone();

        if cfg.duration_secs <= 0 {
            tracing::warn!(value = cfg.duration_secs, "non-positive duration, using default");
            cfg.duration_secs = DEFAULT_DURATION_SECS;
        }
        if cfg.duration_secs < MIN_DURATION_SECS {
            tracing::warn!(value = cfg.duration_secs, "duration too short, raising");
            cfg.duration_secs = MIN_DURATION_SECS;
        } else if cfg.duration_secs > MAX_DURATION_SECS {
            tracing::warn!(value = cfg.duration_secs, "duration too long, lowering");
            cfg.duration_secs = MAX_DURATION_SECS;
        }
        if cfg.min_arrival_secs <= 0 {
            tracing::warn!(value = cfg.min_arrival_secs, "invalid min arrival, using 1");
            cfg.min_arrival_secs = 1;
        }
        if cfg.max_arrival_secs <= 0 {
            tracing::warn!(value = cfg.max_arrival_secs, "invalid max arrival, using 5");
            cfg.max_arrival_secs = 5;
        }
        if cfg.min_arrival_secs > cfg.max_arrival_secs {
            tracing::warn!(
                min = cfg.min_arrival_secs,
                max = cfg.max_arrival_secs,
                "arrival bounds reversed, swapping"
            );
            std::mem::swap(&mut cfg.min_arrival_secs, &mut cfg.max_arrival_secs);
        }
        if cfg.time_quantum <= 0 {
            tracing::warn!(value = cfg.time_quantum, "invalid time quantum, using default");
            cfg.time_quantum = DEFAULT_TIME_QUANTUM;
        } else if cfg.time_quantum > i64::from(u32::MAX) {
            cfg.time_quantum = i64::from(u32::MAX);
        }
        if cfg.queue_capacity == 0 {
            tracing::warn!("zero queue capacity, using default");
            cfg.queue_capacity = defaults.queue_capacity;
        }
        if cfg.batch_size == 0 {
            tracing::warn!("zero batch size, using default");
            cfg.batch_size = defaults.batch_size;
        }
        if cfg.deadlock_check_interval == 0 {
            tracing::warn!("zero deadlock check interval, using default");
            cfg.deadlock_check_interval = defaults.deadlock_check_interval;
        }
        if cfg.quadrants_per_crossing == 0 || cfg.quadrants_per_crossing > TOTAL_QUADRANTS {
            tracing::warn!(
                value = cfg.quadrants_per_crossing,
                "quadrants per crossing out of range, using default"
            );
            cfg.quadrants_per_crossing = defaults.quadrants_per_crossing;
        }
        if cfg.mlfq_levels == 0 {
            cfg.mlfq_levels = defaults.mlfq_levels;
        }
        cfg
    }

    /// Report the first value that [`SimulationConfig::normalized`] would change.
    ///
    /// # Errors
    ///
    /// A description of the offending field.
    pub fn validate(&self) -> Result<(), String> {
        if !(MIN_DURATION_SECS..=MAX_DURATION_SECS).contains(&self.duration_secs) {
            return Err(format!(
                "duration_secs must be within {MIN_DURATION_SECS}..={MAX_DURATION_SECS}"
            ));
        }
        if self.min_arrival_secs <= 0 || self.max_arrival_secs <= 0 {
            return Err("arrival bounds must be greater than 0".into());
        }
        if self.min_arrival_secs > self.max_arrival_secs {
            return Err("min_arrival_secs must not exceed max_arrival_secs".into());
        }
        if self.time_quantum <= 0 {
            return Err("time_quantum must be greater than 0".into());
        }
        if self.queue_capacity == 0 {
            return Err("queue_capacity must be greater than 0".into());
        }
        if self.batch_size == 0 {
            return Err("batch_size must be greater than 0".into());
        }
        if self.deadlock_check_interval == 0 {
            return Err("deadlock_check_interval must be greater than 0".into());
        }
        if self.quadrants_per_crossing == 0 || self.quadrants_per_crossing > TOTAL_QUADRANTS {
            return Err(format!(
                "quadrants_per_crossing must be within 1..={TOTAL_QUADRANTS}"
            ));
        }
        if self.mlfq_levels == 0 {
            return Err("mlfq_levels must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse from JSON; missing fields take defaults, then values are normalized.
    ///
    /// # Errors
    ///
    /// `TrafficError::InitializationFailure` when the JSON does not parse.
    pub fn from_json_str(input: &str) -> Result<Self, TrafficError> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| {
            TrafficError::InitializationFailure(format!("config parse error: {e}"))
        })?;
        Ok(cfg.normalized())
    }

    /// Load `.env` if present, then apply `TRAFFICGURU_*` variables over the defaults.
    ///
    /// # Errors
    ///
    /// `TrafficError::InitializationFailure` when a variable does not parse.
    pub fn from_env() -> Result<Self, TrafficError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(TrafficError::InitializationFailure(format!(
                    ".env load error: {e}"
                )));
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup, keys carrying [`ENV_PREFIX`].
    ///
    /// # Errors
    ///
    /// `TrafficError::InitializationFailure` when a value does not parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, TrafficError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        set_parsed(&mut cfg.duration_secs, "DURATION_SECS", get("DURATION_SECS"))?;
        set_parsed(&mut cfg.min_arrival_secs, "MIN_ARRIVAL_SECS", get("MIN_ARRIVAL_SECS"))?;
        set_parsed(&mut cfg.max_arrival_secs, "MAX_ARRIVAL_SECS", get("MAX_ARRIVAL_SECS"))?;
        set_parsed(&mut cfg.time_quantum, "TIME_QUANTUM", get("TIME_QUANTUM"))?;
        set_parsed(&mut cfg.initial_policy, "POLICY", get("POLICY"))?;
        set_parsed(&mut cfg.debug, "DEBUG", get("DEBUG"))?;
        set_parsed(&mut cfg.cross_time_ms, "CROSS_TIME_MS", get("CROSS_TIME_MS"))?;
        set_parsed(&mut cfg.context_switch_ms, "CONTEXT_SWITCH_MS", get("CONTEXT_SWITCH_MS"))?;
        set_parsed(&mut cfg.tick_interval_ms, "TICK_INTERVAL_MS", get("TICK_INTERVAL_MS"))?;
        set_parsed(&mut cfg.queue_capacity, "QUEUE_CAPACITY", get("QUEUE_CAPACITY"))?;
        set_parsed(&mut cfg.batch_size, "BATCH_SIZE", get("BATCH_SIZE"))?;
        set_parsed(
            &mut cfg.emergency_probability,
            "EMERGENCY_PROBABILITY",
            get("EMERGENCY_PROBABILITY"),
        )?;
        set_parsed(&mut cfg.victim_strategy, "VICTIM_STRATEGY", get("VICTIM_STRATEGY"))?;
        set_parsed(&mut cfg.strict_invariants, "STRICT_INVARIANTS", get("STRICT_INVARIANTS"))?;
        if let Some(raw) = get("SEED") {
            cfg.seed = Some(parse_value("SEED", &raw)?);
        }
        Ok(cfg.normalized())
    }

    /// Run length.
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_secs(u64::try_from(self.duration_secs).unwrap_or(0))
    }

    /// Scheduler parameters derived from this configuration.
    #[must_use]
    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            time_quantum: u32::try_from(self.time_quantum).unwrap_or(u32::MAX),
            context_switch_ms: self.context_switch_ms,
            cross_time_ms: self.cross_time_ms,
            batch_size: self.batch_size,
            history_capacity: self.history_capacity,
            mlfq_levels: self.mlfq_levels,
            aging_threshold: self.aging_threshold,
        }
    }
}

fn parse_value<T>(name: &str, raw: &str) -> Result<T, TrafficError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| {
        TrafficError::InitializationFailure(format!("{ENV_PREFIX}{name}='{raw}': {e}"))
    })
}

fn set_parsed<T>(slot: &mut T, name: &str, raw: Option<String>) -> Result<(), TrafficError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = raw {
        *slot = parse_value(name, &raw)?;
    }
    Ok(())
}
