//! Random vehicle arrivals.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::SimulationConfig;
use crate::core::emergency::EmergencyKind;
use crate::core::lane::{LaneId, NUM_LANES};

/// Jitter added on top of the whole-second inter-arrival delay.
pub const ARRIVAL_JITTER_MS: u64 = 999;

/// Bounds of the delay between two arrivals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrivalTiming {
    /// Lower bound of the base delay.
    pub min_ms: u64,
    /// Upper bound of the base delay.
    pub max_ms: u64,
    /// Upper bound of the extra jitter.
    pub jitter_ms: u64,
}

impl ArrivalTiming {
    /// Timing in whole seconds from a normalized configuration, plus sub-second jitter.
    #[must_use]
    pub fn from_config(config: &SimulationConfig) -> Self {
        let secs = |v: i64| u64::try_from(v).unwrap_or(1).saturating_mul(1000);
        Self::from_millis(
            secs(config.min_arrival_secs),
            secs(config.max_arrival_secs),
            ARRIVAL_JITTER_MS,
        )
    }

    /// Explicit millisecond timing; reversed bounds are swapped.
    #[must_use]
    pub const fn from_millis(min_ms: u64, max_ms: u64, jitter_ms: u64) -> Self {
        if min_ms > max_ms {
            Self {
                min_ms: max_ms,
                max_ms: min_ms,
                jitter_ms,
            }
        } else {
            Self {
                min_ms,
                max_ms,
                jitter_ms,
            }
        }
    }

    /// Longest delay this timing can produce.
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_ms + self.jitter_ms)
    }
}

/// Draws arrival delays, lanes and emergency vehicles from one RNG.
///
/// A fixed seed makes a run reproducible.
#[derive(Debug)]
pub struct ArrivalGenerator {
    rng: StdRng,
    timing: ArrivalTiming,
    emergency_one_in: u32,
}

impl ArrivalGenerator {
    /// Create a generator; an `emergency_one_in` of 0 never produces emergencies.
    #[must_use]
    pub fn new(timing: ArrivalTiming, emergency_one_in: u32, seed: Option<u64>) -> Self {
        let seed = seed.unwrap_or_else(|| rand::rng().random());
        tracing::debug!(seed, "arrival generator seeded");
        Self {
            rng: StdRng::seed_from_u64(seed),
            timing,
            emergency_one_in,
        }
    }

    /// Time to wait before the next arrival.
    pub fn next_delay(&mut self) -> Duration {
        let base = self
            .rng
            .random_range(self.timing.min_ms..=self.timing.max_ms);
        let jitter = self.rng.random_range(0..=self.timing.jitter_ms);
        Duration::from_millis(base + jitter)
    }

    /// Lane the next vehicle joins, uniformly.
    pub fn next_lane(&mut self) -> LaneId {
        LaneId::ALL[self.rng.random_range(0..NUM_LANES)]
    }

    /// Whether the next vehicle is an emergency, and of which kind.
    pub fn next_emergency(&mut self) -> Option<EmergencyKind> {
        if self.emergency_one_in == 0 || !self.rng.random_ratio(1, self.emergency_one_in) {
            return None;
        }
        Some(match self.rng.random_range(0..3) {
            0 => EmergencyKind::Ambulance,
            1 => EmergencyKind::FireTruck,
            _ => EmergencyKind::Police,
        })
    }
}
