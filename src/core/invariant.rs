//! Recording of correctness invariant violations.
//!
//! Violations are never silently dropped: each one is logged at `error`,
//! counted, and kept in a bounded log for inspection. A strict monitor panics
//! instead, which is how tests turn violations into hard failures.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Maximum number of violations retained in the log.
const MAX_RETAINED: usize = 64;

/// Category of a correctness violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// More than one lane observed RUNNING.
    MultipleRunning,
    /// A lock was acquired out of the global order.
    LockOrder,
    /// The deadlock detector found a cycle but could not pick a victim.
    NoDeadlockVictim,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MultipleRunning => write!(f, "multiple running lanes"),
            Self::LockOrder => write!(f, "lock order breach"),
            Self::NoDeadlockVictim => write!(f, "deadlock without victim"),
        }
    }
}

/// One recorded violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Violation category.
    pub kind: ViolationKind,
    /// Human-readable context.
    pub detail: String,
}

/// Collects invariant violations for one intersection context.
///
/// The internal log lock is a leaf: nothing else is acquired while it is held.
#[derive(Debug)]
pub struct InvariantMonitor {
    strict: bool,
    count: AtomicU64,
    log: Mutex<VecDeque<Violation>>,
}

impl InvariantMonitor {
    /// Tolerant monitor: violations are logged and counted, execution continues.
    #[must_use]
    pub fn new() -> Self {
        Self::with_strictness(false)
    }

    /// Strict monitor: recording a violation panics.
    #[must_use]
    pub fn strict() -> Self {
        Self::with_strictness(true)
    }

    /// Monitor with explicit strictness.
    #[must_use]
    pub fn with_strictness(strict: bool) -> Self {
        Self {
            strict,
            count: AtomicU64::new(0),
            log: Mutex::new(VecDeque::with_capacity(MAX_RETAINED)),
        }
    }

    /// Whether recording panics.
    #[must_use]
    pub const fn is_strict(&self) -> bool {
        self.strict
    }

    /// Record a violation.
    ///
    /// # Panics
    ///
    /// Panics when the monitor is strict.
    pub fn record(&self, kind: ViolationKind, detail: impl Into<String>) {
        let detail = detail.into();
        tracing::error!(kind = %kind, detail = %detail, "invariant violation");
        self.count.fetch_add(1, Ordering::AcqRel);
        {
            let mut log = self.log.lock();
            if log.len() >= MAX_RETAINED {
                log.pop_front();
            }
            log.push_back(Violation {
                kind,
                detail: detail.clone(),
            });
        }
        assert!(!self.strict, "invariant violation ({kind}): {detail}");
    }

    /// Total violations recorded since construction.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    /// Snapshot of the retained violations, oldest first.
    #[must_use]
    pub fn violations(&self) -> Vec<Violation> {
        self.log.lock().iter().cloned().collect()
    }
}

impl Default for InvariantMonitor {
    fn default() -> Self {
        Self::new()
    }
}
