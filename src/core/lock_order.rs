//! Layered lock acquisition.
//!
//! Every shared structure in the intersection is wrapped in an
//! [`OrderedMutex`] tagged with a [`LockLevel`]. A thread may only block on a
//! lock whose level is strictly greater than every level it already holds:
//!
//! ```text
//! Scheduler < Emergency < Metrics < Lane < Allocator
//! ```
//!
//! Holding two lane locks at once is therefore a breach, as is taking the
//! metrics lock after a lane lock, or any lane lock while the allocator lock
//! is held. Breaches are reported to the owning [`InvariantMonitor`] before
//! the thread blocks.
//!
//! `try_lock` never blocks and so cannot close a wait cycle; it skips the
//! check but still registers the level while the guard lives.

use std::cell::RefCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::core::invariant::{InvariantMonitor, ViolationKind};

/// Position of a lock in the global acquisition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockLevel {
    /// Scheduler fields, ready queue and execution history.
    Scheduler = 10,
    /// Pending emergency events.
    Emergency = 20,
    /// Global metrics.
    Metrics = 30,
    /// A single lane's queue and state.
    Lane = 40,
    /// Quadrant allocation vectors.
    Allocator = 50,
}

impl fmt::Display for LockLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Scheduler => "scheduler",
            Self::Emergency => "emergency",
            Self::Metrics => "metrics",
            Self::Lane => "lane",
            Self::Allocator => "allocator",
        };
        f.write_str(name)
    }
}

thread_local! {
    static HELD: RefCell<Vec<LockLevel>> = const { RefCell::new(Vec::new()) };
}

fn highest_held() -> Option<LockLevel> {
    HELD.with(|held| held.borrow().iter().copied().max())
}

fn push_held(level: LockLevel) {
    HELD.with(|held| held.borrow_mut().push(level));
}

fn pop_held(level: LockLevel) {
    HELD.with(|held| {
        let mut held = held.borrow_mut();
        if let Some(pos) = held.iter().rposition(|l| *l == level) {
            held.remove(pos);
        }
    });
}

/// Levels currently held by the calling thread, in acquisition order.
#[must_use]
pub fn held_levels() -> Vec<LockLevel> {
    HELD.with(|held| held.borrow().clone())
}

/// A `parking_lot::Mutex` that checks the global acquisition order.
pub struct OrderedMutex<T> {
    level: LockLevel,
    monitor: Arc<InvariantMonitor>,
    inner: Mutex<T>,
}

impl<T> OrderedMutex<T> {
    /// Wrap `value` at `level`, reporting breaches to `monitor`.
    pub fn new(level: LockLevel, monitor: Arc<InvariantMonitor>, value: T) -> Self {
        Self {
            level,
            monitor,
            inner: Mutex::new(value),
        }
    }

    /// Level of this lock.
    #[must_use]
    pub const fn level(&self) -> LockLevel {
        self.level
    }

    /// Block until the lock is acquired.
    ///
    /// An out-of-order acquisition is recorded before blocking.
    pub fn lock(&self) -> OrderedGuard<'_, T> {
        if let Some(held) = highest_held() {
            if held >= self.level {
                self.monitor.record(
                    ViolationKind::LockOrder,
                    format!("acquiring {} lock while holding {held} lock", self.level),
                );
            }
        }
        let guard = self.inner.lock();
        push_held(self.level);
        OrderedGuard {
            guard,
            level: self.level,
        }
    }

    /// Acquire without blocking; `None` if another thread holds the lock.
    pub fn try_lock(&self) -> Option<OrderedGuard<'_, T>> {
        let guard = self.inner.try_lock()?;
        push_held(self.level);
        Some(OrderedGuard {
            guard,
            level: self.level,
        })
    }
}

impl<T: fmt::Debug> fmt::Debug for OrderedMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedMutex")
            .field("level", &self.level)
            .finish_non_exhaustive()
    }
}

/// Guard returned by [`OrderedMutex`]; releases the level on drop.
pub struct OrderedGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    level: LockLevel,
}

impl<T> Deref for OrderedGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for OrderedGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for OrderedGuard<'_, T> {
    fn drop(&mut self) {
        pop_held(self.level);
    }
}
