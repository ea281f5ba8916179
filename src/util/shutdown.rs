//! Cooperative cancellation shared by every simulation loop.
//!
//! Loops check [`ShutdownSignal::is_running`] at each iteration boundary and
//! park in [`ShutdownSignal::sleep`] between iterations. A stop request wakes
//! every sleeper through the condvar, so shutdown never waits out a full
//! crossing or inter-arrival delay.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// State guarded by the condvar mutex.
struct StopState {
    stopped: bool,
}

/// Shared "keep running" flag with interruptible sleeps.
pub struct ShutdownSignal {
    /// Lock-free fast path for iteration-boundary checks.
    running: AtomicBool,
    state: Mutex<StopState>,
    condvar: Condvar,
}

impl ShutdownSignal {
    /// Create a signal in the running state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            state: Mutex::new(StopState { stopped: false }),
            condvar: Condvar::new(),
        }
    }

    /// Whether loops should keep iterating.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ask every loop to stop. Idempotent; returns `true` only for the first call.
    pub fn request_stop(&self) -> bool {
        let first = self.running.swap(false, Ordering::AcqRel);
        {
            let mut state = self.state.lock();
            state.stopped = true;
        }
        // Wake all sleepers so they can observe the flag
        self.condvar.notify_all();
        first
    }

    /// Sleep for `duration` unless a stop is requested first.
    ///
    /// Returns `true` if the full duration elapsed and the signal is still
    /// running, `false` if the sleep was cut short by a stop request.
    pub fn sleep(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return self.is_running();
        }
        let deadline = Instant::now() + duration;
        let mut state = self.state.lock();
        while !state.stopped {
            if self.condvar.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        !state.stopped
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
