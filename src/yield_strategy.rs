//! Yield strategies controlling how producers and consumers wait when the
//! queue has no space or no new values.
//!
//! Each call site tracks its own attempt count and reports whether this is
//! the *first* wait since the last successful progress via `first`. A
//! strategy uses that to decide how hard to back off: busy-spinning straight
//! through a single missed CAS looks very different from busy-spinning
//! across a thousand consecutive empty polls.

use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use crate::constants::{SPIN_TRIES_BEFORE_YIELD, YIELD_TRIES_BEFORE_PARK};

/// A strategy for waiting when a producer/consumer cannot make progress.
///
/// `yield_wait` is called in a loop by the caller; each call represents one
/// "tick" of waiting. `first` is `true` on the first tick of a given wait
/// (the caller hasn't made progress since the wait began) and `false` on
/// every subsequent tick, which lets a strategy escalate the longer it waits.
pub trait YieldStrategy: Send + Sync {
    /// Wait one tick. `first` is `true` only for the first tick of a wait.
    fn yield_wait(&self, first: bool);

    /// Wake any thread parked by this strategy. Strategies that never park
    /// (e.g. pure spin) leave the default no-op.
    fn signal(&self) {}
}

/// Pure busy-spin: lowest latency, burns a full core while waiting.
#[derive(Debug, Default)]
pub struct SpinYield;

impl SpinYield {
    pub fn new() -> Self {
        Self
    }
}

impl YieldStrategy for SpinYield {
    fn yield_wait(&self, _first: bool) {
        std::hint::spin_loop();
    }
}

/// Spin, then fall back to cooperative OS-level yielding once a threshold
/// of spins has elapsed without progress.
pub struct ThreadedYield {
    spin_tries: u32,
}

impl ThreadedYield {
    pub fn new() -> Self {
        Self { spin_tries: SPIN_TRIES_BEFORE_YIELD }
    }

    pub fn with_spin_tries(spin_tries: u32) -> Self {
        Self { spin_tries }
    }
}

impl Default for ThreadedYield {
    fn default() -> Self {
        Self::new()
    }
}

impl YieldStrategy for ThreadedYield {
    fn yield_wait(&self, first: bool) {
        if first {
            std::hint::spin_loop();
            return;
        }
        thread::yield_now();
        let _ = self.spin_tries;
    }
}

/// Three-phase escalation: spin, then OS yield, then park on a condvar.
///
/// The condvar is woken by [`HybridYield::signal`], which producers/consumers
/// call after publishing or releasing so a parked peer doesn't wait out a
/// full park timeout for no reason.
pub struct HybridYield {
    spin_tries: u32,
    yield_tries: u32,
    park_timeout: Duration,
    tick: AtomicU32,
    mutex: parking_lot::Mutex<()>,
    condvar: parking_lot::Condvar,
}

impl HybridYield {
    pub fn new() -> Self {
        Self {
            spin_tries: SPIN_TRIES_BEFORE_YIELD,
            yield_tries: YIELD_TRIES_BEFORE_PARK,
            park_timeout: Duration::from_micros(100),
            tick: AtomicU32::new(0),
            mutex: parking_lot::Mutex::new(()),
            condvar: parking_lot::Condvar::new(),
        }
    }

    pub fn with_tries(spin_tries: u32, yield_tries: u32) -> Self {
        Self {
            spin_tries,
            yield_tries,
            ..Self::new()
        }
    }
}

impl Default for HybridYield {
    fn default() -> Self {
        Self::new()
    }
}

impl YieldStrategy for HybridYield {
    fn yield_wait(&self, first: bool) {
        if first {
            self.tick.store(0, Ordering::Relaxed);
            std::hint::spin_loop();
            return;
        }

        let tick = self.tick.fetch_add(1, Ordering::Relaxed);

        if tick < self.spin_tries {
            std::hint::spin_loop();
        } else if tick < self.spin_tries + self.yield_tries {
            thread::yield_now();
        } else {
            let mut guard = self.mutex.lock();
            self.condvar.wait_for(&mut guard, self.park_timeout);
        }
    }

    fn signal(&self) {
        self.condvar.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spin_yield_returns() {
        let y = SpinYield::new();
        y.yield_wait(true);
        y.yield_wait(false);
    }

    #[test]
    fn test_threaded_yield_returns() {
        let y = ThreadedYield::new();
        y.yield_wait(true);
        y.yield_wait(false);
    }

    #[test]
    fn test_hybrid_yield_escalates_without_hanging() {
        let y = HybridYield::with_tries(2, 2);
        for i in 0..10 {
            y.yield_wait(i == 0);
        }
    }

    #[test]
    fn test_hybrid_yield_signal_does_not_panic() {
        let y = HybridYield::new();
        y.signal();
    }
}
