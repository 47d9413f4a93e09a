//! Time source for operation timestamps and the coalescing deadline.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

/// Wall-clock source in microseconds since the Unix epoch.
pub trait Clock {
    fn now_us(&self) -> i64;
}

/// Real wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_us(&self) -> i64 {
        chrono::Utc::now().timestamp_micros()
    }
}

/// Hand-driven clock for tests, scripts and simulation.
///
/// Clones share the same underlying time, so a test can keep one handle and
/// give another to the aggregate.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_us: Rc<Cell<i64>>,
}

impl ManualClock {
    #[must_use]
    pub fn new(start_us: i64) -> Self {
        Self {
            now_us: Rc::new(Cell::new(start_us)),
        }
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        let delta = i64::try_from(by.as_micros()).unwrap_or(i64::MAX);
        self.now_us.set(self.now_us.get().saturating_add(delta));
    }

    /// Jump to an absolute time.
    pub fn set(&self, now_us: i64) {
        self.now_us.set(now_us);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> i64 {
        self.now_us.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_handles_share_time() {
        let clock = ManualClock::new(1_000);
        let handle = clock.clone();
        handle.advance(Duration::from_millis(2));
        assert_eq!(clock.now_us(), 3_000);
    }

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.now_us() > 1_577_836_800_000_000);
    }
}
