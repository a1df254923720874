//! Time and tick utilities

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

/// Ticks per millisecond (one tick is 100 ns)
pub const TICKS_PER_MILLISECOND: i64 = 10_000;

/// Current Unix time in milliseconds
pub fn current_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Current Unix time in 100 ns ticks
pub fn current_ticks() -> i64 {
    let now = Utc::now();
    now.timestamp() * 10_000_000 + i64::from(now.timestamp_subsec_nanos() / 100)
}

/// Strictly increasing tick source
///
/// Every call to [`TickClock::next`] returns a value greater than any value
/// returned before by the same clock, even when the wall clock stalls or
/// steps backwards. Tick values double as global offsets for the tag and
/// all-events indexes.
#[derive(Debug, Default)]
pub struct TickClock {
    last: AtomicI64,
}

impl TickClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next unique tick
    pub fn next(&self) -> i64 {
        let wall = current_ticks();
        let mut last = self.last.load(Ordering::Acquire);
        loop {
            let candidate = wall.max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return candidate,
                Err(observed) => last = observed,
            }
        }
    }

    /// Highest tick handed out so far, or the wall clock if that is ahead
    pub fn current(&self) -> i64 {
        current_ticks().max(self.last.load(Ordering::Acquire))
    }
}
