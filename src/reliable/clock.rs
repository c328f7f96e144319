use std::sync::Arc;
use std::time::Instant;

/// Adapter over the system clock (spec.md §2 "MonotonicClock adapter").
///
/// Supplies `now()` in milliseconds. Implementations must be monotonic;
/// a clock that ever returns a value smaller than a previous call is a
/// fatal condition per spec.md §7, not something the manager works around.
pub trait MonotonicClock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Wraps `std::time::Instant`, which is already monotonic on every platform
/// Rust supports.
pub struct SystemMonotonicClock {
    start: Instant,
}

impl SystemMonotonicClock {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }
}

impl Default for SystemMonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock for SystemMonotonicClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::MonotonicClock;
    use super::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Clock a test can move forward by hand, used for the scenario and
    /// boundary tests in spec.md §8 where the exact interleaving of "now"
    /// against the retrans/ack deadlines matters.
    pub struct FakeClock {
        now: AtomicU64,
    }

    impl FakeClock {
        pub fn new(start_ms: u64) -> Arc<Self> {
            Arc::new(Self { now: AtomicU64::new(start_ms) })
        }

        pub fn set(&self, ms: u64) {
            self.now.store(ms, Ordering::SeqCst);
        }

        pub fn advance(&self, ms: u64) {
            self.now.fetch_add(ms, Ordering::SeqCst);
        }
    }

    impl MonotonicClock for FakeClock {
        fn now_ms(&self) -> u64 {
            self.now.load(Ordering::SeqCst)
        }
    }
}
