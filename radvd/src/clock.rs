//! Monotonic time and randomness, split out from the rest of the daemon so
//! that the scheduler (`crate::scheduler`) can be exercised without a real
//! clock or RNG.

use std::time::{Duration, Instant};

use rand::Rng as _;

/// A thin wrapper around `std::time::Instant` plus the daemon's one source
/// of randomness (RFC 4861's jitter requires a uniform integer in a range
/// at several points).
#[derive(Debug, Default, Clone, Copy)]
pub struct Clock;

impl Clock {
    pub fn new() -> Clock {
        // Touching the thread RNG here forces lazy OS-entropy seeding to
        // happen at startup, so a seeding failure is fatal immediately
        // rather than surfacing later as a confusing jitter bug.
        let _ = rand::thread_rng().gen::<u8>();
        Clock
    }

    pub fn now(&self) -> Instant {
        Instant::now()
    }

    pub fn add(&self, instant: Instant, ms: u64) -> Instant {
        instant + Duration::from_millis(ms)
    }

    /// True iff `a` strictly follows `b`.
    pub fn after(&self, a: Instant, b: Instant) -> bool {
        a > b
    }

    /// Signed millisecond delta `a - b`.
    pub fn diff_ms(&self, a: Instant, b: Instant) -> i64 {
        if a >= b {
            a.duration_since(b).as_millis() as i64
        } else {
            -(b.duration_since(a).as_millis() as i64)
        }
    }

    /// Uniform integer in `[min, max)`. Panics if `min >= max`, same as
    /// `rand::Rng::gen_range`.
    pub fn rand_range(&self, min: u64, max: u64) -> u64 {
        rand::thread_rng().gen_range(min..max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_ms_signed() {
        let clock = Clock::new();
        let t0 = clock.now();
        let t1 = clock.add(t0, 250);
        assert_eq!(clock.diff_ms(t1, t0), 250);
        assert_eq!(clock.diff_ms(t0, t1), -250);
        assert_eq!(clock.diff_ms(t0, t0), 0);
    }

    #[test]
    fn after_is_strict() {
        let clock = Clock::new();
        let t0 = clock.now();
        let t1 = clock.add(t0, 1);
        assert!(clock.after(t1, t0));
        assert!(!clock.after(t0, t0));
        assert!(!clock.after(t0, t1));
    }

    #[test]
    fn rand_range_stays_in_bounds() {
        let clock = Clock::new();
        for _ in 0..1000 {
            let v = clock.rand_range(10, 20);
            assert!((10..20).contains(&v));
        }
    }
}
