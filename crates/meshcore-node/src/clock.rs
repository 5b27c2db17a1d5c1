//! Monotonic-unique epoch-second source.
//!
//! Several protocol watermarks (advert timestamps, room login timestamps)
//! must be strictly increasing even when events land inside the same
//! wall-clock second, and must never run backwards when the wall clock
//! does. [`UniqueClock::now_unique`] bumps by one on every collision and
//! remembers the high-water mark.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// A source of epoch seconds. Trait seam so tests can drive simulated time.
pub trait Clock: Send + Sync {
    /// Current time in whole seconds since the Unix epoch.
    fn now(&self) -> u32;
}

/// The real wall clock.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u32 {
        // A pre-1970 system clock degrades to 0 rather than failing; the
        // unique counter still never moves backwards.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0)
    }
}

/// A manually driven clock for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU32,
}

impl ManualClock {
    /// Create a manual clock starting at the given second.
    pub fn starting_at(now: u32) -> Self {
        Self {
            now: AtomicU32::new(now),
        }
    }

    /// Set the current time (may move backwards, as real clocks do).
    pub fn set(&self, now: u32) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Advance the current time by `secs`.
    pub fn advance(&self, secs: u32) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u32 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Wraps a [`Clock`] with a strictly-increasing unique counter.
pub struct UniqueClock {
    inner: std::sync::Arc<dyn Clock>,
    last_unique: Mutex<u32>,
}

impl UniqueClock {
    /// Wrap a time source. The unique counter starts at 0, so the first
    /// `now_unique()` on a clock reading 0 returns 1.
    pub fn new(inner: std::sync::Arc<dyn Clock>) -> Self {
        Self {
            inner,
            last_unique: Mutex::new(0),
        }
    }

    /// A `UniqueClock` over the real wall clock.
    pub fn system() -> Self {
        Self::new(std::sync::Arc::new(SystemClock))
    }

    /// Current epoch seconds, straight from the underlying source.
    pub fn now(&self) -> u32 {
        self.inner.now()
    }

    /// A strictly-increasing timestamp: the wall clock when it has moved
    /// past the last value handed out, otherwise last + 1.
    pub fn now_unique(&self) -> u32 {
        let mut last = match self.last_unique.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = self.inner.now();
        let unique = if now <= *last { *last + 1 } else { now };
        *last = unique;
        unique
    }
}

impl std::fmt::Debug for UniqueClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UniqueClock").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_first_call_at_epoch_zero_returns_one() {
        let clock = UniqueClock::new(Arc::new(ManualClock::starting_at(0)));
        assert_eq!(clock.now_unique(), 1);
    }

    #[test]
    fn test_collisions_bump_by_one() {
        let manual = Arc::new(ManualClock::starting_at(100));
        let clock = UniqueClock::new(manual);
        assert_eq!(clock.now_unique(), 100);
        assert_eq!(clock.now_unique(), 101);
        assert_eq!(clock.now_unique(), 102);
    }

    #[test]
    fn test_forward_jump_follows_wall_clock() {
        let manual = Arc::new(ManualClock::starting_at(100));
        let clock = UniqueClock::new(manual.clone());
        assert_eq!(clock.now_unique(), 100);
        manual.set(500);
        assert_eq!(clock.now_unique(), 500);
    }

    #[test]
    fn test_backward_jump_never_decreases() {
        let manual = Arc::new(ManualClock::starting_at(500));
        let clock = UniqueClock::new(manual.clone());
        assert_eq!(clock.now_unique(), 500);
        manual.set(100);
        assert_eq!(clock.now_unique(), 501);
        assert_eq!(clock.now_unique(), 502);
    }

    #[test]
    fn test_strictly_increasing_across_threads() {
        let clock = Arc::new(UniqueClock::new(Arc::new(ManualClock::starting_at(10))));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let c = clock.clone();
            handles.push(std::thread::spawn(move || {
                (0..250).map(|_| c.now_unique()).collect::<Vec<_>>()
            }));
        }
        let mut all: Vec<u32> = Vec::new();
        for h in handles {
            all.extend(h.join().expect("thread"));
        }
        all.sort_unstable();
        for pair in all.windows(2) {
            assert!(pair[0] < pair[1], "duplicate unique timestamp {}", pair[0]);
        }
    }

    #[test]
    fn test_plain_now_is_untouched() {
        let manual = Arc::new(ManualClock::starting_at(7));
        let clock = UniqueClock::new(manual);
        let _ = clock.now_unique();
        assert_eq!(clock.now(), 7);
    }
}
