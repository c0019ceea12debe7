//! Injectable wall-clock provider.
//!
//! Every timestamp the core writes to disk (`created`, `started`, `last_review_at`,
//! comment `time`) goes through a [`Clock`] rather than calling `chrono::Utc::now()`
//! directly, so tests can freeze time and assert on exact RFC-3339 strings.

use chrono::{DateTime, Utc};

/// Provides the current time. Swappable in tests via [`FakeClock`].
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that always returns a fixed instant, or advances on demand.
///
/// Useful for asserting exact timestamps in round-trip tests without
/// racing the wall clock.
#[derive(Debug)]
pub struct FakeClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

impl FakeClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Mutex::new(now),
        }
    }

    /// Advance the fake clock by the given duration, returning the new time.
    pub fn advance(&self, delta: chrono::Duration) -> DateTime<Utc> {
        let mut guard = self.now.lock().expect("FakeClock mutex poisoned");
        *guard += delta;
        *guard
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("FakeClock mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_is_stable_until_advanced() {
        let clock = FakeClock::new(DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc));
        let t1 = clock.now();
        let t2 = clock.now();
        assert_eq!(t1, t2);
        let t3 = clock.advance(chrono::Duration::seconds(5));
        assert_eq!(t3, clock.now());
        assert!(t3 > t1);
    }
}
