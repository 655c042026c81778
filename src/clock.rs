//! Time source abstraction.
//!
//! `MutableContent::stat` and `write_at`/`truncate` need an `mtime`;
//! tests need to control it deterministically (the round-trip and
//! truncate-idempotence laws in §8 only compare byte content and size, but
//! scenario tests assert mtime advances monotonically). Mirrors the
//! teacher's own small `time.rs` helper module in spirit: a thin seam
//! rather than a dependency on a date/time crate the rest of the pack does
//! not otherwise need.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A point in time, stored as nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Build a `Timestamp` from nanoseconds since the Unix epoch.
    pub fn from_nanos_since_epoch(nanos: i64) -> Self {
        Timestamp(nanos)
    }

    /// Nanoseconds since the Unix epoch.
    pub fn as_nanos_since_epoch(self) -> i64 {
        self.0
    }

    /// Convert to `std::time::SystemTime`, for handing to a dispatcher.
    pub fn to_system_time(self) -> SystemTime {
        if self.0 >= 0 {
            UNIX_EPOCH + std::time::Duration::from_nanos(self.0 as u64)
        } else {
            UNIX_EPOCH - std::time::Duration::from_nanos((-self.0) as u64)
        }
    }
}

/// A source of monotonically-nondecreasing-in-practice timestamps.
///
/// Not required to be strictly monotonic (wall clocks can step backwards),
/// but every real implementation in this crate uses [`SystemClock`].
pub trait Clock: Send + Sync {
    /// The current time.
    fn now(&self) -> Timestamp;
}

/// The real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let d = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp::from_nanos_since_epoch(d.as_nanos() as i64)
    }
}

/// A clock that only ever advances when told to, for deterministic tests.
/// Starts at a fixed instant and increments by one nanosecond on every
/// `now()` call so successive timestamps are always strictly ordered,
/// matching the "mtime updates on both" clause of the truncate-idempotence
/// law in §8.
#[derive(Debug)]
pub struct FakeClock {
    nanos: AtomicI64,
}

impl FakeClock {
    /// A fresh fake clock starting at the given nanosecond offset.
    pub fn new(start_nanos: i64) -> Self {
        FakeClock {
            nanos: AtomicI64::new(start_nanos),
        }
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        FakeClock::new(0)
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Timestamp {
        let n = self.nanos.fetch_add(1, Ordering::Relaxed);
        Timestamp::from_nanos_since_epoch(n)
    }
}
