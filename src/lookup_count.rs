//! Kernel lookup-count refcounting (§4.6).

use std::sync::atomic::{AtomicU64, Ordering};

/// Tracks the FUSE kernel's outstanding lookup references to an inode
/// (§3 "LookupCount", §4.6). `inc` happens on every `lookup`/`readdir`
/// entry handed to the kernel; `dec` happens on `forget`. When the count
/// reaches zero the inode is destroyed — exactly once, even if `dec` is
/// called again afterward with `n == 0` (the kernel never does, but
/// `CountUnderflow` guards against a caller bug rather than silently
/// wrapping).
#[derive(Debug, Default)]
pub struct LookupCount {
    count: AtomicU64,
}

impl LookupCount {
    /// Starts at `1`: the reference implicitly held by whoever is
    /// constructing the inode for its first `lookup` reply.
    pub fn new() -> Self {
        LookupCount {
            count: AtomicU64::new(1),
        }
    }

    pub fn inc(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn current(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    /// Decrements by `n`. Returns `true` exactly once, the call under
    /// which the count transitions from positive to zero — the caller
    /// must run its destroy hook then and only then.
    ///
    /// # Panics
    ///
    /// Panics with [`crate::error::Error::CountUnderflow`]'s message if
    /// `n` exceeds the current count: the kernel protocol guarantees this
    /// never happens, so it signals a bug in the caller, not a recoverable
    /// condition.
    pub fn dec(&self, n: u64) -> bool {
        loop {
            let current = self.count.load(Ordering::Acquire);
            let new = current
                .checked_sub(n)
                .unwrap_or_else(|| panic!("{}", crate::error::Error::CountUnderflow));
            if self
                .count
                .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return current > 0 && new == 0;
            }
        }
    }
}
