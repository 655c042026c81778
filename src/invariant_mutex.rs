//! A lock that re-validates an invariant on every unlock (§9 "Invariant
//! mutex pattern", §5 "this mutex carries an invariant-check callback
//! invoked on every unlock").
//!
//! Built on `tokio::sync::Mutex` rather than `parking_lot` (used
//! everywhere else in this crate for purely-synchronous bookkeeping):
//! `FileInode` operations hold their inode lock across bucket calls, and
//! a `parking_lot::MutexGuard` held across an `.await` point would block
//! the executor thread for the duration of a network round trip.

use std::ops::{Deref, DerefMut};

use tokio::sync::{Mutex, MutexGuard};

/// Wraps `T` behind a lock whose guard checks `check` against the final
/// state when it is dropped. A violation is a programmer error, not a
/// recoverable condition — it panics unconditionally rather than
/// returning a `Result`, in every build profile, since continuing with
/// state the invariant rejects is worse than aborting.
pub struct InvariantMutex<T> {
    inner: Mutex<T>,
    check: fn(&T) -> Result<(), &'static str>,
}

impl<T> InvariantMutex<T> {
    pub fn new(value: T, check: fn(&T) -> Result<(), &'static str>) -> Self {
        InvariantMutex {
            inner: Mutex::new(value),
            check,
        }
    }

    /// Acquires the lock. The returned guard re-validates `check` when it
    /// is dropped, so every unlock — success or error path alike — is
    /// covered.
    pub async fn lock(&self) -> InvariantGuard<'_, T> {
        InvariantGuard {
            guard: self.inner.lock().await,
            check: self.check,
        }
    }
}

pub struct InvariantGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    check: fn(&T) -> Result<(), &'static str>,
}

impl<T> Deref for InvariantGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for InvariantGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for InvariantGuard<'_, T> {
    fn drop(&mut self) {
        if let Err(what) = (self.check)(&self.guard) {
            panic!("{}", crate::error::Error::InvariantViolation(what));
        }
    }
}
