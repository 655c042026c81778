//! Cooperative cancellation (§5 "Cancellation").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

/// A lightweight, cloneable flag. Checked at coarse suspension points
/// (entry to [`crate::syncer::ObjectSyncer::sync`], the start of each
/// `FileInode` operation) rather than threaded through every byte copy —
/// cancelling mid-copy still runs to the next checkpoint, which is the
/// granularity §5 asks for ("Cancellation during an upgrade leaves the
/// MutableContent still Clean", not "stops mid-`write`").
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Returns [`Error::Cancelled`] if cancelled, `Ok(())` otherwise.
    /// Call at the start of a coarse operation and after each `.await` on
    /// an external collaborator (the bucket, a refresher).
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
