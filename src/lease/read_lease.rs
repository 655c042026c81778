//! A shared, immutable, revocable view of a staging file (§3 "Lease").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use super::leaser::FileLeaser;
use super::staging::StagingFile;
use crate::error::{Error, Result};

/// A shared, read-only handle onto one staging file. Holders test
/// [`ReadLease::is_revoked`] lock-free before every access (§9 "Lease
/// revocation signalling") rather than taking the leaser's lock.
#[derive(Debug)]
pub struct ReadLease {
    pub(crate) id: u64,
    pub(crate) staging: Arc<StagingFile>,
    pub(crate) revoked: Arc<AtomicBool>,
    pub(crate) leaser: Weak<FileLeaser>,
}

impl ReadLease {
    pub(crate) fn new(
        id: u64,
        staging: Arc<StagingFile>,
        revoked: Arc<AtomicBool>,
        leaser: Weak<FileLeaser>,
    ) -> Self {
        ReadLease {
            id,
            staging,
            revoked,
            leaser,
        }
    }

    /// Size of the underlying object content, as of when this lease was
    /// created or last observed live.
    pub fn size(&self) -> i64 {
        self.staging.size() as i64
    }

    /// Whether the [`FileLeaser`] has revoked this lease's backing data.
    /// Once true, it is true forever — a `ReadLease` never comes back to
    /// life (§3).
    pub fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::Acquire)
    }

    /// Revokes this lease immediately, without going through the
    /// leaser's LRU eviction path. Used by
    /// [`crate::mutable_content::MutableContent::destroy`]: a destroyed
    /// file's content must never be readable again, even though nothing
    /// forced it out under memory pressure (§3: "a ReadWriteLease ... is
    /// surrendered back to the FileLeaser ... on Destroy (downgraded and
    /// revoked)").
    pub fn force_revoke(&self) {
        self.revoked.store(true, Ordering::Release);
    }

    /// Reads up to `buf.len()` bytes starting at `offset`. Fails with
    /// [`Error::RevokedLease`] if the leaser has revoked this lease,
    /// either before the read starts or discovered mid-read.
    pub async fn read_at(&self, buf: &mut [u8], offset: i64) -> Result<usize> {
        if self.is_revoked() {
            return Err(Error::RevokedLease);
        }
        if let Some(leaser) = self.leaser.upgrade() {
            leaser.touch(self.id);
        }
        let n = self
            .staging
            .read_at(buf, offset as u64)
            .await
            .map_err(|_| Error::Transient(crate::error::TransientKind::Read))?;
        if self.is_revoked() {
            return Err(Error::RevokedLease);
        }
        Ok(n)
    }

    /// Reads the whole lease's content into memory. Used by
    /// [`crate::read_proxy::MultiChunkReadProxy::upgrade`] to copy a warm
    /// chunk into the fresh contiguous `ReadWriteLease`.
    pub async fn read_all(&self) -> Result<Vec<u8>> {
        if self.is_revoked() {
            return Err(Error::RevokedLease);
        }
        let buf = self
            .staging
            .read_to_end(0)
            .await
            .map_err(|_| Error::Transient(crate::error::TransientKind::Read))?;
        if self.is_revoked() {
            return Err(Error::RevokedLease);
        }
        Ok(buf)
    }
}

impl Drop for ReadLease {
    fn drop(&mut self) {
        if let Some(leaser) = self.leaser.upgrade() {
            leaser.unregister(self.id);
        }
    }
}
