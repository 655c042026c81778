//! An exclusive, mutable, seekable, truncatable view of a staging file.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use super::leaser::FileLeaser;
use super::staging::StagingFile;
use crate::bucket::{stream_from_bytes, ByteStream};
use crate::error::{Error, Result};

/// An exclusive, mutable handle onto one staging file (§3 "Lease",
/// `ReadWrite` variant).
///
/// Never spontaneously revoked while held, but may be *evicted* by the
/// [`FileLeaser`] under memory pressure: eviction sets
/// [`ReadWriteLease::is_poisoned`], and the owner must treat every
/// subsequent operation on the same handle as failing with
/// [`Error::RevokedLease`].
#[derive(Debug)]
pub struct ReadWriteLease {
    pub(crate) id: u64,
    pub(crate) staging: Arc<StagingFile>,
    pub(crate) poisoned: Arc<AtomicBool>,
    pub(crate) leaser: Weak<FileLeaser>,
}

impl ReadWriteLease {
    pub(crate) fn new(
        id: u64,
        staging: Arc<StagingFile>,
        poisoned: Arc<AtomicBool>,
        leaser: Weak<FileLeaser>,
    ) -> Self {
        ReadWriteLease {
            id,
            staging,
            poisoned,
            leaser,
        }
    }

    /// Current size of the staging file.
    pub fn size(&self) -> i64 {
        self.staging.size() as i64
    }

    /// Whether the [`FileLeaser`] has forcibly evicted this lease.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    fn check_live(&self) -> Result<()> {
        if self.is_poisoned() {
            Err(Error::RevokedLease)
        } else {
            Ok(())
        }
    }

    pub async fn read_at(&self, buf: &mut [u8], offset: i64) -> Result<usize> {
        self.check_live()?;
        if let Some(leaser) = self.leaser.upgrade() {
            leaser.touch(self.id);
        }
        let n = self
            .staging
            .read_at(buf, offset as u64)
            .await
            .map_err(|_| Error::Transient(crate::error::TransientKind::Read))?;
        self.check_live()?;
        Ok(n)
    }

    pub async fn write_at(&self, buf: &[u8], offset: i64) -> Result<()> {
        self.check_live()?;
        self.staging
            .write_at(buf, offset as u64)
            .await
            .map_err(|_| Error::Transient(crate::error::TransientKind::Read))?;
        self.check_live()?;
        if let Some(leaser) = self.leaser.upgrade() {
            leaser.account_resize(self.id, self.staging.size()).await;
        }
        Ok(())
    }

    pub async fn truncate(&self, n: i64) -> Result<()> {
        self.check_live()?;
        self.staging
            .set_len(n as u64)
            .await
            .map_err(|_| Error::Transient(crate::error::TransientKind::Read))?;
        self.check_live()?;
        if let Some(leaser) = self.leaser.upgrade() {
            leaser.account_resize(self.id, self.staging.size()).await;
        }
        Ok(())
    }

    /// Materializes a [`ByteStream`] over `[offset, size())`, for handing
    /// to `bucket.create_object`/`compose` as upload content (§4.5 steps
    /// 4-5: "seek it to 0" for the full path, "starting at offset
    /// `source.size`" for the append path).
    pub async fn as_byte_stream(&self, offset: i64) -> Result<ByteStream> {
        self.check_live()?;
        let bytes = self
            .staging
            .read_to_end(offset as u64)
            .await
            .map_err(|_| Error::Transient(crate::error::TransientKind::Read))?;
        Ok(stream_from_bytes(bytes.into()))
    }

    /// Streams `src` into this lease's staging file starting at `offset`,
    /// used by `ReadProxy::upgrade` to materialize content from a
    /// [`crate::refresher::Refresher`].
    pub(crate) async fn stream_in(
        &self,
        src: &mut crate::bucket::ByteStream,
        offset: i64,
    ) -> Result<u64> {
        self.check_live()?;
        let n = self
            .staging
            .stream_into(src, offset as u64)
            .await
            .map_err(|_| Error::Transient(crate::error::TransientKind::Read))?;
        self.check_live()?;
        if let Some(leaser) = self.leaser.upgrade() {
            leaser.account_resize(self.id, self.staging.size()).await;
        }
        Ok(n)
    }

    /// Hands the lease back to the leaser, downgraded to a shared
    /// [`crate::lease::ReadLease`] (§3: "surrendered back to the
    /// FileLeaser either on sync... or on Destroy").
    pub fn downgrade(self) -> super::ReadLease {
        let leaser = self.leaser.clone();
        let staging = self.staging.clone();
        let id = self.id;
        let lease = if let Some(l) = leaser.upgrade() {
            l.convert_rw_to_read(id, staging)
        } else {
            super::ReadLease::new(
                id,
                staging,
                Arc::new(AtomicBool::new(false)),
                Weak::new(),
            )
        };
        // The leaser already re-registered this id as a Read entry (or we
        // fell back to a detached lease above); either way, skip the
        // ordinary unregister-on-drop path for the now-consumed RWL.
        std::mem::forget(self);
        lease
    }
}

impl Drop for ReadWriteLease {
    fn drop(&mut self) {
        if let Some(leaser) = self.leaser.upgrade() {
            leaser.unregister(self.id);
        }
    }
}
