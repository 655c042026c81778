//! Aggregates a content engine behind a per-inode mutex; implements the
//! file contract consumed by the dispatcher (§4.7).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::bucket::Bucket;
use crate::cancel::CancellationToken;
use crate::clock::Clock;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::invariant_mutex::InvariantMutex;
use crate::lease::FileLeaser;
use crate::lookup_count::LookupCount;
use crate::mutable_content::MutableContent;
use crate::object::ObjectRecord;
use crate::read_proxy::ReadProxy;
use crate::syncer::{ObjectSyncer, SyncOutcome};

use super::{FileAttributes, InodeId, Unlinked};

struct Inner {
    source: ObjectRecord,
    /// `None` only once `destroyed` is true (§3 FileInode state).
    content: Option<MutableContent>,
    destroyed: bool,
    local_generation: u64,
}

fn check_inner(inner: &Inner) -> std::result::Result<(), &'static str> {
    if inner.destroyed == inner.content.is_none() {
        Ok(())
    } else {
        Err("FileInode.destroyed must agree with content.is_none()")
    }
}

/// A file's in-memory state: content engine, source generation, and
/// kernel lookup-count refcount, behind one lock (§4.7).
pub struct FileInode {
    id: InodeId,
    name: String,
    bucket: Arc<dyn Bucket>,
    config: Config,
    clock: Arc<dyn Clock>,
    leaser: Arc<FileLeaser>,
    syncer: Arc<ObjectSyncer>,
    lookup: LookupCount,
    /// Mirrors `inner.source.generation`, kept lock-free for
    /// `source_generation()` — a hot path the dispatcher calls on every
    /// `getattr` even when nothing else about the inode changed.
    source_generation: AtomicU64,
    inner: InvariantMutex<Inner>,
}

impl FileInode {
    pub fn new(
        id: InodeId,
        name: String,
        bucket: Arc<dyn Bucket>,
        config: Config,
        clock: Arc<dyn Clock>,
        leaser: Arc<FileLeaser>,
        syncer: Arc<ObjectSyncer>,
        source: ObjectRecord,
    ) -> Self {
        let read_proxy = ReadProxy::new(
            bucket.clone(),
            source.name.clone(),
            source.generation,
            source.size,
            config.chunk_size,
        );
        let content = MutableContent::new(read_proxy, leaser.clone(), clock.clone());
        let source_generation = AtomicU64::new(source.generation);
        FileInode {
            id,
            name,
            bucket,
            config,
            clock,
            leaser,
            syncer,
            lookup: LookupCount::new(),
            source_generation,
            inner: InvariantMutex::new(
                Inner {
                    source,
                    content: Some(content),
                    destroyed: false,
                    local_generation: 0,
                },
                check_inner,
            ),
        }
    }

    pub fn id(&self) -> InodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The bucket generation this inode last observed as its source,
    /// updated on every successful `sync`. Lock-free (see field doc).
    pub fn source_generation(&self) -> u64 {
        self.source_generation.load(Ordering::Acquire)
    }

    /// `{size, mtime, nlink, unlinked}` (§4.7 `attributes`). Always reads
    /// `content.stat()`; additionally round-trips `bucket.stat_object` when
    /// `Config::clobber_detection` is set, reporting `nlink = 0` and an
    /// `Unlinked` marker if the bucket's current generation for this name
    /// no longer matches ours.
    pub async fn attributes(&self) -> Result<FileAttributes> {
        let guard = self.inner.lock().await;
        let stat = guard
            .content
            .as_ref()
            .ok_or(Error::InvariantViolation("attributes() on a destroyed inode"))?
            .stat();
        let source_generation = guard.source.generation;
        drop(guard);

        if !self.config.clobber_detection {
            return Ok(FileAttributes {
                size: stat.size.max(0) as u64,
                mtime: stat.mtime,
                nlink: 1,
                unlinked: None,
            });
        }

        match self.bucket.stat_object(&self.name).await {
            Ok(current) if current.generation == source_generation => Ok(FileAttributes {
                size: stat.size.max(0) as u64,
                mtime: stat.mtime,
                nlink: 1,
                unlinked: None,
            }),
            Ok(_clobbered_by_other_generation) => Ok(FileAttributes {
                size: stat.size.max(0) as u64,
                mtime: stat.mtime,
                nlink: 0,
                unlinked: Some(Unlinked { clobbered: true }),
            }),
            Err(Error::NotFound) => Ok(FileAttributes {
                size: stat.size.max(0) as u64,
                mtime: stat.mtime,
                nlink: 0,
                unlinked: Some(Unlinked { clobbered: false }),
            }),
            Err(e) => Err(e),
        }
    }

    pub async fn read(
        &self,
        buf: &mut [u8],
        offset: i64,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        cancel.check()?;
        let mut guard = self.inner.lock().await;
        guard
            .content
            .as_mut()
            .ok_or(Error::InvariantViolation("read() on a destroyed inode"))?
            .read_at(buf, offset)
            .await
    }

    pub async fn write(&self, buf: &[u8], offset: i64, cancel: &CancellationToken) -> Result<()> {
        cancel.check()?;
        let mut guard = self.inner.lock().await;
        guard
            .content
            .as_mut()
            .ok_or(Error::InvariantViolation("write() on a destroyed inode"))?
            .write_at(buf, offset)
            .await?;
        guard.local_generation += 1;
        Ok(())
    }

    pub async fn truncate(&self, n: i64, cancel: &CancellationToken) -> Result<()> {
        cancel.check()?;
        let mut guard = self.inner.lock().await;
        guard
            .content
            .as_mut()
            .ok_or(Error::InvariantViolation("truncate() on a destroyed inode"))?
            .truncate(n)
            .await?;
        guard.local_generation += 1;
        Ok(())
    }

    /// Delegates to [`ObjectSyncer::sync`] (§4.7 `sync`). On a successful
    /// upload, advances `source` and replaces `content` with a fresh
    /// `MutableContent` primed from the returned read lease. On
    /// `PreconditionFailed`, swallows the error — "we were clobbered; our
    /// data is now orphaned" — and leaves `source` unchanged. Every other
    /// error propagates.
    pub async fn sync(&self, cancel: &CancellationToken) -> Result<()> {
        cancel.check()?;
        let mut guard = self.inner.lock().await;
        let content = guard
            .content
            .take()
            .ok_or(Error::InvariantViolation("sync() on a destroyed inode"))?;
        let source = guard.source.clone();

        match self.syncer.sync(&source, content).await {
            SyncOutcome::Clean(content) => {
                guard.content = Some(content);
                Ok(())
            }
            SyncOutcome::Uploaded {
                read_lease,
                new_object,
            } => {
                let read_proxy = ReadProxy::primed(
                    self.bucket.clone(),
                    new_object.name.clone(),
                    new_object.generation,
                    new_object.size,
                    self.config.chunk_size,
                    read_lease,
                );
                guard.content = Some(MutableContent::new(
                    read_proxy,
                    self.leaser.clone(),
                    self.clock.clone(),
                ));
                self.source_generation
                    .store(new_object.generation, Ordering::Release);
                guard.source = new_object;
                Ok(())
            }
            SyncOutcome::Failed { content, error } => {
                guard.content = Some(content);
                Err(error)
            }
            SyncOutcome::UploadFailed {
                rwl,
                dirty_threshold,
                mtime,
                error,
            } => {
                // `content` was already released into `rwl` by the
                // syncer; rewrap it as `Dirty` rather than rebuilding a
                // `ReadProxy` over the source, so the locally-held bytes
                // stay readable (§7 "local data retained until destroy",
                // §8 S3) whether this upload failed transiently or was
                // swallowed as a clobber below. `source` is left
                // unchanged either way — a clobber here means our data is
                // now orphaned against that generation, same as if it had
                // been caught by step 1's stat instead of the upload call
                // itself.
                guard.content = Some(MutableContent::from_dirty(
                    rwl,
                    dirty_threshold,
                    mtime,
                    self.leaser.clone(),
                    self.clock.clone(),
                ));
                if error.is_clobber() {
                    Ok(())
                } else {
                    Err(error)
                }
            }
        }
    }

    pub fn inc_lookup(&self) {
        self.lookup.inc();
    }

    /// Returns `true` exactly once: the call that brings the lookup count
    /// to zero. The dispatcher must call [`FileInode::destroy`] when this
    /// returns `true`.
    pub fn dec_lookup(&self, n: u64) -> bool {
        self.lookup.dec(n)
    }

    /// Marks the inode destroyed and surrenders any held `ReadWriteLease`
    /// (§4.7 `destroy`).
    pub async fn destroy(&self) {
        let mut guard = self.inner.lock().await;
        if let Some(content) = guard.content.take() {
            content.destroy();
        }
        guard.destroyed = true;
    }
}
