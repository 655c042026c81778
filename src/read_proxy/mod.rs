//! Chunked, lease-backed, lazy cache over one object generation (§4.3).

mod multi_chunk;
mod single_chunk;

pub use multi_chunk::MultiChunkReadProxy;
pub use single_chunk::SingleChunkReadProxy;

use std::sync::Arc;

use crate::bucket::Bucket;
use crate::error::Result;
use crate::lease::{FileLeaser, ReadLease, ReadWriteLease};
use crate::refresher::{FullObjectRefresher, Refresher};

/// A chunked, lease-backed, lazy cache over one generation of one object
/// (§4.3). Single- and multi-chunk variants share one contract:
/// `read_at`, `upgrade`, `size`.
///
/// Not thread-safe (§4.3 "Ordering") — callers serialize access via the
/// enclosing inode mutex.
pub enum ReadProxy {
    Single(SingleChunkReadProxy),
    Multi(MultiChunkReadProxy),
}

impl ReadProxy {
    /// Builds the appropriate variant for `size`: single-chunk when the
    /// object fits in one chunk, multi-chunk otherwise.
    pub fn new(
        bucket: Arc<dyn Bucket>,
        name: String,
        generation: u64,
        size: u64,
        chunk_size: u64,
    ) -> Self {
        if size <= chunk_size {
            let refresher: Arc<dyn Refresher> =
                Arc::new(FullObjectRefresher::new(bucket, name, generation, size));
            ReadProxy::Single(SingleChunkReadProxy::new(refresher))
        } else {
            ReadProxy::Multi(MultiChunkReadProxy::new(
                bucket, name, generation, size, chunk_size,
            ))
        }
    }

    /// Builds a proxy already primed with `lease`, the read lease an
    /// upload just produced (§4.7 `sync`: "a new MutableContent over a
    /// fresh ReadProxy primed with the returned read lease"). Only the
    /// single-chunk shape can be primed directly, since `lease` spans the
    /// whole object contiguously in one staging file; a multi-chunk
    /// proxy's chunks each own an independent staging file, so priming it
    /// would mean copying `lease`'s bytes out into several fresh ones —
    /// no cheaper than letting each chunk refetch lazily on first read.
    /// Large objects therefore come back up cold and re-warm on demand.
    pub fn primed(
        bucket: Arc<dyn Bucket>,
        name: String,
        generation: u64,
        size: u64,
        chunk_size: u64,
        lease: ReadLease,
    ) -> Self {
        if size <= chunk_size {
            let refresher: Arc<dyn Refresher> =
                Arc::new(FullObjectRefresher::new(bucket, name, generation, size));
            ReadProxy::Single(SingleChunkReadProxy::new_warm(refresher, lease))
        } else {
            ReadProxy::new(bucket, name, generation, size, chunk_size)
        }
    }

    pub fn size(&self) -> i64 {
        match self {
            ReadProxy::Single(p) => p.size(),
            ReadProxy::Multi(p) => p.size(),
        }
    }

    pub async fn read_at(
        &self,
        buf: &mut [u8],
        offset: i64,
        leaser: &Arc<FileLeaser>,
    ) -> Result<usize> {
        match self {
            ReadProxy::Single(p) => p.read_at(buf, offset, leaser).await,
            ReadProxy::Multi(p) => p.read_at(buf, offset, leaser).await,
        }
    }

    /// Produces an exclusive [`ReadWriteLease`] over the whole object
    /// (§4.3 `upgrade`). Takes `&self`: a failed or cancelled upgrade
    /// leaves the proxy usable, matching §5's cancellation contract. The
    /// caller discards the proxy after a successful upgrade.
    pub async fn upgrade(&self, leaser: &Arc<FileLeaser>) -> Result<ReadWriteLease> {
        match self {
            ReadProxy::Single(p) => p.upgrade(leaser).await,
            ReadProxy::Multi(p) => p.upgrade(leaser).await,
        }
    }
}
