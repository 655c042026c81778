use std::sync::Arc;

use crate::bucket::{Bucket, ByteRange};
use crate::error::Result;
use crate::lease::{FileLeaser, ReadWriteLease};
use crate::refresher::{RangedObjectRefresher, Refresher};

use super::single_chunk::SingleChunkReadProxy;

/// An ordered list of single-chunk proxies, one per fixed-size chunk of
/// the object (§4.3 "Multi-chunk variant"). Chunk boundaries are fixed at
/// construction; the sum of chunk sizes always equals the object size
/// (§3 invariant).
pub struct MultiChunkReadProxy {
    chunks: Vec<SingleChunkReadProxy>,
    chunk_size: u64,
    size: u64,
}

impl MultiChunkReadProxy {
    pub fn new(
        bucket: Arc<dyn Bucket>,
        name: String,
        generation: u64,
        size: u64,
        chunk_size: u64,
    ) -> Self {
        assert!(chunk_size > 0, "chunk_size must be positive");
        let mut chunks = Vec::new();
        let mut start = 0u64;
        while start < size {
            let limit = (start + chunk_size).min(size);
            let refresher: Arc<dyn Refresher> = Arc::new(RangedObjectRefresher::new(
                bucket.clone(),
                name.clone(),
                generation,
                ByteRange { start, limit },
            ));
            chunks.push(SingleChunkReadProxy::new(refresher));
            start = limit;
        }
        MultiChunkReadProxy {
            chunks,
            chunk_size,
            size,
        }
    }

    pub fn size(&self) -> i64 {
        self.size as i64
    }

    fn chunk_index(&self, offset: u64) -> usize {
        (offset / self.chunk_size) as usize
    }

    /// Dispatches to every chunk the `[offset, offset+len)` range
    /// intersects (§4.3 "A `read_at` dispatches to each chunk it
    /// intersects").
    pub async fn read_at(
        &self,
        buf: &mut [u8],
        offset: i64,
        leaser: &Arc<FileLeaser>,
    ) -> Result<usize> {
        if offset < 0 || offset as u64 >= self.size || buf.is_empty() {
            return Ok(0);
        }
        let mut remaining = buf;
        let mut pos = offset as u64;
        let mut total = 0usize;
        while !remaining.is_empty() && pos < self.size {
            let idx = self.chunk_index(pos);
            let chunk_start = idx as u64 * self.chunk_size;
            let chunk = &self.chunks[idx];
            let within = (pos - chunk_start) as i64;
            let chunk_remaining = (chunk.size() - within).max(0) as usize;
            let n = chunk_remaining.min(remaining.len());
            if n == 0 {
                break;
            }
            let got = chunk.read_at(&mut remaining[..n], within, leaser).await?;
            if got == 0 {
                break;
            }
            total += got;
            pos += got as u64;
            remaining = &mut remaining[got..];
            if got < n {
                break;
            }
        }
        Ok(total)
    }

    /// Produces one contiguous [`ReadWriteLease`] holding the whole
    /// object, streaming each chunk in order (§4.3 "`upgrade` is
    /// atomic"). If any chunk fails, the partially-filled lease is
    /// dropped and the error propagates — no partial state is handed to
    /// the caller. Takes `&self`, not owned, for the same cancellation-
    /// safety reason as [`SingleChunkReadProxy::upgrade`].
    pub async fn upgrade(&self, leaser: &Arc<FileLeaser>) -> Result<ReadWriteLease> {
        let rwl = leaser
            .new_file()
            .await
            .map_err(|_| crate::error::Error::Transient(crate::error::TransientKind::Create))?;
        let mut offset = 0i64;
        for chunk in &self.chunks {
            let chunk_rwl = chunk.upgrade(leaser).await?;
            let mut stream = chunk_rwl.as_byte_stream(0).await?;
            rwl.stream_in(&mut stream, offset).await?;
            offset += chunk_rwl.size();
        }
        Ok(rwl)
    }
}
