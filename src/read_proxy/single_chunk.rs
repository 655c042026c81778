use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;

use crate::error::{Error, Result};
use crate::lease::{FileLeaser, ReadLease, ReadWriteLease};
use crate::refresher::Refresher;

/// A chunk's cache state (§9 "Sum types": `{Cold(Refresher) |
/// Warm(ReadLease, Refresher)}`). The refresher itself lives in the
/// enclosing [`SingleChunkReadProxy`] rather than duplicated per-variant,
/// since it never changes once the proxy is constructed.
enum ChunkState {
    Cold,
    Warm(ReadLease),
}

/// Wraps one [`Refresher`]. On first read, materializes its content into
/// a staging file and caches the downgraded [`ReadLease`] (§4.3
/// "Single-chunk variant"). Also used, one per fixed-size range, as the
/// building block of [`super::multi_chunk::MultiChunkReadProxy`].
pub struct SingleChunkReadProxy {
    refresher: Arc<dyn Refresher>,
    size: u64,
    state: AsyncMutex<ChunkState>,
}

impl SingleChunkReadProxy {
    pub fn new(refresher: Arc<dyn Refresher>) -> Self {
        let size = refresher.size();
        SingleChunkReadProxy {
            refresher,
            size,
            state: AsyncMutex::new(ChunkState::Cold),
        }
    }

    /// Builds a proxy already `Warm` over `lease`, skipping the first
    /// fetch (used to prime a fresh `ReadProxy` with the read lease an
    /// `ObjectSyncer::sync` upload just produced, §4.7 `sync`).
    pub fn new_warm(refresher: Arc<dyn Refresher>, lease: ReadLease) -> Self {
        let size = refresher.size();
        SingleChunkReadProxy {
            refresher,
            size,
            state: AsyncMutex::new(ChunkState::Warm(lease)),
        }
    }

    pub fn size(&self) -> i64 {
        self.size as i64
    }

    /// Materializes (or re-materializes, after a revocation) the warm
    /// lease, returning the held guard so the caller can read through it
    /// without an extra clone.
    async fn ensure_warm<'a>(
        &'a self,
        leaser: &Arc<FileLeaser>,
    ) -> Result<tokio::sync::MutexGuard<'a, ChunkState>> {
        let mut guard = self.state.lock().await;
        let needs_fetch = match &*guard {
            ChunkState::Warm(lease) => lease.is_revoked(),
            ChunkState::Cold => true,
        };
        if needs_fetch {
            let rwl = leaser
                .new_file()
                .await
                .map_err(|_| Error::Transient(crate::error::TransientKind::Create))?;
            let mut stream = self.refresher.refresh().await?;
            rwl.stream_in(&mut stream, 0).await?;
            *guard = ChunkState::Warm(rwl.downgrade());
        }
        Ok(guard)
    }

    pub async fn read_at(
        &self,
        buf: &mut [u8],
        offset: i64,
        leaser: &Arc<FileLeaser>,
    ) -> Result<usize> {
        loop {
            let guard = self.ensure_warm(leaser).await?;
            let ChunkState::Warm(lease) = &*guard else {
                unreachable!("ensure_warm always leaves the chunk Warm")
            };
            match lease.read_at(buf, offset).await {
                Err(Error::RevokedLease) => {
                    drop(guard);
                    continue;
                }
                other => return other,
            }
        }
    }

    /// Produces an exclusive [`ReadWriteLease`] over this chunk's range
    /// (§4.3 `upgrade`): transfers the warm lease's bytes if one is live,
    /// otherwise re-fetches from the refresher. Takes `&self` rather than
    /// consuming — the cache survives a failed/cancelled upgrade
    /// untouched, satisfying "cancellation during an upgrade leaves the
    /// content still Clean" (§5); the caller is responsible for treating
    /// the proxy as logically consumed once an upgrade succeeds.
    pub async fn upgrade(&self, leaser: &Arc<FileLeaser>) -> Result<ReadWriteLease> {
        let guard = self.state.lock().await;
        let rwl = leaser
            .new_file()
            .await
            .map_err(|_| Error::Transient(crate::error::TransientKind::Create))?;
        match &*guard {
            ChunkState::Warm(lease) if !lease.is_revoked() => {
                let bytes = lease.read_all().await?;
                drop(guard);
                rwl.write_at(&bytes, 0).await?;
            }
            _ => {
                drop(guard);
                let mut stream = self.refresher.refresh().await?;
                rwl.stream_in(&mut stream, 0).await?;
            }
        }
        Ok(rwl)
    }
}
