//! The anonymous on-disk file backing one lease. Never referenced by path
//! (§6.4): created with [`tempfile::tempfile`], which opens, unlinks, and
//! hands back the fd in one step, so a crash mid-write leaves nothing for
//! the OS to do but reclaim the fd.

use std::io::SeekFrom;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::{self, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

#[derive(Debug)]
pub(crate) struct StagingFile {
    file: Mutex<File>,
    size: AtomicU64,
}

impl StagingFile {
    pub(crate) fn new_anonymous() -> io::Result<Arc<Self>> {
        let std_file = tempfile::tempfile()?;
        Ok(Arc::new(StagingFile {
            file: Mutex::new(File::from_std(std_file)),
            size: AtomicU64::new(0),
        }))
    }

    pub(crate) fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    pub(crate) async fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let mut f = self.file.lock().await;
        f.seek(SeekFrom::Start(offset)).await?;
        let mut total = 0usize;
        while total < buf.len() {
            let n = f.read(&mut buf[total..]).await?;
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }

    pub(crate) async fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<()> {
        let mut f = self.file.lock().await;
        f.seek(SeekFrom::Start(offset)).await?;
        f.write_all(buf).await?;
        let end = offset + buf.len() as u64;
        self.size.fetch_max(end, Ordering::AcqRel);
        Ok(())
    }

    pub(crate) async fn set_len(&self, n: u64) -> io::Result<()> {
        let f = self.file.lock().await;
        f.set_len(n).await?;
        self.size.store(n, Ordering::Release);
        Ok(())
    }

    /// Streams `src` into the file starting at `offset`, returning the
    /// number of bytes copied. Used to materialize a `ReadWriteLease` from
    /// a `Refresher` and to land the new tail of an append-compose upload.
    pub(crate) async fn stream_into<R>(&self, src: &mut R, offset: u64) -> io::Result<u64>
    where
        R: io::AsyncRead + Unpin,
    {
        let mut f = self.file.lock().await;
        f.seek(SeekFrom::Start(offset)).await?;
        let n = io::copy(src, &mut *f).await?;
        drop(f);
        self.size.fetch_max(offset + n, Ordering::AcqRel);
        Ok(n)
    }

    /// Reads `[offset, size())` into memory, for handing to the bucket
    /// client as upload content. The bucket's HTTP transport is an
    /// external collaborator (§1); this crate only needs to produce bytes
    /// for it to send.
    pub(crate) async fn read_to_end(&self, offset: u64) -> io::Result<Vec<u8>> {
        let size = self.size();
        if offset >= size {
            return Ok(Vec::new());
        }
        let mut buf = vec![0u8; (size - offset) as usize];
        let n = self.read_at(&mut buf, offset).await?;
        buf.truncate(n);
        Ok(buf)
    }
}
