//! The bucket interface consumed by this crate (§6.1). The HTTP client
//! behind it is an external collaborator, out of scope here; this module
//! only defines the seam, in the style of `xet-core`'s `UploadClient`/
//! `ReconstructionClient` traits — narrow, `async_trait`, no hidden
//! background work.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncRead;

use crate::error::{Error, Result};
use crate::object::ObjectRecord;

/// A byte range `[start, limit)`, used to request part of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub limit: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.limit.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A streamed object body. Bucket implementations hand back whatever reads
/// lazily off the wire; callers (`Refresher`) drive it to completion.
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// Arguments to [`Bucket::list_objects`].
#[derive(Debug, Clone, Default)]
pub struct ListRequest {
    pub prefix: String,
    pub delimiter: Option<String>,
    pub cursor: Option<String>,
    pub max_results: Option<u32>,
}

/// One page of a `list_objects` call.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectRecord>,
    /// Prefixes grouped by `delimiter` — candidate implicit directories.
    pub prefixes: Vec<String>,
    pub next_cursor: Option<String>,
}

/// Arguments to [`Bucket::new_reader`].
#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub name: String,
    pub generation: u64,
    pub range: Option<ByteRange>,
}

/// Arguments to [`Bucket::create_object`].
pub struct CreateRequest {
    pub name: String,
    pub contents: ByteStream,
    /// `Some(generation)` requires the object currently be at exactly that
    /// generation (or absent, if `generation == ABSENT_GENERATION`);
    /// `None` means unconditional (overwrite-always).
    pub generation_precondition: Option<u64>,
    pub metadata: Option<std::collections::HashMap<String, String>>,
}

/// One source of a [`Bucket::compose`] call.
#[derive(Debug, Clone)]
pub struct ComposeSource {
    pub name: String,
    pub generation: u64,
}

/// Arguments to [`Bucket::compose`].
#[derive(Debug, Clone)]
pub struct ComposeRequest {
    pub dst: String,
    pub dst_generation_precondition: Option<u64>,
    pub sources: Vec<ComposeSource>,
}

/// The object store surface this crate consumes (§6.1). Every call may
/// block on the network and may fail with [`Error::Transient`]; calls that
/// check a generation precondition fail with
/// [`Error::PreconditionFailed`] instead when it does not hold.
#[async_trait]
pub trait Bucket: Send + Sync {
    async fn list_objects(&self, req: ListRequest) -> Result<ListPage>;

    async fn stat_object(&self, name: &str) -> Result<ObjectRecord>;

    async fn new_reader(&self, req: ReadRequest) -> Result<ByteStream>;

    async fn create_object(&self, req: CreateRequest) -> Result<ObjectRecord>;

    async fn compose(&self, req: ComposeRequest) -> Result<ObjectRecord>;

    async fn update_object(
        &self,
        name: &str,
        metadata_patch: std::collections::HashMap<String, String>,
    ) -> Result<ObjectRecord>;

    async fn delete_object(&self, name: &str) -> Result<()>;
}

/// Reads `src` to completion into a `Vec<u8>`, mapping IO errors the way
/// every `Refresher` does: a broken stream partway through is a transient
/// read failure, never silently truncated data (§4.2: "partial reads that
/// error halfway are surfaced to the caller").
pub(crate) async fn drain_to_vec(mut src: ByteStream, size_hint: usize) -> Result<Vec<u8>> {
    use tokio::io::AsyncReadExt;
    let mut buf = Vec::with_capacity(size_hint);
    src.read_to_end(&mut buf)
        .await
        .map_err(|_| Error::Transient(crate::error::TransientKind::Read))?;
    Ok(buf)
}

/// Wrap an in-memory buffer as a [`ByteStream`], for `Refresher`
/// implementations and the test double that don't have a real socket.
pub fn stream_from_bytes(bytes: Bytes) -> ByteStream {
    Box::pin(std::io::Cursor::new(bytes.to_vec()))
}
