//! Pure functions that fetch a byte range of one object generation from
//! the bucket (§4.2).

use async_trait::async_trait;

use crate::bucket::{Bucket, ByteRange, ByteStream, ReadRequest};
use crate::error::Result;

/// Something that can refresh a cold chunk's content from the bucket.
/// Implementations take no `&mut self` state: every call is independent,
/// so the caller can retry a failed fetch by simply calling `refresh`
/// again (§4.2: "On network error the caller retries by constructing a
/// fresh stream").
#[async_trait]
pub trait Refresher: Send + Sync {
    /// Opens a fresh stream over this refresher's range of the object.
    async fn refresh(&self) -> Result<ByteStream>;

    /// The number of bytes this refresher covers.
    fn size(&self) -> u64;
}

/// Refreshes the entire object.
pub struct FullObjectRefresher {
    bucket: std::sync::Arc<dyn Bucket>,
    name: String,
    generation: u64,
    size: u64,
}

impl FullObjectRefresher {
    pub fn new(bucket: std::sync::Arc<dyn Bucket>, name: String, generation: u64, size: u64) -> Self {
        FullObjectRefresher {
            bucket,
            name,
            generation,
            size,
        }
    }
}

#[async_trait]
impl Refresher for FullObjectRefresher {
    async fn refresh(&self) -> Result<ByteStream> {
        self.bucket
            .new_reader(ReadRequest {
                name: self.name.clone(),
                generation: self.generation,
                range: None,
            })
            .await
    }

    fn size(&self) -> u64 {
        self.size
    }
}

/// Refreshes `[start, limit)` of the object — one chunk of a multi-chunk
/// `ReadProxy`.
pub struct RangedObjectRefresher {
    bucket: std::sync::Arc<dyn Bucket>,
    name: String,
    generation: u64,
    range: ByteRange,
}

impl RangedObjectRefresher {
    pub fn new(
        bucket: std::sync::Arc<dyn Bucket>,
        name: String,
        generation: u64,
        range: ByteRange,
    ) -> Self {
        RangedObjectRefresher {
            bucket,
            name,
            generation,
            range,
        }
    }
}

#[async_trait]
impl Refresher for RangedObjectRefresher {
    async fn refresh(&self) -> Result<ByteStream> {
        self.bucket
            .new_reader(ReadRequest {
                name: self.name.clone(),
                generation: self.generation,
                range: Some(self.range),
            })
            .await
    }

    fn size(&self) -> u64 {
        self.range.len()
    }
}
