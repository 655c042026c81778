//! An in-process [`crate::bucket::Bucket`] test double, grounded on the
//! same shape as `xet-core`'s in-memory CAS client test provider: a
//! `Mutex`-guarded map standing in for the network, with the same
//! generation/precondition/compose semantics real bucket calls have
//! (SPEC_FULL §1 "Test tooling").

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::bucket::{
    stream_from_bytes, Bucket, ByteStream, ComposeRequest, CreateRequest, ListPage, ListRequest,
    ReadRequest,
};
use crate::error::{Error, Result, TransientKind};
use crate::object::{ObjectRecord, ABSENT_GENERATION};

struct Stored {
    record: ObjectRecord,
    bytes: Bytes,
}

/// An in-memory object store: one flat namespace, monotone per-name
/// generations, optimistic-concurrency preconditions, and `compose`
/// concatenation — everything `ObjectSyncer`/`DirInode` need to exercise
/// against, without a network.
pub struct FakeBucket {
    objects: Mutex<HashMap<String, Stored>>,
    next_generation: AtomicU64,
    /// When set, every call fails with this error instead of touching
    /// `objects` — for exercising `Transient` propagation paths.
    fail_with: Mutex<Option<TransientKind>>,
}

impl FakeBucket {
    pub fn new() -> Self {
        FakeBucket {
            objects: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            fail_with: Mutex::new(None),
        }
    }

    /// Seeds an object directly, bypassing precondition checks — for test
    /// setup ("source `\"taco\"` (gen 123, ...)").
    pub fn seed(&self, name: impl Into<String>, contents: impl Into<Bytes>) -> ObjectRecord {
        self.seed_with_metadata(name, contents, HashMap::new())
    }

    pub fn seed_with_metadata(
        &self,
        name: impl Into<String>,
        contents: impl Into<Bytes>,
        metadata: HashMap<String, String>,
    ) -> ObjectRecord {
        let name = name.into();
        let bytes = contents.into();
        let generation = self.next_generation.fetch_add(1, Ordering::AcqRel);
        let record = ObjectRecord {
            name: name.clone(),
            generation,
            size: bytes.len() as u64,
            updated: SystemTime::now(),
            component_count: 1,
            metadata,
        };
        self.objects.lock().insert(
            name,
            Stored {
                record: record.clone(),
                bytes,
            },
        );
        record
    }

    /// Makes every subsequent call fail with `Error::Transient(kind)`.
    pub fn inject_failure(&self, kind: TransientKind) {
        *self.fail_with.lock() = Some(kind);
    }

    pub fn clear_failure(&self) {
        *self.fail_with.lock() = None;
    }

    fn check_injected_failure(&self) -> Result<()> {
        match *self.fail_with.lock() {
            Some(kind) => Err(Error::Transient(kind)),
            None => Ok(()),
        }
    }

    /// Current bytes stored for `name`, for test assertions.
    pub fn current_bytes(&self, name: &str) -> Option<Bytes> {
        self.objects.lock().get(name).map(|s| s.bytes.clone())
    }
}

impl Default for FakeBucket {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Bucket for FakeBucket {
    async fn list_objects(&self, req: ListRequest) -> Result<ListPage> {
        self.check_injected_failure()?;
        let objects = self.objects.lock();
        let mut names: Vec<&String> = objects
            .keys()
            .filter(|name| name.starts_with(&req.prefix))
            .collect();
        names.sort();

        let mut page_objects = Vec::new();
        let mut prefixes: Vec<String> = Vec::new();
        let mut seen_prefixes = std::collections::HashSet::new();
        let start = req
            .cursor
            .as_deref()
            .map(|c| names.partition_point(|n| n.as_str() <= c))
            .unwrap_or(0);

        let mut next_cursor = None;
        for name in names.into_iter().skip(start) {
            if let Some(max) = req.max_results {
                if (page_objects.len() + prefixes.len()) as u32 >= max {
                    next_cursor = Some(name.clone());
                    break;
                }
            }
            let rest = &name[req.prefix.len()..];
            if let Some(delim) = &req.delimiter {
                if let Some(idx) = rest.find(delim.as_str()) {
                    let grouped = format!("{}{}{}", req.prefix, &rest[..idx], delim);
                    if seen_prefixes.insert(grouped.clone()) {
                        prefixes.push(grouped);
                    }
                    continue;
                }
            }
            page_objects.push(objects[name].record.clone());
        }

        Ok(ListPage {
            objects: page_objects,
            prefixes,
            next_cursor,
        })
    }

    async fn stat_object(&self, name: &str) -> Result<ObjectRecord> {
        self.check_injected_failure()?;
        self.objects
            .lock()
            .get(name)
            .map(|s| s.record.clone())
            .ok_or(Error::NotFound)
    }

    async fn new_reader(&self, req: ReadRequest) -> Result<ByteStream> {
        self.check_injected_failure()?;
        let objects = self.objects.lock();
        let stored = objects.get(&req.name).ok_or(Error::NotFound)?;
        if stored.record.generation != req.generation {
            return Err(Error::PreconditionFailed {
                source_generation: req.generation,
            });
        }
        let slice = match req.range {
            Some(range) => {
                let len = stored.bytes.len() as u64;
                let start = range.start.min(len);
                let limit = range.limit.min(len).max(start);
                stored.bytes.slice(start as usize..limit as usize)
            }
            None => stored.bytes.clone(),
        };
        Ok(stream_from_bytes(slice))
    }

    async fn create_object(&self, req: CreateRequest) -> Result<ObjectRecord> {
        self.check_injected_failure()?;
        let bytes = crate::bucket::drain_to_vec(req.contents, 0).await?;
        let mut objects = self.objects.lock();
        let current_generation = objects
            .get(&req.name)
            .map(|s| s.record.generation)
            .unwrap_or(ABSENT_GENERATION);
        if let Some(expected) = req.generation_precondition {
            if expected != current_generation {
                return Err(Error::PreconditionFailed {
                    source_generation: expected,
                });
            }
        }
        let generation = self.next_generation.fetch_add(1, Ordering::AcqRel);
        let record = ObjectRecord {
            name: req.name.clone(),
            generation,
            size: bytes.len() as u64,
            updated: SystemTime::now(),
            component_count: 1,
            metadata: req.metadata.unwrap_or_default(),
        };
        objects.insert(
            req.name,
            Stored {
                record: record.clone(),
                bytes: bytes.into(),
            },
        );
        Ok(record)
    }

    async fn compose(&self, req: ComposeRequest) -> Result<ObjectRecord> {
        self.check_injected_failure()?;
        let mut objects = self.objects.lock();

        let current_generation = objects
            .get(&req.dst)
            .map(|s| s.record.generation)
            .unwrap_or(ABSENT_GENERATION);
        if let Some(expected) = req.dst_generation_precondition {
            if expected != current_generation {
                return Err(Error::PreconditionFailed {
                    source_generation: expected,
                });
            }
        }

        let mut combined = Vec::new();
        let mut component_count = 0u32;
        let mut metadata = HashMap::new();
        for source in &req.sources {
            let stored = objects.get(&source.name).ok_or(Error::NotFound)?;
            if stored.record.generation != source.generation {
                return Err(Error::PreconditionFailed {
                    source_generation: source.generation,
                });
            }
            combined.extend_from_slice(&stored.bytes);
            component_count += stored.record.component_count.max(1);
            metadata = stored.record.metadata.clone();
        }

        let generation = self.next_generation.fetch_add(1, Ordering::AcqRel);
        let record = ObjectRecord {
            name: req.dst.clone(),
            generation,
            size: combined.len() as u64,
            updated: SystemTime::now(),
            component_count,
            metadata,
        };
        objects.insert(
            req.dst,
            Stored {
                record: record.clone(),
                bytes: combined.into(),
            },
        );
        Ok(record)
    }

    async fn update_object(
        &self,
        name: &str,
        metadata_patch: HashMap<String, String>,
    ) -> Result<ObjectRecord> {
        self.check_injected_failure()?;
        let mut objects = self.objects.lock();
        let stored = objects.get_mut(name).ok_or(Error::NotFound)?;
        stored.record.metadata.extend(metadata_patch);
        stored.record.generation = self.next_generation.fetch_add(1, Ordering::AcqRel);
        Ok(stored.record.clone())
    }

    async fn delete_object(&self, name: &str) -> Result<()> {
        self.check_injected_failure()?;
        self.objects
            .lock()
            .remove(name)
            .map(|_| ())
            .ok_or(Error::NotFound)
    }
}
