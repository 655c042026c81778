//! Name/type resolution for children; listing delegated to one page per
//! call (§4.8, "thin façade").

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;

use crate::bucket::{Bucket, CreateRequest, ListRequest};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::object::ObjectRecord;

use super::InodeId;

/// The observed kind of a directory child (§4.8 "type cache").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildKind {
    File,
    Dir,
    Symlink,
    /// A prefix with no placeholder object of its own, implied only by
    /// the existence of descendant objects (§4.8 step 3, GLOSSARY).
    Implicit,
}

struct CacheEntry {
    kind: ChildKind,
    expires_at: Instant,
}

/// One decoded entry from [`DirInode::read_entries`].
#[derive(Debug, Clone)]
pub struct DirEntry {
    /// Name relative to this directory, with no trailing `/`.
    pub name: String,
    pub kind: ChildKind,
    pub record: ObjectRecord,
}

/// Name/type resolution and one-page listing over one directory prefix
/// (§4.8). Deliberately thin: no recursive traversal, no cross-page
/// caching of listings — only the per-child type cache is retained
/// between calls.
pub struct DirInode {
    id: InodeId,
    /// Full bucket-object prefix this directory covers; `""` for the
    /// root, otherwise always ending in `/`.
    prefix: String,
    bucket: Arc<dyn Bucket>,
    config: Config,
    type_cache: DashMap<String, CacheEntry>,
}

impl DirInode {
    pub fn new(id: InodeId, prefix: String, bucket: Arc<dyn Bucket>, config: Config) -> Self {
        DirInode {
            id,
            prefix,
            bucket,
            config,
            type_cache: DashMap::new(),
        }
    }

    pub fn id(&self) -> InodeId {
        self.id
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Splits a trailing conflict-marker suffix off `name`, reporting
    /// whether it was present (§6.3, §9 Open Question 1: "the caller
    /// asked for the conflict-marker form of the name").
    fn split_conflict_marker<'a>(&self, name: &'a str) -> (&'a str, bool) {
        let marker = &self.config.conflict_marker;
        if !marker.is_empty() && name.as_bytes().ends_with(marker) {
            (&name[..name.len() - marker.len()], true)
        } else {
            (name, false)
        }
    }

    fn cached_kind(&self, base: &str) -> Option<ChildKind> {
        let entry = self.type_cache.get(base)?;
        if entry.expires_at > Instant::now() {
            Some(entry.kind)
        } else {
            None
        }
    }

    fn cache_insert(&self, base: &str, kind: ChildKind) {
        self.type_cache.insert(
            base.to_string(),
            CacheEntry {
                kind,
                expires_at: Instant::now() + self.config.type_cache_ttl,
            },
        );
    }

    fn cache_invalidate(&self, base: &str) {
        self.type_cache.remove(base);
    }

    fn kind_of(record: &ObjectRecord) -> ChildKind {
        if record.symlink_target().is_some() {
            ChildKind::Symlink
        } else {
            ChildKind::File
        }
    }

    async fn stat_optional(&self, name: &str) -> Result<Option<ObjectRecord>> {
        match self.bucket.stat_object(name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(Error::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn probe_implicit(&self, dir_name: &str) -> Result<Option<ObjectRecord>> {
        let page = self
            .bucket
            .list_objects(ListRequest {
                prefix: dir_name.to_string(),
                delimiter: Some("/".to_string()),
                cursor: None,
                max_results: Some(1),
            })
            .await?;
        if page.objects.is_empty() && page.prefixes.is_empty() {
            Ok(None)
        } else {
            Ok(Some(implicit_record(dir_name)))
        }
    }

    /// §4.8 "Name resolution policy": resolves `name` (a child of this
    /// directory) to the winning `ObjectRecord`, or `None` if nothing
    /// matches.
    pub async fn lookup_child(&self, name: &str) -> Result<Option<ObjectRecord>> {
        let (base, force_file) = self.split_conflict_marker(name);
        let file_name = format!("{}{}", self.prefix, base);
        let dir_name = format!("{}{}/", self.prefix, base);

        if force_file {
            return self.stat_optional(&file_name).await;
        }

        if let Some(kind) = self.cached_kind(base) {
            let winner = match kind {
                ChildKind::File | ChildKind::Symlink => self.stat_optional(&file_name).await?,
                ChildKind::Dir => self.stat_optional(&dir_name).await?,
                ChildKind::Implicit => self.probe_implicit(&dir_name).await?,
            };
            return Ok(winner);
        }

        let (file_obj, dir_obj) =
            tokio::try_join!(self.stat_optional(&file_name), self.stat_optional(&dir_name))?;

        let resolved = match (file_obj, dir_obj) {
            (Some(file), Some(_dir)) if force_file => Some((file, ChildKind::File)),
            (Some(_file), Some(dir)) => Some((dir, ChildKind::Dir)),
            (Some(file), None) => {
                let kind = Self::kind_of(&file);
                Some((file, kind))
            }
            (None, Some(dir)) => Some((dir, ChildKind::Dir)),
            (None, None) => {
                if self.config.implicit_dirs {
                    self.probe_implicit(&dir_name)
                        .await?
                        .map(|obj| (obj, ChildKind::Implicit))
                } else {
                    None
                }
            }
        };

        if let Some((_, kind)) = &resolved {
            self.cache_insert(base, *kind);
        }
        Ok(resolved.map(|(obj, _)| obj))
    }

    pub async fn create_child_file(&self, name: &str) -> Result<ObjectRecord> {
        let (base, _) = self.split_conflict_marker(name);
        let full_name = format!("{}{}", self.prefix, base);
        let obj = self
            .bucket
            .create_object(CreateRequest {
                name: full_name,
                contents: crate::bucket::stream_from_bytes(bytes::Bytes::new()),
                generation_precondition: Some(crate::object::ABSENT_GENERATION),
                metadata: None,
            })
            .await?;
        self.cache_insert(base, ChildKind::File);
        Ok(obj)
    }

    pub async fn create_child_dir(&self, name: &str) -> Result<ObjectRecord> {
        let (base, _) = self.split_conflict_marker(name);
        let full_name = format!("{}{}/", self.prefix, base);
        let obj = self
            .bucket
            .create_object(CreateRequest {
                name: full_name,
                contents: crate::bucket::stream_from_bytes(bytes::Bytes::new()),
                generation_precondition: Some(crate::object::ABSENT_GENERATION),
                metadata: None,
            })
            .await?;
        self.cache_insert(base, ChildKind::Dir);
        Ok(obj)
    }

    pub async fn create_child_symlink(&self, name: &str, target: &str) -> Result<ObjectRecord> {
        let (base, _) = self.split_conflict_marker(name);
        let full_name = format!("{}{}", self.prefix, base);
        let mut metadata = std::collections::HashMap::new();
        metadata.insert(
            crate::object::SYMLINK_TARGET_METADATA_KEY.to_string(),
            target.to_string(),
        );
        let obj = self
            .bucket
            .create_object(CreateRequest {
                name: full_name,
                contents: crate::bucket::stream_from_bytes(bytes::Bytes::new()),
                generation_precondition: Some(crate::object::ABSENT_GENERATION),
                metadata: Some(metadata),
            })
            .await?;
        self.cache_insert(base, ChildKind::Symlink);
        Ok(obj)
    }

    pub async fn delete_child_file(&self, name: &str) -> Result<()> {
        let (base, _) = self.split_conflict_marker(name);
        let full_name = format!("{}{}", self.prefix, base);
        self.bucket.delete_object(&full_name).await?;
        self.cache_invalidate(base);
        Ok(())
    }

    pub async fn delete_child_dir(&self, name: &str) -> Result<()> {
        let (base, _) = self.split_conflict_marker(name);
        let full_name = format!("{}{}/", self.prefix, base);
        self.bucket.delete_object(&full_name).await?;
        self.cache_invalidate(base);
        Ok(())
    }

    /// One page of `list_objects(prefix=self.prefix, delimiter="/",
    /// cursor=token)`, decoded into entries (§4.8 "Listing").
    pub async fn read_entries(
        &self,
        continuation_token: Option<String>,
    ) -> Result<(Vec<DirEntry>, Option<String>)> {
        let page = self
            .bucket
            .list_objects(ListRequest {
                prefix: self.prefix.clone(),
                delimiter: Some("/".to_string()),
                cursor: continuation_token,
                max_results: None,
            })
            .await?;

        let mut entries = Vec::with_capacity(page.objects.len() + page.prefixes.len());
        for obj in &page.objects {
            if obj.name == self.prefix {
                // Placeholder object for this directory itself.
                continue;
            }
            let Some(base) = obj.name.strip_prefix(&self.prefix) else {
                continue;
            };
            if let Some(dir_base) = base.strip_suffix('/') {
                entries.push(DirEntry {
                    name: dir_base.to_string(),
                    kind: ChildKind::Dir,
                    record: obj.clone(),
                });
                self.cache_insert(dir_base, ChildKind::Dir);
            } else {
                let kind = Self::kind_of(obj);
                entries.push(DirEntry {
                    name: base.to_string(),
                    kind,
                    record: obj.clone(),
                });
                self.cache_insert(base, kind);
            }
        }
        if self.config.implicit_dirs {
            for prefix in &page.prefixes {
                let Some(base) = prefix.strip_prefix(&self.prefix) else {
                    continue;
                };
                let Some(dir_base) = base.strip_suffix('/') else {
                    continue;
                };
                if entries.iter().any(|e| e.name == dir_base && e.kind == ChildKind::Dir) {
                    continue;
                }
                entries.push(DirEntry {
                    name: dir_base.to_string(),
                    kind: ChildKind::Implicit,
                    record: implicit_record(prefix),
                });
                self.cache_insert(dir_base, ChildKind::Implicit);
            }
        }
        Ok((entries, page.next_cursor))
    }
}

/// Synthesizes the record for an implicit directory: `generation = 0`
/// (§4.8 step 3), distinct in meaning from [`ObjectRecord::absent`]'s use
/// of the same sentinel — here it means "real, but has no placeholder
/// object", not "does not exist".
fn implicit_record(dir_name: &str) -> ObjectRecord {
    ObjectRecord {
        name: dir_name.to_string(),
        generation: crate::object::ABSENT_GENERATION,
        size: 0,
        updated: std::time::SystemTime::UNIX_EPOCH,
        component_count: 0,
        metadata: std::collections::HashMap::new(),
    }
}

