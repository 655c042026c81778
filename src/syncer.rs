//! Stat-dirty, then full-replace or append-compose with precondition
//! (§4.5).

use std::sync::Arc;

use log::warn;
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::bucket::{Bucket, ComposeRequest, ComposeSource, CreateRequest};
use crate::config::{Config, MAX_COMPONENT_COUNT};
use crate::error::Error;
use crate::lease::{ReadLease, ReadWriteLease};
use crate::mutable_content::MutableContent;
use crate::object::ObjectRecord;

/// Decides between a full re-upload and an append-compose, and drives
/// whichever one the dirty state calls for (§4.5).
pub struct ObjectSyncer {
    bucket: Arc<dyn Bucket>,
    config: Config,
}

impl ObjectSyncer {
    pub fn new(bucket: Arc<dyn Bucket>, config: Config) -> Self {
        ObjectSyncer { bucket, config }
    }

    /// Runs the algorithm in §4.5. `content` is consumed (left in a
    /// transitional, droppable state) only when the return is
    /// `SyncOutcome::Uploaded`; in every other case it is handed back to
    /// the caller untouched, matching the contract's "otherwise it is
    /// left intact".
    pub async fn sync(&self, source: &ObjectRecord, mut content: MutableContent) -> SyncOutcome {
        let stat = content.stat();

        // Step 1.
        if stat.dirty_threshold > source.size as i64 {
            return SyncOutcome::Failed {
                content,
                error: Error::InvariantViolation(
                    "dirty_threshold exceeded source.size entering sync",
                ),
            };
        }

        // Step 2.
        if stat.size == source.size as i64 && stat.dirty_threshold == stat.size {
            return SyncOutcome::Clean(content);
        }

        // Step 3.
        let full = stat.size < source.size as i64
            || stat.dirty_threshold < source.size as i64
            || source.size < self.config.append_threshold
            || source.component_count >= MAX_COMPONENT_COUNT;

        // Guaranteed `Some` here: step 2 already returned for a `Clean`
        // content, so the forced `release()` below always upgrades from
        // (or finds) `Dirty`, which always carries an `mtime`.
        let dirty_threshold = stat.dirty_threshold;
        let mtime = stat
            .mtime
            .expect("content reaching the upload decision is always Dirty");

        let rwl = match content.release().await {
            Ok(rwl) => rwl,
            Err(error) => return SyncOutcome::Failed { content, error },
        };

        if full {
            self.upload_full(source, rwl, dirty_threshold, mtime).await
        } else {
            self.upload_append(source, rwl, dirty_threshold, mtime).await
        }
    }

    /// Step 4: seek the RWL to 0, `create_object` with the source's
    /// generation as precondition.
    async fn upload_full(
        &self,
        source: &ObjectRecord,
        rwl: ReadWriteLease,
        dirty_threshold: i64,
        mtime: crate::clock::Timestamp,
    ) -> SyncOutcome {
        let precondition = if source.exists() {
            source.generation
        } else {
            crate::object::ABSENT_GENERATION
        };
        let stream = match rwl.as_byte_stream(0).await {
            Ok(s) => s,
            Err(error) => {
                return SyncOutcome::UploadFailed {
                    rwl,
                    dirty_threshold,
                    mtime,
                    error,
                }
            }
        };
        match self
            .bucket
            .create_object(CreateRequest {
                name: source.name.clone(),
                contents: stream,
                generation_precondition: Some(precondition),
                metadata: None,
            })
            .await
        {
            Ok(new_object) => SyncOutcome::Uploaded {
                read_lease: rwl.downgrade(),
                new_object,
            },
            Err(error) => SyncOutcome::UploadFailed {
                rwl,
                dirty_threshold,
                mtime,
                error,
            },
        }
    }

    /// Step 5: upload the new tail bytes as a tmp object, compose it onto
    /// the source, always attempt to clean the tmp object up afterward.
    async fn upload_append(
        &self,
        source: &ObjectRecord,
        rwl: ReadWriteLease,
        dirty_threshold: i64,
        mtime: crate::clock::Timestamp,
    ) -> SyncOutcome {
        let tmp_name = format!("{}{}", self.config.tmp_object_prefix, random_suffix());
        let stream = match rwl.as_byte_stream(source.size as i64).await {
            Ok(s) => s,
            Err(error) => {
                return SyncOutcome::UploadFailed {
                    rwl,
                    dirty_threshold,
                    mtime,
                    error,
                }
            }
        };
        let tmp_object = match self
            .bucket
            .create_object(CreateRequest {
                name: tmp_name.clone(),
                contents: stream,
                generation_precondition: Some(crate::object::ABSENT_GENERATION),
                metadata: None,
            })
            .await
        {
            Ok(o) => o,
            Err(error) => {
                return SyncOutcome::UploadFailed {
                    rwl,
                    dirty_threshold,
                    mtime,
                    error,
                }
            }
        };

        let compose_result = self
            .bucket
            .compose(ComposeRequest {
                dst: source.name.clone(),
                dst_generation_precondition: Some(source.generation),
                sources: vec![
                    ComposeSource {
                        name: source.name.clone(),
                        generation: source.generation,
                    },
                    ComposeSource {
                        name: tmp_object.name.clone(),
                        generation: tmp_object.generation,
                    },
                ],
            })
            .await;

        if let Err(e) = self.bucket.delete_object(&tmp_name).await {
            warn!("failed to clean up append tmp object {tmp_name}: {e}");
        }

        match compose_result {
            Ok(new_object) => SyncOutcome::Uploaded {
                read_lease: rwl.downgrade(),
                new_object,
            },
            Err(error) => SyncOutcome::UploadFailed {
                rwl,
                dirty_threshold,
                mtime,
                error,
            },
        }
    }
}

/// What [`ObjectSyncer::sync`] did (§4.5 contract).
pub enum SyncOutcome {
    /// Content was already clean; nothing uploaded.
    Clean(MutableContent),
    /// Upload (full or append) succeeded; `content` has been consumed.
    Uploaded {
        read_lease: ReadLease,
        new_object: ObjectRecord,
    },
    /// Failed before committing to an upload (the step-1 invariant check,
    /// or the forced `release()` upgrade); `content` is handed back
    /// intact.
    Failed { content: MutableContent, error: Error },
    /// The upload itself failed after `content` was released. The
    /// contract only promises `(Some(rl), Some(new_obj))` on success or
    /// an error otherwise; this variant carries the live RWL plus the
    /// dirty state it was released from, so a caller can rewrap it as
    /// live content instead of silently dropping already-released bytes
    /// on a transient failure or a swallowed clobber (§8 S3).
    UploadFailed {
        rwl: ReadWriteLease,
        dirty_threshold: i64,
        mtime: crate::clock::Timestamp,
        error: Error,
    },
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}
