//! Process-wide quota over disk-backed staging files (§4.1).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use log::{debug, warn};
use parking_lot::Mutex;

use super::read_lease::ReadLease;
use super::rw_lease::ReadWriteLease;
use super::staging::StagingFile;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Read,
    ReadWrite,
}

struct Entry {
    kind: Kind,
    staging: Weak<StagingFile>,
    /// Cached size, kept in sync by `account_resize`/registration so
    /// eviction bookkeeping never has to upgrade a `Weak` just to ask.
    size: u64,
    flag: Arc<AtomicBool>,
    last_used: Instant,
}

struct State {
    next_id: u64,
    entries: HashMap<u64, Entry>,
    total_bytes: u64,
    rw_count: usize,
}

/// Caps total on-disk staging bytes across all open files, and the number
/// of concurrently-held read/write leases, by revoking read leases and
/// evicting read/write leases under pressure (§4.1).
#[derive(Debug)]
pub struct FileLeaser {
    limit_bytes: u64,
    limit_rw_count: usize,
    inner: Mutex<State>,
}

impl FileLeaser {
    pub fn new(limit_bytes: u64, limit_rw_count: usize) -> Arc<Self> {
        Arc::new(FileLeaser {
            limit_bytes,
            limit_rw_count,
            inner: Mutex::new(State {
                next_id: 1,
                entries: HashMap::new(),
                total_bytes: 0,
                rw_count: 0,
            }),
        })
    }

    /// Total bytes of staging files currently accounted for. Invariant
    /// (§8.5): always `<= limit_bytes` once `ensure_capacity` below has had
    /// a chance to run — briefly exceeded only while a single still-live
    /// lease that is itself the sole occupant of the quota grows past it
    /// (there is nothing else left to evict).
    pub fn total_bytes(&self) -> u64 {
        self.inner.lock().total_bytes
    }

    /// Creates a new anonymous staging file and returns an exclusive lease
    /// over it (§4.1 `new_file`). Never fails on quota alone: eviction of
    /// other leases always succeeds, per the contract.
    pub async fn new_file(self: &Arc<Self>) -> std::io::Result<ReadWriteLease> {
        let staging = StagingFile::new_anonymous()?;
        let id = {
            let mut st = self.inner.lock();
            let id = st.next_id;
            st.next_id += 1;
            id
        };
        let flag = Arc::new(AtomicBool::new(false));
        {
            let mut st = self.inner.lock();
            st.entries.insert(
                id,
                Entry {
                    kind: Kind::ReadWrite,
                    staging: Arc::downgrade(&staging),
                    size: 0,
                    flag: flag.clone(),
                    last_used: Instant::now(),
                },
            );
            st.rw_count += 1;
        }
        self.ensure_rw_count(id).await;
        Ok(ReadWriteLease::new(id, staging, flag, Arc::downgrade(self)))
    }

    pub(crate) fn touch(&self, id: u64) {
        let mut st = self.inner.lock();
        if let Some(e) = st.entries.get_mut(&id) {
            e.last_used = Instant::now();
        }
    }

    /// Called after a `ReadWriteLease` grows (write past end, truncate).
    /// Updates accounting and, if over `limit_bytes`, evicts other leases.
    pub(crate) async fn account_resize(&self, id: u64, new_size: u64) {
        let needs_eviction = {
            let mut st = self.inner.lock();
            if let Some(e) = st.entries.get_mut(&id) {
                let old = e.size;
                e.size = new_size;
                st.total_bytes = st.total_bytes - old + new_size;
            }
            st.total_bytes > self.limit_bytes
        };
        if needs_eviction {
            self.ensure_byte_capacity(id).await;
        }
    }

    /// Revokes `Read` leases in LRU order, excluding `protect`, until
    /// `total_bytes <= limit_bytes` or there are none left; then, if still
    /// over, downgrades-and-revokes the LRU `ReadWrite` lease (§4.1
    /// "Eviction order").
    async fn ensure_byte_capacity(&self, protect: u64) {
        loop {
            let over = {
                let st = self.inner.lock();
                st.total_bytes.saturating_sub(self.limit_bytes)
            };
            if over == 0 {
                return;
            }
            let victim = {
                let st = self.inner.lock();
                st.entries
                    .iter()
                    .filter(|(id, e)| **id != protect && e.kind == Kind::Read)
                    .min_by_key(|(_, e)| e.last_used)
                    .map(|(id, _)| *id)
            };
            if let Some(id) = victim {
                self.revoke_read(id);
                continue;
            }
            // No read leases left to revoke; downgrade-and-revoke the LRU
            // read/write lease instead.
            let rw_victim = {
                let st = self.inner.lock();
                st.entries
                    .iter()
                    .filter(|(id, e)| **id != protect && e.kind == Kind::ReadWrite)
                    .min_by_key(|(_, e)| e.last_used)
                    .map(|(id, _)| *id)
            };
            match rw_victim {
                Some(id) => self.evict_rw(id),
                None => {
                    // Only the protected lease itself occupies the quota;
                    // nothing else can be freed. Quota is briefly exceeded.
                    warn!(
                        "FileLeaser over byte quota with no evictable lease (protected id {protect})"
                    );
                    return;
                }
            }
        }
    }

    /// Evicts LRU `ReadWrite` leases, excluding `protect`, until
    /// `rw_count <= limit_rw_count`.
    async fn ensure_rw_count(&self, protect: u64) {
        loop {
            let over = {
                let st = self.inner.lock();
                st.rw_count > self.limit_rw_count
            };
            if !over {
                return;
            }
            let victim = {
                let st = self.inner.lock();
                st.entries
                    .iter()
                    .filter(|(id, e)| **id != protect && e.kind == Kind::ReadWrite)
                    .min_by_key(|(_, e)| e.last_used)
                    .map(|(id, _)| *id)
            };
            match victim {
                Some(id) => self.evict_rw(id),
                None => return,
            }
        }
    }

    fn revoke_read(&self, id: u64) {
        let mut st = self.inner.lock();
        if let Some(e) = st.entries.remove(&id) {
            e.flag.store(true, Ordering::Release);
            st.total_bytes = st.total_bytes.saturating_sub(e.size);
            debug!("FileLeaser revoked read lease {id}, freed {} bytes", e.size);
        }
    }

    /// Downgrades the read/write lease `id` to a revoked read lease in
    /// place (§4.1: "Downgrade involves seeking the staging file to 0 and
    /// handing its read-only view back", then immediately revoked by the
    /// eviction path). The original `ReadWriteLease` handle held elsewhere
    /// observes this as [`ReadWriteLease::is_poisoned`].
    fn evict_rw(&self, id: u64) {
        let mut st = self.inner.lock();
        if let Some(e) = st.entries.get_mut(&id) {
            e.flag.store(true, Ordering::Release);
            e.kind = Kind::Read;
            st.rw_count = st.rw_count.saturating_sub(1);
            let freed = e.size;
            st.total_bytes = st.total_bytes.saturating_sub(freed);
            // Already deducted above; the entry stays in the map until the
            // poisoned `ReadWriteLease` is dropped and calls `unregister`,
            // which must not subtract these bytes a second time.
            e.size = 0;
            debug!("FileLeaser evicted read/write lease {id}, freed {freed} bytes");
        }
    }

    /// Converts a live `ReadWriteLease` into a `ReadLease` over the same
    /// staging file (§3: "downgraded to a Read lease primed into a new
    /// ReadProxy"). Reuses the same id and registers a fresh, un-revoked
    /// flag — this is a clean handoff, not an eviction.
    pub(crate) fn convert_rw_to_read(
        self: &Arc<Self>,
        id: u64,
        staging: Arc<StagingFile>,
    ) -> ReadLease {
        let fresh_flag = Arc::new(AtomicBool::new(false));
        let mut st = self.inner.lock();
        if let Some(e) = st.entries.get_mut(&id) {
            if e.kind == Kind::ReadWrite {
                st.rw_count = st.rw_count.saturating_sub(1);
            }
            e.kind = Kind::Read;
            e.flag = fresh_flag.clone();
            e.last_used = Instant::now();
        } else {
            // Already evicted out from under us; register a fresh,
            // already-revoked entry so downstream accounting stays
            // consistent with `ReadWriteLease::is_poisoned` having fired.
            fresh_flag.store(true, Ordering::Release);
            st.entries.insert(
                id,
                Entry {
                    kind: Kind::Read,
                    staging: Arc::downgrade(&staging),
                    size: staging.size(),
                    flag: fresh_flag.clone(),
                    last_used: Instant::now(),
                },
            );
        }
        drop(st);
        ReadLease::new(id, staging, fresh_flag, Arc::downgrade(self))
    }

    pub(crate) fn unregister(&self, id: u64) {
        let mut st = self.inner.lock();
        if let Some(e) = st.entries.remove(&id) {
            if e.kind == Kind::ReadWrite {
                st.rw_count = st.rw_count.saturating_sub(1);
            }
            st.total_bytes = st.total_bytes.saturating_sub(e.size);
        }
    }
}
