//! Tunable knobs. Collected into one struct rather than scattered
//! constants so the binary can build it once from parsed flags (the
//! teacher's `fuser-examples` binaries do the analogous thing with `clap`
//! before constructing a `Session`).

/// The object store's hard cap on how many source objects a single
/// `compose` chain may accumulate. GCS's own limit is 32; kept as a
/// constant here rather than a bucket-reported value since it is a
/// property of the compose primitive, not of any one object.
pub const MAX_COMPONENT_COUNT: u32 = 32;

/// Tunables for the read/write/sync path.
#[derive(Debug, Clone)]
pub struct Config {
    /// Byte size of each [`crate::read_proxy::ChunkRef`] in a multi-chunk
    /// `ReadProxy`. A single-chunk `ReadProxy` is used instead when an
    /// object is no larger than this.
    pub chunk_size: u64,
    /// Minimum source object size below which `ObjectSyncer` always takes
    /// the full-replace path, never append-compose (§4.5 step 3).
    pub append_threshold: u64,
    /// Total bytes of on-disk staging files the [`crate::lease::FileLeaser`]
    /// will allow outstanding at once, across all open files.
    pub limit_bytes: u64,
    /// Max number of concurrently-held read/write leases.
    pub limit_rw_count: usize,
    /// Suffix appended to a child name during lookup to force resolution
    /// to the file variant when both a file and directory exist with the
    /// same base name (§6.3, §9 Open Question 1).
    pub conflict_marker: Vec<u8>,
    /// Prefix under which `ObjectSyncer` creates temporary objects for the
    /// append-compose path (§4.5 step 5).
    pub tmp_object_prefix: String,
    /// TTL for `DirInode`'s per-child type cache (§4.8).
    pub type_cache_ttl: std::time::Duration,
    /// Whether unlisted descendant prefixes synthesize implicit
    /// directories (§4.8 step 3).
    pub implicit_dirs: bool,
    /// Whether `FileInode::attributes` issues an extra `stat_object` to
    /// detect a clobber (§4.7, SPEC_FULL §2).
    pub clobber_detection: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            chunk_size: 8 * 1024 * 1024,
            append_threshold: 16 * 1024 * 1024,
            limit_bytes: 1024 * 1024 * 1024,
            limit_rw_count: 32,
            conflict_marker: b"\n".to_vec(),
            tmp_object_prefix: ".bucketfs_tmp/".to_string(),
            type_cache_ttl: std::time::Duration::from_secs(1),
            implicit_dirs: false,
            clobber_detection: false,
        }
    }
}
