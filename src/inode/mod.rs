//! Per-inode coordination over the leasing/sync primitives (§4.6-4.8).

mod dir;
mod file;

pub use dir::{ChildKind, DirEntry, DirInode};
pub use file::FileInode;

use crate::clock::Timestamp;

/// An opaque 64-bit handle issued by the dispatcher (§3 "InodeId"). This
/// crate never interprets it — it's a label the dispatcher hands in and
/// gets back out, for routing kernel replies to the right inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InodeId(pub u64);

/// What `FileInode::attributes` reports (§4.7).
#[derive(Debug, Clone, Copy)]
pub struct FileAttributes {
    pub size: u64,
    pub mtime: Option<Timestamp>,
    pub nlink: u32,
    /// Set when clobber-detection (`Config::clobber_detection`) finds the
    /// source object gone or replaced out from under this inode.
    /// Distinguishes the two `nlink == 0` causes (SPEC_FULL §3, Open
    /// Question 3) since `nlink` alone can't: a caller wiring up audit
    /// logging wants to know whether the name still exists under someone
    /// else's generation or is gone outright.
    pub unlinked: Option<Unlinked>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unlinked {
    pub clobbered: bool,
}
