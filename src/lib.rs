//! Per-file mutable-content engine and object-synchronization protocol
//! for presenting a cloud object store bucket as a POSIX-like tree.
//!
//! This crate owns the parts that sit between a [`bucket::Bucket`]
//! implementation and a FUSE kernel session: disk-quota-bounded read/
//! write leasing ([`lease`]), lazy chunked read caching ([`read_proxy`]),
//! dirty-threshold-tracked local mutation ([`mutable_content`]),
//! full-vs-append upload decisions ([`syncer`]), and the per-inode
//! coordination that ties them together ([`inode`]). The FUSE kernel
//! protocol transport itself lives in the optional [`fuser`] dependency,
//! consumed (not reimplemented) by [`dispatcher`] behind the
//! `fuse-dispatcher` feature.

pub mod bucket;
pub mod cancel;
pub mod clock;
pub mod config;
pub mod error;
pub mod inode;
pub mod lease;
pub mod lookup_count;
pub mod mutable_content;
pub mod object;
pub mod read_proxy;
pub mod refresher;
pub mod syncer;

mod invariant_mutex;

#[cfg(feature = "fuse-dispatcher")]
pub mod dispatcher;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
