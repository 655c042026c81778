//! Error kinds shared by every layer of the core.
//!
//! Kept as a small hand-rolled enum, in the style of [`crate::ll`]'s errno
//! table in the teacher library, rather than reached for through a
//! context-chaining crate: the kinds below are the closed set §7 of the
//! specification names, and every layer either passes one through unchanged
//! or narrows it (`ObjectSyncer` turning `PreconditionFailed` into a
//! structured return, `FileInode::sync` swallowing it).

use std::fmt;

/// The generation a precondition was checked against when it failed.
pub type Generation = u64;

/// Errors produced anywhere in the read/write/sync path.
#[derive(Debug)]
pub enum Error {
    /// The object named by a bucket call does not exist.
    NotFound,
    /// A `create_object`/`compose` generation precondition did not hold:
    /// the object was clobbered by another writer.
    PreconditionFailed {
        /// The generation the caller believed was current.
        source_generation: Generation,
    },
    /// A [`crate::lease::ReadLease`]'s backing staging data was revoked by
    /// the [`crate::lease::FileLeaser`] under memory pressure.
    RevokedLease,
    /// The caller's cancellation token fired mid-operation.
    Cancelled,
    /// A network/transport failure from the bucket client. Surfaced as-is;
    /// retrying is the caller's concern (§5 of the specification: "The
    /// syncer does not retry").
    Transient(TransientKind),
    /// A programmer error: an invariant the state machine promises was
    /// violated. Panics in debug builds at the point of detection; this
    /// variant exists so release builds still fail loudly instead of
    /// corrupting data.
    InvariantViolation(&'static str),
    /// [`crate::lookup_count::LookupCount::dec`] was asked to subtract more
    /// than the current count. Always a programmer error; always panics.
    CountUnderflow,
}

/// Sub-kinds of [`Error::Transient`], mirroring the bucket operations that
/// can produce them (§6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    /// `new_reader` / an in-flight `ByteStream` read failed.
    Read,
    /// `create_object` failed for a reason other than a precondition.
    Create,
    /// `compose` failed for a reason other than a precondition.
    Compose,
    /// `delete_object` failed. Callers generally log and ignore this one
    /// (§4.5 step 5: "failure logged, not surfaced").
    Delete,
    /// `stat_object` / `list_objects` failed.
    Metadata,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound => write!(f, "object not found"),
            Error::PreconditionFailed { source_generation } => write!(
                f,
                "generation precondition failed (expected generation {source_generation})"
            ),
            Error::RevokedLease => write!(f, "read lease revoked; backing data gone"),
            Error::Cancelled => write!(f, "operation cancelled"),
            Error::Transient(kind) => write!(f, "transient error during {kind:?}"),
            Error::InvariantViolation(what) => write!(f, "invariant violation: {what}"),
            Error::CountUnderflow => write!(f, "lookup count underflow"),
        }
    }
}

impl std::error::Error for Error {}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for [`Error::PreconditionFailed`] and [`Error::NotFound`], the
    /// two kinds that mean "clobbered by another writer" in sync context.
    pub fn is_clobber(&self) -> bool {
        matches!(self, Error::PreconditionFailed { .. } | Error::NotFound)
    }
}
