//! Revocable lease handles over on-disk staging files, and the
//! process-wide quota ([`FileLeaser`]) that issues and revokes them
//! (§3 "Lease", §4.1).

mod leaser;
mod read_lease;
mod rw_lease;
mod staging;

pub use leaser::FileLeaser;
pub use read_lease::ReadLease;
pub use rw_lease::ReadWriteLease;
