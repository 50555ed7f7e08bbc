//! Tracked allocation: a [`Tracker`](tracker::Tracker) in front of a
//! [`RawAllocator`](raw::RawAllocator).

pub mod dlmalloc;
pub mod error;
pub mod raw;
#[cfg(test)]
pub(crate) mod sim;
pub mod snapshot;
pub mod tracker;

pub use error::{ErrorKind, Operation, TrackError};
pub use raw::{LibcMalloc, RawAllocator};
pub use snapshot::{Snapshot, SnapshotError};
pub use tracker::{Tracker, TrackerStats};
