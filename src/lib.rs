//! A heap checker that tracks every allocation as a byte range.
//!
//! [`Tracker`] wraps a raw allocator and keeps a red-black tree of everything
//! it has handed out, live or released. Releases and explicit access checks
//! are judged against that tree, so double releases, releases of interior
//! pointers, use-after-free and out-of-bounds spans are caught at the call
//! that commits them.
//!
//! ```no_run
//! use heapcheck::{LibcMalloc, TrackError, Tracker};
//!
//! let mut tracker = Tracker::new(LibcMalloc::new());
//! let block = tracker.allocate(10)?;
//! tracker.verify_range(block.as_ptr(), 10)?;
//! tracker.release(block.as_ptr())?;
//! assert!(matches!(
//!     tracker.release(block.as_ptr()),
//!     Err(TrackError::DoubleRelease { .. })
//! ));
//! # Ok::<(), TrackError>(())
//! ```
//!
//! C programs link the static library and use the `heapcheck_*` functions in
//! [`externc`].

pub mod alloc;
pub mod config;
pub mod diag;
pub mod externc;
pub mod serialize;
pub mod tree;
mod util;

pub use alloc::{LibcMalloc, RawAllocator, Snapshot, TrackError, Tracker};
pub use config::{TrackerOptions, ZeroLengthPolicy};
pub use tree::{RangeState, RangeTree, TrackedRange};
