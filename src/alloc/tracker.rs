//! The tracked-allocation API.
//!
//! A [`Tracker`] sits in front of a [`RawAllocator`] and records every block
//! it hands out in a [`RangeTree`]. Each range moves through
//!
//! ```plaintext
//! (untracked) --allocate--> Allocated --release--> Free
//!                               |                   |
//!                               +--reallocate--> (dropped, new range elsewhere)
//! ```
//!
//! Free ranges stay in the tree after release so that a second release, or an
//! access through a dangling pointer, can be told apart from a wild address.
//! They are cleaned up lazily, when the allocator hands the same bytes out
//! again.
//!
//! Nothing here aborts. Every misuse comes back as a [`TrackError`] and the
//! tree is left as it was before the offending call.

use std::ptr::NonNull;

use log::{debug, error, warn};

use super::{
    error::{Operation, TrackError},
    raw::RawAllocator,
    snapshot::Snapshot,
};
use crate::{
    config::{TrackerOptions, ZeroLengthPolicy},
    tree::{NodeId, RangeState, RangeTree, TrackedRange},
};

/// Counts over everything the tree holds
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrackerStats {
    /// Allocated ranges
    pub live: usize,
    /// Released ranges not yet reclaimed
    pub freed: usize,
    pub live_bytes: usize,
}

pub struct Tracker<A>
where
    A: RawAllocator,
{
    tree: RangeTree,
    raw: A,
    options: TrackerOptions,
}

impl<A> Tracker<A>
where
    A: RawAllocator,
{
    pub fn new(raw: A) -> Self {
        Self::with_options(raw, TrackerOptions::default())
    }

    pub fn with_options(raw: A, options: TrackerOptions) -> Self {
        Self {
            tree: RangeTree::new(),
            raw,
            options,
        }
    }

    pub fn options(&self) -> &TrackerOptions {
        &self.options
    }

    pub fn tree(&self) -> &RangeTree {
        &self.tree
    }

    pub fn allocator(&self) -> &A {
        &self.raw
    }

    pub fn allocator_mut(&mut self) -> &mut A {
        &mut self.raw
    }

    /// Get `size` bytes from the raw allocator and start tracking them.
    ///
    /// # Errors
    ///
    /// - [`TrackError::InvalidSize`] if `size` is negative
    /// - [`TrackError::AllocatorExhausted`] if the raw allocator says no
    /// - [`TrackError::OverlapViolation`] if the raw allocator returned bytes
    ///   that are still live. The block is handed straight back.
    pub fn allocate(&mut self, size: isize) -> Result<NonNull<u8>, TrackError> {
        let len = usize::try_from(size).map_err(|_| TrackError::InvalidSize { size })?;
        if len == 0 {
            warn!("allocating a zero-length range");
        }
        let ptr = self
            .raw
            .allocate(len)
            .ok_or(TrackError::AllocatorExhausted { size: len })?;
        self.track(ptr, len)?;
        debug!("allocated {len} bytes at {:#x}", ptr.as_ptr() as usize);
        self.audit();
        Ok(ptr)
    }

    /// Stop using the block at `addr`. Its range stays in the tree as free.
    ///
    /// # Errors
    ///
    /// - [`TrackError::NullArgument`] for a null `addr`
    /// - [`TrackError::DoubleRelease`] if the range was already released
    /// - [`TrackError::NonOriginRelease`] if `addr` is inside a range but not
    ///   at its start
    /// - [`TrackError::UntrackedRelease`] if no range holds `addr` at all
    pub fn release(&mut self, addr: *mut u8) -> Result<(), TrackError> {
        let ptr = NonNull::new(addr).ok_or(TrackError::NullArgument {
            operation: Operation::Release,
        })?;
        let id = self.live_origin(ptr.as_ptr() as usize)?;
        let range = self.tree.range(id);
        self.tree.set_state(id, RangeState::Free);
        // SAFETY: `ptr` is the start of a range we got from `raw` with exactly
        // this length, and it was still allocated until just now
        unsafe { self.raw.release(ptr, range.len) };
        debug!("released {range}");
        self.audit();
        Ok(())
    }

    /// Resize the block at `addr`, which may move it. A null `addr` is the
    /// same as [`Tracker::allocate()`].
    ///
    /// On success the old range is gone from the tree and the new one is
    /// allocated. If the raw allocator cannot satisfy the request, the old
    /// block is untouched and still allocated.
    ///
    /// # Errors
    ///
    /// Everything [`Tracker::allocate()`] and [`Tracker::release()`] return,
    /// with the same meaning. On [`TrackError::OverlapViolation`] the old
    /// block has already been given up by the raw allocator, so its range is
    /// left behind as free.
    pub fn reallocate(&mut self, addr: *mut u8, size: isize) -> Result<NonNull<u8>, TrackError> {
        let Some(ptr) = NonNull::new(addr) else {
            return self.allocate(size);
        };
        let len = usize::try_from(size).map_err(|_| TrackError::InvalidSize { size })?;
        let id = self.live_origin(ptr.as_ptr() as usize)?;
        let old = self.tree.range(id);
        if len == 0 {
            warn!("reallocating {old} down to zero length");
        }

        self.tree.set_state(id, RangeState::Free);
        // SAFETY: same as in `release()`
        let Some(moved) = (unsafe { self.raw.reallocate(ptr, old.len, len) }) else {
            self.tree.set_state(id, RangeState::Allocated);
            return Err(TrackError::AllocatorExhausted { size: len });
        };

        let new_start = moved.as_ptr() as usize;
        self.track(moved, len)?;
        // The sweep may have consumed or shrunk the old record, so `id` can be
        // stale by now. Look it up again by its start.
        if new_start != old.start {
            if let Some(stale) = self.tree.search_by_start(old.start) {
                self.tree.remove(stale);
            }
        }
        debug!("reallocated {old} to {len} bytes at {new_start:#x}");
        self.audit();
        Ok(moved)
    }

    /// Check that the `size` bytes from `addr` are all inside one allocated
    /// range.
    ///
    /// # Errors
    ///
    /// - [`TrackError::NullArgument`] for a null `addr`
    /// - [`TrackError::UntrackedAccess`] if no range holds `addr`
    /// - [`TrackError::UseAfterFree`] if the range holding it was released
    /// - [`TrackError::OutOfBounds`] if the span runs past the range's end
    pub fn verify_range(&self, addr: *const u8, size: usize) -> Result<(), TrackError> {
        if addr.is_null() {
            return Err(TrackError::NullArgument {
                operation: Operation::Verify,
            });
        }
        let address = addr as usize;
        let Some(range) = self.holder_of(address) else {
            return Err(TrackError::UntrackedAccess { address, size });
        };

        if !range.is_allocated() {
            return Err(TrackError::UseAfterFree {
                address,
                size,
                range,
            });
        }
        if address.checked_add(size).map_or(true, |end| end > range.end()) {
            return Err(TrackError::OutOfBounds {
                address,
                size,
                range,
            });
        }
        debug!("{size} bytes at {address:#x} are inside {range}");
        Ok(())
    }

    /// The tree listing, one line per range
    pub fn dump_tree(&self) -> String {
        self.tree.dump()
    }

    /// Every tracked range, lowest address first
    pub fn ranges(&self) -> impl Iterator<Item = TrackedRange> + '_ {
        self.tree.iter().map(|(_, range)| range)
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(self.ranges().collect())
    }

    pub fn stats(&self) -> TrackerStats {
        self.ranges()
            .fold(TrackerStats::default(), |mut stats, range| {
                if range.is_allocated() {
                    stats.live += 1;
                    stats.live_bytes += range.len;
                } else {
                    stats.freed += 1;
                }
                stats
            })
    }

    /// Tear the tracker down and report every range that was never released.
    /// The leaked blocks are not handed back to the raw allocator.
    pub fn finish(self) -> Vec<TrackedRange> {
        let leaked: Vec<TrackedRange> = self.ranges().filter(TrackedRange::is_allocated).collect();
        for range in &leaked {
            warn!("leaked {range}");
        }
        leaked
    }

    /// The allocated range that starts exactly at `address`, classifying
    /// every other outcome the way a release would.
    fn live_origin(&self, address: usize) -> Result<NodeId, TrackError> {
        if let Some(id) = self.tree.search_by_start(address) {
            let range = self.tree.range(id);
            return match range.state {
                RangeState::Allocated => Ok(id),
                RangeState::Free => Err(TrackError::DoubleRelease { address, range }),
            };
        }
        match self.tree.search_by_containment(address) {
            Some(id) => Err(TrackError::NonOriginRelease {
                address,
                range: self.tree.range(id),
            }),
            None => Err(TrackError::UntrackedRelease { address }),
        }
    }

    /// The range a verify at `address` is judged against
    fn holder_of(&self, address: usize) -> Option<TrackedRange> {
        if let Some(id) = self.tree.search_by_containment(address) {
            return Some(self.tree.range(id));
        }
        match self.options.zero_length {
            ZeroLengthPolicy::Strict => None,
            ZeroLengthPolicy::Lenient => self
                .tree
                .search_by_start(address)
                .map(|id| self.tree.range(id))
                .filter(|range| range.len == 0),
        }
    }

    /// Record a fresh block, handing it back to the raw allocator if it
    /// collides with something live.
    fn track(&mut self, ptr: NonNull<u8>, len: usize) -> Result<(), TrackError> {
        let start = ptr.as_ptr() as usize;
        if let Err(collision) = self
            .tree
            .resolve_and_insert(start, len, RangeState::Allocated)
        {
            error!("{collision}");
            // SAFETY: `raw` just gave us this block and nothing else has seen it
            unsafe { self.raw.release(ptr, len) };
            return Err(collision.into());
        }
        Ok(())
    }

    fn audit(&self) {
        if !self.options.check_invariants {
            return;
        }
        if let Err(violation) = self.tree.check() {
            error!("range tree is corrupt: {violation}");
            debug_assert!(false, "range tree is corrupt: {violation}");
        }
    }
}
