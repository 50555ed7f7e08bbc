//! A pretend heap for tests.
//!
//! Hands out addresses from a made-up region and never dereferences them, so
//! tests can steer exactly where blocks land: reuse a freed hole from the
//! front or the back, move on reallocation or shrink in place, run dry on
//! demand, or be told to return one particular address next.

use std::{collections::BTreeMap, ptr::NonNull};

use super::raw::RawAllocator;

pub const SIM_BASE: usize = 0x1_0000;
pub const SIM_ALIGN: usize = 0x10;

/// Which end of a reused hole a new block is carved from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fit {
    Head,
    Tail,
}

#[derive(Debug)]
pub struct SimHeap {
    fit: Fit,
    /// First never-used address
    top: usize,
    limit: usize,
    /// Freed `(start, footprint)` holes, sorted and coalesced
    holes: Vec<(usize, usize)>,
    /// start -> footprint
    live: BTreeMap<usize, usize>,
    forced: Option<usize>,
    /// Shrinking reallocations keep their address
    shrink_in_place: bool,
    /// Every address handed back through `release()`, oldest first
    pub released: Vec<usize>,
}

impl SimHeap {
    pub fn new(fit: Fit) -> Self {
        Self {
            fit,
            top: SIM_BASE,
            limit: usize::MAX,
            holes: Vec::new(),
            live: BTreeMap::new(),
            forced: None,
            shrink_in_place: false,
            released: Vec::new(),
        }
    }

    /// Refuse any request that would grow the region past `bytes`.
    pub fn with_capacity(mut self, bytes: usize) -> Self {
        self.limit = SIM_BASE + bytes;
        self
    }

    /// Reallocations that fit in the old footprint stay where they are.
    pub fn shrinking_in_place(mut self) -> Self {
        self.shrink_in_place = true;
        self
    }

    /// The next `allocate()` or `reallocate()` returns `address`, whether or
    /// not it is in use. This is how tests play a broken allocator.
    pub fn force_next(&mut self, address: usize) {
        self.forced = Some(address);
    }

    pub fn live_blocks(&self) -> usize {
        self.live.len()
    }

    fn footprint(len: usize) -> usize {
        len.max(1).next_multiple_of(SIM_ALIGN)
    }

    fn carve(&mut self, footprint: usize) -> Option<usize> {
        let index = self.holes.iter().position(|&(_, size)| size >= footprint)?;
        let (start, size) = self.holes[index];
        let address = match self.fit {
            Fit::Head => {
                self.holes[index] = (start + footprint, size - footprint);
                start
            }
            Fit::Tail => {
                self.holes[index] = (start, size - footprint);
                start + size - footprint
            }
        };
        if self.holes[index].1 == 0 {
            self.holes.remove(index);
        }
        Some(address)
    }

    fn bump(&mut self, footprint: usize) -> Option<usize> {
        let address = self.top;
        let top = address.checked_add(footprint).filter(|&top| top <= self.limit)?;
        self.top = top;
        Some(address)
    }

    fn give_back(&mut self, start: usize, footprint: usize) {
        let index = self.holes.partition_point(|&(hole, _)| hole < start);
        self.holes.insert(index, (start, footprint));
        if index + 1 < self.holes.len() && start + footprint == self.holes[index + 1].0 {
            let (_, next) = self.holes.remove(index + 1);
            self.holes[index].1 += next;
        }
        if index > 0 && self.holes[index - 1].0 + self.holes[index - 1].1 == start {
            let (_, this) = self.holes.remove(index);
            self.holes[index - 1].1 += this;
        }
    }
}

impl RawAllocator for SimHeap {
    fn allocate(&mut self, len: usize) -> Option<NonNull<u8>> {
        let footprint = Self::footprint(len);
        let address = match self.forced.take() {
            Some(address) => address,
            None => self.carve(footprint).or_else(|| self.bump(footprint))?,
        };
        self.live.insert(address, footprint);
        NonNull::new(address as *mut u8)
    }

    unsafe fn release(&mut self, ptr: NonNull<u8>, _: usize) {
        let address = ptr.as_ptr() as usize;
        self.released.push(address);
        if let Some(footprint) = self.live.remove(&address) {
            self.give_back(address, footprint);
        }
    }

    /// Moves unless `shrinking_in_place()` is on and the new length fits, so
    /// callers can't get away with reusing the old address.
    unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        _: usize,
        new_len: usize,
    ) -> Option<NonNull<u8>> {
        let address = ptr.as_ptr() as usize;
        if self.shrink_in_place && self.forced.is_none() {
            let fits = self
                .live
                .get(&address)
                .is_some_and(|&footprint| Self::footprint(new_len) <= footprint);
            if fits {
                return Some(ptr);
            }
        }
        let moved = self.allocate(new_len)?;
        if let Some(footprint) = self.live.remove(&address) {
            self.give_back(address, footprint);
        }
        Some(moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(heap: &mut SimHeap, len: usize) -> usize {
        heap.allocate(len).unwrap().as_ptr() as usize
    }

    unsafe fn free(heap: &mut SimHeap, address: usize) {
        heap.release(NonNull::new(address as *mut u8).unwrap(), 0)
    }

    #[test]
    fn head_fit_reuses_the_front_of_a_hole() {
        let mut heap = SimHeap::new(Fit::Head);
        let a = at(&mut heap, 0x40);
        let _guard = at(&mut heap, 0x10);
        unsafe { free(&mut heap, a) };
        assert_eq!(at(&mut heap, 0x10), a);
        assert_eq!(at(&mut heap, 0x10), a + 0x10);
    }

    #[test]
    fn tail_fit_reuses_the_back_of_a_hole() {
        let mut heap = SimHeap::new(Fit::Tail);
        let a = at(&mut heap, 0x40);
        let _guard = at(&mut heap, 0x10);
        unsafe { free(&mut heap, a) };
        assert_eq!(at(&mut heap, 0x10), a + 0x30);
    }

    #[test]
    fn neighbouring_holes_merge() {
        let mut heap = SimHeap::new(Fit::Head);
        let a = at(&mut heap, 0x10);
        let b = at(&mut heap, 0x10);
        let c = at(&mut heap, 0x10);
        let _guard = at(&mut heap, 0x10);
        unsafe {
            free(&mut heap, a);
            free(&mut heap, c);
            free(&mut heap, b);
        }
        assert_eq!(heap.holes, vec![(a, 0x30)]);
        assert_eq!(heap.released, vec![a, c, b]);
    }

    #[test]
    fn reallocation_moves_by_default() {
        let mut heap = SimHeap::new(Fit::Head);
        let a = heap.allocate(5).unwrap();
        let b = unsafe { heap.reallocate(a, 5, 20) }.unwrap();
        assert_ne!(a, b);
        assert_eq!(heap.live_blocks(), 1);
    }

    #[test]
    fn shrinking_in_place_keeps_the_address() {
        let mut heap = SimHeap::new(Fit::Head).shrinking_in_place();
        let a = heap.allocate(0x20).unwrap();
        let same = unsafe { heap.reallocate(a, 0x20, 4) }.unwrap();
        assert_eq!(a, same);
        let grown = unsafe { heap.reallocate(same, 4, 0x40) }.unwrap();
        assert_ne!(a, grown);
    }

    #[test]
    fn forced_address_applies_to_reallocation() {
        let mut heap = SimHeap::new(Fit::Head);
        let a = heap.allocate(8).unwrap();
        heap.force_next(0x4_0000);
        let moved = unsafe { heap.reallocate(a, 8, 8) }.unwrap();
        assert_eq!(moved.as_ptr() as usize, 0x4_0000);
    }

    #[test]
    fn capacity_runs_out() {
        let mut heap = SimHeap::new(Fit::Head).with_capacity(0x20);
        assert!(heap.allocate(0x20).is_some());
        assert!(heap.allocate(1).is_none());
    }
}
