use std::{mem::size_of, ptr::NonNull};

use dlmalloc::Dlmalloc;

use super::raw::RawAllocator;

// https://gee.cs.oswego.edu/dl/html/malloc.html

/// Alignment every block gets. This is what dlmalloc gives a plain
/// `malloc()` anyway, so it never has to take the `memalign()` path.
pub const DLMALLOC_MIN_ALIGN: usize = 2 * size_of::<usize>();

/// A private dlmalloc heap, separate from whatever the process's global
/// allocator is. Useful when the tracked program should not share arenas with
/// the checker's own bookkeeping.
pub struct DlMalloc {
    heap: Dlmalloc,
}

impl DlMalloc {
    pub const fn new() -> Self {
        Self {
            heap: Dlmalloc::new(),
        }
    }
}

impl Default for DlMalloc {
    fn default() -> Self {
        Self::new()
    }
}

impl RawAllocator for DlMalloc {
    fn allocate(&mut self, len: usize) -> Option<NonNull<u8>> {
        // SAFETY: alignment is a nonzero power of two, size is nonzero
        NonNull::new(unsafe { self.heap.malloc(len.max(1), DLMALLOC_MIN_ALIGN) })
    }

    unsafe fn release(&mut self, ptr: NonNull<u8>, len: usize) {
        // SAFETY: caller guarantees `ptr` came from this heap with this `len`,
        // and we always use the same clamped size and alignment
        unsafe { self.heap.free(ptr.as_ptr(), len.max(1), DLMALLOC_MIN_ALIGN) }
    }

    unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        old_len: usize,
        new_len: usize,
    ) -> Option<NonNull<u8>> {
        // SAFETY: same as `release()`
        NonNull::new(unsafe {
            self.heap.realloc(
                ptr.as_ptr(),
                old_len.max(1),
                DLMALLOC_MIN_ALIGN,
                new_len.max(1),
            )
        })
    }
}
