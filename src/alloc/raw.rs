//! The allocator underneath the tracker.
//!
//! The tracker never touches the bytes it hands out, it only needs something
//! to produce and take back addresses. Lengths are passed down because the
//! tracker always knows them; `malloc`-style backends just ignore them.

use std::ptr::NonNull;

pub(crate) mod c {
    use libc::{c_void, size_t};

    extern "C" {
        pub fn malloc(size: size_t) -> *mut c_void;
        pub fn free(ptr: *mut c_void);
        pub fn realloc(ptr: *mut c_void, size: size_t) -> *mut c_void;
    }
}

pub trait RawAllocator {
    /// Hand out `len` fresh bytes, or `None` if there are none to give.
    fn allocate(&mut self, len: usize) -> Option<NonNull<u8>>;

    /// # Safety
    ///
    /// - `ptr` must have come from `allocate()` or `reallocate()` on this same
    ///   allocator, with `len` the length it was asked for, and must not
    ///   have been released since.
    unsafe fn release(&mut self, ptr: NonNull<u8>, len: usize);

    /// Resize a block, possibly moving it. On `None` the old block is still
    /// valid and untouched.
    ///
    /// # Safety
    ///
    /// - Same as `release()`, for `ptr` and `old_len`.
    unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        old_len: usize,
        new_len: usize,
    ) -> Option<NonNull<u8>>;
}

/// The platform `malloc()`, `free()` and `realloc()`.
///
/// A zero-byte request is rounded up to one byte, so every successful call
/// yields a unique, non-null address that the tracker can key a range on.
#[derive(Debug, Default, Clone, Copy)]
pub struct LibcMalloc;

impl LibcMalloc {
    pub const fn new() -> Self {
        Self
    }
}

impl RawAllocator for LibcMalloc {
    fn allocate(&mut self, len: usize) -> Option<NonNull<u8>> {
        // SAFETY: `malloc()` has no preconditions
        NonNull::new(unsafe { c::malloc(len.max(1)) } as *mut u8)
    }

    unsafe fn release(&mut self, ptr: NonNull<u8>, _: usize) {
        // SAFETY: caller guarantees `ptr` is a live `malloc()` block
        unsafe { c::free(ptr.as_ptr() as _) }
    }

    unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        _: usize,
        new_len: usize,
    ) -> Option<NonNull<u8>> {
        // SAFETY: caller guarantees `ptr` is a live `malloc()` block. A null
        // return leaves it alone.
        NonNull::new(unsafe { c::realloc(ptr.as_ptr() as _, new_len.max(1)) } as *mut u8)
    }
}
