//! The C surface. One process-wide tracker over the platform `malloc()`,
//! behind a single lock.
//!
//! ```c
//! heapcheck_init();
//! int *xs = heapcheck_malloc(4 * sizeof(int));
//! heapcheck_memcheck(xs, 4 * sizeof(int));
//! heapcheck_free(xs);
//! heapcheck_teardown();
//! ```
//!
//! Any misuse ends the process with a diagnostic on stderr. So does calling
//! anything before `heapcheck_init()`.

use std::{
    ffi::{c_char, CStr},
    sync::{Mutex, PoisonError},
};

use libc::{c_int, c_void, size_t};
use log::warn;

use crate::{
    alloc::{LibcMalloc, TrackError, Tracker},
    config::TrackerOptions,
    diag::{abort_with, OrAbort},
};

static TRACKER: Mutex<Option<Tracker<LibcMalloc>>> = Mutex::new(None);

fn with_tracker<T, F>(f: F) -> T
where
    F: FnOnce(&mut Tracker<LibcMalloc>) -> T,
{
    let mut guard = TRACKER.lock().unwrap_or_else(PoisonError::into_inner);
    match guard.as_mut() {
        Some(tracker) => f(tracker),
        None => abort_with("heapcheck_init() has not been called"),
    }
}

fn c_size(size: c_int) -> Result<usize, TrackError> {
    usize::try_from(size).map_err(|_| TrackError::InvalidSize {
        size: size as isize,
    })
}

/// Install the logger (unless one is already installed) and the tracker.
/// Options come from the environment, see [`TrackerOptions::from_env()`].
#[no_mangle]
pub extern "C" fn heapcheck_init() {
    let _ = env_logger::try_init();
    let mut guard = TRACKER.lock().unwrap_or_else(PoisonError::into_inner);
    if guard.is_some() {
        warn!("heapcheck_init() called twice, keeping the existing tracker");
        return;
    }
    *guard = Some(Tracker::with_options(
        LibcMalloc::new(),
        TrackerOptions::from_env(),
    ));
}

/// Drop the tracker, logging every block that was never freed. Returns how
/// many there were.
#[no_mangle]
pub extern "C" fn heapcheck_teardown() -> size_t {
    let tracker = TRACKER
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    match tracker {
        Some(tracker) => tracker.finish().len(),
        None => abort_with("heapcheck_teardown() without heapcheck_init()"),
    }
}

#[no_mangle]
pub extern "C" fn heapcheck_malloc(size: c_int) -> *mut c_void {
    with_tracker(|tracker| tracker.allocate(size as isize).or_abort().as_ptr() as *mut c_void)
}

/// # Safety
///
/// - `ptr` must be null, or come from `heapcheck_malloc()` or
///   `heapcheck_realloc()`. Anything else is diagnosed rather than freed,
///   but only addresses the tracker has seen can be told apart.
#[no_mangle]
pub unsafe extern "C" fn heapcheck_free(ptr: *mut c_void) {
    with_tracker(|tracker| tracker.release(ptr as *mut u8).or_abort())
}

/// # Safety
///
/// - Same as `heapcheck_free()`.
#[no_mangle]
pub unsafe extern "C" fn heapcheck_realloc(ptr: *mut c_void, size: c_int) -> *mut c_void {
    with_tracker(|tracker| {
        let moved = tracker.reallocate(ptr as *mut u8, size as isize).or_abort();
        moved.as_ptr() as *mut c_void
    })
}

/// Exit unless `[ptr, ptr + size)` lies inside one live allocation.
#[no_mangle]
pub extern "C" fn heapcheck_memcheck(ptr: *const c_void, size: c_int) {
    let size = c_size(size).or_abort();
    with_tracker(|tracker| tracker.verify_range(ptr as *const u8, size).or_abort())
}

/// Print every tracked range to stdout.
#[no_mangle]
pub extern "C" fn heapcheck_dump() {
    let dump = with_tracker(|tracker| tracker.dump_tree());
    print!("{dump}");
}

/// Write the tracked ranges to `path` as JSON. Returns 0 on success, -1 if
/// the path is unusable or the write fails.
///
/// # Safety
///
/// - `path` must be null or a valid nul-terminated string.
#[no_mangle]
pub unsafe extern "C" fn heapcheck_snapshot(path: *const c_char) -> c_int {
    if path.is_null() {
        warn!("heapcheck_snapshot() given a null path");
        return -1;
    }
    // SAFETY: caller guarantees a nul-terminated string
    let Ok(path) = unsafe { CStr::from_ptr(path) }.to_str() else {
        warn!("heapcheck_snapshot() path is not utf-8");
        return -1;
    };
    let snapshot = with_tracker(|tracker| tracker.snapshot());
    match snapshot.write_to_file(path) {
        Ok(()) => 0,
        Err(e) => {
            warn!("{path}: {e}");
            -1
        }
    }
}
