//! Turning tracker errors into process termination, for callers that have no
//! way to handle them (the C surface, mostly).

use std::{fmt, process};

use crate::alloc::{ErrorKind, TrackError};

/// Status the process exits with when a fatal diagnostic has no
/// [`ErrorKind`] behind it, such as use before `heapcheck_init()`
pub const FATAL_EXIT_CODE: i32 = -1;

/// Log `message`, print it to stderr, and exit with [`FATAL_EXIT_CODE`].
#[cold]
#[inline(never)]
pub fn abort_with(message: impl fmt::Display) -> ! {
    abort_with_status(message, FATAL_EXIT_CODE)
}

/// Log `message`, print it to stderr, and exit with `status`.
#[cold]
#[inline(never)]
pub fn abort_with_status(message: impl fmt::Display, status: i32) -> ! {
    log::error!("{message}");
    eprintln!("heapcheck: {message}");
    process::exit(status)
}

/// What `or_abort()` prints and exits with for `e`
fn fatal_report(e: &TrackError) -> (String, i32) {
    let kind = e.kind();
    (format!("{e} ({kind:?})"), kind.exit_status())
}

/// `unwrap()`, but the failure path is a diagnostic and an exit rather than a
/// panic. Panicking across an `extern "C"` boundary is not an option.
///
/// The exit status is the error's [`ErrorKind::exit_status()`].
pub trait OrAbort<T> {
    fn or_abort(self) -> T;
}

impl<T> OrAbort<T> for Result<T, TrackError> {
    fn or_abort(self) -> T {
        match self {
            Ok(value) => value,
            Err(e) => {
                let (message, status) = fatal_report(&e);
                abort_with_status(message, status)
            }
        }
    }
}
