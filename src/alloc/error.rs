use std::fmt;

use crate::tree::{Collision, TrackedRange};

/// Which call was handed a null address
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Release,
    Verify,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Release => write!(f, "release"),
            Operation::Verify => write!(f, "verify"),
        }
    }
}

/// Everything the tracker can refuse to do. Each variant carries what a
/// diagnostic needs to point at the offending call.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrackError {
    InvalidSize {
        size: isize,
    },
    AllocatorExhausted {
        size: usize,
    },
    DoubleRelease {
        address: usize,
        range: TrackedRange,
    },
    NonOriginRelease {
        address: usize,
        range: TrackedRange,
    },
    UntrackedRelease {
        address: usize,
    },
    NullArgument {
        operation: Operation,
    },
    OverlapViolation {
        requested: TrackedRange,
        live: TrackedRange,
    },
    UseAfterFree {
        address: usize,
        size: usize,
        range: TrackedRange,
    },
    OutOfBounds {
        address: usize,
        size: usize,
        range: TrackedRange,
    },
    UntrackedAccess {
        address: usize,
        size: usize,
    },
}

/// [`TrackError`] without its payload. The discriminants are stable: they are
/// the exit statuses of [`OrAbort::or_abort()`](crate::diag::OrAbort), which
/// is how the C surface ends the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorKind {
    InvalidSize = 1,
    AllocatorExhausted,
    DoubleRelease,
    NonOriginRelease,
    UntrackedRelease,
    NullArgument,
    OverlapViolation,
    UseAfterFree,
    OutOfBounds,
    UntrackedAccess,
}

impl ErrorKind {
    /// Process exit status for this kind. Never zero.
    pub const fn exit_status(self) -> i32 {
        self as u8 as i32
    }
}

impl TrackError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidSize { .. } => ErrorKind::InvalidSize,
            Self::AllocatorExhausted { .. } => ErrorKind::AllocatorExhausted,
            Self::DoubleRelease { .. } => ErrorKind::DoubleRelease,
            Self::NonOriginRelease { .. } => ErrorKind::NonOriginRelease,
            Self::UntrackedRelease { .. } => ErrorKind::UntrackedRelease,
            Self::NullArgument { .. } => ErrorKind::NullArgument,
            Self::OverlapViolation { .. } => ErrorKind::OverlapViolation,
            Self::UseAfterFree { .. } => ErrorKind::UseAfterFree,
            Self::OutOfBounds { .. } => ErrorKind::OutOfBounds,
            Self::UntrackedAccess { .. } => ErrorKind::UntrackedAccess,
        }
    }
}

impl From<Collision> for TrackError {
    fn from(collision: Collision) -> Self {
        Self::OverlapViolation {
            requested: collision.requested,
            live: collision.live,
        }
    }
}

impl fmt::Display for TrackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSize { size } => write!(f, "cannot allocate a negative size ({size})"),
            Self::AllocatorExhausted { size } => {
                write!(f, "the allocator could not provide {size} bytes")
            }
            Self::DoubleRelease { address, range } => {
                write!(f, "double release of {address:#x}, which is {range}")
            }
            Self::NonOriginRelease { address, range } => write!(
                f,
                "release of {address:#x}, which is {} bytes into {range}",
                address.saturating_sub(range.start)
            ),
            Self::UntrackedRelease { address } => {
                write!(f, "release of {address:#x}, which was never allocated")
            }
            Self::NullArgument { operation } => write!(f, "{operation} of a null address"),
            Self::OverlapViolation { requested, live } => {
                write!(f, "new range {requested} lands on live {live}")
            }
            Self::UseAfterFree {
                address,
                size,
                range,
            } => write!(
                f,
                "{size} bytes at {address:#x} are in {range}, which has been released"
            ),
            Self::OutOfBounds {
                address,
                size,
                range,
            } => write!(
                f,
                "{size} bytes at {address:#x} run {} bytes past the end of {range}",
                address.saturating_add(*size).saturating_sub(range.end())
            ),
            Self::UntrackedAccess { address, size } => {
                write!(f, "{size} bytes at {address:#x} are not in any tracked range")
            }
        }
    }
}

impl std::error::Error for TrackError {}
