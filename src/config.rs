//! Knobs for a [`Tracker`](crate::alloc::tracker::Tracker).
//!
//! Everything has a default, and [`TrackerOptions::from_env()`] lets a
//! program that only links the C surface pick settings without recompiling:
//!
//! | Variable                     | Values              | Default   |
//! |------------------------------|---------------------|-----------|
//! | `HEAPCHECK_ZERO_LENGTH`      | `lenient`, `strict` | `lenient` |
//! | `HEAPCHECK_CHECK_INVARIANTS` | `0`, `1`            | `0`       |
//!
//! Log verbosity is `RUST_LOG`, read by `env_logger`.

use std::{env, fmt, str::FromStr};

pub const ZERO_LENGTH_VAR: &str = "HEAPCHECK_ZERO_LENGTH";
pub const CHECK_INVARIANTS_VAR: &str = "HEAPCHECK_CHECK_INVARIANTS";

/// How `verify_range(a, 0)` treats zero-length ranges.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ZeroLengthPolicy {
    /// A zero-byte check passes on any allocated byte, and on the start of an
    /// allocated zero-length range.
    #[default]
    Lenient,
    /// A zero-length range contains no address at all, so nothing can be
    /// verified against it.
    Strict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPolicy(pub String);

impl fmt::Display for UnknownPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown zero-length policy {:?}", self.0)
    }
}

impl std::error::Error for UnknownPolicy {}

impl FromStr for ZeroLengthPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lenient" => Ok(Self::Lenient),
            "strict" => Ok(Self::Strict),
            _ => Err(UnknownPolicy(s.to_owned())),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrackerOptions {
    pub zero_length: ZeroLengthPolicy,
    /// Run the full tree self-check after every mutating call. O(n) per call.
    pub check_invariants: bool,
}

impl TrackerOptions {
    pub const fn new() -> Self {
        Self {
            zero_length: ZeroLengthPolicy::Lenient,
            check_invariants: false,
        }
    }

    pub const fn zero_length(mut self, policy: ZeroLengthPolicy) -> Self {
        self.zero_length = policy;
        self
    }

    pub const fn check_invariants(mut self, on: bool) -> Self {
        self.check_invariants = on;
        self
    }

    /// Defaults, overridden by whatever the environment sets. Values that do
    /// not parse are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = Self::new();

        if let Some(value) = lookup(ZERO_LENGTH_VAR) {
            match value.parse() {
                Ok(policy) => options.zero_length = policy,
                Err(e) => log::warn!("{ZERO_LENGTH_VAR}: {e}, using the default"),
            }
        }

        if let Some(value) = lookup(CHECK_INVARIANTS_VAR) {
            match value.trim() {
                "1" => options.check_invariants = true,
                "0" => options.check_invariants = false,
                other => log::warn!("{CHECK_INVARIANTS_VAR}: expected 0 or 1, got {other:?}"),
            }
        }

        options
    }
}
