//! Caller-contract errors reported by `LockFreeIntMap`.

use std::fmt;

/// Rejected arguments. Returned before the map is touched; never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// Keys must be strictly positive.
    InvalidKey(i32),
    /// Values must lie in the open range `(0, TOMBSTONE)`.
    InvalidValue(i32),
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKey(key) => write!(f, "Key must be positive: {key}"),
            Self::InvalidValue(value) => write!(f, "Invalid value: {value}"),
        }
    }
}

impl std::error::Error for MapError {}
