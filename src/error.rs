//! Crate-wide error type.
//!
//! Mirrors the plain `enum` + `Display` + `std::error::Error` style used by
//! the provider layer this crate was adapted from, rather than pulling in a
//! derive-macro error crate the original dependency set did not carry.

use std::fmt;

/// Errors raised by the storage engine, operators, and scheduler.
///
/// `NotEnoughSpace` is the one variant callers are expected to recover
/// from locally (a table picks a different block); every other variant is
/// fatal to the query that raised it.
#[derive(Debug, Clone)]
pub enum HustleError {
    /// Mismatched field count, unsupported type, or malformed predicate.
    Schema(String),
    /// A block cannot hold one more record at its current capacity.
    NotEnoughSpace,
    /// Propagated from the persisted block / CSV ingest layer.
    Io(String),
    /// Negative index, directory overflow, out-of-range column reference.
    Invariant(String),
    /// A requested operator feature (e.g. COUNT) was never implemented.
    Unimplemented(String),
}

impl fmt::Display for HustleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HustleError::Schema(msg) => write!(f, "schema error: {msg}"),
            HustleError::NotEnoughSpace => write!(f, "block has insufficient space"),
            HustleError::Io(msg) => write!(f, "I/O error: {msg}"),
            HustleError::Invariant(msg) => write!(f, "invariant violation: {msg}"),
            HustleError::Unimplemented(msg) => write!(f, "unimplemented: {msg}"),
        }
    }
}

impl std::error::Error for HustleError {}

impl From<std::io::Error> for HustleError {
    fn from(e: std::io::Error) -> Self {
        HustleError::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HustleError>;
