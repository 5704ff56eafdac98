//! Cache Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A cache error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    /// An entry for this identifier already exists. The caller checked the
    /// wrong set of known identifiers.
    #[display("duplicate cache entry: {_0}")]
    DuplicateEntry(#[error(not(source))] String),
    #[display("cache entry not found: {_0}")]
    EntryNotFound(#[error(not(source))] String),
    /// A stored value could not be converted to or from its model.
    #[display("invalid cache data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        // Most likely SQLITE_BUSY after the busy timeout ran out.
        matches!(self, Self::Database)
    }
}
