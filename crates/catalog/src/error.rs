//! Catalog Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A catalog error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for catalog operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The remote service answered with an error document.
    #[display("remote error {code}: {detail}")]
    Application { code: i64, detail: String },
    /// The request never got an answer (connection refused, reset, timed
    /// out, ...).
    #[display("transport error: {_0}")]
    Transport(#[error(not(source))] String),
    /// The answer could not be understood.
    #[display("invalid response: {_0}")]
    InvalidResponse(#[error(not(source))] String),
    /// Listing the catalog failed part way through. Objects yielded before
    /// the failure are still valid.
    #[display("catalog walk failed at offset {_0}")]
    CatalogWalkFailed(#[error(not(source))] u64),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::CatalogWalkFailed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_display() {
        let err = ErrorKind::Application { code: 404, detail: "NotFound".to_string() };
        assert_eq!(err.to_string(), "remote error 404: NotFound");
        assert!(!err.is_retryable());
        assert_eq!(ErrorKind::CatalogWalkFailed(2000).to_string(), "catalog walk failed at offset 2000");
        assert!(ErrorKind::Transport("connection reset".to_string()).is_retryable());
    }
}
