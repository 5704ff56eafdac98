//! Storage Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

/// A storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Alias contains characters outside the codec alphabet, is empty, or
    /// decodes to a value that does not fit a row id. Indicates codec misuse.
    #[display("invalid alias: {_0:?}")]
    InvalidAlias(#[error(not(source))] String),
    /// Streaming an artifact to its final location failed. Nothing was left
    /// at the target path.
    #[display("failed to write artifact: {}", _0.display())]
    StoreWriteFailed(#[error(not(source))] PathBuf),
    /// File does not exist
    #[display("file not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// Path contains invalid characters or escapes root
    #[display("invalid path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::StoreWriteFailed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_display() {
        assert_eq!(ErrorKind::InvalidAlias("!!".to_string()).to_string(), r#"invalid alias: "!!""#);
        assert_eq!(
            ErrorKind::StoreWriteFailed(PathBuf::from("n/n242n_sysm.xml")).to_string(),
            "failed to write artifact: n/n242n_sysm.xml"
        );
    }

    #[test]
    fn error_kind_retryable() {
        assert!(!ErrorKind::InvalidAlias("x".to_string()).is_retryable());
        assert!(ErrorKind::StoreWriteFailed(PathBuf::from("x")).is_retryable());
    }
}
