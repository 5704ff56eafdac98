//! Telemetry Error Types
//!
//! Only constructing a sink can fail; emitting a gauge never does.

use derive_more::{Display, Error};
use std::io::Error as IoError;

/// A telemetry error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for telemetry operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The sink's host name did not resolve to any address.
    #[display("cannot resolve telemetry endpoint: {_0}")]
    InvalidEndpoint(#[error(not(source))] String),
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
    ///
    /// Sinks are built once, when the cache is opened, and a sink that cannot
    /// be built is replaced by a disabled one; nothing is worth retrying.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
