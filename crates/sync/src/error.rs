//! Sync Error Types
//!
//! Failures of a single artifact fetch never show up here: workers record
//! them as a failed status on the entry and move on. What remains are the
//! failures that stop a whole cycle.

use derive_more::{Display, Error};

/// A sync error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The remote format list could not be fetched or stored.
    #[display("failed to refresh object formats")]
    Formats,
    /// Listing the remote catalog failed; entries created before the failure
    /// are kept.
    #[display("failed to walk the remote catalog")]
    Walk,
    /// The cache index could not be read or written.
    #[display("cache index failure")]
    Cache,
    /// A fetch worker died before draining the queue. Entries it held stay
    /// pending and are picked up by the next run.
    #[display("{_0} fetch worker(s) stopped unexpectedly")]
    WorkerFailed(#[error(not(source))] usize),
    /// A stored descriptor lacks a field or holds a value that cannot be
    /// parsed.
    #[display("invalid descriptor: {_0}")]
    InvalidDescriptor(#[error(not(source))] String),
    /// A report could not be rendered.
    #[display("failed to render report")]
    Render,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Formats | Self::Walk | Self::WorkerFailed(_))
    }
}
