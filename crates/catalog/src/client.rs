//! Interface to the remote catalog service.

use crate::error::Result;
use crate::models::{ObjectPage, RemoteFormat};
use async_trait::async_trait;
use ocache_storage::ArtifactKind;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use time::UtcDateTime;
use tokio::io::AsyncRead;

/// Body of a fetched artifact, streamed rather than buffered.
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;
/// Shared handle to a catalog client.
pub type CatalogHandle = Arc<dyn CatalogClient>;

/// Answer to a single artifact fetch.
pub struct FetchResponse {
    /// Status reported by the remote, `200` on success.
    pub status: i64,
    pub body: ByteStream,
}
impl FetchResponse {
    pub const SUCCESS: i64 = 200;

    pub fn new(status: i64, body: impl AsyncRead + Send + 'static) -> Self {
        Self { status, body: Box::pin(body) }
    }

    pub fn is_success(&self) -> bool {
        self.status == Self::SUCCESS
    }
}
impl fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchResponse").field("status", &self.status).finish_non_exhaustive()
    }
}

/// The remote catalog of objects being replicated.
///
/// Implementations talk to a coordinating node's REST API; this crate only
/// ships an in-memory one behind the `mock` feature.
///
/// # Errors
/// Listing and fetching distinguish between an answer that is an error
/// ([`Application`](crate::error::ErrorKind::Application), with the remote's
/// code) and no usable answer at all
/// ([`Transport`](crate::error::ErrorKind::Transport)). A fetch that is
/// answered with a non-success status but no error document is returned as
/// an `Ok` [`FetchResponse`]; check [`is_success`](FetchResponse::is_success).
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Base URL of the remote service, recorded alongside the sync state.
    fn base_url(&self) -> &str;

    /// List one page of objects, optionally only those modified at or after
    /// `from`, starting at ordinal `start`.
    async fn list_objects(&self, from: Option<UtcDateTime>, start: u64, count: u32) -> Result<ObjectPage>;

    /// List every object format the remote knows about.
    async fn list_formats(&self) -> Result<Vec<RemoteFormat>>;

    /// Fetch one artifact of an object.
    async fn fetch(&self, identifier: &str, kind: ArtifactKind) -> Result<FetchResponse>;

    /// A client handle for a single fetch worker.
    ///
    /// Workers never share a handle; implementations holding a connection
    /// should give each worker its own.
    fn worker_client(&self) -> CatalogHandle;
}
