//! Remote object catalog.
//!
//! - [`CatalogClient`]: the interface to the remote service (listing objects
//!   and formats, fetching artifacts).
//! - [`walk`] / [`walk_with`]: lazy, paged traversal of the catalog from a
//!   [`Bookmark`].
//! - `MockCatalog` (feature `mock`): an in-memory catalog for tests.

mod client;
pub mod error;
#[cfg(any(test, feature = "mock"))]
mod mock;
mod models;
mod walk;

pub use crate::client::{ByteStream, CatalogClient, CatalogHandle, FetchResponse};
#[cfg(any(test, feature = "mock"))]
pub use crate::mock::{MockCatalog, MockFailure};
pub use crate::models::{ObjectInfo, ObjectPage, RemoteFormat};
pub use crate::walk::{Bookmark, PageEvent, PagePhase, walk, walk_with};
pub use ocache_storage::ArtifactKind;
