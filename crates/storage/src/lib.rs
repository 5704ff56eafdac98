//! On-disk layout of the object cache.
//!
//! - [`alias`]: reversible mapping from index row ids to short,
//!   filesystem-safe aliases.
//! - [`ContentStore`]: sharded directory tree holding the fetched descriptor
//!   and content artifacts, written atomically.

pub mod alias;
pub mod error;
mod path;
mod store;

pub use crate::path::validate as validate_path;
pub use crate::store::{ArtifactKind, ContentStore};
