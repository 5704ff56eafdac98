//! SQLite index of the local object cache.
//!
//! The index records every remote object that has ever been observed, the
//! alias its artifacts are stored under, and the outcome of fetching each
//! artifact. It is what lets a sync run resume where the previous one left
//! off: entries whose descriptor or content is still pending simply get picked
//! up again.
//!
//! # Architecture
//! - **Entries**: one per remote identifier, created pending and moved to a
//!   terminal status by the fetch workers. Each has an alias derived from a
//!   never-reused row id.
//! - **Formats**: remote object formats and their broad type (`DATA`,
//!   `METADATA`, `RESOURCE`), refreshed every cycle.
//! - **State**: small JSON values the sync engine keeps between runs, such as
//!   when the catalog was last walked.

mod db;
pub mod error;
mod models;
mod repo;

pub use crate::db::Database;
pub use crate::models::{CacheEntry, EntryFilter, FetchStatus, NewEntry, ObjectFormat, Provenance};
pub use crate::repo::Repository;
