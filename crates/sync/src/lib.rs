//! Keeps a local cache in step with a remote object catalog.
//!
//! - [`SyncEngine`]: one cycle refreshes formats, walks the catalog from a
//!   bookmark, creates entries for new objects, then fetches pending
//!   artifacts through a [`FetchPool`].
//! - [`report`]: summary and upload-date counts over the index.
//! - [`enrich`]: back-fills provenance fields from stored descriptors.

pub mod enrich;
mod engine;
pub mod error;
mod pool;
pub mod report;

pub use crate::engine::{BASE_URL, CycleLock, EngineState, LAST_LOADED, PIDS_GAUGE, SyncEngine, SyncOptions, SyncOutcome};
pub use crate::pool::{FetchPool, PoolReport, QUEUE_GAUGE, throughput_gauge};
