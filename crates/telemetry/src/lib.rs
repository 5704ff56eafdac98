//! Best-effort telemetry for the object cache.
//!
//! Components report progress through the [`Gauge`] trait: queue depth, how
//! many new objects a catalog walk found, how fast artifacts are being
//! fetched. [`StatsdClient`] forwards readings to a statsd daemon over UDP.

pub mod error;
mod gauge;
mod statsd;
mod throughput;

pub use crate::gauge::{Gauge, MemoryGauge, NullGauge};
pub use crate::statsd::{DISABLED_HOST, StatsdClient};
pub use crate::throughput::Throughput;
