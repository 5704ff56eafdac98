mod entry;
mod filter;
mod format;

pub(crate) use self::entry::EntryRow;
pub use self::entry::{CacheEntry, FetchStatus, NewEntry, Provenance};
pub use self::filter::EntryFilter;
pub(crate) use self::format::FormatRow;
pub use self::format::ObjectFormat;

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use time::UtcDateTime;

pub(crate) fn to_timestamp(value: i64, what: &'static str) -> Result<UtcDateTime> {
    UtcDateTime::from_unix_timestamp(value).or_raise(|| ErrorKind::InvalidData(what))
}

/// Timestamps are stored with second precision; truncate so that what gets
/// returned from a write equals what a later read produces.
pub(crate) fn truncate(value: UtcDateTime) -> Result<UtcDateTime> {
    to_timestamp(value.unix_timestamp(), "timestamp")
}
