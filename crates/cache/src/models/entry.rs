use crate::error::{Error, ErrorKind};
use crate::models::to_timestamp;
use derive_more::Display;
use exn::{OptionExt, ResultExt};
use std::path::PathBuf;
use time::UtcDateTime;

/// Outcome of fetching one artifact of an entry.
///
/// Stored as a single integer: `0` is pending, `200` is success, and anything
/// else is the failure code. Statuses only ever move from pending to one of
/// the two terminal states.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchStatus {
    #[display("pending")]
    Pending,
    #[display("success")]
    Success,
    #[display("failed ({_0})")]
    Failed(i64),
}
impl FetchStatus {
    /// The request never got an answer.
    pub const TRANSPORT_FAILURE: i64 = -1;
    /// The answer arrived but could not be written to the content store.
    pub const STORE_FAILURE: i64 = -2;
    /// The remote answered with a non-success status but gave no reason.
    pub const UNEXPLAINED_FAILURE: i64 = -3;

    const PENDING: i64 = 0;
    const SUCCESS: i64 = 200;

    pub fn code(&self) -> i64 {
        match self {
            Self::Pending => Self::PENDING,
            Self::Success => Self::SUCCESS,
            Self::Failed(code) => *code,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            Self::PENDING => Self::Pending,
            Self::SUCCESS => Self::Success,
            code => Self::Failed(code),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}
impl From<i64> for FetchStatus {
    fn from(code: i64) -> Self {
        Self::from_code(code)
    }
}
impl From<FetchStatus> for i64 {
    fn from(status: FetchStatus) -> Self {
        status.code()
    }
}

/// Who uploaded an object, when, and where it sits in its revision chain.
///
/// Only ever filled in by the enrichment job, from the stored descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Provenance {
    pub uploaded: Option<UtcDateTime>,
    pub archived: bool,
    pub origin: Option<String>,
    pub obsoletes: Option<String>,
    pub obsoleted_by: Option<String>,
}

/// An object as first observed in the remote catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub identifier: String,
    pub format_id: String,
    pub size: u64,
    pub modified: UtcDateTime,
}

/// Everything the index knows about one remote object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub identifier: String,
    pub alias: String,
    /// `None` when the format was not known locally at creation time.
    pub format_id: Option<String>,
    pub size: u64,
    pub modified: UtcDateTime,
    pub created_at: UtcDateTime,
    pub descriptor_status: FetchStatus,
    pub content_status: FetchStatus,
    /// Store-relative, set once the descriptor has been fetched.
    pub descriptor_path: Option<PathBuf>,
    /// Store-relative, set once the content has been fetched.
    pub content_path: Option<PathBuf>,
    pub provenance: Option<Provenance>,
}

#[derive(sqlx::FromRow)]
pub(crate) struct EntryRow {
    pub(crate) identifier: String,
    pub(crate) alias: Option<String>,
    pub(crate) format_id: Option<String>,
    pub(crate) size: i64,
    pub(crate) modified: i64,
    pub(crate) created_at: i64,
    pub(crate) descriptor_status: i64,
    pub(crate) descriptor_path: Option<String>,
    pub(crate) content_status: i64,
    pub(crate) content_path: Option<String>,
    pub(crate) uploaded: Option<i64>,
    pub(crate) archived: Option<bool>,
    pub(crate) origin: Option<String>,
    pub(crate) obsoletes: Option<String>,
    pub(crate) obsoleted_by: Option<String>,
    pub(crate) enriched_at: Option<i64>,
}
impl TryFrom<EntryRow> for CacheEntry {
    type Error = Error;
    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        let provenance = match row.enriched_at {
            None => None,
            Some(_) => Some(Provenance {
                uploaded: row.uploaded.map(|u| to_timestamp(u, "upload date")).transpose()?,
                archived: row.archived.unwrap_or(false),
                origin: row.origin,
                obsoletes: row.obsoletes,
                obsoleted_by: row.obsoleted_by,
            }),
        };
        Ok(Self {
            alias: row.alias.ok_or_raise(|| ErrorKind::InvalidData("alias"))?,
            identifier: row.identifier,
            format_id: row.format_id,
            size: u64::try_from(row.size).or_raise(|| ErrorKind::InvalidData("size"))?,
            modified: to_timestamp(row.modified, "modification date")?,
            created_at: to_timestamp(row.created_at, "creation date")?,
            descriptor_status: FetchStatus::from_code(row.descriptor_status),
            content_status: FetchStatus::from_code(row.content_status),
            descriptor_path: row.descriptor_path.map(PathBuf::from),
            content_path: row.content_path.map(PathBuf::from),
            provenance,
        })
    }
}
