//! Repository for cache entries and everything hanging off them.
//!
//! An entry and its alias are created together and never separated: the alias
//! is derived from the row id of the alias table, which is only ever
//! incremented, so an alias can never end up naming a different object.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{CacheEntry, EntryFilter, EntryRow, FetchStatus, FormatRow, NewEntry, ObjectFormat, Provenance};
use crate::models::{to_timestamp, truncate};
use exn::{OptionExt, ResultExt};
use ocache_storage::{ArtifactKind, alias};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use time::UtcDateTime;
use tracing::instrument;

const SELECT_IDENTIFIERS: &str = "SELECT e.identifier FROM entries e LEFT JOIN formats f ON f.format_id = e.format_id";
const COUNT_ENTRIES: &str = "SELECT COUNT(*) FROM entries e LEFT JOIN formats f ON f.format_id = e.format_id";

/// Repository for managing the cache index.
///
/// Every method is a single atomic, committed unit of work. Cloning is cheap
/// (it clones a pool handle), so hand each fetch worker its own copy.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}
impl From<&Database> for Repository {
    fn from(db: &Database) -> Self {
        Self::new(db.pool().clone())
    }
}
impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn sqlx_hates_paths(path: impl AsRef<Path>) -> Result<String> {
        Ok(path.as_ref().to_str().ok_or_raise(|| ErrorKind::InvalidData("path"))?.to_string())
    }

    fn filtered<'a>(select: &str, filter: &'a EntryFilter, ordered: bool) -> QueryBuilder<'a, Sqlite> {
        let mut query = QueryBuilder::new(select);
        query.push(" WHERE 1 = 1");
        if !filter.format_types.is_empty() {
            query.push(" AND f.format_type IN (");
            let mut types = query.separated(", ");
            for format_type in &filter.format_types {
                types.push_bind(format_type.as_str());
            }
            types.push_unseparated(")");
        }
        if let Some(status) = filter.descriptor_status {
            query.push(" AND e.descriptor_status = ").push_bind(status.code());
        }
        if let Some(status) = filter.content_status {
            query.push(" AND e.content_status = ").push_bind(status.code());
        }
        if ordered {
            query.push(" ORDER BY e.row_id");
            if let Some(limit) = filter.limit {
                query.push(" LIMIT ").push_bind(i64::from(limit));
            }
        }
        query
    }

    // =========================================================================
    // Entries
    // =========================================================================

    /// Get an entry by its remote identifier.
    pub async fn get_entry(&self, identifier: impl AsRef<str>) -> Result<Option<CacheEntry>> {
        let row: Option<EntryRow> = sqlx::query_as(include_str!("../queries/get_entry.sql"))
            .bind(identifier.as_ref())
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(|r| r.try_into()).transpose()
    }

    /// Get an entry by its alias (the name its artifacts are stored under).
    pub async fn get_entry_by_alias(&self, alias: impl AsRef<str>) -> Result<Option<CacheEntry>> {
        let row: Option<EntryRow> = sqlx::query_as(include_str!("../queries/get_entry_by_alias.sql"))
            .bind(alias.as_ref())
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(|r| r.try_into()).transpose()
    }

    /// Record a newly observed remote object, with both statuses pending.
    ///
    /// The alias row and the entry are written in one transaction. A format id
    /// that is not in the formats table is stored as `NULL`.
    ///
    /// Returns [`ErrorKind::DuplicateEntry`] if the identifier is already known.
    /// The transaction takes the write lock before checking, so concurrent
    /// writers queue up on the busy timeout instead of failing on a stale
    /// read snapshot.
    #[instrument(level = "debug", skip(self, entry), fields(identifier = %entry.identifier))]
    pub async fn create_entry(&self, entry: &NewEntry) -> Result<CacheEntry> {
        let size = i64::try_from(entry.size).or_raise(|| ErrorKind::InvalidData("size"))?;
        let modified = truncate(entry.modified)?;
        let created_at = truncate(UtcDateTime::now())?;
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await.or_raise(|| ErrorKind::Database)?;
        let exists: bool = sqlx::query_scalar(include_str!("../queries/entry_exists.sql"))
            .bind(&entry.identifier)
            .fetch_one(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        if exists {
            exn::bail!(ErrorKind::DuplicateEntry(entry.identifier.clone()));
        }
        let row_id: i64 = sqlx::query_scalar(include_str!("../queries/insert_alias.sql"))
            .bind(&entry.identifier)
            .fetch_one(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let alias = alias::encode(u64::try_from(row_id).or_raise(|| ErrorKind::InvalidData("row id"))?);
        sqlx::query(include_str!("../queries/assign_alias.sql"))
            .bind(&alias)
            .bind(row_id)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let format_id: Option<String> = sqlx::query_scalar(include_str!("../queries/insert_entry.sql"))
            .bind(&entry.identifier)
            .bind(row_id)
            .bind(&entry.format_id)
            .bind(size)
            .bind(modified.unix_timestamp())
            .bind(created_at.unix_timestamp())
            .fetch_one(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        if format_id.is_none() {
            tracing::debug!(format_id = %entry.format_id, "Unknown format; stored without one");
        }
        Ok(CacheEntry {
            identifier: entry.identifier.clone(),
            alias,
            format_id,
            size: entry.size,
            modified,
            created_at,
            descriptor_status: FetchStatus::Pending,
            content_status: FetchStatus::Pending,
            descriptor_path: None,
            content_path: None,
            provenance: None,
        })
    }

    /// Record the outcome of fetching one artifact of an entry.
    ///
    /// The path is only recorded when given; a failure never clears a path
    /// recorded earlier.
    ///
    /// Returns [`ErrorKind::EntryNotFound`] if there is no such entry.
    pub async fn update_status(
        &self,
        identifier: &str,
        kind: ArtifactKind,
        status: FetchStatus,
        path: Option<&Path>,
    ) -> Result<()> {
        let query = match kind {
            ArtifactKind::Descriptor => include_str!("../queries/update_descriptor_status.sql"),
            ArtifactKind::Content => include_str!("../queries/update_content_status.sql"),
        };
        let path = path.map(Self::sqlx_hates_paths).transpose()?;
        let result = sqlx::query(query)
            .bind(status.code())
            .bind(path)
            .bind(identifier)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        if result.rows_affected() == 0 {
            exn::bail!(ErrorKind::EntryNotFound(identifier.to_string()));
        }
        Ok(())
    }

    /// List entries matching a filter, in creation order.
    pub async fn list_entries(&self, filter: &EntryFilter) -> Result<Vec<CacheEntry>> {
        let rows: Vec<EntryRow> = Self::filtered(include_str!("../queries/select_entries.sql"), filter, true)
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(|r| r.try_into()).collect()
    }

    /// List identifiers of entries matching a filter, in creation order.
    ///
    /// This is what gets fed to the fetch pools; much cheaper than
    /// [`list_entries`](Self::list_entries) when there are millions of them.
    pub async fn list_identifiers(&self, filter: &EntryFilter) -> Result<Vec<String>> {
        Self::filtered(SELECT_IDENTIFIERS, filter, true)
            .build_query_scalar()
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)
    }

    /// Count entries matching a filter. The filter's limit is ignored.
    pub async fn count_entries(&self, filter: &EntryFilter) -> Result<u64> {
        let count: i64 = Self::filtered(COUNT_ENTRIES, filter, false)
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        u64::try_from(count).or_raise(|| ErrorKind::InvalidData("count"))
    }

    /// Number of entries per format id. Entries with an unknown format are
    /// counted under `None`.
    pub async fn count_by_format(&self) -> Result<BTreeMap<Option<String>, u64>> {
        let rows: Vec<(Option<String>, i64)> = sqlx::query_as(include_str!("../queries/count_by_format.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter()
            .map(|(format_id, total)| {
                u64::try_from(total)
                    .or_raise(|| ErrorKind::InvalidData("count"))
                    .map(|total| (format_id, total))
            })
            .collect()
    }

    /// Every identifier in the index.
    pub async fn known_identifiers(&self) -> Result<HashSet<String>> {
        let identifiers: Vec<String> = sqlx::query_scalar(include_str!("../queries/known_identifiers.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(identifiers.into_iter().collect())
    }

    /// The most recently created entry.
    pub async fn newest_entry(&self) -> Result<Option<CacheEntry>> {
        let row: Option<EntryRow> = sqlx::query_as(include_str!("../queries/newest_entry.sql"))
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(|r| r.try_into()).transpose()
    }

    /// The latest remote modification time of any entry.
    pub async fn newest_modified(&self) -> Result<Option<UtcDateTime>> {
        let modified: Option<i64> = sqlx::query_scalar(include_str!("../queries/newest_modified.sql"))
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        modified.map(|m| to_timestamp(m, "modification date")).transpose()
    }

    /// Count entries of a format type uploaded on or before a date.
    ///
    /// Without a date every entry of the type is counted. With one, entries
    /// that have not been enriched yet (no known upload date) never match.
    pub async fn count_uploaded_before(&self, format_type: &str, before: Option<UtcDateTime>) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(include_str!("../queries/count_uploaded_before.sql"))
            .bind(format_type)
            .bind(before.map(|b| b.unix_timestamp()))
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        u64::try_from(count).or_raise(|| ErrorKind::InvalidData("count"))
    }

    /// Entries with a stored descriptor that have not been enriched yet.
    pub async fn pending_provenance(&self, limit: Option<u32>) -> Result<Vec<CacheEntry>> {
        // SQLite treats a negative limit as "no limit".
        let limit = limit.map(i64::from).unwrap_or(-1);
        let rows: Vec<EntryRow> = sqlx::query_as(include_str!("../queries/pending_provenance.sql"))
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(|r| r.try_into()).collect()
    }

    /// Back-fill provenance fields of an entry and mark it as enriched.
    pub async fn set_provenance(&self, identifier: &str, provenance: &Provenance) -> Result<()> {
        let result = sqlx::query(include_str!("../queries/set_provenance.sql"))
            .bind(provenance.uploaded.map(|u| u.unix_timestamp()))
            .bind(provenance.archived)
            .bind(provenance.origin.as_deref())
            .bind(provenance.obsoletes.as_deref())
            .bind(provenance.obsoleted_by.as_deref())
            .bind(UtcDateTime::now().unix_timestamp())
            .bind(identifier)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        if result.rows_affected() == 0 {
            exn::bail!(ErrorKind::EntryNotFound(identifier.to_string()));
        }
        Ok(())
    }

    // =========================================================================
    // Formats
    // =========================================================================

    /// Insert a format, or replace the type and name of an existing one.
    pub async fn upsert_format(&self, format: &ObjectFormat) -> Result<()> {
        sqlx::query(include_str!("../queries/upsert_format.sql"))
            .bind(&format.format_id)
            .bind(&format.format_type)
            .bind(&format.name)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    pub async fn get_format(&self, format_id: impl AsRef<str>) -> Result<Option<ObjectFormat>> {
        let row: Option<FormatRow> = sqlx::query_as(include_str!("../queries/get_format.sql"))
            .bind(format_id.as_ref())
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(row.map(ObjectFormat::from))
    }

    pub async fn list_formats(&self) -> Result<Vec<ObjectFormat>> {
        let rows: Vec<FormatRow> = sqlx::query_as(include_str!("../queries/list_formats.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(rows.into_iter().map(ObjectFormat::from).collect())
    }

    /// Distinct format types, sorted.
    pub async fn list_format_types(&self) -> Result<Vec<String>> {
        sqlx::query_scalar(include_str!("../queries/list_format_types.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)
    }

    // =========================================================================
    // Engine state
    // =========================================================================

    /// Read a state value, deserializing it from JSON.
    pub async fn get_state<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let value: Option<String> = sqlx::query_scalar(include_str!("../queries/get_state.sql"))
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        value
            .map(|v| serde_json::from_str(&v).or_raise(|| ErrorKind::InvalidData("state value")))
            .transpose()
    }

    /// Write a state value as JSON. Last write wins.
    pub async fn set_state<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_string(value).or_raise(|| ErrorKind::InvalidData("state value"))?;
        sqlx::query(include_str!("../queries/set_state.sql"))
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    pub async fn state_keys(&self) -> Result<Vec<String>> {
        sqlx::query_scalar(include_str!("../queries/state_keys.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)
    }

    // =========================================================================
    // Purge
    // =========================================================================

    /// Delete every entry, alias, format and state value in one transaction.
    ///
    /// Alias row ids keep counting from where they were, so aliases handed
    /// out before the purge are never reissued. Stored artifacts are not
    /// touched.
    ///
    /// Returns the number of entries removed.
    #[instrument(skip(self))]
    pub async fn purge_all(&self) -> Result<u64> {
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await.or_raise(|| ErrorKind::Database)?;
        let entries: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entries")
            .fetch_one(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let entries = u64::try_from(entries).or_raise(|| ErrorKind::InvalidData("count"))?;
        sqlx::query(include_str!("../queries/purge.sql"))
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        tracing::info!(entries, "Purged cache index");
        Ok(entries)
    }
}
