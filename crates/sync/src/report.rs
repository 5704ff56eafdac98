//! Read-only views over the cache index.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use ocache_cache::{EntryFilter, FetchStatus, Repository};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt::Write;
use time::format_description::well_known::Rfc3339;
use time::macros::date;
use time::{Date, UtcDateTime};

/// The broad format types reports break counts down by.
pub const FORMAT_TYPES: [&str; 3] = ["DATA", "METADATA", "RESOURCE"];

/// Key used in per-format counts for entries whose format was unknown.
pub const UNKNOWN_FORMAT: &str = "(unknown)";

/// Reporting dates of the upload growth series, roughly every 30 days from
/// mid 2012 to early 2014.
pub const REPORTING_DATES: [Date; 22] = [
    date!(2012 - 07 - 01),
    date!(2012 - 07 - 31),
    date!(2012 - 08 - 30),
    date!(2012 - 09 - 29),
    date!(2012 - 10 - 29),
    date!(2012 - 11 - 28),
    date!(2012 - 12 - 28),
    date!(2013 - 01 - 27),
    date!(2013 - 02 - 26),
    date!(2013 - 03 - 28),
    date!(2013 - 04 - 27),
    date!(2013 - 05 - 27),
    date!(2013 - 06 - 26),
    date!(2013 - 07 - 26),
    date!(2013 - 08 - 25),
    date!(2013 - 09 - 24),
    date!(2013 - 10 - 24),
    date!(2013 - 11 - 23),
    date!(2013 - 12 - 23),
    date!(2014 - 01 - 22),
    date!(2014 - 02 - 21),
    date!(2014 - 03 - 23),
];

fn rfc3339<S: Serializer>(value: &Option<UtcDateTime>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    match value {
        Some(value) => serializer.serialize_some(&value.format(&Rfc3339).map_err(serde::ser::Error::custom)?),
        None => serializer.serialize_none(),
    }
}

/// State of the cache at a glance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub base_url: String,
    /// Every entry, whatever its format.
    pub count: u64,
    /// When the most recently created entry was first seen locally.
    #[serde(serialize_with = "rfc3339")]
    pub newest_entry: Option<UtcDateTime>,
    /// Most recent remote modification time across all entries.
    #[serde(serialize_with = "rfc3339")]
    pub newest_modified: Option<UtcDateTime>,
    /// Entries per format type.
    pub counts: BTreeMap<String, u64>,
    /// Entries per format type whose descriptor was never fetched.
    pub pending: BTreeMap<String, u64>,
    /// Entries per format type with a stored descriptor.
    pub fetched: BTreeMap<String, u64>,
    /// Entries per format type with stored content.
    pub content_fetched: BTreeMap<String, u64>,
    /// Entries per format id.
    pub by_format: BTreeMap<String, u64>,
}
impl Summary {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).or_raise(|| ErrorKind::Render)
    }
}

async fn count_per_type(repository: &Repository, filter: EntryFilter) -> Result<BTreeMap<String, u64>> {
    let mut counts = BTreeMap::new();
    for format_type in FORMAT_TYPES {
        let filter = filter.clone().with_format_types([format_type]);
        let count = repository.count_entries(&filter).await.or_raise(|| ErrorKind::Cache)?;
        counts.insert(format_type.to_string(), count);
    }
    Ok(counts)
}

/// Summarize the cache.
///
/// `base_url` is whatever the caller considers current; the engine records
/// the one it last synced against under [`BASE_URL`](crate::BASE_URL).
pub async fn summary(repository: &Repository, base_url: &str) -> Result<Summary> {
    let cache = || ErrorKind::Cache;
    let by_format = repository
        .count_by_format()
        .await
        .or_raise(cache)?
        .into_iter()
        .map(|(format_id, count)| (format_id.unwrap_or_else(|| UNKNOWN_FORMAT.to_string()), count))
        .collect();
    Ok(Summary {
        base_url: base_url.to_string(),
        count: repository.count_entries(&EntryFilter::default()).await.or_raise(cache)?,
        newest_entry: repository.newest_entry().await.or_raise(cache)?.map(|entry| entry.created_at),
        newest_modified: repository.newest_modified().await.or_raise(cache)?,
        counts: count_per_type(repository, EntryFilter::default()).await?,
        pending: count_per_type(repository, EntryFilter::default().with_descriptor_status(FetchStatus::Pending))
            .await?,
        fetched: count_per_type(repository, EntryFilter::default().with_descriptor_status(FetchStatus::Success))
            .await?,
        content_fetched: count_per_type(repository, EntryFilter::default().with_content_status(FetchStatus::Success))
            .await?,
        by_format,
    })
}

/// Entries of each broad type uploaded on or before a date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadCounts {
    pub date: Date,
    pub data: u64,
    pub metadata: u64,
    pub resource_map: u64,
}

/// Count entries by upload date. Only enriched entries have an upload date,
/// so run [`enrich`](crate::enrich::enrich) first.
pub async fn count_by_upload_date(repository: &Repository, dates: &[Date]) -> Result<Vec<UploadCounts>> {
    let mut rows = Vec::with_capacity(dates.len());
    for &date in dates {
        let before = Some(date.midnight().assume_utc().to_utc());
        let mut counts = [0; FORMAT_TYPES.len()];
        for (count, format_type) in counts.iter_mut().zip(FORMAT_TYPES) {
            *count = repository.count_uploaded_before(format_type, before).await.or_raise(|| ErrorKind::Cache)?;
        }
        let [data, metadata, resource_map] = counts;
        rows.push(UploadCounts { date, data, metadata, resource_map });
    }
    Ok(rows)
}

/// Render upload counts as CSV, with a header row.
pub fn render_csv(rows: &[UploadCounts]) -> String {
    let mut csv = String::from("Date,Data,Metadata,ResourceMap\n");
    for row in rows {
        let date = row.date;
        // Writing to a String cannot fail.
        let _ = writeln!(
            csv,
            "{:04}-{:02}-{:02},{},{},{}",
            date.year(),
            u8::from(date.month()),
            date.day(),
            row.data,
            row.metadata,
            row.resource_map
        );
    }
    csv
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocache_cache::{Database, NewEntry, ObjectFormat, Provenance};
    use ocache_catalog::ArtifactKind;
    use std::path::Path;
    use time::macros::datetime;

    async fn seeded() -> Repository {
        let db = Database::connect_in_memory().await.unwrap();
        let repository = Repository::from(&db);
        for (id, kind) in [("text/csv", "DATA"), ("eml", "METADATA"), ("ore", "RESOURCE")] {
            repository.upsert_format(&ObjectFormat::new(id, kind, id)).await.unwrap();
        }
        let entries = [
            ("d.1", "text/csv", datetime!(2012-06-15 12:00 UTC)),
            ("d.2", "text/csv", datetime!(2012-07-20 12:00 UTC)),
            ("m.1", "eml", datetime!(2012-07-01 00:00 UTC)),
            ("r.1", "ore", datetime!(2013-01-01 00:00 UTC)),
            ("x.1", "mystery", datetime!(2014-01-01 00:00 UTC)),
        ];
        for (identifier, format_id, uploaded) in entries {
            let uploaded = uploaded.to_utc();
            repository
                .create_entry(&NewEntry {
                    identifier: identifier.to_string(),
                    format_id: format_id.to_string(),
                    size: 1,
                    modified: uploaded,
                })
                .await
                .unwrap();
            let provenance = Provenance { uploaded: Some(uploaded), ..Provenance::default() };
            repository.set_provenance(identifier, &provenance).await.unwrap();
        }
        repository
            .update_status("d.1", ArtifactKind::Descriptor, FetchStatus::Success, Some(Path::new("n/n242n_sysm.xml")))
            .await
            .unwrap();
        repository.update_status("m.1", ArtifactKind::Content, FetchStatus::Success, None).await.unwrap();
        repository.update_status("r.1", ArtifactKind::Descriptor, FetchStatus::Failed(-1), None).await.unwrap();
        repository
    }

    #[tokio::test]
    async fn test_summary() {
        let repository = seeded().await;
        let summary = summary(&repository, "https://cn.example.org/cn").await.unwrap();
        assert_eq!(summary.count, 5);
        assert_eq!(summary.counts["DATA"], 2);
        assert_eq!(summary.counts["METADATA"], 1);
        assert_eq!(summary.counts["RESOURCE"], 1);
        assert_eq!(summary.pending["DATA"], 1);
        assert_eq!(summary.pending["RESOURCE"], 0);
        assert_eq!(summary.fetched["DATA"], 1);
        assert_eq!(summary.content_fetched["METADATA"], 1);
        assert_eq!(summary.by_format[UNKNOWN_FORMAT], 1);
        assert_eq!(summary.by_format["text/csv"], 2);
        assert_eq!(summary.newest_modified, Some(datetime!(2014-01-01 00:00 UTC).to_utc()));
        assert!(summary.newest_entry.is_some());

        let json = summary.to_json().unwrap();
        assert!(json.contains(r#""base_url": "https://cn.example.org/cn""#));
        assert!(json.contains(r#""newest_modified": "2014-01-01T00:00:00Z""#));
    }

    #[tokio::test]
    async fn test_empty_summary() {
        let db = Database::connect_in_memory().await.unwrap();
        let summary = summary(&Repository::from(&db), "https://cn.example.org/cn").await.unwrap();
        assert_eq!(summary.count, 0);
        assert_eq!(summary.newest_entry, None);
        assert_eq!(summary.counts["DATA"], 0);
        assert!(summary.to_json().unwrap().contains(r#""newest_entry": null"#));
    }

    #[tokio::test]
    async fn test_count_by_upload_date() {
        let repository = seeded().await;
        let rows = count_by_upload_date(&repository, &REPORTING_DATES[..3]).await.unwrap();
        let counts: Vec<_> = rows.iter().map(|r| (r.data, r.metadata, r.resource_map)).collect();
        // The metadata entry was uploaded exactly at midnight on the first date.
        assert_eq!(counts, vec![(1, 1, 0), (2, 1, 0), (2, 1, 0)]);

        let csv = render_csv(&rows);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "Date,Data,Metadata,ResourceMap");
        assert_eq!(lines[1], "2012-07-01,1,1,0");
        assert_eq!(lines[3], "2012-08-30,2,1,0");
    }

    #[test]
    fn test_reporting_dates() {
        assert_eq!(REPORTING_DATES.first(), Some(&date!(2012 - 07 - 01)));
        assert_eq!(REPORTING_DATES.last(), Some(&date!(2014 - 03 - 23)));
        assert!(REPORTING_DATES.windows(2).all(|pair| pair[0] < pair[1]));
    }
}
