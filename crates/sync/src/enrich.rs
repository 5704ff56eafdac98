//! Provenance back-fill from stored descriptors.
//!
//! Entries are created from catalog listings, which carry neither upload date
//! nor revision chain. Once an entry's descriptor is on disk, this job reads
//! it back and records those fields on the entry so that reports can use them.
//! It never talks to the remote.

use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use ocache_cache::{CacheEntry, Provenance, Repository};
use ocache_storage::ContentStore;
use ocache_telemetry::Gauge;
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;
use time::{OffsetDateTime, UtcDateTime};
use time::format_description::well_known::Rfc3339;
use tracing::instrument;

/// Gauge counting entries enriched so far in this run.
pub const ENRICH_GAUGE: &str = "sysm.fix";

macro_rules! element {
    ($name:ident, $tag:literal) => {
        static $name: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(concat!(r"<", $tag, r">\s*([^<]*?)\s*</", $tag, r">")).unwrap());
    };
}

element!(DATE_UPLOADED, "dateUploaded");
element!(ARCHIVED, "archived");
element!(ORIGIN, "originMemberNode");
element!(OBSOLETES, "obsoletes");
element!(OBSOLETED_BY, "obsoletedBy");

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EnrichReport {
    /// Entries with a stored descriptor and no provenance yet.
    pub examined: u64,
    pub enriched: u64,
    /// Entries whose descriptor could not be read or parsed. They are left
    /// untouched and examined again next time.
    pub failed: u64,
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<").replace("&gt;", ">").replace("&quot;", "\"").replace("&apos;", "'").replace("&amp;", "&")
}

fn element(pattern: &Regex, xml: &str) -> Option<String> {
    pattern.captures(xml).map(|c| unescape(&c[1])).filter(|value| !value.is_empty())
}

/// Remote timestamps are RFC 3339, except that some older descriptors carry
/// no offset at all; those are UTC.
fn parse_timestamp(text: &str) -> Result<UtcDateTime> {
    let invalid = || ErrorKind::InvalidDescriptor(format!("dateUploaded {text:?}"));
    let has_offset = text.ends_with(['Z', 'z']) || text.get(19..).is_some_and(|tail| tail.contains(['+', '-']));
    let parsed = match has_offset {
        true => OffsetDateTime::parse(text, &Rfc3339),
        false => OffsetDateTime::parse(&format!("{text}Z"), &Rfc3339),
    };
    Ok(parsed.or_raise(invalid)?.to_utc())
}

/// Extract provenance fields from a system metadata document.
///
/// Only `dateUploaded` is required. `archived` defaults to false.
pub fn parse_provenance(xml: &str) -> Result<Provenance> {
    let uploaded = element(&DATE_UPLOADED, xml)
        .ok_or_raise(|| ErrorKind::InvalidDescriptor("missing dateUploaded".to_string()))?;
    let archived = match element(&ARCHIVED, xml).as_deref() {
        None | Some("false" | "0") => false,
        Some("true" | "1") => true,
        Some(other) => exn::bail!(ErrorKind::InvalidDescriptor(format!("archived {other:?}"))),
    };
    Ok(Provenance {
        uploaded: Some(parse_timestamp(&uploaded)?),
        archived,
        origin: element(&ORIGIN, xml),
        obsoletes: element(&OBSOLETES, xml),
        obsoleted_by: element(&OBSOLETED_BY, xml),
    })
}

async fn read_provenance(store: &ContentStore, entry: &CacheEntry) -> Result<Provenance> {
    let path = entry
        .descriptor_path
        .as_deref()
        .ok_or_raise(|| ErrorKind::InvalidDescriptor("no stored descriptor".to_string()))?;
    let xml = store
        .read_to_string(path)
        .await
        .or_raise(|| ErrorKind::InvalidDescriptor(format!("cannot read {}", path.display())))?;
    parse_provenance(&xml)
}

/// Back-fill provenance for entries with a stored descriptor.
///
/// Entries already enriched are never looked at again, so the job can be
/// run any number of times. `limit` caps how many entries are examined.
#[instrument(level = "info", skip(repository, store, gauge))]
pub async fn enrich(
    repository: &Repository,
    store: &ContentStore,
    gauge: &dyn Gauge,
    limit: Option<u32>,
) -> Result<EnrichReport> {
    let entries = repository.pending_provenance(limit).await.or_raise(|| ErrorKind::Cache)?;
    let mut report = EnrichReport { examined: entries.len() as u64, ..EnrichReport::default() };
    for entry in entries {
        let provenance = match read_provenance(store, &entry).await {
            Ok(provenance) => provenance,
            Err(err) => {
                tracing::warn!(identifier = %entry.identifier, alias = %entry.alias, error = ?err, "Cannot enrich entry");
                report.failed += 1;
                continue;
            },
        };
        repository.set_provenance(&entry.identifier, &provenance).await.or_raise(|| ErrorKind::Cache)?;
        report.enriched += 1;
        gauge.gauge(ENRICH_GAUGE, report.enriched as f64);
    }
    tracing::info!(examined = report.examined, enriched = report.enriched, failed = report.failed, "Enrichment complete");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocache_cache::{Database, FetchStatus, NewEntry};
    use ocache_catalog::ArtifactKind;
    use ocache_telemetry::MemoryGauge;
    use rstest::rstest;
    use std::io::Cursor;
    use time::macros::datetime;

    const DESCRIPTOR: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<d1:systemMetadata xmlns:d1="http://ns.dataone.org/service/types/v1">
  <identifier>doi:10.5063/AA/v2</identifier>
  <formatId>eml://ecoinformatics.org/eml-2.1.1</formatId>
  <dateUploaded>2013-04-02T17:09:31.211+00:00</dateUploaded>
  <archived>true</archived>
  <obsoletes>doi:10.5063/AA/v1</obsoletes>
  <obsoletedBy>doi:10.5063/AA/v3&amp;draft</obsoletedBy>
  <originMemberNode>urn:node:KNB</originMemberNode>
</d1:systemMetadata>
"#;

    #[test]
    fn test_parse_provenance() {
        let provenance = parse_provenance(DESCRIPTOR).unwrap();
        assert_eq!(provenance.uploaded, Some(datetime!(2013-04-02 17:09:31.211 UTC).to_utc()));
        assert!(provenance.archived);
        assert_eq!(provenance.origin.as_deref(), Some("urn:node:KNB"));
        assert_eq!(provenance.obsoletes.as_deref(), Some("doi:10.5063/AA/v1"));
        assert_eq!(provenance.obsoleted_by.as_deref(), Some("doi:10.5063/AA/v3&draft"));
    }

    #[test]
    fn test_parse_minimal() {
        let provenance = parse_provenance("<x><dateUploaded>2012-07-01T00:00:00Z</dateUploaded></x>").unwrap();
        assert_eq!(provenance.uploaded, Some(datetime!(2012-07-01 00:00 UTC).to_utc()));
        assert!(!provenance.archived);
        assert_eq!(provenance.origin, None);
        assert_eq!(provenance.obsoletes, None);
        assert_eq!(provenance.obsoleted_by, None);
    }

    #[rstest]
    #[case::utc("2012-07-01T12:30:00Z")]
    #[case::offset("2012-07-01T14:30:00+02:00")]
    #[case::fraction("2012-07-01T12:30:00.000+00:00")]
    #[case::no_offset("2012-07-01T12:30:00")]
    fn test_parse_timestamp(#[case] text: &str) {
        assert_eq!(parse_timestamp(text).unwrap(), datetime!(2012-07-01 12:30 UTC).to_utc());
    }

    #[rstest]
    #[case::missing_date("<x><archived>false</archived></x>")]
    #[case::bad_date("<x><dateUploaded>last tuesday</dateUploaded></x>")]
    #[case::bad_archived("<x><dateUploaded>2012-07-01T00:00:00Z</dateUploaded><archived>maybe</archived></x>")]
    fn test_parse_rejects(#[case] xml: &str) {
        let err = parse_provenance(xml).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidDescriptor(_)));
    }

    #[tokio::test]
    async fn test_enrich_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path()).unwrap();
        let db = Database::connect_in_memory().await.unwrap();
        let repository = Repository::from(&db);
        let gauge = MemoryGauge::default();
        let descriptors = [("good.1", DESCRIPTOR), ("good.2", DESCRIPTOR), ("broken", "<x>not a descriptor</x>")];
        for (identifier, xml) in descriptors {
            let entry = repository
                .create_entry(&NewEntry {
                    identifier: identifier.to_string(),
                    format_id: "eml://ecoinformatics.org/eml-2.1.1".to_string(),
                    size: 1,
                    modified: datetime!(2013-04-02 17:09 UTC).to_utc(),
                })
                .await
                .unwrap();
            let path = store.write(&entry.alias, ArtifactKind::Descriptor, Cursor::new(xml.as_bytes())).await.unwrap();
            repository
                .update_status(identifier, ArtifactKind::Descriptor, FetchStatus::Success, Some(path.as_path()))
                .await
                .unwrap();
        }
        // Never fetched: not a candidate.
        repository
            .create_entry(&NewEntry {
                identifier: "pending".to_string(),
                format_id: "text/csv".to_string(),
                size: 1,
                modified: datetime!(2013-04-02 17:09 UTC).to_utc(),
            })
            .await
            .unwrap();

        let report = enrich(&repository, &store, &gauge, None).await.unwrap();
        assert_eq!(report, EnrichReport { examined: 3, enriched: 2, failed: 1 });
        assert_eq!(gauge.values(ENRICH_GAUGE), vec![1.0, 2.0]);
        let entry = repository.get_entry("good.2").await.unwrap().unwrap();
        assert_eq!(entry.provenance.unwrap().origin.as_deref(), Some("urn:node:KNB"));
        assert_eq!(repository.get_entry("broken").await.unwrap().unwrap().provenance, None);

        let again = enrich(&repository, &store, &gauge, None).await.unwrap();
        assert_eq!(again, EnrichReport { examined: 1, enriched: 0, failed: 1 });
    }
}
