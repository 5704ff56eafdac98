use ocache_cache::{Database, EntryFilter, FetchStatus, Repository};
use ocache_catalog::{ArtifactKind, Bookmark, MockCatalog, MockFailure, ObjectInfo, RemoteFormat};
use ocache_storage::ContentStore;
use ocache_sync::enrich::enrich;
use ocache_sync::report::{count_by_upload_date, summary};
use ocache_sync::{EngineState, LAST_LOADED, SyncEngine, SyncOptions};
use ocache_telemetry::MemoryGauge;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use time::macros::{date, datetime};
use time::{Duration, UtcDateTime};

const FORMATS: [(&str, &str); 3] =
    [("text/csv", "DATA"), ("eml://ecoinformatics.org/eml-2.1.1", "METADATA"), ("http://www.openarchives.org/ore/terms", "RESOURCE")];

fn formats() -> Vec<RemoteFormat> {
    FORMATS
        .iter()
        .map(|(id, kind)| RemoteFormat { format_id: id.to_string(), format_type: kind.to_string(), name: id.to_string() })
        .collect()
}

/// `count` objects, cycling through the three formats, an hour apart.
fn objects(prefix: &str, count: usize, from: UtcDateTime) -> Vec<ObjectInfo> {
    (0..count)
        .map(|i| ObjectInfo {
            identifier: format!("{prefix}.{i}"),
            format_id: FORMATS[i % FORMATS.len()].0.to_string(),
            size: 1024,
            modified: from + Duration::hours(i as i64),
        })
        .collect()
}

fn epoch() -> UtcDateTime {
    datetime!(2013-01-01 00:00 UTC).to_utc()
}

struct Cache {
    dir: TempDir,
    database: Database,
    repository: Repository,
    store: Arc<ContentStore>,
    gauge: Arc<MemoryGauge>,
}

impl Cache {
    async fn create() -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self::open(dir).await
    }

    async fn open(dir: TempDir) -> Self {
        let database = Database::connect_with_capacity(dir.path().join("cache.sqdb"), 6).await.unwrap();
        let repository = Repository::from(&database);
        let store = Arc::new(ContentStore::new(dir.path().join("content")).unwrap());
        Self { dir, database, repository, store, gauge: Arc::default() }
    }

    /// Close the index and open it again, as a later run would.
    async fn reopen(self) -> Self {
        self.database.close().await;
        Self::open(self.dir).await
    }

    fn engine(&self, catalog: &MockCatalog, options: SyncOptions) -> SyncEngine {
        SyncEngine::new(self.repository.clone(), Arc::clone(&self.store), Arc::new(catalog.clone()), self.gauge.clone())
            .with_options(options)
    }

    async fn status(&self, identifier: &str) -> (FetchStatus, FetchStatus) {
        let entry = self.repository.get_entry(identifier).await.unwrap().unwrap();
        (entry.descriptor_status, entry.content_status)
    }
}

fn options() -> SyncOptions {
    SyncOptions { workers: 4, page_size: 10, ..SyncOptions::default() }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_end_to_end() {
    let catalog = MockCatalog::default().with_formats(formats()).with_objects(objects("obj", 25, epoch()));
    let cache = Cache::create().await;
    let engine = cache.engine(&catalog, SyncOptions { load_content: true, ..options() });

    let outcome = engine.update(None).await.unwrap();
    assert_eq!(outcome.bookmark, Bookmark::Beginning);
    assert_eq!(outcome.inserted, 25);
    assert_eq!(outcome.descriptors.succeeded, 25);
    // Every third object is DATA, whose content is not fetched.
    let content = outcome.content.unwrap();
    assert_eq!(content.dispatched, 16);
    assert_eq!(content.succeeded, 16);
    assert_eq!(engine.state(), EngineState::Idle);
    assert_eq!(catalog.worker_handles(), 8);
    assert_eq!(catalog.list_requests().await.len(), 3);

    // Artifacts sit in the sharded content tree under their alias.
    let entry = cache.repository.get_entry("obj.1").await.unwrap().unwrap();
    let shard = entry.alias.chars().next().unwrap().to_string();
    let descriptor = cache.dir.path().join("content").join(&shard).join(format!("{}_sysm.xml", entry.alias));
    let content = cache.dir.path().join("content").join(&shard).join(format!("{}_content.xml", entry.alias));
    assert!(descriptor.is_file());
    assert_eq!(std::fs::read_to_string(content).unwrap(), "content of obj.1\n");
    assert_eq!(entry.descriptor_path.as_deref(), Some(Path::new(&shard).join(format!("{}_sysm.xml", entry.alias)).as_path()));

    let summary = summary(&cache.repository, "https://cn.example.org/cn").await.unwrap();
    assert_eq!(summary.count, 25);
    assert_eq!(summary.counts["DATA"], 9);
    assert_eq!(summary.fetched["METADATA"], 8);
    assert_eq!(summary.pending["RESOURCE"], 0);
    assert_eq!(summary.content_fetched["DATA"], 0);
    assert_eq!(summary.content_fetched["RESOURCE"], 8);

    // Upload dates only become known once descriptors have been read back.
    let report = enrich(&cache.repository, &cache.store, cache.gauge.as_ref(), None).await.unwrap();
    assert_eq!(report.enriched, 25);
    let rows = count_by_upload_date(&cache.repository, &[date!(2013 - 01 - 01), date!(2013 - 01 - 02)]).await.unwrap();
    assert_eq!((rows[0].data, rows[0].metadata, rows[0].resource_map), (1, 0, 0));
    assert_eq!((rows[1].data, rows[1].metadata, rows[1].resource_map), (9, 8, 8));
}

#[tokio::test]
async fn test_interrupted_run_resumes() {
    let catalog = MockCatalog::default().with_formats(formats()).with_objects(objects("obj", 12, epoch()));
    let cache = Cache::create().await;

    // A run that got as far as the walk and no further.
    let mut known = HashSet::new();
    let engine = cache.engine(&catalog, options());
    engine.refresh_formats().await.unwrap();
    assert_eq!(engine.walk_catalog(Bookmark::Beginning, &mut known).await.unwrap(), 12);
    drop(engine);
    let aliases: Vec<String> = cache
        .repository
        .list_entries(&EntryFilter::default())
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.alias)
        .collect();

    let cache = cache.reopen().await;
    let engine = cache.engine(&catalog, options());
    assert_eq!(engine.last_loaded().await.unwrap(), None);
    let outcome = engine.update(None).await.unwrap();
    assert_eq!(outcome.inserted, 0);
    assert_eq!(outcome.descriptors.succeeded, 12);
    let after: Vec<String> = cache
        .repository
        .list_entries(&EntryFilter::default())
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.alias)
        .collect();
    assert_eq!(aliases, after);
    assert_eq!(catalog.total_fetches(ArtifactKind::Descriptor).await, 12);
}

#[tokio::test]
async fn test_failures_are_terminal() {
    let catalog = MockCatalog::default()
        .with_formats(formats())
        .with_objects(objects("obj", 6, epoch()))
        .with_failure("obj.2", ArtifactKind::Descriptor, MockFailure::Transport)
        .with_failure("obj.4", ArtifactKind::Descriptor, MockFailure::Application(401));
    let cache = Cache::create().await;
    let engine = cache.engine(&catalog, options());

    let first = engine.update(None).await.unwrap();
    assert_eq!((first.descriptors.succeeded, first.descriptors.failed), (4, 2));
    assert_eq!(cache.status("obj.2").await.0, FetchStatus::Failed(FetchStatus::TRANSPORT_FAILURE));
    assert_eq!(cache.status("obj.4").await.0, FetchStatus::Failed(401));

    catalog.clear_failures().await;
    let second = engine.update(Some(Bookmark::Beginning)).await.unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.descriptors.dispatched, 0);
    assert_eq!(catalog.fetch_count("obj.2", ArtifactKind::Descriptor).await, 1);
}

#[tokio::test]
async fn test_incremental_update() {
    let catalog = MockCatalog::default().with_formats(formats()).with_objects(objects("old", 5, epoch()));
    let cache = Cache::create().await;
    let engine = cache.engine(&catalog, options());
    engine.update(None).await.unwrap();
    let last_loaded = engine.last_loaded().await.unwrap().unwrap();

    catalog.add_objects(objects("new", 3, UtcDateTime::now() + Duration::hours(1))).await;
    let outcome = engine.update(None).await.unwrap();
    assert_eq!(outcome.bookmark, Bookmark::Since(last_loaded));
    assert_eq!(outcome.inserted, 3);
    assert_eq!(outcome.descriptors.dispatched, 3);
    let (from, start, _) = *catalog.list_requests().await.last().unwrap();
    assert_eq!((from, start), (Some(last_loaded), 0));
    assert_eq!(cache.repository.count_entries(&EntryFilter::default()).await.unwrap(), 8);
}

#[tokio::test]
async fn test_walk_is_idempotent() {
    let catalog = MockCatalog::default().with_formats(formats()).with_objects(objects("obj", 15, epoch()));
    let cache = Cache::create().await;
    let engine = cache.engine(&catalog, options());
    engine.update(Some(Bookmark::Beginning)).await.unwrap();
    let again = engine.update(Some(Bookmark::Beginning)).await.unwrap();
    assert_eq!(again.inserted, 0);
    assert_eq!(again.descriptors.dispatched, 0);
    assert_eq!(cache.repository.count_entries(&EntryFilter::default()).await.unwrap(), 15);
    assert_eq!(catalog.total_fetches(ArtifactKind::Descriptor).await, 15);
}

#[tokio::test]
async fn test_offset_bookmark() {
    let catalog = MockCatalog::default().with_formats(formats()).with_objects(objects("obj", 15, epoch()));
    let cache = Cache::create().await;
    let engine = cache.engine(&catalog, options());
    let outcome = engine.update(Some(Bookmark::Offset(12))).await.unwrap();
    assert_eq!(outcome.inserted, 3);
    assert!(cache.repository.get_entry("obj.11").await.unwrap().is_none());
    assert!(cache.repository.get_entry("obj.12").await.unwrap().is_some());
}

#[tokio::test]
async fn test_purge_starts_over_with_fresh_aliases() {
    let catalog = MockCatalog::default().with_formats(formats()).with_objects(objects("obj", 4, epoch()));
    let cache = Cache::create().await;
    let engine = cache.engine(&catalog, options());
    engine.update(None).await.unwrap();
    let before = cache.repository.get_entry("obj.0").await.unwrap().unwrap();

    assert_eq!(cache.repository.purge_all().await.unwrap(), 4);
    assert_eq!(cache.repository.count_entries(&EntryFilter::default()).await.unwrap(), 0);
    assert!(cache.repository.list_formats().await.unwrap().is_empty());
    assert!(cache.repository.get_state::<String>(LAST_LOADED).await.unwrap().is_none());
    // Stored artifacts are left alone.
    assert!(cache.store.exists(before.descriptor_path.as_ref().unwrap()).await.unwrap());

    let outcome = engine.update(None).await.unwrap();
    assert_eq!(outcome.bookmark, Bookmark::Beginning);
    assert_eq!(outcome.inserted, 4);
    let after = cache.repository.get_entry("obj.0").await.unwrap().unwrap();
    assert_ne!(before.alias, after.alias);
    assert_eq!(after.descriptor_status, FetchStatus::Success);
}
