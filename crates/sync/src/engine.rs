//! The sync cycle.
//!
//! ```text
//! Idle → RefreshingFormats → Walking → Dispatching → PersistingState → Idle
//!                  └───────────┴──────────┴────────────────┴──→ Failed
//! ```

use crate::error::{ErrorKind, Result};
use crate::pool::{FetchPool, PoolReport};
use derive_more::Display;
use exn::ResultExt;
use futures::StreamExt;
use ocache_cache::error::ErrorKind as CacheErrorKind;
use ocache_cache::{EntryFilter, FetchStatus, NewEntry, ObjectFormat, Repository};
use ocache_catalog::{ArtifactKind, Bookmark, CatalogHandle, PageEvent, walk_with};
use ocache_storage::ContentStore;
use ocache_telemetry::Gauge;
use std::collections::HashSet;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcDateTime};
use tokio::sync::{Mutex, watch};
use tracing::instrument;

/// State key: RFC 3339 time at which the last successful cycle started.
pub const LAST_LOADED: &str = "lastLoaded";
/// State key: base URL of the remote the cache was last synced against.
pub const BASE_URL: &str = "baseUrl";
/// Gauge counting entries created during the current walk.
pub const PIDS_GAUGE: &str = "PIDs";

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    #[display("idle")]
    Idle,
    #[display("refreshing formats")]
    RefreshingFormats,
    #[display("walking")]
    Walking,
    #[display("dispatching")]
    Dispatching,
    #[display("persisting state")]
    PersistingState,
    /// The last cycle failed. The next one starts over.
    #[display("failed")]
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    pub workers: usize,
    pub page_size: u32,
    pub queue_capacity: usize,
    pub load_content: bool,
    /// Format types whose content is fetched. Empty means every type.
    pub content_format_types: Vec<String>,
}
impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            workers: FetchPool::DEFAULT_WORKERS,
            page_size: 1000,
            queue_capacity: FetchPool::DEFAULT_QUEUE_CAPACITY,
            load_content: false,
            content_format_types: vec!["METADATA".to_string(), "RESOURCE".to_string()],
        }
    }
}

/// Keeps cycles from overlapping.
///
/// Every engine gets its own lock by default. Engines built over the same
/// index, for instance one per remote client, should share one through
/// [`SyncEngine::with_cycle_lock`].
#[derive(Debug, Clone, Default)]
pub struct CycleLock(Arc<Mutex<()>>);

/// What one [`SyncEngine::update`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub bookmark: Bookmark,
    /// Entries created by the walk.
    pub inserted: u64,
    pub descriptors: PoolReport,
    /// `None` unless content loading is enabled.
    pub content: Option<PoolReport>,
}

/// Keeps the cache index in step with the remote catalog.
///
/// Every step can be run on its own, but [`update`](Self::update) is the
/// normal way in: it runs a full cycle and is the only thing that moves the
/// bookmark forward.
pub struct SyncEngine {
    repository: Repository,
    store: Arc<ContentStore>,
    client: CatalogHandle,
    gauge: Arc<dyn Gauge>,
    options: SyncOptions,
    state: watch::Sender<EngineState>,
    cycle: CycleLock,
}

impl SyncEngine {
    pub fn new(repository: Repository, store: Arc<ContentStore>, client: CatalogHandle, gauge: Arc<dyn Gauge>) -> Self {
        Self {
            repository,
            store,
            client,
            gauge,
            options: SyncOptions::default(),
            state: watch::Sender::new(EngineState::Idle),
            cycle: CycleLock::default(),
        }
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cycle_lock(mut self, cycle: CycleLock) -> Self {
        self.cycle = cycle;
        self
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    /// Watch state transitions as they happen.
    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    fn transition(&self, next: EngineState) {
        let previous = self.state.send_replace(next);
        tracing::info!(from = %previous, to = %next, "Sync engine transition");
    }

    /// When the last successful cycle started.
    pub async fn last_loaded(&self) -> Result<Option<UtcDateTime>> {
        let Some(text) = self.repository.get_state::<String>(LAST_LOADED).await.or_raise(|| ErrorKind::Cache)? else {
            return Ok(None);
        };
        Ok(Some(OffsetDateTime::parse(&text, &Rfc3339).or_raise(|| ErrorKind::Cache)?.to_utc()))
    }

    /// Base URL recorded by the last successful cycle.
    pub async fn recorded_base_url(&self) -> Result<Option<String>> {
        self.repository.get_state(BASE_URL).await.or_raise(|| ErrorKind::Cache)
    }

    /// The bookmark a cycle starts from: the override if given, otherwise the
    /// start of the last successful cycle, otherwise the very beginning.
    pub async fn resolve_bookmark(&self, bookmark: Option<Bookmark>) -> Result<Bookmark> {
        if let Some(bookmark) = bookmark {
            return Ok(bookmark);
        }
        Ok(match self.last_loaded().await? {
            Some(since) => Bookmark::Since(since),
            None => Bookmark::Beginning,
        })
    }

    /// Upsert every format the remote knows about. Returns how many.
    #[instrument(level = "info", skip(self))]
    pub async fn refresh_formats(&self) -> Result<usize> {
        let formats = self.client.list_formats().await.or_raise(|| ErrorKind::Formats)?;
        for format in &formats {
            let format = ObjectFormat::new(&format.format_id, &format.format_type, &format.name);
            self.repository.upsert_format(&format).await.or_raise(|| ErrorKind::Formats)?;
        }
        tracing::info!(count = formats.len(), "Object formats refreshed");
        Ok(formats.len())
    }

    /// Walk the remote catalog from `bookmark`, creating an entry for every
    /// identifier not already in `known`. New identifiers are added to
    /// `known`. Returns how many entries were created.
    ///
    /// Entries created before a failure are kept.
    #[instrument(level = "info", skip(self, known), fields(known = known.len()))]
    pub async fn walk_catalog(&self, bookmark: Bookmark, known: &mut HashSet<String>) -> Result<u64> {
        let objects = walk_with(&*self.client, bookmark, self.options.page_size, log_page);
        futures::pin_mut!(objects);
        let mut inserted = 0;
        while let Some(object) = objects.next().await {
            let object = object.or_raise(|| ErrorKind::Walk)?;
            if known.contains(&object.identifier) {
                continue;
            }
            let entry = NewEntry {
                identifier: object.identifier,
                format_id: object.format_id,
                size: object.size,
                modified: object.modified,
            };
            match self.repository.create_entry(&entry).await {
                Ok(created) => {
                    tracing::debug!(identifier = %created.identifier, alias = %created.alias, "Entry created");
                    inserted += 1;
                    self.gauge.gauge(PIDS_GAUGE, inserted as f64);
                },
                // Listed twice within one walk, or created behind our back.
                Err(err) if matches!(&*err, CacheErrorKind::DuplicateEntry(_)) => {
                    tracing::debug!(identifier = %entry.identifier, "Entry already exists");
                },
                Err(err) => return Err(err.raise(ErrorKind::Cache)),
            }
            known.insert(entry.identifier);
        }
        tracing::info!(inserted, "Catalog walk complete");
        Ok(inserted)
    }

    fn pool(&self, kind: ArtifactKind) -> FetchPool {
        FetchPool::new(kind, self.repository.clone(), Arc::clone(&self.store), Arc::clone(&self.client), Arc::clone(&self.gauge))
            .workers(self.options.workers)
            .queue_capacity(self.options.queue_capacity)
    }

    /// Fetch the descriptor of every entry whose descriptor is still pending.
    pub async fn fetch_descriptors(&self) -> Result<PoolReport> {
        let filter = EntryFilter::default().with_descriptor_status(FetchStatus::Pending);
        let identifiers = self.repository.list_identifiers(&filter).await.or_raise(|| ErrorKind::Cache)?;
        self.pool(ArtifactKind::Descriptor).run(identifiers).await
    }

    /// Fetch the content of every entry of a configured format type whose
    /// content is still pending.
    pub async fn fetch_content(&self) -> Result<PoolReport> {
        let filter = EntryFilter::default()
            .with_format_types(&self.options.content_format_types)
            .with_content_status(FetchStatus::Pending);
        let identifiers = self.repository.list_identifiers(&filter).await.or_raise(|| ErrorKind::Cache)?;
        self.pool(ArtifactKind::Content).run(identifiers).await
    }

    /// Run one full cycle.
    ///
    /// Cycles never overlap; a second call waits for the first to finish. On
    /// failure the engine ends up [`Failed`](EngineState::Failed) and the
    /// bookmark is left where it was, so the next cycle covers the same
    /// ground again.
    #[instrument(level = "info", skip(self))]
    pub async fn update(&self, bookmark: Option<Bookmark>) -> Result<SyncOutcome> {
        let _running = self.cycle.0.lock().await;
        let started = UtcDateTime::now();
        match self.run_cycle(bookmark, started).await {
            Ok(outcome) => {
                self.transition(EngineState::Idle);
                Ok(outcome)
            },
            Err(err) => {
                tracing::error!(error = ?err, "Sync cycle failed");
                self.transition(EngineState::Failed);
                Err(err)
            },
        }
    }

    async fn run_cycle(&self, bookmark: Option<Bookmark>, started: UtcDateTime) -> Result<SyncOutcome> {
        let bookmark = self.resolve_bookmark(bookmark).await?;
        tracing::info!(%bookmark, base_url = self.client.base_url(), "Starting sync cycle");

        self.transition(EngineState::RefreshingFormats);
        self.refresh_formats().await?;

        self.transition(EngineState::Walking);
        let mut known = self.repository.known_identifiers().await.or_raise(|| ErrorKind::Cache)?;
        let inserted = self.walk_catalog(bookmark, &mut known).await?;
        drop(known);

        self.transition(EngineState::Dispatching);
        let descriptors = self.fetch_descriptors().await?;
        let content = match self.options.load_content {
            true => Some(self.fetch_content().await?),
            false => None,
        };

        self.transition(EngineState::PersistingState);
        // Full precision, so that cycles started within the same second still
        // move the bookmark forward.
        let started = started.format(&Rfc3339).or_raise(|| ErrorKind::Cache)?;
        self.repository.set_state(LAST_LOADED, &started).await.or_raise(|| ErrorKind::Cache)?;
        self.repository.set_state(BASE_URL, self.client.base_url()).await.or_raise(|| ErrorKind::Cache)?;

        Ok(SyncOutcome { bookmark, inserted, descriptors, content })
    }
}

fn log_page(event: &PageEvent) {
    tracing::info!(
        phase = %event.phase,
        start = event.start,
        page_size = event.page_size,
        total = ?event.total,
        received = event.received,
        "Object list page"
    );
}
