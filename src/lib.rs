//! Incrementally-updated local replica of a remote object catalog.
//!
//! [`ObjectCache`] wires a [`Config`] to the pieces that do the work: the
//! SQLite index ([`ocache_cache`]), the sharded content tree
//! ([`ocache_storage`]), statsd telemetry ([`ocache_telemetry`]) and the sync
//! engine ([`ocache_sync`]). The remote itself is anything implementing
//! [`CatalogClient`](ocache_catalog::CatalogClient).
//!
//! ```no_run
//! # use exn::ResultExt;
//! # use ocache::error::ErrorKind;
//! # async fn example(client: ocache_catalog::CatalogHandle) -> ocache::error::Result<()> {
//! let config = ocache::Config::load().or_raise(|| ErrorKind::Config)?;
//! let cache = ocache::ObjectCache::open(&config).await?;
//! let outcome = cache.update(client, None).await?;
//! println!("{} new objects", outcome.inserted);
//! println!("{}", cache.summary().await?.to_json().or_raise(|| ErrorKind::Sync)?);
//! cache.close().await;
//! # Ok(())
//! # }
//! ```

pub mod error;

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use ocache_cache::{Database, Repository};
use ocache_catalog::{Bookmark, CatalogHandle};
use ocache_storage::ContentStore;
use ocache_sync::enrich::EnrichReport;
use ocache_sync::report::{REPORTING_DATES, Summary};
use ocache_sync::{CycleLock, SyncEngine, SyncOptions, SyncOutcome};
use ocache_telemetry::{Gauge, StatsdClient};
use std::sync::Arc;
use tracing::instrument;

pub use ocache_config::Config;

fn sync_options(config: &Config) -> SyncOptions {
    SyncOptions {
        workers: config.sync.workers,
        page_size: config.sync.page_size,
        queue_capacity: config.sync.queue_capacity,
        load_content: config.sync.load_content,
        content_format_types: config.sync.content_format_types.clone(),
    }
}

/// An open local cache.
pub struct ObjectCache {
    config: Config,
    database: Database,
    repository: Repository,
    store: Arc<ContentStore>,
    gauge: Arc<dyn Gauge>,
    cycle: CycleLock,
}

impl ObjectCache {
    /// Open (creating if needed) the cache described by `config`, reporting
    /// to the configured statsd daemon.
    ///
    /// An unresolvable statsd host only disables telemetry.
    pub async fn open(config: &Config) -> Result<Self> {
        let statsd = &config.statsd;
        let gauge = match StatsdClient::new(&statsd.host, statsd.port, &statsd.prefix) {
            Ok(client) => client,
            Err(err) => {
                tracing::warn!(host = %statsd.host, error = ?err, "Telemetry disabled");
                StatsdClient::disabled(&statsd.prefix)
            },
        };
        Self::open_with_gauge(config, Arc::new(gauge)).await
    }

    /// Open the cache, sending gauges somewhere other than statsd.
    #[instrument(level = "info", skip_all, fields(path = %config.cache.path.display()))]
    pub async fn open_with_gauge(config: &Config, gauge: Arc<dyn Gauge>) -> Result<Self> {
        config.validate().or_raise(|| ErrorKind::Config)?;
        // Creates the cache directory too, so it must come before the index.
        let store = ContentStore::new(config.content_path()).or_raise(|| ErrorKind::Storage)?;
        // One connection per fetch worker, plus one for the engine itself.
        let connections = u32::try_from(config.sync.workers.saturating_add(1)).unwrap_or(u32::MAX);
        let database =
            Database::connect_with_capacity(config.database_path(), connections).await.or_raise(|| ErrorKind::Cache)?;
        let repository = Repository::from(&database);
        tracing::info!(database = %config.database_path().display(), "Cache opened");
        Ok(Self {
            config: config.clone(),
            database,
            repository,
            store: Arc::new(store),
            gauge,
            cycle: CycleLock::default(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    /// A sync engine for this cache, talking to `client`.
    ///
    /// Every engine handed out shares one cycle lock, so cycles over this
    /// cache never overlap, whichever engine runs them.
    pub fn engine(&self, client: CatalogHandle) -> SyncEngine {
        SyncEngine::new(self.repository.clone(), Arc::clone(&self.store), client, Arc::clone(&self.gauge))
            .with_options(sync_options(&self.config))
            .with_cycle_lock(self.cycle.clone())
    }

    /// Run one sync cycle against `client`, waiting for any cycle already
    /// running on this cache. See [`SyncEngine::update`].
    pub async fn update(&self, client: CatalogHandle, bookmark: Option<Bookmark>) -> Result<SyncOutcome> {
        let current = client.base_url().to_string();
        let engine = self.engine(client);
        let recorded = engine.recorded_base_url().await.or_raise(|| ErrorKind::Sync)?;
        if let Some(recorded) = recorded.filter(|recorded| *recorded != current) {
            tracing::warn!(%recorded, %current, "Remote differs from the one this cache was last synced against");
        }
        engine.update(bookmark).await.or_raise(|| ErrorKind::Sync)
    }

    /// Summary of the cache, against the base URL it was last synced with
    /// (or the configured one, if it never was).
    pub async fn summary(&self) -> Result<Summary> {
        let recorded: Option<String> =
            self.repository.get_state(ocache_sync::BASE_URL).await.or_raise(|| ErrorKind::Cache)?;
        let base_url = recorded.unwrap_or_else(|| self.config.environment.base_url.clone());
        ocache_sync::report::summary(&self.repository, &base_url).await.or_raise(|| ErrorKind::Sync)
    }

    /// Upload growth over the standard reporting dates, as CSV.
    pub async fn upload_report(&self) -> Result<String> {
        let rows = ocache_sync::report::count_by_upload_date(&self.repository, &REPORTING_DATES)
            .await
            .or_raise(|| ErrorKind::Sync)?;
        Ok(ocache_sync::report::render_csv(&rows))
    }

    /// Back-fill provenance from stored descriptors.
    pub async fn enrich(&self, limit: Option<u32>) -> Result<EnrichReport> {
        ocache_sync::enrich::enrich(&self.repository, &self.store, self.gauge.as_ref(), limit)
            .await
            .or_raise(|| ErrorKind::Sync)
    }

    /// Forget every entry, format and bookmark. Stored artifacts stay on
    /// disk; the next sync starts from the beginning.
    pub async fn purge(&self) -> Result<u64> {
        tracing::warn!("Purging all content from the cache index");
        self.repository.purge_all().await.or_raise(|| ErrorKind::Cache)
    }

    pub async fn close(self) {
        self.database.close().await;
    }
}
