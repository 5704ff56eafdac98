//! Concurrent artifact fetching.
//!
//! A [`FetchPool`] drains a list of identifiers through a fixed number of
//! worker tasks. Every worker owns its own index handle and its own catalog
//! client; the only things they share are the bounded queue and the
//! throughput meter.

use crate::error::{ErrorKind, Result};
use ocache_cache::{CacheEntry, FetchStatus, Repository};
use ocache_catalog::error::ErrorKind as CatalogErrorKind;
use ocache_catalog::{ArtifactKind, CatalogHandle};
use ocache_storage::ContentStore;
use ocache_telemetry::{Gauge, Throughput};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Instant;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tracing::instrument;

/// Gauge reporting how many identifiers are waiting in the queue.
pub const QUEUE_GAUGE: &str = "QSize";

/// Tally of one [`FetchPool::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolReport {
    /// Distinct identifiers handed to the workers.
    pub dispatched: u64,
    pub succeeded: u64,
    /// Fetched, or tried to, and recorded a failure status.
    pub failed: u64,
    /// Not in the index, or already in a terminal state.
    pub skipped: u64,
    /// The index could not be read or written, so whatever happened was not
    /// recorded. These entries are still pending.
    pub unrecorded: u64,
}
impl PoolReport {
    fn merge(&mut self, other: PoolReport) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.unrecorded += other.unrecorded;
    }
}

/// Name of the throughput gauge for one kind of artifact.
pub fn throughput_gauge(kind: ArtifactKind) -> String {
    format!("{}.sec-1", kind.suffix())
}

pub struct FetchPool {
    kind: ArtifactKind,
    repository: Repository,
    store: Arc<ContentStore>,
    client: CatalogHandle,
    gauge: Arc<dyn Gauge>,
    workers: usize,
    queue_capacity: usize,
}

impl FetchPool {
    pub const DEFAULT_WORKERS: usize = 5;
    pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

    pub fn new(
        kind: ArtifactKind,
        repository: Repository,
        store: Arc<ContentStore>,
        client: CatalogHandle,
        gauge: Arc<dyn Gauge>,
    ) -> Self {
        Self {
            kind,
            repository,
            store,
            client,
            gauge,
            workers: Self::DEFAULT_WORKERS,
            queue_capacity: Self::DEFAULT_QUEUE_CAPACITY,
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Fetch one artifact of every given entry.
    ///
    /// Duplicate identifiers are dropped. Returns once every worker has
    /// drained the queue and exited. A failed fetch is recorded on its entry
    /// and counted; it never stops the pool.
    ///
    /// Returns [`ErrorKind::WorkerFailed`] if a worker task panicked.
    #[instrument(level = "info", skip_all, fields(kind = %self.kind, workers = self.workers))]
    pub async fn run<I>(&self, identifiers: I) -> Result<PoolReport>
    where
        I: IntoIterator<Item = String>,
    {
        let mut seen = HashSet::new();
        let identifiers: Vec<String> = identifiers.into_iter().filter(|id| seen.insert(id.clone())).collect();
        let mut report = PoolReport { dispatched: identifiers.len() as u64, ..PoolReport::default() };
        if identifiers.is_empty() {
            tracing::debug!("Nothing to fetch");
            return Ok(report);
        }
        tracing::info!(count = identifiers.len(), "Fetching artifacts");

        let (sender, receiver) = mpsc::channel::<String>(self.queue_capacity);
        let queue = Arc::new(Mutex::new(receiver));
        let meter = Arc::new(StdMutex::new(Throughput::default()));
        let mut workers = JoinSet::new();
        for id in 0..self.workers.min(identifiers.len()) {
            let worker = Worker {
                id,
                kind: self.kind,
                rate_gauge: throughput_gauge(self.kind),
                repository: self.repository.clone(),
                store: Arc::clone(&self.store),
                client: self.client.worker_client(),
                gauge: Arc::clone(&self.gauge),
                queue: Arc::clone(&queue),
                meter: Arc::clone(&meter),
            };
            workers.spawn(worker.run());
        }
        // Only the workers may keep the receiver alive, so that a send fails
        // once every one of them is gone.
        drop(queue);

        for identifier in identifiers {
            if sender.send(identifier).await.is_err() {
                tracing::error!("Every fetch worker has stopped, abandoning the rest of the queue");
                break;
            }
        }
        drop(sender);

        let mut lost = 0;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(tally) => report.merge(tally),
                Err(err) => {
                    tracing::error!(error = %err, "Fetch worker stopped unexpectedly");
                    lost += 1;
                },
            }
        }
        tracing::info!(
            dispatched = report.dispatched,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            unrecorded = report.unrecorded,
            "Fetch pool drained"
        );
        if lost > 0 {
            exn::bail!(ErrorKind::WorkerFailed(lost));
        }
        Ok(report)
    }
}

enum Outcome {
    Succeeded,
    Failed,
    Skipped,
    Unrecorded,
}

struct Worker {
    id: usize,
    kind: ArtifactKind,
    rate_gauge: String,
    repository: Repository,
    store: Arc<ContentStore>,
    client: CatalogHandle,
    gauge: Arc<dyn Gauge>,
    queue: Arc<Mutex<mpsc::Receiver<String>>>,
    meter: Arc<StdMutex<Throughput>>,
}

impl Worker {
    async fn run(self) -> PoolReport {
        let mut tally = PoolReport::default();
        loop {
            let next = {
                let mut queue = self.queue.lock().await;
                let next = queue.recv().await;
                self.gauge.gauge(QUEUE_GAUGE, queue.len() as f64);
                next
            };
            let Some(identifier) = next else { break };
            match self.process(&identifier).await {
                Outcome::Succeeded => tally.succeeded += 1,
                Outcome::Failed => tally.failed += 1,
                Outcome::Skipped => tally.skipped += 1,
                Outcome::Unrecorded => tally.unrecorded += 1,
            }
        }
        tracing::debug!(worker = self.id, kind = %self.kind, "Fetch worker finished");
        tally
    }

    #[instrument(level = "debug", skip(self), fields(worker = self.id, kind = %self.kind))]
    async fn process(&self, identifier: &str) -> Outcome {
        let entry = match self.repository.get_entry(identifier).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                tracing::warn!("No cache entry for identifier, skipping");
                return Outcome::Skipped;
            },
            Err(err) => {
                tracing::error!(error = ?err, "Cannot load cache entry, left pending");
                return Outcome::Unrecorded;
            },
        };
        let current = match self.kind {
            ArtifactKind::Descriptor => entry.descriptor_status,
            ArtifactKind::Content => entry.content_status,
        };
        if current.is_terminal() {
            tracing::debug!(status = %current, "Already fetched, skipping");
            return Outcome::Skipped;
        }

        let (status, path) = self.fetch(&entry).await;
        if let Err(err) = self.repository.update_status(identifier, self.kind, status, path.as_deref()).await {
            tracing::error!(%status, error = ?err, "Cannot record fetch status, left pending");
            return Outcome::Unrecorded;
        }
        if status != FetchStatus::Success {
            return Outcome::Failed;
        }
        tracing::info!("Fetched");
        self.record_success();
        Outcome::Succeeded
    }

    async fn fetch(&self, entry: &CacheEntry) -> (FetchStatus, Option<PathBuf>) {
        let response = match self.client.fetch(&entry.identifier, self.kind).await {
            Ok(response) => response,
            Err(err) => {
                let code = match &*err {
                    CatalogErrorKind::Application { code, .. } => failure_code(*code),
                    _ => FetchStatus::TRANSPORT_FAILURE,
                };
                tracing::warn!(code, error = ?err, "Fetch failed");
                return (FetchStatus::Failed(code), None);
            },
        };
        if !response.is_success() {
            tracing::warn!(status = response.status, "Remote answered without success");
            return (FetchStatus::Failed(FetchStatus::UNEXPLAINED_FAILURE), None);
        }
        match self.store.write(&entry.alias, self.kind, response.body).await {
            Ok(path) => (FetchStatus::Success, Some(path)),
            Err(err) => {
                tracing::error!(error = ?err, "Cannot store artifact");
                (FetchStatus::Failed(FetchStatus::STORE_FAILURE), None)
            },
        }
    }

    fn record_success(&self) {
        let rate = self.meter.lock().unwrap_or_else(PoisonError::into_inner).record(Instant::now());
        if let Some(rate) = rate {
            self.gauge.gauge(&self.rate_gauge, rate);
        }
    }
}

/// An application error code that would read back as pending or success is
/// recorded as unexplained instead.
fn failure_code(code: i64) -> i64 {
    match FetchStatus::from_code(code) {
        FetchStatus::Failed(code) => code,
        _ => FetchStatus::UNEXPLAINED_FAILURE,
    }
}
