//! In-memory catalog for testing.

use crate::client::{CatalogClient, CatalogHandle, FetchResponse};
use crate::error::{ErrorKind, Result};
use crate::models::{ObjectInfo, ObjectPage, RemoteFormat};
use async_trait::async_trait;
use ocache_storage::ArtifactKind;
use std::collections::HashMap;
use std::io::Cursor;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use time::UtcDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::RwLock;

/// How a scripted fetch should go wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// No answer at all.
    Transport,
    /// An error document with this code.
    Application(i64),
    /// A non-success status without an error document.
    Status(i64),
    /// A success status, but the body stream breaks part way through.
    BrokenBody,
}

type Key = (String, ArtifactKind);

#[derive(Default)]
struct State {
    objects: Vec<ObjectInfo>,
    formats: Vec<RemoteFormat>,
    bodies: HashMap<Key, Vec<u8>>,
    failures: HashMap<Key, MockFailure>,
    fail_listing_at: Option<u64>,
    fail_formats: bool,
    list_requests: Vec<(Option<UtcDateTime>, u64, u32)>,
    fetches: HashMap<Key, usize>,
}

/// In-memory catalog for testing.
///
/// Objects are listed in the order they were added (keep them sorted by
/// modification time to mimic a real catalog). Unless overridden, the
/// descriptor of every object is a small system metadata document and its
/// content is a short text body. All clones and worker handles share state,
/// so a test can script failures and inspect requests after the fact.
///
/// # Examples
///
/// ```ignore
/// use ocache_catalog::{ArtifactKind, CatalogClient, MockCatalog, ObjectInfo};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let catalog = MockCatalog::default().with_objects([ObjectInfo {
///     identifier: "doc.1".to_string(),
///     format_id: "text/csv".to_string(),
///     size: 42,
///     modified: time::UtcDateTime::now(),
/// }]);
/// let page = catalog.list_objects(None, 0, 100).await?;
/// assert_eq!(page.total, 1);
/// assert!(catalog.fetch("doc.1", ArtifactKind::Descriptor).await?.is_success());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MockCatalog {
    base_url: String,
    state: Arc<RwLock<State>>,
    handles: Arc<AtomicUsize>,
}

impl Default for MockCatalog {
    fn default() -> Self {
        Self {
            base_url: "https://cn.example.org/cn".to_string(),
            state: Arc::default(),
            handles: Arc::default(),
        }
    }
}

impl MockCatalog {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Pre-populate the catalog.
    ///
    /// Builder methods are meant for test setup only, and panic if a request
    /// is in flight.
    pub fn with_objects(self, objects: impl IntoIterator<Item = ObjectInfo>) -> Self {
        self.setup(|state| state.objects.extend(objects))
    }

    pub fn with_formats(self, formats: impl IntoIterator<Item = RemoteFormat>) -> Self {
        self.setup(|state| state.formats.extend(formats))
    }

    /// Serve a specific body for one artifact instead of the generated one.
    pub fn with_body(self, identifier: impl Into<String>, kind: ArtifactKind, body: impl Into<Vec<u8>>) -> Self {
        self.setup(|state| {
            state.bodies.insert((identifier.into(), kind), body.into());
        })
    }

    /// Make every fetch of one artifact fail.
    pub fn with_failure(self, identifier: impl Into<String>, kind: ArtifactKind, failure: MockFailure) -> Self {
        self.setup(|state| {
            state.failures.insert((identifier.into(), kind), failure);
        })
    }

    fn setup(self, f: impl FnOnce(&mut State)) -> Self {
        match self.state.try_write() {
            Ok(mut state) => f(&mut state),
            // The panic here is DELIBERATE: the mock is only ever used in
            // tests, and a test that mutates a catalog in use is wrong.
            Err(_) => panic!("MockCatalog: builder used while the catalog is in use"),
        }
        self
    }

    /// Add objects to a catalog that is already in use (e.g. between two
    /// sync cycles).
    pub async fn add_objects(&self, objects: impl IntoIterator<Item = ObjectInfo>) {
        self.state.write().await.objects.extend(objects);
    }

    /// Make the listing request starting at this offset fail with a
    /// transport error.
    pub async fn fail_listing_at(&self, start: u64) {
        self.state.write().await.fail_listing_at = Some(start);
    }

    pub async fn fail_formats(&self, fail: bool) {
        self.state.write().await.fail_formats = fail;
    }

    pub async fn clear_failures(&self) {
        let mut state = self.state.write().await;
        state.failures.clear();
        state.fail_listing_at = None;
        state.fail_formats = false;
    }

    /// Every listing request made so far, as `(from, start, count)`.
    pub async fn list_requests(&self) -> Vec<(Option<UtcDateTime>, u64, u32)> {
        self.state.read().await.list_requests.clone()
    }

    /// How many times an artifact has been fetched.
    pub async fn fetch_count(&self, identifier: &str, kind: ArtifactKind) -> usize {
        self.state.read().await.fetches.get(&(identifier.to_string(), kind)).copied().unwrap_or(0)
    }

    /// Total number of fetches of one kind of artifact.
    pub async fn total_fetches(&self, kind: ArtifactKind) -> usize {
        self.state.read().await.fetches.iter().filter(|((_, k), _)| *k == kind).map(|(_, n)| n).sum()
    }

    /// Number of worker handles handed out.
    pub fn worker_handles(&self) -> usize {
        self.handles.load(Ordering::Relaxed)
    }

    fn descriptor(object: &ObjectInfo) -> Vec<u8> {
        let modified = object.modified.format(&Rfc3339).unwrap_or_default();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<d1:systemMetadata xmlns:d1="http://ns.dataone.org/service/types/v1">
  <serialVersion>1</serialVersion>
  <identifier>{}</identifier>
  <formatId>{}</formatId>
  <size>{}</size>
  <dateUploaded>{modified}</dateUploaded>
  <dateSysMetadataModified>{modified}</dateSysMetadataModified>
  <originMemberNode>urn:node:MOCK</originMemberNode>
  <authoritativeMemberNode>urn:node:MOCK</authoritativeMemberNode>
</d1:systemMetadata>
"#,
            escape(&object.identifier),
            escape(&object.format_id),
            object.size,
        )
        .into_bytes()
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Yields half of its bytes, then fails.
struct BrokenBody {
    data: Vec<u8>,
    sent: bool,
}
impl AsyncRead for BrokenBody {
    fn poll_read(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        if self.sent {
            return Poll::Ready(Err(std::io::Error::other("connection reset by peer")));
        }
        self.sent = true;
        let half = (self.data.len() / 2).min(buf.remaining());
        buf.put_slice(&self.data[..half]);
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl CatalogClient for MockCatalog {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn list_objects(&self, from: Option<UtcDateTime>, start: u64, count: u32) -> Result<ObjectPage> {
        let mut state = self.state.write().await;
        state.list_requests.push((from, start, count));
        if state.fail_listing_at == Some(start) {
            exn::bail!(ErrorKind::Transport("connection refused".to_string()));
        }
        let matching: Vec<&ObjectInfo> =
            state.objects.iter().filter(|o| from.is_none_or(|from| o.modified >= from)).collect();
        let total = matching.len() as u64;
        let objects: Vec<ObjectInfo> = matching
            .into_iter()
            .skip(usize::try_from(start).unwrap_or(usize::MAX))
            .take(count as usize)
            .cloned()
            .collect();
        Ok(ObjectPage { count: objects.len() as u64, objects, start, total })
    }

    async fn list_formats(&self) -> Result<Vec<RemoteFormat>> {
        let state = self.state.read().await;
        if state.fail_formats {
            exn::bail!(ErrorKind::Transport("connection refused".to_string()));
        }
        Ok(state.formats.clone())
    }

    async fn fetch(&self, identifier: &str, kind: ArtifactKind) -> Result<FetchResponse> {
        let key = (identifier.to_string(), kind);
        let mut state = self.state.write().await;
        *state.fetches.entry(key.clone()).or_default() += 1;
        let body = match state.bodies.get(&key) {
            Some(body) => body.clone(),
            None => match state.objects.iter().find(|o| o.identifier == identifier) {
                Some(object) => match kind {
                    ArtifactKind::Descriptor => Self::descriptor(object),
                    ArtifactKind::Content => format!("content of {identifier}\n").into_bytes(),
                },
                None => exn::bail!(ErrorKind::Application { code: 404, detail: format!("NotFound: {identifier}") }),
            },
        };
        match state.failures.get(&key) {
            None => Ok(FetchResponse::new(FetchResponse::SUCCESS, Cursor::new(body))),
            Some(MockFailure::Transport) => exn::bail!(ErrorKind::Transport("connection reset".to_string())),
            Some(MockFailure::Application(code)) => {
                exn::bail!(ErrorKind::Application { code: *code, detail: "NotAuthorized".to_string() })
            },
            Some(MockFailure::Status(status)) => Ok(FetchResponse::new(*status, Cursor::new(Vec::new()))),
            Some(MockFailure::BrokenBody) => {
                Ok(FetchResponse::new(FetchResponse::SUCCESS, BrokenBody { data: body, sent: false }))
            },
        }
    }

    fn worker_client(&self) -> CatalogHandle {
        self.handles.fetch_add(1, Ordering::Relaxed);
        Arc::new(self.clone())
    }
}
