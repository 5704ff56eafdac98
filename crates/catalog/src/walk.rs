//! Paged traversal of the remote catalog.

use crate::client::CatalogClient;
use crate::error::{ErrorKind, Result};
use crate::models::ObjectInfo;
use async_stream::stream;
use derive_more::Display;
use futures::Stream;
use time::UtcDateTime;

/// Where a catalog walk starts.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Bookmark {
    /// Every object, from the first.
    #[display("beginning")]
    Beginning,
    /// Objects modified at or after a point in time.
    #[display("since {_0}")]
    Since(UtcDateTime),
    /// Every object, skipping the first `n`.
    #[display("offset {_0}")]
    Offset(u64),
}
impl Bookmark {
    /// Date filter and first offset to request.
    fn query(&self) -> (Option<UtcDateTime>, u64) {
        match self {
            Self::Beginning => (None, 0),
            Self::Since(from) => (Some(*from), 0),
            Self::Offset(start) => (None, *start),
        }
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum PagePhase {
    #[display("begin")]
    Begin,
    #[display("end")]
    End,
}

/// Progress notification, sent before a page is requested and after all of
/// its objects have been yielded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageEvent {
    pub phase: PagePhase,
    pub start: u64,
    pub page_size: u32,
    /// Total reported by the remote; unknown before the first page arrives.
    pub total: Option<u64>,
    /// Objects on this page (always zero at [`PagePhase::Begin`]).
    pub received: u64,
}

/// Walk the catalog from a bookmark, yielding every listed object.
///
/// See [`walk_with`] for details.
pub fn walk(
    client: &dyn CatalogClient,
    bookmark: Bookmark,
    page_size: u32,
) -> impl Stream<Item = Result<ObjectInfo>> + Send + '_ {
    walk_with(client, bookmark, page_size, |_| {})
}

/// Walk the catalog from a bookmark, yielding every listed object and
/// reporting page boundaries to `on_page`.
///
/// The stream is lazy: a page is only requested once every object of the
/// previous page has been consumed. It ends after a page that is short,
/// empty, or reaches the reported total. If a page request fails the stream
/// yields a single [`CatalogWalkFailed`](ErrorKind::CatalogWalkFailed) error
/// and ends; there is no retry.
///
/// # Examples
///
/// ```no_run
/// use futures::TryStreamExt;
/// use ocache_catalog::{Bookmark, CatalogClient, walk_with};
/// # async fn example(client: &dyn CatalogClient) -> ocache_catalog::error::Result<()> {
/// let objects = walk_with(client, Bookmark::Beginning, 1000, |event| {
///     tracing::info!(start = event.start, phase = %event.phase, "Listing page");
/// });
/// futures::pin_mut!(objects);
/// while let Some(object) = objects.try_next().await? {
///     println!("{} ({})", object.identifier, object.format_id);
/// }
/// # Ok(())
/// # }
/// ```
pub fn walk_with<'a, F>(
    client: &'a dyn CatalogClient,
    bookmark: Bookmark,
    page_size: u32,
    mut on_page: F,
) -> impl Stream<Item = Result<ObjectInfo>> + Send + 'a
where
    F: FnMut(&PageEvent) + Send + 'a,
{
    let page_size = page_size.max(1);
    stream! {
        let (from, mut start) = bookmark.query();
        let mut total = None;
        tracing::debug!(%bookmark, page_size, "Walking catalog");
        loop {
            on_page(&PageEvent { phase: PagePhase::Begin, start, page_size, total, received: 0 });
            let page = match client.list_objects(from, start, page_size).await {
                Ok(page) => page,
                Err(err) => {
                    tracing::warn!(start, error = ?err, "Catalog listing failed");
                    yield Err(err.raise(ErrorKind::CatalogWalkFailed(start)));
                    break;
                },
            };
            let received = page.objects.len() as u64;
            let reached_total = page.start.saturating_add(page.count) >= page.total;
            total = Some(page.total);
            for object in page.objects {
                yield Ok(object);
            }
            on_page(&PageEvent { phase: PagePhase::End, start, page_size, total, received });
            if received == 0 || received < u64::from(page_size) || reached_total {
                break;
            }
            start += received;
        }
    }
}
