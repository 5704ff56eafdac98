use crate::models::FetchStatus;

/// Narrows entry listings and counts. Every condition that is set must hold.
///
/// ```
/// use ocache_cache::{EntryFilter, FetchStatus};
///
/// let pending_metadata = EntryFilter::default()
///     .with_format_types(["METADATA", "RESOURCE"])
///     .with_content_status(FetchStatus::Pending);
/// assert_eq!(pending_metadata.format_types.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryFilter {
    /// Entry format type is any of these. Entries with an unknown format never
    /// match a non-empty list.
    pub format_types: Vec<String>,
    pub descriptor_status: Option<FetchStatus>,
    pub content_status: Option<FetchStatus>,
    pub limit: Option<u32>,
}
impl EntryFilter {
    pub fn with_format_types<I, S>(mut self, format_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.format_types = format_types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_descriptor_status(mut self, status: FetchStatus) -> Self {
        self.descriptor_status = Some(status);
        self
    }

    pub fn with_content_status(mut self, status: FetchStatus) -> Self {
        self.content_status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}
