use time::UtcDateTime;

/// One object as listed by the remote catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub identifier: String,
    pub format_id: String,
    pub size: u64,
    /// When the remote last changed the object's descriptor.
    pub modified: UtcDateTime,
}

/// One page of a catalog listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectPage {
    pub objects: Vec<ObjectInfo>,
    /// Offset of the first object on this page.
    pub start: u64,
    /// Number of objects on this page.
    pub count: u64,
    /// Number of objects matching the query across all pages.
    pub total: u64,
}

/// An object format known to the remote catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteFormat {
    pub format_id: String,
    pub format_type: String,
    pub name: String,
}
