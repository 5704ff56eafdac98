/// A remote object format, e.g. `eml://ecoinformatics.org/eml-2.1.1` of type
/// `METADATA`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectFormat {
    pub format_id: String,
    /// Broad classification: `DATA`, `METADATA`, `RESOURCE`, ...
    pub format_type: String,
    pub name: String,
}
impl ObjectFormat {
    pub fn new(format_id: impl Into<String>, format_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            format_id: format_id.into(),
            format_type: format_type.into(),
            name: name.into(),
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct FormatRow {
    pub(crate) format_id: String,
    pub(crate) format_type: String,
    pub(crate) name: String,
}
impl From<FormatRow> for ObjectFormat {
    fn from(row: FormatRow) -> Self {
        Self {
            format_id: row.format_id,
            format_type: row.format_type,
            name: row.name,
        }
    }
}
