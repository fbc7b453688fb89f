// src/target/marker.rs

/// Database-backed completion evidence: a row in the `task_markers` table
/// keyed by `(identity, schema)`.
///
/// The marker row is only ever written by
/// [`Database::commit_with_marker`](crate::db::Database::commit_with_marker),
/// in the same transaction as the task's data mutation. A marker is
/// therefore never visible without its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerTarget {
    /// Task identity string, e.g. `normalize-stations(bordeaux)`.
    pub identity: String,
    /// City schema the mutation belongs to.
    pub schema: String,
}

impl MarkerTarget {
    pub fn new(identity: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            schema: schema.into(),
        }
    }
}
