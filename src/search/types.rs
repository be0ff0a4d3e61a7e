//! Shared query/result types for the search index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single scored match returned by [`crate::search::SearchIndex::search`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub page_id: String,
    pub score: f32,
    /// At most 240 characters, with matched terms wrapped in `«…»`.
    pub snippet: String,
}

/// Structured filter applied alongside a text query. Every field is
/// optional; an empty `SearchFilter` matches everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilter {
    pub notebook_ids: Option<Vec<String>>,
    pub section_ids: Option<Vec<String>>,
    pub modified_after: Option<DateTime<Utc>>,
    pub modified_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Snapshot of index health and size, returned by
/// [`crate::search::SearchIndex::stats`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub document_count: usize,
    pub byte_size: u64,
    pub last_updated_at: Option<DateTime<Utc>>,
}

/// Lifecycle state of a `SearchIndex`. Queries fail with
/// [`crate::search::SearchError::IndexUnavailable`] in any state other
/// than `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    Absent,
    Ready,
    Rebuilding,
    Corrupt,
}
