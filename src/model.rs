//! Shared data-model types (§3): entities that flow between `MetadataStore`,
//! `SearchIndex`, `LinkResolver`, and the sync/fetch/bulk orchestrators.
//!
//! These are plain data types with `serde` derives for on-disk JSON
//! persistence, matching the teacher's manifest/session type shape in
//! `mcp::manager::manifest_manager` and `mcp::session`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    Present,
    Stub,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    InternalResolved,
    InternalUnresolved,
    External,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notebook {
    pub id: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub section_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    pub display_name: String,
    pub notebook_id: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub page_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkRef {
    pub source_page_id: String,
    pub target_spec: String,
    pub target_page_id: Option<String>,
    pub link_text: String,
    pub kind: LinkKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub id: String,
    pub title: String,
    pub section_id: String,
    pub notebook_id: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub content_etag: Option<String>,
    pub html_path: Option<String>,
    pub markdown_path: Option<String>,
    pub asset_refs: Vec<String>,
    pub link_refs: Vec<LinkRef>,
    pub text_length: usize,
    pub status: PageStatus,
    /// The remote `modified_at` observed the last time content was fetched.
    /// Used by `IncrementalSync` to detect external tampering (§4.10).
    pub modified_at_at_last_fetch: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub content_hash: String,
    pub mime_type: String,
    pub byte_size: u64,
    pub original_url: String,
    pub local_path: String,
    pub first_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Counters {
    pub notebooks: u64,
    pub sections: u64,
    pub pages: u64,
    pub assets: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRef {
    pub id: String,
    pub kind: CheckpointKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointKind {
    Bulk,
    Sync,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheManifest {
    pub schema_version: u32,
    pub user_id: String,
    pub last_full_sync_at: Option<DateTime<Utc>>,
    pub last_incremental_sync_at: Option<DateTime<Utc>>,
    pub counters: Counters,
    pub last_checkpoint: Option<CheckpointRef>,
}

impl CacheManifest {
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            schema_version: crate::cache::SCHEMA_VERSION,
            user_id: user_id.into(),
            last_full_sync_at: None,
            last_incremental_sync_at: None,
            counters: Counters::default(),
            last_checkpoint: None,
        }
    }
}

/// Logical document indexed by `SearchIndex`; does not itself persist — it
/// is derived from a `Page` whenever one reaches `status = present`.
#[derive(Debug, Clone)]
pub struct IndexedDocument {
    pub page_id: String,
    pub title: String,
    pub body_markdown: String,
    pub notebook_id: String,
    pub section_id: String,
    pub modified_at: DateTime<Utc>,
}
