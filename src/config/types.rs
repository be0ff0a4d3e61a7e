//! Core configuration types for the notebook cache/search core.
//!
//! This module contains the `CoreConfig` struct: the single typed
//! configuration object consumed by `Core::open`. Everything downstream
//! (rate limiting, concurrency bounds, conflict policy, search weights)
//! is a field or sub-struct here; loading it from the environment or a
//! file is a collaborator's responsibility, not this crate's.

use std::path::PathBuf;

/// Conflict resolution policy used by `IncrementalSync::execute`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    RemoteWins,
    LocalWins,
    NewerWins,
    Prompt,
    MergeAttempt,
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        ConflictPolicy::RemoteWins
    }
}

/// Token-bucket rate limit parameters for `RemoteClient`.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub(crate) requests_per_window: u32,
    pub(crate) window_seconds: u64,
    pub(crate) burst: u32,
}

/// Bounded-concurrency knobs for the workers in §5.
#[derive(Debug, Clone, Copy)]
pub struct ConcurrencyConfig {
    pub(crate) assets: usize,
    pub(crate) pages: usize,
    pub(crate) bulk_batches: usize,
}

/// `BulkIndexer` batching/checkpoint knobs.
#[derive(Debug, Clone, Copy)]
pub struct BulkConfig {
    pub(crate) batch_size: usize,
    pub(crate) checkpoint_every: usize,
}

/// `SearchIndex` tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct SearchConfig {
    pub(crate) snippet_length: usize,
    pub(crate) max_hits: usize,
    pub(crate) title_weight: f32,
    pub(crate) body_weight: f32,
}

/// `IncrementalSync` tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    pub(crate) tombstone_cycles: u32,
    pub(crate) conflict_policy: ConflictPolicy,
}

/// `AssetStore`/`AssetDownloader` tuning knobs.
#[derive(Debug, Clone)]
pub struct AssetConfig {
    pub(crate) enable_compression: bool,
    pub(crate) unknown_mime_extension: String,
}

/// Main configuration struct for the notebook cache/search core.
///
/// **INVARIANT:** `cache_root` is always an absolute path (normalized in the
/// builder). This keeps path arithmetic in `CacheLayout` simple and
/// consistent across every downstream component.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub(crate) cache_root: PathBuf,
    pub(crate) user_id: String,
    pub(crate) rate_limit: RateLimitConfig,
    pub(crate) concurrency: ConcurrencyConfig,
    pub(crate) bulk: BulkConfig,
    pub(crate) search: SearchConfig,
    pub(crate) sync: SyncConfig,
    pub(crate) assets: AssetConfig,
    pub(crate) max_cache_size_bytes: Option<u64>,
    pub(crate) request_timeout_secs: u64,
    pub(crate) page_timeout_secs: u64,
}
