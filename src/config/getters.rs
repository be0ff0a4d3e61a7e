//! Getter methods for `CoreConfig` and its sub-structs.

use std::path::Path;

use super::types::{ConflictPolicy, CoreConfig};

impl CoreConfig {
    #[must_use]
    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    #[must_use]
    pub fn rate_limit_requests_per_window(&self) -> u32 {
        self.rate_limit.requests_per_window
    }

    #[must_use]
    pub fn rate_limit_window_seconds(&self) -> u64 {
        self.rate_limit.window_seconds
    }

    #[must_use]
    pub fn rate_limit_burst(&self) -> u32 {
        self.rate_limit.burst
    }

    #[must_use]
    pub fn concurrency_assets(&self) -> usize {
        self.concurrency.assets
    }

    #[must_use]
    pub fn concurrency_pages(&self) -> usize {
        self.concurrency.pages
    }

    #[must_use]
    pub fn concurrency_bulk_batches(&self) -> usize {
        self.concurrency.bulk_batches
    }

    #[must_use]
    pub fn bulk_batch_size(&self) -> usize {
        self.bulk.batch_size
    }

    #[must_use]
    pub fn bulk_checkpoint_every(&self) -> usize {
        self.bulk.checkpoint_every
    }

    #[must_use]
    pub fn search_snippet_length(&self) -> usize {
        self.search.snippet_length
    }

    #[must_use]
    pub fn search_max_hits(&self) -> usize {
        self.search.max_hits
    }

    #[must_use]
    pub fn search_title_weight(&self) -> f32 {
        self.search.title_weight
    }

    #[must_use]
    pub fn search_body_weight(&self) -> f32 {
        self.search.body_weight
    }

    #[must_use]
    pub fn sync_tombstone_cycles(&self) -> u32 {
        self.sync.tombstone_cycles
    }

    #[must_use]
    pub fn sync_conflict_policy(&self) -> ConflictPolicy {
        self.sync.conflict_policy
    }

    #[must_use]
    pub fn assets_enable_compression(&self) -> bool {
        self.assets.enable_compression
    }

    #[must_use]
    pub fn assets_unknown_mime_extension(&self) -> &str {
        &self.assets.unknown_mime_extension
    }

    #[must_use]
    pub fn max_cache_size_bytes(&self) -> Option<u64> {
        self.max_cache_size_bytes
    }

    #[must_use]
    pub fn request_timeout_secs(&self) -> u64 {
        self.request_timeout_secs
    }

    #[must_use]
    pub fn page_timeout_secs(&self) -> u64 {
        self.page_timeout_secs
    }
}
