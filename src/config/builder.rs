//! Builder for `CoreConfig`.
//!
//! A single-state builder (unlike the teacher's typestate
//! `CrawlConfigBuilder`): this config has exactly two required fields
//! (`cache_root`, `user_id`), so validation at `build()` time is simpler
//! than the teacher's compile-time typestate and is preferred here.

use anyhow::{anyhow, Result};
use std::path::PathBuf;

use super::types::{
    AssetConfig, BulkConfig, ConcurrencyConfig, ConflictPolicy, CoreConfig, RateLimitConfig,
    SearchConfig, SyncConfig,
};

pub struct CoreConfigBuilder {
    cache_root: Option<PathBuf>,
    user_id: Option<String>,
    requests_per_window: u32,
    window_seconds: u64,
    burst: u32,
    concurrency_assets: usize,
    concurrency_pages: usize,
    concurrency_bulk_batches: usize,
    bulk_batch_size: usize,
    bulk_checkpoint_every: usize,
    snippet_length: usize,
    max_hits: usize,
    title_weight: f32,
    body_weight: f32,
    tombstone_cycles: u32,
    conflict_policy: ConflictPolicy,
    enable_compression: bool,
    unknown_mime_extension: String,
    max_cache_size_bytes: Option<u64>,
    request_timeout_secs: u64,
    page_timeout_secs: u64,
}

impl Default for CoreConfigBuilder {
    fn default() -> Self {
        Self {
            cache_root: None,
            user_id: None,
            requests_per_window: 100,
            window_seconds: 600,
            burst: 10,
            concurrency_assets: 4,
            concurrency_pages: 4,
            concurrency_bulk_batches: 4,
            bulk_batch_size: 20,
            bulk_checkpoint_every: 100,
            snippet_length: 240,
            max_hits: 200,
            title_weight: 3.0,
            body_weight: 1.0,
            tombstone_cycles: 2,
            conflict_policy: ConflictPolicy::RemoteWins,
            enable_compression: true,
            unknown_mime_extension: ".bin".to_string(),
            max_cache_size_bytes: None,
            request_timeout_secs: 30,
            page_timeout_secs: 120,
        }
    }
}

impl CoreConfig {
    #[must_use]
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }
}

impl CoreConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn cache_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_root = Some(dir.into());
        self
    }

    #[must_use]
    pub fn user_id(mut self, id: impl Into<String>) -> Self {
        self.user_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn rate_limit(mut self, requests_per_window: u32, window_seconds: u64, burst: u32) -> Self {
        self.requests_per_window = requests_per_window;
        self.window_seconds = window_seconds;
        self.burst = burst;
        self
    }

    #[must_use]
    pub fn concurrency(mut self, assets: usize, pages: usize, bulk_batches: usize) -> Self {
        self.concurrency_assets = assets;
        self.concurrency_pages = pages;
        self.concurrency_bulk_batches = bulk_batches;
        self
    }

    #[must_use]
    pub fn bulk(mut self, batch_size: usize, checkpoint_every: usize) -> Self {
        self.bulk_batch_size = batch_size;
        self.bulk_checkpoint_every = checkpoint_every;
        self
    }

    #[must_use]
    pub fn search_weights(mut self, title_weight: f32, body_weight: f32) -> Self {
        self.title_weight = title_weight;
        self.body_weight = body_weight;
        self
    }

    #[must_use]
    pub fn snippet_length(mut self, len: usize) -> Self {
        self.snippet_length = len;
        self
    }

    #[must_use]
    pub fn max_hits(mut self, max: usize) -> Self {
        self.max_hits = max;
        self
    }

    #[must_use]
    pub fn tombstone_cycles(mut self, cycles: u32) -> Self {
        self.tombstone_cycles = cycles;
        self
    }

    #[must_use]
    pub fn conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    #[must_use]
    pub fn enable_asset_compression(mut self, enabled: bool) -> Self {
        self.enable_compression = enabled;
        self
    }

    #[must_use]
    pub fn unknown_mime_extension(mut self, ext: impl Into<String>) -> Self {
        self.unknown_mime_extension = ext.into();
        self
    }

    #[must_use]
    pub fn max_cache_size_gb(mut self, gb: u64) -> Self {
        self.max_cache_size_bytes = Some(gb * 1_000_000_000);
        self
    }

    #[must_use]
    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn page_timeout_secs(mut self, secs: u64) -> Self {
        self.page_timeout_secs = secs;
        self
    }

    /// Validate and produce the final `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns an error if `cache_root` or `user_id` were never set, or if
    /// `user_id` is empty.
    pub fn build(self) -> Result<CoreConfig> {
        let cache_root = self
            .cache_root
            .ok_or_else(|| anyhow!("CoreConfig requires cache_root"))?;
        let cache_root = if cache_root.is_absolute() {
            cache_root
        } else {
            std::env::current_dir()
                .map_err(|e| anyhow!("failed to resolve cache_root to an absolute path: {e}"))?
                .join(cache_root)
        };

        let user_id = self
            .user_id
            .ok_or_else(|| anyhow!("CoreConfig requires user_id"))?;
        if user_id.trim().is_empty() {
            return Err(anyhow!("CoreConfig user_id must not be empty"));
        }

        Ok(CoreConfig {
            cache_root,
            user_id,
            rate_limit: RateLimitConfig {
                requests_per_window: self.requests_per_window,
                window_seconds: self.window_seconds,
                burst: self.burst,
            },
            concurrency: ConcurrencyConfig {
                assets: self.concurrency_assets,
                pages: self.concurrency_pages,
                bulk_batches: self.concurrency_bulk_batches,
            },
            bulk: BulkConfig {
                batch_size: self.bulk_batch_size,
                checkpoint_every: self.bulk_checkpoint_every,
            },
            search: SearchConfig {
                snippet_length: self.snippet_length,
                max_hits: self.max_hits,
                title_weight: self.title_weight,
                body_weight: self.body_weight,
            },
            sync: SyncConfig {
                tombstone_cycles: self.tombstone_cycles,
                conflict_policy: self.conflict_policy,
            },
            assets: AssetConfig {
                enable_compression: self.enable_compression,
                unknown_mime_extension: self.unknown_mime_extension,
            },
            max_cache_size_bytes: self.max_cache_size_bytes,
            request_timeout_secs: self.request_timeout_secs,
            page_timeout_secs: self.page_timeout_secs,
        })
    }
}
