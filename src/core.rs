//! `Core`: the top-level handle an embedding agent opens once per user.
//! Wires together every component (C1–C12) from a single [`CoreConfig`]
//! and hands out the three surfaces callers actually need:
//! [`Core::search_facade`], [`Core::bulk_indexer`], [`Core::incremental_sync`],
//! and [`Core::cache_admin`].
//!
//! `Core::open` does only the I/O each component's own constructor already
//! does (opening a SQLite pool, opening an existing Tantivy index) — it
//! never walks the remote tree or rebuilds the index itself. That only
//! happens when a caller explicitly asks for it through `BulkIndexer` or
//! `CacheAdmin::rebuild_index`.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::assets::AssetStore;
use crate::bulk::BulkIndexer;
use crate::cache::CacheLayout;
use crate::config::CoreConfig;
use crate::downloader::AssetDownloader;
use crate::error::{CoreError, CoreResult};
use crate::facade::SearchFacade;
use crate::fetcher::ContentFetcher;
use crate::links::LinkResolver;
use crate::metadata::MetadataStore;
use crate::model::Asset;
use crate::remote::{AccessTokenProvider, RemoteClient};
use crate::search::SearchIndex;
use crate::sync::{IncrementalSync, SyncReport};

pub struct Core {
    config: Arc<CoreConfig>,
    layout: CacheLayout,
    metadata: Arc<MetadataStore>,
    remote: Arc<RemoteClient>,
    fetcher: Arc<ContentFetcher>,
    index: Arc<SearchIndex>,
    last_sync_report: Arc<RwLock<Option<SyncReport>>>,
}

impl Core {
    pub async fn open(
        config: CoreConfig,
        base_url: impl Into<String>,
        token_provider: Arc<dyn AccessTokenProvider>,
    ) -> CoreResult<Self> {
        let config = Arc::new(config);
        let layout = CacheLayout::new(config.cache_root(), config.user_id());
        layout.ensure_user_root().await?;
        layout.validate_schema().await?;
        let orphaned_scratch = layout.cleanup_scratch().await?;
        if orphaned_scratch > 0 {
            tracing::warn!(count = orphaned_scratch, "removed orphaned scratch files from a prior interrupted run");
        }

        let metadata = Arc::new(MetadataStore::open(&layout.metadata_db_path()).await?);
        let remote = Arc::new(RemoteClient::new(base_url, token_provider, &config));
        let asset_store = Arc::new(AssetStore::new(layout.clone(), config.clone()));
        let downloader = Arc::new(AssetDownloader::new(
            remote.clone(),
            asset_store,
            metadata.clone(),
            config.concurrency_assets(),
        ));
        let links = Arc::new(LinkResolver::new(metadata.clone(), layout.clone()));
        let fetcher = Arc::new(ContentFetcher::new(
            remote.clone(),
            downloader,
            links,
            metadata.clone(),
            layout.clone(),
            config.concurrency_pages(),
        ));

        let index = Arc::new(
            SearchIndex::open(
                layout.index_dir(),
                config.search_title_weight(),
                config.search_body_weight(),
                config.search_max_hits(),
            )
            .await?,
        );

        Ok(Self {
            config,
            layout,
            metadata,
            remote,
            fetcher,
            index,
            last_sync_report: Arc::new(RwLock::new(None)),
        })
    }

    #[must_use]
    pub fn search_facade(&self) -> SearchFacade {
        SearchFacade::new(
            self.index.clone(),
            self.metadata.clone(),
            self.remote.clone(),
            self.layout.clone(),
            self.config.user_id().to_string(),
            self.last_sync_report.clone(),
        )
    }

    #[must_use]
    pub fn bulk_indexer(&self) -> BulkIndexer {
        BulkIndexer::new(self.fetcher.clone(), self.layout.clone(), &self.config)
    }

    #[must_use]
    pub fn incremental_sync(&self) -> IncrementalSync {
        IncrementalSync::new(
            self.remote.clone(),
            self.fetcher.clone(),
            self.metadata.clone(),
            self.config.clone(),
            self.layout.clone(),
        )
    }

    /// Runs an incremental sync and remembers the report for
    /// `SearchFacade::status`. After a successful (non-dry-run) sync the
    /// index is rebuilt from the now-current metadata so search results
    /// reflect what was just fetched.
    pub async fn run_incremental_sync(&self, dry_run: bool) -> CoreResult<SyncReport> {
        let sync = self.incremental_sync();
        let plan = sync.plan().await?;
        let report = sync.execute(&plan, dry_run).await?;

        if !dry_run {
            self.index.rebuild_from_metadata(&self.metadata).await?;
            self.index.replay_journal().await?;
        }

        *self.last_sync_report.write() = Some(report.clone());
        Ok(report)
    }

    #[must_use]
    pub fn cache_admin(&self) -> CacheAdmin {
        CacheAdmin {
            metadata: self.metadata.clone(),
            index: self.index.clone(),
            layout: self.layout.clone(),
            config: self.config.clone(),
        }
    }
}

/// Administrative operations an embedding agent runs out-of-band from a
/// query: reclaiming disk space, recovering from a corrupted index, and
/// wiping a user's cache outright.
pub struct CacheAdmin {
    metadata: Arc<MetadataStore>,
    index: Arc<SearchIndex>,
    layout: CacheLayout,
    config: Arc<CoreConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcReport {
    pub assets_deleted: usize,
    pub bytes_reclaimed: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct GcState {
    /// content_hash -> consecutive GC cycles observed with zero references.
    cycles_at_zero: std::collections::HashMap<String, u32>,
}

impl CacheAdmin {
    fn gc_state_path(&self) -> PathBuf {
        self.layout.checkpoints_dir().join("gc_cycles.json")
    }

    async fn load_gc_state(&self) -> GcState {
        match tokio::fs::read(self.gc_state_path()).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => GcState::default(),
        }
    }

    async fn save_gc_state(&self, state: &GcState) -> CoreResult<()> {
        let path = self.gc_state_path();
        let bytes = serde_json::to_vec_pretty(state).map_err(|e| CoreError::storage_io(&path, e))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await.map_err(|e| CoreError::storage_io(&tmp, e))?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| CoreError::storage_io(&path, e))?;
        Ok(())
    }

    /// Deletes assets with zero referencing pages, but only once they've
    /// shown up unreferenced for two consecutive calls, so an asset whose
    /// last referencing page is mid-rewrite doesn't get collected out from
    /// under it.
    pub async fn garbage_collect(&self) -> CoreResult<GcReport> {
        let unreferenced = self.metadata.list_unreferenced_assets().await?;
        let mut state = self.load_gc_state().await;

        let mut still_unreferenced = std::collections::HashMap::new();
        let mut to_delete: Vec<Asset> = Vec::new();

        for asset in unreferenced {
            let cycles = state.cycles_at_zero.get(&asset.content_hash).copied().unwrap_or(0) + 1;
            if cycles >= self.config.sync_tombstone_cycles() {
                to_delete.push(asset);
            } else {
                still_unreferenced.insert(asset.content_hash.clone(), cycles);
            }
        }
        state.cycles_at_zero = still_unreferenced;
        self.save_gc_state(&state).await?;

        let mut bytes_reclaimed = 0u64;
        for asset in &to_delete {
            let path = PathBuf::from(&asset.local_path);
            if let Ok(metadata) = tokio::fs::metadata(&path).await {
                bytes_reclaimed += metadata.len();
            }
            let _ = tokio::fs::remove_file(&path).await;
            self.metadata.delete_asset(&asset.content_hash).await?;
        }

        Ok(GcReport { assets_deleted: to_delete.len(), bytes_reclaimed })
    }

    /// Rebuilds the search index from whatever metadata the cache already
    /// has. Used after a corruption is detected, or on explicit request.
    pub async fn rebuild_index(&self) -> CoreResult<()> {
        self.index.rebuild_from_metadata(&self.metadata).await
    }

    pub async fn stats(&self) -> CoreResult<crate::model::Counters> {
        self.metadata.compute_counters().await
    }

    /// Deletes this user's entire cache directory and recreates an empty
    /// one. Irreversible; callers are expected to have already confirmed
    /// this with whoever is driving the agent.
    pub async fn clear_user(&self) -> CoreResult<()> {
        let root = self.layout.user_root();
        if root.exists() {
            tokio::fs::remove_dir_all(root).await.map_err(|e| CoreError::storage_io(root, e))?;
        }
        self.layout.ensure_user_root().await?;
        self.index.recover().await?;
        self.index.rebuild_from_metadata(&self.metadata).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfigBuilder;
    use crate::model::Asset;
    use async_trait::async_trait;
    use chrono::Utc;

    struct StaticToken;

    #[async_trait]
    impl AccessTokenProvider for StaticToken {
        async fn access_token(&self) -> CoreResult<String> {
            Ok("test-token".to_string())
        }
    }

    async fn open_core(tmp: &tempfile::TempDir) -> Core {
        let config = CoreConfigBuilder::default()
            .cache_root(tmp.path().to_path_buf())
            .user_id("user-1")
            .build()
            .unwrap();
        Core::open(config, "http://127.0.0.1:0", Arc::new(StaticToken)).await.unwrap()
    }

    async fn unreferenced_asset(admin: &CacheAdmin, tmp: &tempfile::TempDir, content_hash: &str) {
        let path = tmp.path().join(format!("{content_hash}.bin"));
        tokio::fs::write(&path, b"asset bytes").await.unwrap();
        admin
            .metadata
            .put_asset(&Asset {
                content_hash: content_hash.to_string(),
                mime_type: "application/octet-stream".to_string(),
                byte_size: 11,
                original_url: "https://example.invalid/asset".to_string(),
                local_path: path.to_string_lossy().to_string(),
                first_seen_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn open_wires_every_component_and_index_starts_ready() {
        let tmp = tempfile::tempdir().unwrap();
        let core = open_core(&tmp).await;
        let facade = core.search_facade();
        let status = facade.status().await.unwrap();
        assert_eq!(status.index_stats.document_count, 0);
    }

    #[tokio::test]
    async fn garbage_collect_keeps_asset_until_two_consecutive_empty_cycles() {
        let tmp = tempfile::tempdir().unwrap();
        let core = open_core(&tmp).await;
        let admin = core.cache_admin();
        unreferenced_asset(&admin, &tmp, "hash-1").await;

        let first = admin.garbage_collect().await.unwrap();
        assert_eq!(first.assets_deleted, 0);

        let second = admin.garbage_collect().await.unwrap();
        assert_eq!(second.assets_deleted, 1);
        assert_eq!(second.bytes_reclaimed, 11);

        let remaining = admin.metadata.list_unreferenced_assets().await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn clear_user_wipes_cache_and_leaves_index_ready() {
        let tmp = tempfile::tempdir().unwrap();
        let core = open_core(&tmp).await;
        let admin = core.cache_admin();

        admin.clear_user().await.unwrap();

        assert_eq!(core.index.state(), crate::search::IndexState::Ready);
        assert!(admin.layout.user_root().exists());
    }

    #[tokio::test]
    async fn rebuild_index_delegates_to_search_index() {
        let tmp = tempfile::tempdir().unwrap();
        let core = open_core(&tmp).await;
        let admin = core.cache_admin();

        admin.rebuild_index().await.unwrap();
        assert_eq!(core.index.state(), crate::search::IndexState::Ready);
    }
}
