//! `BulkIndexer` (C11): drives a full notebook crawl in fixed-size batches,
//! reporting progress and checkpointing so a large account can be
//! interrupted and resumed without redoing already-fetched pages.
//!
//! Batch sizing and checkpoint persistence follow the shape of the
//! teacher's `search::indexer` pipeline (`BatchConfig`, a progress sender
//! pushed to with `try_send` so a slow consumer never blocks the worker,
//! and `mcp::manager::manifest_manager`'s write-then-rename checkpoint
//! file). The teacher's own `search::indexer::batch`/`progress` modules
//! build their document from a markdown file already on disk and farm
//! CPU-bound parsing out to `rayon`; this indexer instead drives the
//! network-bound `ContentFetcher`, so neither the `rayon` fan-out nor the
//! `imstr`/`crossbeam_queue` lock-free error collector carries over — only
//! the batch/progress/checkpoint *shape* does.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::Sender;

use crate::cache::CacheLayout;
use crate::config::CoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::fetcher::{ContentFetcher, PageFetchOutcome};
use crate::model::Page;

const PROGRESS_MIN_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkStage {
    Discovering,
    Fetching,
    Done,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct BulkProgress {
    pub stage: BulkStage,
    pub done: usize,
    pub total: usize,
    pub rate_per_sec: f64,
    pub eta: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct BulkReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: Vec<PageFetchOutcome>,
    pub cancelled: bool,
    pub checkpoint_id: Option<String>,
}

/// Resumable on-disk state for one bulk run, written after every checkpoint
/// interval and on cancellation, removed on successful completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BulkCheckpoint {
    checkpoint_id: String,
    started_at: DateTime<Utc>,
    total: usize,
    done: usize,
    remaining: Vec<Page>,
}

impl BulkCheckpoint {
    async fn load(path: &Path) -> CoreResult<Option<Self>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let checkpoint = serde_json::from_slice(&bytes).map_err(anyhow::Error::from)?;
                Ok(Some(checkpoint))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CoreError::storage_io(path, e)),
        }
    }

    async fn save(&self, path: &Path) -> CoreResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::storage_io(parent, e))?;
        }
        let bytes = serde_json::to_vec_pretty(self).map_err(anyhow::Error::from)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| CoreError::storage_io(&tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| CoreError::storage_io(path, e))?;
        Ok(())
    }

    async fn remove(path: &Path) {
        let _ = tokio::fs::remove_file(path).await;
    }
}

pub struct BulkIndexer {
    fetcher: Arc<ContentFetcher>,
    layout: CacheLayout,
    batch_size: usize,
    checkpoint_every: usize,
}

impl BulkIndexer {
    #[must_use]
    pub fn new(fetcher: Arc<ContentFetcher>, layout: CacheLayout, config: &CoreConfig) -> Self {
        Self {
            fetcher,
            layout,
            batch_size: config.bulk_batch_size().max(1),
            checkpoint_every: config.bulk_checkpoint_every().max(1),
        }
    }

    /// Discovers the full notebook tree and fetches every page it finds,
    /// in batches of `batch_size`. `progress` (if given) receives a
    /// snapshot at most every 250ms via `try_send`, so a slow or absent
    /// consumer never stalls the fetch loop. `cancel`, if flipped to
    /// `true` between batches, stops the run and writes a checkpoint that
    /// `resume` can pick back up.
    pub async fn run(
        &self,
        progress: Option<Sender<BulkProgress>>,
        cancel: Arc<AtomicBool>,
    ) -> CoreResult<BulkReport> {
        emit(&progress, BulkStage::Discovering, 0, 0, Instant::now());
        let discovery = self.fetcher.discover().await?;
        self.drive(discovery.pages, 0, progress, cancel).await
    }

    /// Resumes a run a previous `run`/`resume` call checkpointed. The
    /// checkpoint carries the exact page stubs left to fetch, so no
    /// re-discovery is needed.
    pub async fn resume(
        &self,
        checkpoint_id: &str,
        progress: Option<Sender<BulkProgress>>,
        cancel: Arc<AtomicBool>,
    ) -> CoreResult<BulkReport> {
        let path = self.layout.bulk_checkpoint_path(checkpoint_id);
        let Some(checkpoint) = BulkCheckpoint::load(&path).await? else {
            return Err(CoreError::NotFound(format!("bulk checkpoint {checkpoint_id}")));
        };
        self.drive(checkpoint.remaining, checkpoint.done, progress, cancel).await
    }

    async fn drive(
        &self,
        pages: Vec<Page>,
        already_done: usize,
        progress: Option<Sender<BulkProgress>>,
        cancel: Arc<AtomicBool>,
    ) -> CoreResult<BulkReport> {
        let checkpoint_id = Utc::now().format("%Y%m%dT%H%M%S%.f").to_string();
        let checkpoint_path = self.layout.bulk_checkpoint_path(&checkpoint_id);
        let total = already_done + pages.len();
        let start = Instant::now();

        let mut report = BulkReport {
            total,
            ..Default::default()
        };
        let mut done = already_done;
        let mut last_emit = Instant::now() - PROGRESS_MIN_INTERVAL;

        let mut remaining = pages;
        while !remaining.is_empty() {
            if cancel.load(Ordering::Relaxed) {
                let checkpoint = BulkCheckpoint {
                    checkpoint_id: checkpoint_id.clone(),
                    started_at: Utc::now(),
                    total,
                    done,
                    remaining,
                };
                checkpoint.save(&checkpoint_path).await?;
                report.cancelled = true;
                report.checkpoint_id = Some(checkpoint_id);
                emit(&progress, BulkStage::Cancelled, done, total, start);
                return Ok(report);
            }

            let take = self.batch_size.min(remaining.len());
            let batch: Vec<Page> = remaining.drain(..take).collect();
            let outcomes = self.fetcher.fetch_many(&batch).await;
            for outcome in outcomes {
                done += 1;
                match &outcome.error {
                    None => report.succeeded += 1,
                    Some(_) => report.failed.push(outcome),
                }
            }

            if last_emit.elapsed() >= PROGRESS_MIN_INTERVAL {
                emit(&progress, BulkStage::Fetching, done, total, start);
                last_emit = Instant::now();
            }

            if done % self.checkpoint_every < take && !remaining.is_empty() {
                let checkpoint = BulkCheckpoint {
                    checkpoint_id: checkpoint_id.clone(),
                    started_at: Utc::now(),
                    total,
                    done,
                    remaining: remaining.clone(),
                };
                checkpoint.save(&checkpoint_path).await?;
            }
        }

        BulkCheckpoint::remove(&checkpoint_path).await;
        emit(&progress, BulkStage::Done, done, total, start);
        Ok(report)
    }
}

fn emit(progress: &Option<Sender<BulkProgress>>, stage: BulkStage, done: usize, total: usize, start: Instant) {
    let Some(tx) = progress else { return };
    let elapsed = start.elapsed().as_secs_f64();
    let rate_per_sec = if elapsed > 0.0 { done as f64 / elapsed } else { 0.0 };
    let eta = if rate_per_sec > 0.0 && total > done {
        let remaining_secs = (total - done) as f64 / rate_per_sec;
        Some(Utc::now() + chrono::Duration::seconds(remaining_secs as i64))
    } else {
        None
    };
    let _ = tx.try_send(BulkProgress {
        stage,
        done,
        total,
        rate_per_sec,
        eta,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetStore;
    use crate::config::CoreConfigBuilder;
    use crate::downloader::AssetDownloader;
    use crate::links::LinkResolver;
    use crate::metadata::MetadataStore;
    use crate::model::{LinkRef, PageStatus};
    use crate::remote::{AccessTokenProvider, RemoteClient};
    use async_trait::async_trait;

    struct StaticToken;

    #[async_trait]
    impl AccessTokenProvider for StaticToken {
        async fn access_token(&self) -> CoreResult<String> {
            Ok("test-token".to_string())
        }
    }

    fn page(id: &str) -> Page {
        let now = Utc::now();
        Page {
            id: id.to_string(),
            title: format!("page {id}"),
            section_id: "section-1".to_string(),
            notebook_id: "notebook-1".to_string(),
            created_at: now,
            modified_at: now,
            content_etag: None,
            html_path: None,
            markdown_path: None,
            asset_refs: Vec::new(),
            link_refs: Vec::<LinkRef>::new(),
            text_length: 0,
            status: PageStatus::Stub,
            modified_at_at_last_fetch: now,
        }
    }

    async fn indexer() -> (BulkIndexer, CacheLayout, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let layout = CacheLayout::new(tmp.path(), "user-1");
        let metadata = Arc::new(MetadataStore::open(&layout.metadata_db_path()).await.unwrap());
        let config = Arc::new(
            CoreConfigBuilder::default()
                .cache_root(tmp.path().to_path_buf())
                .user_id("user-1")
                .bulk(2, 2)
                .build()
                .unwrap(),
        );
        let remote = Arc::new(RemoteClient::new("http://127.0.0.1:0", Arc::new(StaticToken), &config));
        let asset_store = Arc::new(AssetStore::new(layout.clone(), Arc::clone(&config)));
        let downloader = Arc::new(AssetDownloader::new(
            Arc::clone(&remote),
            asset_store,
            Arc::clone(&metadata),
            config.concurrency_assets(),
        ));
        let links = Arc::new(LinkResolver::new(Arc::clone(&metadata), layout.clone()));
        let fetcher = Arc::new(ContentFetcher::new(remote, downloader, links, metadata, layout.clone(), 2));
        (BulkIndexer::new(fetcher, layout.clone(), &config), layout, tmp)
    }

    #[tokio::test]
    async fn cancelling_mid_run_writes_a_resumable_checkpoint() {
        let (indexer, layout, _tmp) = indexer().await;
        let pages = vec![page("p1"), page("p2"), page("p3"), page("p4")];
        let cancel = Arc::new(AtomicBool::new(false));
        cancel.store(true, Ordering::Relaxed);

        let report = indexer.drive(pages, 0, None, cancel).await.unwrap();
        assert!(report.cancelled);
        let checkpoint_id = report.checkpoint_id.expect("checkpoint id recorded on cancel");
        let path = layout.bulk_checkpoint_path(&checkpoint_id);
        assert!(tokio::fs::try_exists(&path).await.unwrap());

        let loaded = BulkCheckpoint::load(&path).await.unwrap().expect("checkpoint present");
        assert_eq!(loaded.remaining.len(), 4);
        assert_eq!(loaded.total, 4);
    }

    #[tokio::test]
    async fn successful_run_removes_its_checkpoint() {
        let (indexer, layout, _tmp) = indexer().await;
        let pages = vec![page("p1"), page("p2")];
        let cancel = Arc::new(AtomicBool::new(false));

        let report = indexer.drive(pages, 0, None, cancel).await.unwrap();
        assert!(!report.cancelled);
        assert_eq!(report.total, 2);
        assert_eq!(report.succeeded + report.failed.len(), 2);

        match tokio::fs::read_dir(layout.checkpoints_dir()).await {
            Ok(mut entries) => assert!(entries.next_entry().await.unwrap().is_none()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => panic!("unexpected error reading checkpoints dir: {e}"),
        }
    }
}
