//! `AssetDownloader` (C5): bounded-concurrency asset fetch with in-process
//! dedup and per-asset isolated failure reporting.
//!
//! Grounded on the teacher's `crawl_engine::orchestrator` worker pool
//! (`Semaphore` + `FuturesUnordered`, one permit held per in-flight task)
//! generalized from page-crawl tasks to asset downloads, and on
//! `DashMap`-backed session memoization used throughout `crawl_engine` to
//! avoid redundant work within a single run.

use std::sync::Arc;

use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;

use crate::assets::AssetStore;
use crate::metadata::MetadataStore;
use crate::model::Asset;
use crate::remote::RemoteClient;

const PER_ASSET_MAX_ATTEMPTS: u8 = 3;

/// Outcome of downloading one asset URL. Failures never propagate out of
/// `download_all` — they are isolated per-item so one bad asset doesn't
/// abort an entire page or bulk run.
#[derive(Debug, Clone)]
pub struct AssetDownloadOutcome {
    pub url: String,
    pub content_hash: Option<String>,
    pub error: Option<String>,
}

pub struct AssetDownloader {
    remote: Arc<RemoteClient>,
    asset_store: Arc<AssetStore>,
    metadata: Arc<MetadataStore>,
    concurrency: usize,
    /// URL → content hash, memoized for the lifetime of this downloader so
    /// the same asset referenced from many pages in one run is fetched once.
    memo: DashMap<String, String>,
}

impl AssetDownloader {
    #[must_use]
    pub fn new(
        remote: Arc<RemoteClient>,
        asset_store: Arc<AssetStore>,
        metadata: Arc<MetadataStore>,
        concurrency: usize,
    ) -> Self {
        Self {
            remote,
            asset_store,
            metadata,
            concurrency: concurrency.max(1),
            memo: DashMap::new(),
        }
    }

    /// Downloads every URL in `urls`, returning one outcome per URL in
    /// completion order. A failure on any single URL never aborts the others.
    pub async fn download_all(&self, urls: Vec<String>) -> Vec<AssetDownloadOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = FuturesUnordered::new();

        for url in urls {
            if let Some(cached) = self.memo.get(&url) {
                tasks.push(tokio::spawn(std::future::ready(AssetDownloadOutcome {
                    url: url.clone(),
                    content_hash: Some(cached.clone()),
                    error: None,
                })));
                continue;
            }

            let permit = semaphore.clone().acquire_owned().await;
            let Ok(permit) = permit else { continue };
            let remote = Arc::clone(&self.remote);
            let asset_store = Arc::clone(&self.asset_store);
            let metadata = Arc::clone(&self.metadata);
            let url_for_task = url.clone();

            tasks.push(tokio::spawn(async move {
                let _permit = permit;
                download_one(remote, asset_store, metadata, url_for_task).await
            }));
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.next().await {
            if let Ok(outcome) = joined {
                if let Some(hash) = &outcome.content_hash {
                    self.memo.insert(outcome.url.clone(), hash.clone());
                }
                outcomes.push(outcome);
            }
        }
        outcomes
    }
}

async fn download_one(
    remote: Arc<RemoteClient>,
    asset_store: Arc<AssetStore>,
    metadata: Arc<MetadataStore>,
    url: String,
) -> AssetDownloadOutcome {
    let scratch_path = asset_store.scratch_path(&url);
    let mut last_error = None;
    for attempt in 0..PER_ASSET_MAX_ATTEMPTS {
        match remote.download_asset_to_scratch(&url, &scratch_path).await {
            Ok(mime_type) => {
                return match asset_store.put_from_scratch(&scratch_path, &mime_type).await {
                    Ok(put_outcome) => {
                        let asset = Asset {
                            content_hash: put_outcome.content_hash.clone(),
                            mime_type,
                            byte_size: put_outcome.byte_size,
                            original_url: url.clone(),
                            local_path: put_outcome.local_path.to_string_lossy().to_string(),
                            first_seen_at: chrono::Utc::now(),
                        };
                        if let Err(e) = metadata.put_asset(&asset).await {
                            return AssetDownloadOutcome {
                                url,
                                content_hash: None,
                                error: Some(e.to_string()),
                            };
                        }
                        AssetDownloadOutcome {
                            url,
                            content_hash: Some(put_outcome.content_hash),
                            error: None,
                        }
                    }
                    Err(e) => AssetDownloadOutcome {
                        url,
                        content_hash: None,
                        error: Some(e.to_string()),
                    },
                };
            }
            Err(e) => {
                let transient = e.is_transient();
                last_error = Some(e.to_string());
                if !transient || attempt + 1 == PER_ASSET_MAX_ATTEMPTS {
                    break;
                }
            }
        }
    }
    AssetDownloadOutcome {
        url,
        content_hash: None,
        error: last_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheLayout;
    use crate::config::CoreConfigBuilder;
    use crate::remote::AccessTokenProvider;
    use async_trait::async_trait;

    struct StaticToken;

    #[async_trait]
    impl AccessTokenProvider for StaticToken {
        async fn access_token(&self) -> crate::error::CoreResult<String> {
            Ok("token".to_string())
        }
    }

    #[tokio::test]
    async fn download_all_reports_per_asset_outcomes() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/asset.png")
            .with_status(200)
            .with_header("content-type", "image/png")
            .with_body(b"fake png bytes".to_vec())
            .create_async()
            .await;
        let _missing = server
            .mock("GET", "/missing.png")
            .with_status(404)
            .create_async()
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let config = Arc::new(
            CoreConfigBuilder::new()
                .cache_root(tmp.path())
                .user_id("user-1")
                .rate_limit(1000, 60, 100)
                .build()
                .unwrap(),
        );
        let layout = CacheLayout::new(tmp.path(), config.user_id());
        layout.ensure_user_root().await.unwrap();

        let remote = Arc::new(RemoteClient::new(server.url(), Arc::new(StaticToken), &config));
        let asset_store = Arc::new(crate::assets::AssetStore::new(layout, config.clone()));
        let metadata = Arc::new(
            MetadataStore::open(&tmp.path().join("meta.sqlite"))
                .await
                .unwrap(),
        );

        let downloader = AssetDownloader::new(remote, asset_store, metadata, 2);
        let asset_url = format!("{}/asset.png", server.url());
        let missing_url = format!("{}/missing.png", server.url());
        let outcomes = downloader
            .download_all(vec![asset_url.clone(), missing_url.clone()])
            .await;

        assert_eq!(outcomes.len(), 2);
        let ok = outcomes.iter().find(|o| o.url == asset_url).unwrap();
        assert!(ok.content_hash.is_some());
        let failed = outcomes.iter().find(|o| o.url == missing_url).unwrap();
        assert!(failed.content_hash.is_none());
        assert!(failed.error.is_some());
    }
}
