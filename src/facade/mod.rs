//! `SearchFacade` (C12): the public query surface consumed by the
//! embedding agent. Adapts raw `SearchIndex` hits (and, on fallback, raw
//! remote listings) into a single response shape, tagged with where the
//! result actually came from.
//!
//! Grounded on the teacher's `mcp::search_crawl_results`/
//! `mcp::get_crawl_results` (thin adaptation of an internal engine's
//! output into a tool-facing DTO) — the routing-between-sources logic
//! itself has no teacher counterpart, since the teacher never had a
//! remote source to fall back to.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::cache::CacheLayout;
use crate::error::{CoreError, CoreResult};
use crate::metadata::MetadataStore;
use crate::model::CacheManifest;
use crate::remote::RemoteClient;
use crate::search::{IndexStats, SearchFilter, SearchHit, SearchIndex, IndexState};
use crate::sync::SyncReport;

/// Which source(s) a caller permits [`SearchFacade::query`] to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// Fail rather than use the remote service.
    LocalOnly,
    /// Use the remote service only if the local index is unavailable or
    /// returns zero hits.
    AllowRemoteFallback,
    /// Query both unconditionally and merge, local results first.
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    Local,
    Remote,
    Hybrid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub hits: Vec<SearchHit>,
    pub source: ResultSource,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatus {
    pub manifest: CacheManifest,
    pub index_stats: IndexStats,
    pub last_sync_report: Option<SyncReport>,
}

pub struct SearchFacade {
    index: Arc<SearchIndex>,
    metadata: Arc<MetadataStore>,
    remote: Arc<RemoteClient>,
    layout: CacheLayout,
    user_id: String,
    last_sync_report: Arc<RwLock<Option<SyncReport>>>,
}

impl SearchFacade {
    #[must_use]
    pub fn new(
        index: Arc<SearchIndex>,
        metadata: Arc<MetadataStore>,
        remote: Arc<RemoteClient>,
        layout: CacheLayout,
        user_id: String,
        last_sync_report: Arc<RwLock<Option<SyncReport>>>,
    ) -> Self {
        Self { index, metadata, remote, layout, user_id, last_sync_report }
    }

    pub async fn query(&self, text: &str, filter: &SearchFilter, mode: QueryMode) -> CoreResult<QueryResult> {
        let started = Instant::now();

        match mode {
            QueryMode::LocalOnly => {
                let hits = self.index.search(text, filter).await?;
                Ok(QueryResult { hits, source: ResultSource::Local, elapsed_ms: elapsed_ms(started) })
            }
            QueryMode::AllowRemoteFallback => {
                if self.index.state() == IndexState::Ready {
                    let hits = self.index.search(text, filter).await?;
                    if !hits.is_empty() {
                        return Ok(QueryResult { hits, source: ResultSource::Local, elapsed_ms: elapsed_ms(started) });
                    }
                }
                let hits = self.remote_search(text).await?;
                Ok(QueryResult { hits, source: ResultSource::Remote, elapsed_ms: elapsed_ms(started) })
            }
            QueryMode::Hybrid => {
                let local = if self.index.state() == IndexState::Ready {
                    self.index.search(text, filter).await.unwrap_or_default()
                } else {
                    Vec::new()
                };
                let remote = self.remote_search(text).await.unwrap_or_default();

                let mut seen: std::collections::HashSet<String> = local.iter().map(|h| h.page_id.clone()).collect();
                let mut hits = local;
                for hit in remote {
                    if seen.insert(hit.page_id.clone()) {
                        hits.push(hit);
                    }
                }
                Ok(QueryResult { hits, source: ResultSource::Hybrid, elapsed_ms: elapsed_ms(started) })
            }
        }
    }

    /// The remote service has no notion of a scored snippet, so fallback
    /// hits carry the page title as their snippet and a uniform score.
    async fn remote_search(&self, text: &str) -> CoreResult<Vec<SearchHit>> {
        let pages = self.remote.search_pages(text).await?;
        Ok(pages
            .into_iter()
            .map(|p| SearchHit { page_id: p.id, score: 1.0, snippet: p.title })
            .collect())
    }

    pub async fn status(&self) -> CoreResult<CacheStatus> {
        let manifest = self.layout.load_manifest(&self.user_id).await?;
        let index_stats = self.index.stats().await?;
        let last_sync_report = self.last_sync_report.read().clone();
        Ok(CacheStatus { manifest, index_stats, last_sync_report })
    }

    pub async fn get_page_markdown(&self, page_id: &str) -> CoreResult<String> {
        let page = self.metadata.get_page(page_id).await?.ok_or_else(|| CoreError::NotFound(page_id.to_string()))?;
        let path = page.markdown_path.ok_or_else(|| CoreError::NotFound(page_id.to_string()))?;
        tokio::fs::read_to_string(&path).await.map_err(|e| CoreError::storage_io(&path, e))
    }

    pub async fn get_page_content_by_title(&self, title: &str) -> CoreResult<String> {
        let matches = self.metadata.find_pages_by_title(title, None, None).await?;
        let page = matches.into_iter().next().ok_or_else(|| CoreError::NotFound(title.to_string()))?;
        let path = page.markdown_path.ok_or_else(|| CoreError::NotFound(title.to_string()))?;
        tokio::fs::read_to_string(&path).await.map_err(|e| CoreError::storage_io(&path, e))
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfigBuilder;
    use crate::model::IndexedDocument;
    use crate::remote::AccessTokenProvider;
    use async_trait::async_trait;

    struct StaticToken;

    #[async_trait]
    impl AccessTokenProvider for StaticToken {
        async fn access_token(&self) -> CoreResult<String> {
            Ok("test-token".to_string())
        }
    }

    async fn harness(base_url: &str) -> (SearchFacade, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let layout = CacheLayout::new(tmp.path(), "user-1");
        layout.ensure_user_root().await.unwrap();
        let metadata = Arc::new(MetadataStore::open(&layout.metadata_db_path()).await.unwrap());
        let config = CoreConfigBuilder::default()
            .cache_root(tmp.path().to_path_buf())
            .user_id("user-1")
            .build()
            .unwrap();
        let remote = Arc::new(RemoteClient::new(base_url, Arc::new(StaticToken), &config));
        let index = Arc::new(SearchIndex::open(layout.index_dir(), 2.0, 1.0, 20).await.unwrap());
        let facade = SearchFacade::new(index, metadata, remote, layout, "user-1".to_string(), Arc::new(RwLock::new(None)));
        (facade, tmp)
    }

    fn doc(page_id: &str, title: &str, body: &str) -> IndexedDocument {
        IndexedDocument {
            page_id: page_id.to_string(),
            title: title.to_string(),
            body_markdown: body.to_string(),
            notebook_id: "notebook-1".to_string(),
            section_id: "section-1".to_string(),
            modified_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn local_only_returns_local_hits_without_touching_remote() {
        let (facade, _tmp) = harness("http://127.0.0.1:0").await;
        facade.index.upsert(&doc("page-1", "Budget Review", "quarterly budget review notes")).await.unwrap();

        let result = facade.query("budget", &SearchFilter::default(), QueryMode::LocalOnly).await.unwrap();
        assert_eq!(result.source, ResultSource::Local);
        assert_eq!(result.hits.len(), 1);
    }

    #[tokio::test]
    async fn local_only_errors_when_index_is_not_ready() {
        let (facade, _tmp) = harness("http://127.0.0.1:0").await;
        facade.index.recover().await.unwrap();

        let err = facade.query("anything", &SearchFilter::default(), QueryMode::LocalOnly).await.unwrap_err();
        assert!(matches!(err, CoreError::IndexUnavailable { .. }));
    }

    #[tokio::test]
    async fn allow_remote_fallback_uses_remote_when_local_has_no_hits() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", mockito::Matcher::Regex(r"^/me/onenote/pages".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[{"id":"remote-1","title":"Remote Match","created_at":"2026-01-01T00:00:00Z","modified_at":"2026-01-01T00:00:00Z"}]"#,
            )
            .create_async()
            .await;

        let (facade, _tmp) = harness(&server.url()).await;
        let result =
            facade.query("anything", &SearchFilter::default(), QueryMode::AllowRemoteFallback).await.unwrap();

        assert_eq!(result.source, ResultSource::Remote);
        assert_eq!(result.hits.len(), 1);
        assert_eq!(result.hits[0].page_id, "remote-1");
    }

    #[tokio::test]
    async fn allow_remote_fallback_prefers_local_hits_when_present() {
        let (facade, _tmp) = harness("http://127.0.0.1:0").await;
        facade.index.upsert(&doc("page-1", "Local Match", "local content")).await.unwrap();

        let result =
            facade.query("local", &SearchFilter::default(), QueryMode::AllowRemoteFallback).await.unwrap();
        assert_eq!(result.source, ResultSource::Local);
    }

    #[tokio::test]
    async fn hybrid_merges_local_and_remote_deduping_by_page_id() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", mockito::Matcher::Regex(r"^/me/onenote/pages".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[
                    {"id":"page-1","title":"Duplicate","created_at":"2026-01-01T00:00:00Z","modified_at":"2026-01-01T00:00:00Z"},
                    {"id":"remote-2","title":"Remote Only","created_at":"2026-01-01T00:00:00Z","modified_at":"2026-01-01T00:00:00Z"}
                ]"#,
            )
            .create_async()
            .await;

        let (facade, _tmp) = harness(&server.url()).await;
        facade.index.upsert(&doc("page-1", "Duplicate", "shared content")).await.unwrap();

        let result = facade.query("dup", &SearchFilter::default(), QueryMode::Hybrid).await.unwrap();
        assert_eq!(result.source, ResultSource::Hybrid);
        assert_eq!(result.hits.len(), 2);
        assert_eq!(result.hits[0].page_id, "page-1");
        assert_eq!(result.hits[1].page_id, "remote-2");
    }

    #[tokio::test]
    async fn status_reports_manifest_and_index_stats() {
        let (facade, _tmp) = harness("http://127.0.0.1:0").await;
        let status = facade.status().await.unwrap();
        assert_eq!(status.manifest.user_id, "user-1");
        assert_eq!(status.index_stats.document_count, 0);
        assert!(status.last_sync_report.is_none());
    }

    #[tokio::test]
    async fn get_page_markdown_reads_the_cached_file() {
        let (facade, tmp) = harness("http://127.0.0.1:0").await;
        let markdown_path = tmp.path().join("page-1.md");
        tokio::fs::write(&markdown_path, "cached body").await.unwrap();

        let page = crate::model::Page {
            id: "page-1".to_string(),
            title: "Cached Page".to_string(),
            section_id: "section-1".to_string(),
            notebook_id: "notebook-1".to_string(),
            created_at: chrono::Utc::now(),
            modified_at: chrono::Utc::now(),
            content_etag: None,
            html_path: None,
            markdown_path: Some(markdown_path.to_string_lossy().to_string()),
            asset_refs: Vec::new(),
            link_refs: Vec::new(),
            text_length: 11,
            status: crate::model::PageStatus::Present,
            modified_at_at_last_fetch: chrono::Utc::now(),
        };
        facade.metadata.put_page(&page).await.unwrap();

        let body = facade.get_page_markdown("page-1").await.unwrap();
        assert_eq!(body, "cached body");

        let err = facade.get_page_markdown("missing").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }
}
