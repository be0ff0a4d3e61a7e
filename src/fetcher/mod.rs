//! `ContentFetcher` (C8): drives notebook -> section -> page traversal
//! against the remote service and turns one remote page into cached
//! Markdown, in a fixed order: persist the page stub, download every asset
//! the page references, resolve its internal links, convert to Markdown,
//! then persist the final page record.
//!
//! Grounded on the teacher's `crawl_engine::orchestrator` top-level
//! multi-stage traversal (notebooks/sections here stand in for the
//! teacher's seed/frontier expansion) and `crawl_engine::crawler`'s bounded
//! worker dispatch, where one page's failure is recorded and never aborts
//! its siblings.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use html5ever::parse_document;
use html5ever::tendril::TendrilSink;
use markup5ever_rcdom::{Handle, NodeData, RcDom};
use tokio::sync::Semaphore;

use crate::cache::CacheLayout;
use crate::downloader::AssetDownloader;
use crate::error::{CoreError, CoreResult};
use crate::links::LinkResolver;
use crate::markdown::{MarkdownConverter, ResolvedAsset};
use crate::metadata::MetadataStore;
use crate::model::{Page, PageStatus};
use crate::remote::RemoteClient;

/// Outcome of fetching a single page. Failures are reported, never
/// propagated, so one bad page never aborts a batch.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PageFetchOutcome {
    pub page_id: String,
    pub status: PageStatus,
    pub error: Option<String>,
}

/// Aggregate result of a full notebook/section/page discovery pass.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryReport {
    pub notebooks: usize,
    pub sections: usize,
    pub pages: Vec<Page>,
}

pub struct ContentFetcher {
    remote: Arc<RemoteClient>,
    downloader: Arc<AssetDownloader>,
    links: Arc<LinkResolver>,
    metadata: Arc<MetadataStore>,
    layout: CacheLayout,
    concurrency: usize,
}

impl ContentFetcher {
    #[must_use]
    pub fn new(
        remote: Arc<RemoteClient>,
        downloader: Arc<AssetDownloader>,
        links: Arc<LinkResolver>,
        metadata: Arc<MetadataStore>,
        layout: CacheLayout,
        concurrency: usize,
    ) -> Self {
        Self {
            remote,
            downloader,
            links,
            metadata,
            layout,
            concurrency: concurrency.max(1),
        }
    }

    /// Walks every notebook and section the remote account exposes,
    /// persisting notebook/section metadata and a `Stub` page row for each
    /// page it finds. Returns the flat list of page stubs so callers
    /// (`BulkIndexer`, `IncrementalSync`) can batch the actual content
    /// fetch themselves.
    pub async fn discover(&self) -> CoreResult<DiscoveryReport> {
        let mut report = DiscoveryReport::default();
        let notebooks = self.remote.list_notebooks().await?;
        for notebook in &notebooks {
            self.metadata.put_notebook(notebook).await?;
        }
        report.notebooks = notebooks.len();

        for notebook in &notebooks {
            let sections = self.remote.list_sections(&notebook.id).await?;
            for section in &sections {
                self.metadata.put_section(section).await?;
            }
            report.sections += sections.len();

            for section in &sections {
                let stubs = self.remote.list_pages(&notebook.id, &section.id).await?;
                for stub in &stubs {
                    // Never clobber an already-fetched page's content with a
                    // bare stub; only register pages this store has never
                    // seen before.
                    if self.metadata.get_page(&stub.id).await?.is_none() {
                        self.metadata.put_page(stub).await?;
                    }
                }
                report.pages.extend(stubs);
            }
        }
        Ok(report)
    }

    /// Fetches and converts a bounded-concurrency batch of pages. Each
    /// page's failure is isolated: one timeout or 404 never cancels its
    /// siblings.
    pub async fn fetch_many(&self, stubs: &[Page]) -> Vec<PageFetchOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = FuturesUnordered::new();

        for stub in stubs.iter().cloned() {
            let permit = semaphore.clone().acquire_owned().await;
            let Ok(permit) = permit else { continue };
            let remote = Arc::clone(&self.remote);
            let downloader = Arc::clone(&self.downloader);
            let links = Arc::clone(&self.links);
            let metadata = Arc::clone(&self.metadata);
            let layout = self.layout.clone();

            tasks.push(tokio::spawn(async move {
                let _permit = permit;
                fetch_one(remote, downloader, links, metadata, layout, stub).await
            }));
        }

        let mut outcomes = Vec::with_capacity(stubs.len());
        while let Some(joined) = tasks.next().await {
            if let Ok(outcome) = joined {
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    /// Fetches a single page. Exposed directly for callers that already
    /// manage their own concurrency (e.g. `IncrementalSync` applying one
    /// changed page at a time).
    pub async fn fetch_page(&self, stub: &Page) -> PageFetchOutcome {
        fetch_one(
            Arc::clone(&self.remote),
            Arc::clone(&self.downloader),
            Arc::clone(&self.links),
            Arc::clone(&self.metadata),
            self.layout.clone(),
            stub.clone(),
        )
        .await
    }
}

async fn fetch_one(
    remote: Arc<RemoteClient>,
    downloader: Arc<AssetDownloader>,
    links: Arc<LinkResolver>,
    metadata: Arc<MetadataStore>,
    layout: CacheLayout,
    stub: Page,
) -> PageFetchOutcome {
    match fetch_one_inner(&remote, &downloader, &links, &metadata, &layout, &stub).await {
        Ok(page) => PageFetchOutcome {
            page_id: page.id,
            status: page.status,
            error: None,
        },
        Err(e) => {
            tracing::warn!(page_id = %stub.id, error = %e, "page fetch failed");
            // Never downgrade a page that already has good content on
            // disk; only mark brand-new pages as Failed so their absence
            // is visible in cache status rather than silently dropped.
            if matches!(metadata.get_page(&stub.id).await, Ok(None)) {
                let mut failed = stub.clone();
                failed.status = PageStatus::Failed;
                let _ = metadata.put_page(&failed).await;
            }
            PageFetchOutcome {
                page_id: stub.id,
                status: PageStatus::Failed,
                error: Some(e.to_string()),
            }
        }
    }
}

async fn fetch_one_inner(
    remote: &Arc<RemoteClient>,
    downloader: &Arc<AssetDownloader>,
    links: &Arc<LinkResolver>,
    metadata: &Arc<MetadataStore>,
    layout: &CacheLayout,
    stub: &Page,
) -> CoreResult<Page> {
    let content = remote.get_page_content(&stub.id).await?;

    let html_path = layout.page_html_path(&stub.notebook_id, &stub.section_id, &stub.id);
    if let Some(parent) = html_path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| CoreError::storage_io(parent, e))?;
    }
    tokio::fs::write(&html_path, &content.html)
        .await
        .map_err(|e| CoreError::storage_io(&html_path, e))?;

    let refs = extract_refs(&content.html);

    let asset_outcomes = downloader.download_all(refs.asset_urls.clone()).await;
    let markdown_path = layout.page_markdown_path(&stub.notebook_id, &stub.section_id, &stub.id);
    let mut asset_map: HashMap<String, ResolvedAsset> = HashMap::new();
    let mut asset_refs = Vec::new();
    for outcome in &asset_outcomes {
        if let Some(hash) = &outcome.content_hash {
            asset_refs.push(hash.clone());
            // Asset extension isn't known here without re-reading the
            // registry; MetadataStore already has it from the downloader's
            // `put_asset` call.
            if let Some(asset) = metadata.get_asset(hash).await? {
                let ext = asset
                    .local_path
                    .rsplit('.')
                    .next()
                    .map(|s| format!(".{s}"))
                    .unwrap_or_default();
                let asset_path = layout.asset_path(hash, &ext);
                let relative = relative_from(&markdown_path, &asset_path);
                asset_map.insert(outcome.url.clone(), ResolvedAsset { relative_path: relative });
            }
        }
    }

    let resolved_links = links.resolve_links(stub, &refs.hrefs).await?;
    let link_map = LinkResolver::build_resolution_map(&resolved_links);

    let markdown = MarkdownConverter::new().convert(&content.html, &asset_map, &link_map)?;

    if let Some(parent) = markdown_path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| CoreError::storage_io(parent, e))?;
    }
    tokio::fs::write(&markdown_path, &markdown)
        .await
        .map_err(|e| CoreError::storage_io(&markdown_path, e))?;

    let page = Page {
        id: stub.id.clone(),
        title: stub.title.clone(),
        section_id: stub.section_id.clone(),
        notebook_id: stub.notebook_id.clone(),
        created_at: stub.created_at,
        modified_at: content.modified_at,
        content_etag: content.etag,
        html_path: Some(html_path.to_string_lossy().to_string()),
        markdown_path: Some(markdown_path.to_string_lossy().to_string()),
        asset_refs,
        link_refs: resolved_links.into_iter().map(|r| r.link_ref).collect(),
        text_length: markdown.len(),
        status: PageStatus::Present,
        modified_at_at_last_fetch: content.modified_at,
    };
    metadata.put_page(&page).await?;
    Ok(page)
}

fn relative_from(from_file: &std::path::Path, to_file: &std::path::Path) -> String {
    let from_dir = from_file.parent().unwrap_or(from_file);
    pathdiff::diff_paths(to_file, from_dir)
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .unwrap_or_else(|| to_file.to_string_lossy().to_string())
}

struct ExtractedRefs {
    asset_urls: Vec<String>,
    hrefs: Vec<(String, String)>,
}

/// Single-pass scan for `<img src>`/`<img data-fullres-src>`, `<object
/// data>`, and `<a href>` + visible text. Shares the direct-DOM-walk shape
/// `MarkdownConverter` uses rather than a second, competing HTML parser.
fn extract_refs(html: &str) -> ExtractedRefs {
    let dom = parse_document(RcDom::default(), html5ever::ParseOpts::default())
        .from_utf8()
        .read_from(&mut html.as_bytes())
        .unwrap_or_default();

    let mut asset_urls = Vec::new();
    let mut hrefs = Vec::new();
    walk_refs(&dom.document, &mut asset_urls, &mut hrefs);
    asset_urls.sort();
    asset_urls.dedup();
    ExtractedRefs { asset_urls, hrefs }
}

fn walk_refs(handle: &Handle, asset_urls: &mut Vec<String>, hrefs: &mut Vec<(String, String)>) {
    if let NodeData::Element { name, attrs, .. } = &handle.data {
        let attrs = attrs.borrow();
        let find = |attr: &str| attrs.iter().find(|a| &*a.name.local == attr).map(|a| a.value.to_string());
        match &*name.local {
            "img" => {
                if let Some(src) = find("data-fullres-src").or_else(|| find("src")) {
                    asset_urls.push(src);
                }
            }
            "object" => {
                if let Some(data) = find("data") {
                    asset_urls.push(data);
                }
            }
            "a" => {
                if let Some(href) = find("href") {
                    let text = collect_text(handle);
                    hrefs.push((href, text));
                }
            }
            _ => {}
        }
    }
    for child in handle.children.borrow().iter() {
        walk_refs(child, asset_urls, hrefs);
    }
}

fn collect_text(handle: &Handle) -> String {
    let mut out = String::new();
    collect_text_into(handle, &mut out);
    out.trim().to_string()
}

fn collect_text_into(handle: &Handle, out: &mut String) {
    if let NodeData::Text { contents } = &handle.data {
        out.push_str(&contents.borrow());
    }
    for child in handle.children.borrow().iter() {
        collect_text_into(child, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_refs_collects_images_objects_and_links() {
        let html = r#"
            <html><body>
                <img src="https://x/a.png">
                <img data-fullres-src="https://x/full.png" src="https://x/thumb.png">
                <object data="https://x/file.pdf"></object>
                <a href="https://x/other">Other Page</a>
            </body></html>
        "#;
        let refs = extract_refs(html);
        assert!(refs.asset_urls.contains(&"https://x/a.png".to_string()));
        assert!(refs.asset_urls.contains(&"https://x/full.png".to_string()));
        assert!(!refs.asset_urls.contains(&"https://x/thumb.png".to_string()));
        assert!(refs.asset_urls.contains(&"https://x/file.pdf".to_string()));
        assert_eq!(refs.hrefs, vec![("https://x/other".to_string(), "Other Page".to_string())]);
    }

    #[test]
    fn extract_refs_dedups_asset_urls() {
        let html = r#"<img src="https://x/a.png"><img src="https://x/a.png">"#;
        let refs = extract_refs(html);
        assert_eq!(refs.asset_urls.len(), 1);
    }

    use crate::config::CoreConfigBuilder;
    use crate::links::LinkResolver;
    use crate::remote::AccessTokenProvider;
    use async_trait::async_trait;
    use chrono::Utc;

    struct StaticToken;

    #[async_trait]
    impl AccessTokenProvider for StaticToken {
        async fn access_token(&self) -> crate::error::CoreResult<String> {
            Ok("token".to_string())
        }
    }

    #[tokio::test]
    async fn fetch_page_downloads_assets_and_writes_markdown() {
        let mut server = mockito::Server::new_async().await;
        let html = format!(
            r#"<html><body><p>Hello</p><img src="{}/asset.png"></body></html>"#,
            server.url()
        );
        let _content_mock = server
            .mock("GET", "/me/onenote/pages/pg-1/content")
            .with_status(200)
            .with_header("etag", "\"abc\"")
            .with_body(html)
            .create_async()
            .await;
        let _asset_mock = server
            .mock("GET", "/asset.png")
            .with_status(200)
            .with_header("content-type", "image/png")
            .with_body(b"fake png".to_vec())
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
        let metadata = Arc::new(
            MetadataStore::open(&tmp.path().join("meta.sqlite"))
                .await
                .unwrap(),
        );
        let asset_store = Arc::new(crate::assets::AssetStore::new(layout.clone(), config.clone()));
        let downloader = Arc::new(AssetDownloader::new(
            remote.clone(),
            asset_store,
            metadata.clone(),
            2,
        ));
        let links = Arc::new(LinkResolver::new(metadata.clone(), layout.clone()));
        let fetcher = ContentFetcher::new(remote, downloader, links, metadata.clone(), layout, 2);

        let stub = Page {
            id: "pg-1".to_string(),
            title: "Hello Page".to_string(),
            section_id: "sec-1".to_string(),
            notebook_id: "nb-1".to_string(),
            created_at: Utc::now(),
            modified_at: Utc::now(),
            content_etag: None,
            html_path: None,
            markdown_path: None,
            asset_refs: vec![],
            link_refs: vec![],
            text_length: 0,
            status: PageStatus::Stub,
            modified_at_at_last_fetch: Utc::now(),
        };

        let outcome = fetcher.fetch_page(&stub).await;
        assert_eq!(outcome.status, PageStatus::Present);
        assert!(outcome.error.is_none());

        let stored = metadata.get_page("pg-1").await.unwrap().unwrap();
        assert_eq!(stored.status, PageStatus::Present);
        assert_eq!(stored.asset_refs.len(), 1);
        assert_eq!(stored.content_etag.as_deref(), Some("\"abc\""));

        let markdown_path = std::path::PathBuf::from(stored.markdown_path.unwrap());
        let markdown = tokio::fs::read_to_string(&markdown_path).await.unwrap();
        assert!(markdown.contains("Hello"));
    }

    #[tokio::test]
    async fn fetch_page_reports_failure_without_clobbering_existing_page() {
        let mut server = mockito::Server::new_async().await;
        let _missing = server
            .mock("GET", "/me/onenote/pages/pg-1/content")
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
        let metadata = Arc::new(
            MetadataStore::open(&tmp.path().join("meta.sqlite"))
                .await
                .unwrap(),
        );
        let asset_store = Arc::new(crate::assets::AssetStore::new(layout.clone(), config.clone()));
        let downloader = Arc::new(AssetDownloader::new(
            remote.clone(),
            asset_store,
            metadata.clone(),
            2,
        ));
        let links = Arc::new(LinkResolver::new(metadata.clone(), layout.clone()));
        let fetcher = ContentFetcher::new(remote, downloader, links, metadata.clone(), layout, 2);

        let stub = Page {
            id: "pg-1".to_string(),
            title: "Missing Page".to_string(),
            section_id: "sec-1".to_string(),
            notebook_id: "nb-1".to_string(),
            created_at: Utc::now(),
            modified_at: Utc::now(),
            content_etag: None,
            html_path: None,
            markdown_path: None,
            asset_refs: vec![],
            link_refs: vec![],
            text_length: 0,
            status: PageStatus::Stub,
            modified_at_at_last_fetch: Utc::now(),
        };

        let outcome = fetcher.fetch_page(&stub).await;
        assert_eq!(outcome.status, PageStatus::Failed);
        assert!(outcome.error.is_some());

        let stored = metadata.get_page("pg-1").await.unwrap().unwrap();
        assert_eq!(stored.status, PageStatus::Failed);
    }
}
