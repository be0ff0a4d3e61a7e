//! `LinkResolver` (C7): href classification, id/title resolution against
//! `MetadataStore`, relative path construction, and the backlink
//! cross-reference index.
//!
//! Grounded on the teacher's `link_index::mod` (forward/inverse SQLite link
//! tables, the shape `inbound_link_refs`/`find_pages_by_title` on
//! `MetadataStore` generalize from) and `link_rewriter::mod` (href
//! classification ahead of rewriting, `compute_relative_path` via
//! `pathdiff`). Where the teacher rewrites URLs inside already-saved HTML
//! after the fact, this resolver instead classifies and resolves hrefs
//! *before* Markdown conversion so `MarkdownConverter` can rewrite each
//! `<a href>` in a single pass.

use std::collections::HashMap;
use std::path::Path;

use crate::cache::CacheLayout;
use crate::error::CoreResult;
use crate::metadata::MetadataStore;
use crate::model::{LinkKind, LinkRef, Page};

/// How a raw `href` found in a page's HTML was classified before
/// resolution was attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HrefClass {
    /// Points at this page itself (`#section`); never becomes a `LinkRef`.
    FragmentOnly,
    /// An absolute `http(s)` URL outside the notebook service.
    External,
    /// A reference into the notebook service: an id, a title, or a path
    /// the resolver still needs to match against `MetadataStore`.
    InternalCandidate(String),
}

/// Classifies a raw href without touching storage. Pure and side-effect
/// free so it can run ahead of any async resolution.
#[must_use]
pub fn classify_href(href: &str) -> HrefClass {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return HrefClass::FragmentOnly;
    }
    if href.starts_with("http://") || href.starts_with("https://") {
        return HrefClass::External;
    }
    if href.starts_with("mailto:") || href.starts_with("javascript:") || href.starts_with("tel:") {
        return HrefClass::External;
    }
    let spec = href
        .strip_prefix("onenote:")
        .map(str::to_string)
        .unwrap_or_else(|| href.to_string());
    HrefClass::InternalCandidate(spec)
}

/// A single href's resolution result, carrying enough information for the
/// caller to both build a `LinkRef` for the page and feed `MarkdownConverter`
/// a relative-path rewrite.
#[derive(Debug, Clone)]
pub struct ResolvedLink {
    pub href: String,
    pub link_ref: LinkRef,
    /// Present only when `link_ref.kind == InternalResolved`.
    pub relative_path: Option<String>,
}

/// Where a resolved link's target page lives, resolved for relative-path
/// computation.
struct TargetLocation {
    page_id: String,
    notebook_id: String,
    section_id: String,
}

pub struct LinkResolver {
    metadata: std::sync::Arc<MetadataStore>,
    layout: CacheLayout,
}

impl LinkResolver {
    #[must_use]
    pub fn new(metadata: std::sync::Arc<MetadataStore>, layout: CacheLayout) -> Self {
        Self { metadata, layout }
    }

    /// Resolves every href found on `source`, in order, against
    /// `MetadataStore`. Resolution is independent per href; one ambiguous
    /// or dangling reference never blocks the others.
    ///
    /// `hrefs` is `(href, visible_link_text)` pairs as extracted from the
    /// page's raw HTML.
    pub async fn resolve_links(
        &self,
        source: &Page,
        hrefs: &[(String, String)],
    ) -> CoreResult<Vec<ResolvedLink>> {
        let mut out = Vec::with_capacity(hrefs.len());
        for (href, link_text) in hrefs {
            match classify_href(href) {
                HrefClass::FragmentOnly => continue,
                HrefClass::External => {
                    out.push(ResolvedLink {
                        href: href.clone(),
                        link_ref: LinkRef {
                            source_page_id: source.id.clone(),
                            target_spec: href.clone(),
                            target_page_id: None,
                            link_text: link_text.clone(),
                            kind: LinkKind::External,
                        },
                        relative_path: None,
                    });
                }
                HrefClass::InternalCandidate(spec) => {
                    let resolved = self.resolve_candidate(source, &spec).await?;
                    match resolved {
                        Some(target) => {
                            let relative_path = self.relative_markdown_path(source, &target);
                            out.push(ResolvedLink {
                                href: href.clone(),
                                link_ref: LinkRef {
                                    source_page_id: source.id.clone(),
                                    target_spec: spec,
                                    target_page_id: Some(target.page_id),
                                    link_text: link_text.clone(),
                                    kind: LinkKind::InternalResolved,
                                },
                                relative_path: Some(relative_path),
                            });
                        }
                        None => {
                            out.push(ResolvedLink {
                                href: href.clone(),
                                link_ref: LinkRef {
                                    source_page_id: source.id.clone(),
                                    target_spec: spec,
                                    target_page_id: None,
                                    link_text: link_text.clone(),
                                    kind: LinkKind::InternalUnresolved,
                                },
                                relative_path: None,
                            });
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    /// Builds the `href -> relative path` map `MarkdownConverter` consumes,
    /// from an already-resolved link set.
    #[must_use]
    pub fn build_resolution_map(resolved: &[ResolvedLink]) -> HashMap<String, String> {
        resolved
            .iter()
            .filter_map(|r| r.relative_path.clone().map(|p| (r.href.clone(), p)))
            .collect()
    }

    /// All pages that link to `page_id`, for the backlinks cross-reference
    /// index exposed through the search facade / status surface.
    pub async fn backlinks(&self, page_id: &str) -> CoreResult<Vec<LinkRef>> {
        self.metadata.inbound_link_refs(page_id).await
    }

    async fn resolve_candidate(&self, source: &Page, spec: &str) -> CoreResult<Option<TargetLocation>> {
        if let Some(page) = self.metadata.get_page(spec).await? {
            return Ok(Some(TargetLocation {
                page_id: page.id,
                notebook_id: page.notebook_id,
                section_id: page.section_id,
            }));
        }

        // Same section first, then same notebook, then global. Multiple
        // matches at the same scope is an ambiguity: leave unresolved
        // rather than guess.
        let same_section = self
            .metadata
            .find_pages_by_title(spec, Some(&source.section_id), None)
            .await?;
        if let Some(page) = self.pick_unambiguous(same_section, spec, "section")? {
            return Ok(Some(TargetLocation {
                page_id: page.id,
                notebook_id: page.notebook_id,
                section_id: page.section_id,
            }));
        }

        let same_notebook = self
            .metadata
            .find_pages_by_title(spec, None, Some(&source.notebook_id))
            .await?;
        if let Some(page) = self.pick_unambiguous(same_notebook, spec, "notebook")? {
            return Ok(Some(TargetLocation {
                page_id: page.id,
                notebook_id: page.notebook_id,
                section_id: page.section_id,
            }));
        }

        let global = self.metadata.find_pages_by_title(spec, None, None).await?;
        if let Some(page) = self.pick_unambiguous(global, spec, "global")? {
            return Ok(Some(TargetLocation {
                page_id: page.id,
                notebook_id: page.notebook_id,
                section_id: page.section_id,
            }));
        }

        Ok(None)
    }

    fn pick_unambiguous(&self, mut matches: Vec<Page>, spec: &str, scope: &str) -> CoreResult<Option<Page>> {
        match matches.len() {
            0 => Ok(None),
            1 => Ok(Some(matches.remove(0))),
            _ => {
                tracing::warn!(
                    target_spec = spec,
                    scope,
                    candidates = matches.len(),
                    "ambiguous internal link left unresolved"
                );
                Ok(None)
            }
        }
    }

    fn relative_markdown_path(&self, source: &Page, target: &TargetLocation) -> String {
        let from = self
            .layout
            .page_markdown_path(&source.notebook_id, &source.section_id, &source.id);
        let to = self
            .layout
            .page_markdown_path(&target.notebook_id, &target.section_id, &target.page_id);
        diff_from_file(&from, &to)
    }
}

fn diff_from_file(from_file: &Path, to_file: &Path) -> String {
    let from_dir = from_file.parent().unwrap_or(from_file);
    pathdiff::diff_paths(to_file, from_dir)
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .unwrap_or_else(|| to_file.to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfigBuilder;
    use chrono::Utc;
    use std::sync::Arc;

    fn sample_page(id: &str, title: &str, section_id: &str, notebook_id: &str) -> Page {
        Page {
            id: id.to_string(),
            title: title.to_string(),
            section_id: section_id.to_string(),
            notebook_id: notebook_id.to_string(),
            created_at: Utc::now(),
            modified_at: Utc::now(),
            content_etag: None,
            html_path: None,
            markdown_path: Some(format!("{notebook_id}/{section_id}/{id}/content.md")),
            asset_refs: vec![],
            link_refs: vec![],
            text_length: 0,
            status: crate::model::PageStatus::Present,
            modified_at_at_last_fetch: Utc::now(),
        }
    }

    #[test]
    fn classify_href_cases() {
        assert_eq!(classify_href("#top"), HrefClass::FragmentOnly);
        assert_eq!(classify_href(""), HrefClass::FragmentOnly);
        assert_eq!(classify_href("https://example.com/x"), HrefClass::External);
        assert_eq!(classify_href("mailto:a@b.com"), HrefClass::External);
        assert_eq!(
            classify_href("onenote:page-42"),
            HrefClass::InternalCandidate("page-42".to_string())
        );
        assert_eq!(
            classify_href("Meeting Notes"),
            HrefClass::InternalCandidate("Meeting Notes".to_string())
        );
    }

    async fn setup() -> (LinkResolver, Arc<MetadataStore>, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let config = CoreConfigBuilder::new()
            .cache_root(tmp.path())
            .user_id("user-1")
            .build()
            .unwrap();
        let layout = CacheLayout::new(tmp.path(), config.user_id());
        let metadata = Arc::new(
            MetadataStore::open(&tmp.path().join("meta.sqlite"))
                .await
                .unwrap(),
        );
        let resolver = LinkResolver::new(metadata.clone(), layout);
        (resolver, metadata, tmp)
    }

    #[tokio::test]
    async fn resolves_internal_link_by_id() {
        let (resolver, metadata, _tmp) = setup().await;
        let target = sample_page("pg-2", "Target", "sec-1", "nb-1");
        metadata.put_page(&target).await.unwrap();
        let source = sample_page("pg-1", "Source", "sec-1", "nb-1");
        metadata.put_page(&source).await.unwrap();

        let resolved = resolver
            .resolve_links(&source, &[("onenote:pg-2".to_string(), "Target".to_string())])
            .await
            .unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].link_ref.kind, LinkKind::InternalResolved);
        assert_eq!(resolved[0].link_ref.target_page_id.as_deref(), Some("pg-2"));
        assert!(resolved[0].relative_path.is_some());
    }

    #[tokio::test]
    async fn resolves_internal_link_by_title_same_section_first() {
        let (resolver, metadata, _tmp) = setup().await;
        let same_section = sample_page("pg-2", "Shared Title", "sec-1", "nb-1");
        let other_section = sample_page("pg-3", "Shared Title", "sec-2", "nb-1");
        metadata.put_page(&same_section).await.unwrap();
        metadata.put_page(&other_section).await.unwrap();
        let source = sample_page("pg-1", "Source", "sec-1", "nb-1");
        metadata.put_page(&source).await.unwrap();

        let resolved = resolver
            .resolve_links(&source, &[("Shared Title".to_string(), "link".to_string())])
            .await
            .unwrap();
        assert_eq!(resolved[0].link_ref.target_page_id.as_deref(), Some("pg-2"));
    }

    #[tokio::test]
    async fn resolves_internal_link_by_slugified_title() {
        let (resolver, metadata, _tmp) = setup().await;
        let target = sample_page("pg-2", "Quarterly Planning: 2026", "sec-1", "nb-1");
        metadata.put_page(&target).await.unwrap();
        let source = sample_page("pg-1", "Source", "sec-1", "nb-1");
        metadata.put_page(&source).await.unwrap();

        let resolved = resolver
            .resolve_links(
                &source,
                &[("onenote:Quarterly-Planning-2026".to_string(), "link".to_string())],
            )
            .await
            .unwrap();
        assert_eq!(resolved[0].link_ref.kind, LinkKind::InternalResolved);
        assert_eq!(resolved[0].link_ref.target_page_id.as_deref(), Some("pg-2"));
    }

    #[tokio::test]
    async fn ambiguous_title_in_same_scope_is_left_unresolved() {
        let (resolver, metadata, _tmp) = setup().await;
        metadata
            .put_page(&sample_page("pg-2", "Dup", "sec-1", "nb-1"))
            .await
            .unwrap();
        metadata
            .put_page(&sample_page("pg-3", "Dup", "sec-1", "nb-1"))
            .await
            .unwrap();
        let source = sample_page("pg-1", "Source", "sec-1", "nb-1");
        metadata.put_page(&source).await.unwrap();

        let resolved = resolver
            .resolve_links(&source, &[("Dup".to_string(), "link".to_string())])
            .await
            .unwrap();
        assert_eq!(resolved[0].link_ref.kind, LinkKind::InternalUnresolved);
        assert!(resolved[0].link_ref.target_page_id.is_none());
    }

    #[tokio::test]
    async fn dangling_reference_is_unresolved_not_an_error() {
        let (resolver, metadata, _tmp) = setup().await;
        let source = sample_page("pg-1", "Source", "sec-1", "nb-1");
        metadata.put_page(&source).await.unwrap();

        let resolved = resolver
            .resolve_links(&source, &[("Nowhere".to_string(), "link".to_string())])
            .await
            .unwrap();
        assert_eq!(resolved[0].link_ref.kind, LinkKind::InternalUnresolved);
    }

    #[tokio::test]
    async fn external_and_fragment_links_classified_without_lookup() {
        let (resolver, metadata, _tmp) = setup().await;
        let source = sample_page("pg-1", "Source", "sec-1", "nb-1");
        metadata.put_page(&source).await.unwrap();

        let resolved = resolver
            .resolve_links(
                &source,
                &[
                    ("https://example.com".to_string(), "ext".to_string()),
                    ("#section".to_string(), "frag".to_string()),
                ],
            )
            .await
            .unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].link_ref.kind, LinkKind::External);
    }

    #[tokio::test]
    async fn backlinks_returns_inbound_refs() {
        let (resolver, metadata, _tmp) = setup().await;
        let target = sample_page("pg-2", "Target", "sec-1", "nb-1");
        metadata.put_page(&target).await.unwrap();
        let mut source = sample_page("pg-1", "Source", "sec-1", "nb-1");
        metadata.put_page(&source).await.unwrap();

        let resolved = resolver
            .resolve_links(&source, &[("onenote:pg-2".to_string(), "Target".to_string())])
            .await
            .unwrap();
        source.link_refs = resolved.into_iter().map(|r| r.link_ref).collect();
        metadata.put_page(&source).await.unwrap();

        let backlinks = resolver.backlinks("pg-2").await.unwrap();
        assert_eq!(backlinks.len(), 1);
        assert_eq!(backlinks[0].source_page_id, "pg-1");
    }
}
