//! `SearchIndex` (C9): the Tantivy-backed full-text index over cached
//! pages. Mirrors the teacher's index-lifecycle shape (schema-mismatch
//! detection, writer-with-retry, commit-then-reload-via-`spawn_blocking`,
//! corruption validation/recovery) generalized from a web-crawl document
//! model to `page_id`/`title`/`body_markdown`/`notebook_id`/`section_id`/
//! `modified_at`, plus an explicit `absent/ready/rebuilding/corrupt` state
//! machine the teacher's version didn't need.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tantivy::collector::{Count, TopDocs};
use tantivy::directory::MmapDirectory;
use tantivy::schema::Value;
use tantivy::{Index, IndexReader, IndexSettings, IndexWriter, TantivyDocument, Term};

use super::errors::{RetryConfig, SearchError, SearchResult};
use super::query::{build_query, SnippetBuilder};
use super::runtime_helpers::retry_task;
use super::schema::SearchSchema;
use super::types::{IndexState, IndexStats, SearchFilter, SearchHit};
use crate::error::{CoreError, CoreResult};
use crate::metadata::{MetadataStore, PageFilter};
use crate::model::IndexedDocument;

#[derive(Clone)]
pub struct SearchIndex {
    index: Index,
    schema: SearchSchema,
    reader: IndexReader,
    index_path: PathBuf,
    journal_path: PathBuf,
    state: Arc<RwLock<IndexState>>,
    title_weight: f32,
    body_weight: f32,
    max_hits: usize,
}

/// A document that failed to be written to the index during a sync or
/// bulk run, buffered so a later call can replay it without re-fetching
/// content.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct JournalEntry {
    page_id: String,
    title: String,
    body_markdown: String,
    notebook_id: String,
    section_id: String,
    modified_at: DateTime<Utc>,
}

impl From<&IndexedDocument> for JournalEntry {
    fn from(doc: &IndexedDocument) -> Self {
        Self {
            page_id: doc.page_id.clone(),
            title: doc.title.clone(),
            body_markdown: doc.body_markdown.clone(),
            notebook_id: doc.notebook_id.clone(),
            section_id: doc.section_id.clone(),
            modified_at: doc.modified_at,
        }
    }
}

impl From<JournalEntry> for IndexedDocument {
    fn from(e: JournalEntry) -> Self {
        Self {
            page_id: e.page_id,
            title: e.title,
            body_markdown: e.body_markdown,
            notebook_id: e.notebook_id,
            section_id: e.section_id,
            modified_at: e.modified_at,
        }
    }
}

impl SearchIndex {
    /// Opens the on-disk index, creating it if absent. A schema mismatch
    /// with whatever is on disk recreates the index from scratch, as does
    /// a hard corruption detected during the post-open validation pass.
    pub async fn open(index_dir: PathBuf, title_weight: f32, body_weight: f32, max_hits: usize) -> CoreResult<Self> {
        std::fs::create_dir_all(&index_dir).map_err(|e| CoreError::storage_io(&index_dir, e))?;

        let schema = SearchSchema::builder().build().await.map_err(anyhow_to_core)?;

        let index = if index_dir.join("meta.json").exists() {
            let existing = Index::open_in_dir(&index_dir).map_err(|e| CoreError::storage_io(&index_dir, e))?;

            if existing.schema().num_fields() != schema.schema.num_fields() {
                tracing::warn!("search index schema mismatch, recreating");
                drop(existing);
                std::fs::remove_dir_all(&index_dir).map_err(|e| CoreError::storage_io(&index_dir, e))?;
                std::fs::create_dir_all(&index_dir).map_err(|e| CoreError::storage_io(&index_dir, e))?;
                create_index(&index_dir, &schema)?
            } else {
                existing
            }
        } else {
            create_index(&index_dir, &schema)?
        };

        SearchSchema::builder()
            .register_tokenizers(index.tokenizers())
            .await
            .map_err(anyhow_to_core)?;

        let reader = index.reader().map_err(|e| CoreError::Other(e.into()))?;

        let this = Self {
            index,
            schema,
            reader,
            index_path: index_dir.clone(),
            journal_path: index_dir.join("upsert_journal.json"),
            state: Arc::new(RwLock::new(IndexState::Ready)),
            title_weight,
            body_weight,
            max_hits,
        };

        if this.validate_index().await.is_err() {
            *this.state.write() = IndexState::Corrupt;
        }

        Ok(this)
    }

    #[must_use]
    pub fn state(&self) -> IndexState {
        *self.state.read()
    }

    #[must_use]
    pub fn schema(&self) -> &SearchSchema {
        &self.schema
    }

    fn require_ready(&self) -> CoreResult<()> {
        let state = self.state();
        if state == IndexState::Ready {
            Ok(())
        } else {
            Err(CoreError::IndexUnavailable { state: format!("{state:?}").to_lowercase() })
        }
    }

    /// Replaces any existing entry for `document.page_id`. Failures are
    /// appended to an on-disk journal instead of propagated, so a single
    /// bad document during a sync doesn't abort the whole run; call
    /// [`Self::replay_journal`] afterwards to retry them.
    pub async fn upsert(&self, document: &IndexedDocument) -> CoreResult<()> {
        match self.write_one(document).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!(page_id = %document.page_id, error = %e, "upsert failed, journaling for replay");
                self.append_journal(document).await?;
                Ok(())
            }
        }
    }

    async fn write_one(&self, document: &IndexedDocument) -> SearchResult<()> {
        let mut writer = self.writer_with_retry(None).await?;
        let term = Term::from_field_text(self.schema.page_id, &document.page_id);
        writer.delete_term(term);
        writer.add_document(self.to_tantivy_document(document)).map_err(SearchError::Tantivy)?;
        self.commit_and_optimize(writer).await?;
        Ok(())
    }

    fn to_tantivy_document(&self, document: &IndexedDocument) -> TantivyDocument {
        let mut doc = TantivyDocument::default();
        doc.add_text(self.schema.page_id, &document.page_id);
        doc.add_text(self.schema.title, &document.title);
        doc.add_text(self.schema.body_markdown, &document.body_markdown);
        doc.add_text(self.schema.notebook_id, &document.notebook_id);
        doc.add_text(self.schema.section_id, &document.section_id);
        doc.add_date(
            self.schema.modified_at,
            tantivy::DateTime::from_timestamp_secs(document.modified_at.timestamp()),
        );
        doc
    }

    pub async fn delete(&self, page_id: &str) -> CoreResult<()> {
        let mut writer = self.writer_with_retry(None).await.map_err(core_from_search)?;
        let term = Term::from_field_text(self.schema.page_id, page_id);
        writer.delete_term(term);
        self.commit_and_optimize(writer).await.map_err(core_from_search)?;
        Ok(())
    }

    /// Runs `query` (plus `filter`) against the index, returning hits
    /// ordered by descending score. Fails with `IndexUnavailable` unless
    /// the index is in the `Ready` state.
    pub async fn search(&self, query: &str, filter: &SearchFilter) -> CoreResult<Vec<SearchHit>> {
        self.require_ready()?;

        let limit = filter.limit.unwrap_or(self.max_hits).min(self.max_hits);
        let searcher = self.reader.searcher();

        let parsed = build_query(&self.schema, self.title_weight, self.body_weight, query, filter)
            .map_err(|e| CoreError::Other(anyhow::anyhow!("query parsing failed: {e}")))?;

        let _total = searcher.search(&*parsed, &Count).map_err(|e| CoreError::Other(e.into()))?;
        let top_docs =
            searcher.search(&*parsed, &TopDocs::with_limit(limit)).map_err(|e| CoreError::Other(e.into()))?;

        let snippets = SnippetBuilder::create(&searcher, &*parsed, &self.schema);

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address).map_err(|e| CoreError::Other(e.into()))?;
            let page_id = doc.get_first(self.schema.page_id).and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let snippet = snippets.build(&doc, &self.schema);
            hits.push(SearchHit { page_id, score, snippet });
        }

        Ok(hits)
    }

    /// Rebuilds the index from scratch by reading every page's markdown
    /// off disk. Idempotent: callable any number of times, including
    /// while already `Ready`.
    pub async fn rebuild_from_metadata(&self, metadata: &MetadataStore) -> CoreResult<()> {
        *self.state.write() = IndexState::Rebuilding;

        let result = self.rebuild_inner(metadata).await;

        *self.state.write() = if result.is_ok() { IndexState::Ready } else { IndexState::Corrupt };
        result
    }

    async fn rebuild_inner(&self, metadata: &MetadataStore) -> CoreResult<()> {
        let pages = metadata.list_pages(&PageFilter::default()).await?;
        let mut writer = self.writer_with_retry(None).await.map_err(core_from_search)?;
        writer.delete_all_documents().map_err(|e| CoreError::Other(e.into()))?;

        for page in &pages {
            let Some(path) = &page.markdown_path else { continue };
            let body = tokio::fs::read_to_string(path).await.unwrap_or_default();
            let document = IndexedDocument {
                page_id: page.id.clone(),
                title: page.title.clone(),
                body_markdown: body,
                notebook_id: page.notebook_id.clone(),
                section_id: page.section_id.clone(),
                modified_at: page.modified_at,
            };
            writer.add_document(self.to_tantivy_document(&document)).map_err(|e| CoreError::Other(e.into()))?;
        }

        self.commit_and_optimize(writer).await.map_err(core_from_search)?;
        Ok(())
    }

    /// Replays any documents buffered by a failed [`Self::upsert`],
    /// returning how many were successfully re-applied. Entries that fail
    /// again stay in the journal.
    pub async fn replay_journal(&self) -> CoreResult<usize> {
        let entries = self.load_journal().await;
        if entries.is_empty() {
            return Ok(0);
        }

        let mut remaining = Vec::new();
        let mut replayed = 0;
        for entry in entries {
            let document: IndexedDocument = entry.clone().into();
            match self.write_one(&document).await {
                Ok(()) => replayed += 1,
                Err(_) => remaining.push(entry),
            }
        }

        self.save_journal(&remaining).await?;
        Ok(replayed)
    }

    async fn load_journal(&self) -> Vec<JournalEntry> {
        match tokio::fs::read(&self.journal_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    async fn save_journal(&self, entries: &[JournalEntry]) -> CoreResult<()> {
        if entries.is_empty() {
            let _ = tokio::fs::remove_file(&self.journal_path).await;
            return Ok(());
        }
        let bytes = serde_json::to_vec_pretty(entries).map_err(anyhow::Error::from)?;
        let tmp = self.journal_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await.map_err(|e| CoreError::storage_io(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.journal_path).await.map_err(|e| CoreError::storage_io(&self.journal_path, e))?;
        Ok(())
    }

    async fn append_journal(&self, document: &IndexedDocument) -> CoreResult<()> {
        let mut entries = self.load_journal().await;
        entries.retain(|e| e.page_id != document.page_id);
        entries.push(document.into());
        self.save_journal(&entries).await
    }

    async fn writer_with_retry(&self, memory_limit: Option<usize>) -> SearchResult<IndexWriter> {
        let limit = memory_limit.unwrap_or(50_000_000);
        let retry_config = RetryConfig::default();
        let index = self.index.clone();

        retry_task(retry_config, move || {
            let index = index.clone();
            async move {
                index.writer(limit).map_err(|e| {
                    SearchError::WriterAcquisition(format!("failed to acquire index writer with {}MB limit: {e}", limit / 1_000_000))
                })
            }
        })
        .await
    }

    async fn commit_and_optimize(&self, mut writer: IndexWriter) -> SearchResult<()> {
        let reader = self.reader.clone();
        tokio::task::spawn_blocking(move || -> SearchResult<()> {
            writer.commit().map_err(|e| SearchError::CommitFailed(format!("index commit failed: {e}")))?;
            reader.reload().map_err(|e| SearchError::Other(format!("failed to reload reader: {e}")))?;
            Ok(())
        })
        .await
        .map_err(|e| SearchError::Other(format!("commit task panicked: {e}")))??;
        Ok(())
    }

    async fn validate_index(&self) -> SearchResult<()> {
        let searcher = self.reader.searcher();
        match searcher.search(&tantivy::query::AllQuery, &Count) {
            Ok(_) => Ok(()),
            Err(e) => Err(SearchError::IndexCorruption(format!("failed to execute validation query: {e}"))),
        }
    }

    /// Backs up a corrupted index directory and recreates an empty one;
    /// the caller is expected to follow with `rebuild_from_metadata`.
    pub async fn recover(&self) -> CoreResult<()> {
        let backup_dir = self.index_path.with_file_name("search_index.backup");
        if self.index_path.exists() {
            if let Err(e) = std::fs::rename(&self.index_path, &backup_dir) {
                tracing::error!(error = %e, "failed to back up corrupted index");
            }
        }
        std::fs::create_dir_all(&self.index_path).map_err(|e| CoreError::storage_io(&self.index_path, e))?;
        *self.state.write() = IndexState::Absent;
        Ok(())
    }

    pub async fn stats(&self) -> CoreResult<IndexStats> {
        let last_updated_at = self.last_commit_time().await;
        let byte_size = self.directory_size().await.unwrap_or(0);
        let document_count = self.reader.searcher().num_docs() as usize;

        Ok(IndexStats { document_count, byte_size, last_updated_at })
    }

    async fn last_commit_time(&self) -> Option<DateTime<Utc>> {
        let meta_path = self.index_path.join("meta.json");
        let metadata = tokio::fs::metadata(&meta_path).await.ok()?;
        let modified = metadata.modified().ok()?;
        let secs = modified.duration_since(std::time::SystemTime::UNIX_EPOCH).ok()?.as_secs();
        DateTime::from_timestamp(secs as i64, 0)
    }

    async fn directory_size(&self) -> Option<u64> {
        let path = self.index_path.clone();
        tokio::task::spawn_blocking(move || directory_size_sync(&path)).await.ok()
    }
}

fn directory_size_sync(path: &std::path::Path) -> u64 {
    let mut total = 0u64;
    let Ok(entries) = std::fs::read_dir(path) else { return 0 };
    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else { continue };
        if file_type.is_dir() {
            total += directory_size_sync(&entry.path());
        } else if let Ok(metadata) = entry.metadata() {
            total += metadata.len();
        }
    }
    total
}

fn create_index(index_dir: &std::path::Path, schema: &SearchSchema) -> CoreResult<Index> {
    let mmap_directory = MmapDirectory::open(index_dir).map_err(|e| CoreError::storage_io(index_dir, e))?;
    Index::create(mmap_directory, schema.schema.clone(), IndexSettings::default())
        .map_err(|e| CoreError::Other(e.into()))
}

fn anyhow_to_core(e: anyhow::Error) -> CoreError {
    CoreError::Other(e)
}

fn core_from_search(e: SearchError) -> CoreError {
    CoreError::Other(anyhow::anyhow!("{e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataStore;
    use crate::model::Page;

    fn doc(page_id: &str, title: &str, body: &str) -> IndexedDocument {
        IndexedDocument {
            page_id: page_id.to_string(),
            title: title.to_string(),
            body_markdown: body.to_string(),
            notebook_id: "notebook-1".to_string(),
            section_id: "section-1".to_string(),
            modified_at: Utc::now(),
        }
    }

    async fn open_index(dir: &std::path::Path) -> SearchIndex {
        SearchIndex::open(dir.to_path_buf(), 2.0, 1.0, 20).await.unwrap()
    }

    #[tokio::test]
    async fn open_creates_index_ready_and_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let index = open_index(tmp.path()).await;
        assert_eq!(index.state(), IndexState::Ready);
        let stats = index.stats().await.unwrap();
        assert_eq!(stats.document_count, 0);
    }

    #[tokio::test]
    async fn upsert_then_search_finds_the_document() {
        let tmp = tempfile::tempdir().unwrap();
        let index = open_index(tmp.path()).await;

        index.upsert(&doc("page-1", "Quarterly Planning", "revenue targets for next quarter")).await.unwrap();

        let hits = index.search("quarterly", &SearchFilter::default()).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].page_id, "page-1");
    }

    #[tokio::test]
    async fn upsert_replaces_existing_document_for_same_page() {
        let tmp = tempfile::tempdir().unwrap();
        let index = open_index(tmp.path()).await;

        index.upsert(&doc("page-1", "Draft", "placeholder text")).await.unwrap();
        index.upsert(&doc("page-1", "Final", "revised content")).await.unwrap();

        let hits = index.search("placeholder", &SearchFilter::default()).await.unwrap();
        assert!(hits.is_empty());
        let hits = index.search("revised", &SearchFilter::default()).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn delete_removes_document_from_search_results() {
        let tmp = tempfile::tempdir().unwrap();
        let index = open_index(tmp.path()).await;

        index.upsert(&doc("page-1", "Notes", "meeting notes")).await.unwrap();
        index.delete("page-1").await.unwrap();

        let hits = index.search("meeting", &SearchFilter::default()).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn search_rejects_queries_while_not_ready() {
        let tmp = tempfile::tempdir().unwrap();
        let index = open_index(tmp.path()).await;
        *index.state.write() = IndexState::Rebuilding;

        let err = index.search("anything", &SearchFilter::default()).await.unwrap_err();
        assert!(matches!(err, CoreError::IndexUnavailable { .. }));
    }

    #[tokio::test]
    async fn rebuild_from_metadata_indexes_every_page_with_markdown() {
        let tmp = tempfile::tempdir().unwrap();
        let index = open_index(tmp.path()).await;
        let layout = crate::cache::CacheLayout::new(tmp.path(), "user-1");
        let metadata = MetadataStore::open(&layout.metadata_db_path()).await.unwrap();

        let markdown_path = tmp.path().join("page-1.md");
        tokio::fs::write(&markdown_path, "migration plan for the data warehouse").await.unwrap();

        let mut page = Page {
            id: "page-1".to_string(),
            title: "Migration Plan".to_string(),
            section_id: "section-1".to_string(),
            notebook_id: "notebook-1".to_string(),
            created_at: Utc::now(),
            modified_at: Utc::now(),
            content_etag: None,
            html_path: None,
            markdown_path: Some(markdown_path.to_string_lossy().to_string()),
            asset_refs: Vec::new(),
            link_refs: Vec::new(),
            text_length: 0,
            status: crate::model::PageStatus::Present,
            modified_at_at_last_fetch: Utc::now(),
        };
        page.text_length = 10;
        metadata.put_page(&page).await.unwrap();

        index.rebuild_from_metadata(&metadata).await.unwrap();
        assert_eq!(index.state(), IndexState::Ready);

        let hits = index.search("migration", &SearchFilter::default()).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn replay_journal_reapplies_buffered_documents() {
        let tmp = tempfile::tempdir().unwrap();
        let index = open_index(tmp.path()).await;

        index.append_journal(&doc("page-1", "Journaled", "buffered content")).await.unwrap();
        assert!(tokio::fs::try_exists(&index.journal_path).await.unwrap());

        let replayed = index.replay_journal().await.unwrap();
        assert_eq!(replayed, 1);
        assert!(!tokio::fs::try_exists(&index.journal_path).await.unwrap());

        let hits = index.search("buffered", &SearchFilter::default()).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn recover_backs_up_and_resets_to_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let index = open_index(tmp.path()).await;
        index.upsert(&doc("page-1", "Notes", "some content")).await.unwrap();

        index.recover().await.unwrap();

        assert_eq!(index.state(), IndexState::Absent);
        assert!(index.index_path.with_file_name("search_index.backup").exists());
    }
}
