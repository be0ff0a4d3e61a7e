//! SQLite-backed metadata store (C3): notebooks, sections, pages, and the
//! asset registry that `MetadataStore` (not `AssetStore`) is the source of
//! truth for. Single-writer, many-reader: every mutating call takes its own
//! transaction so a crash mid-write never leaves a page half-updated.
//!
//! Grounded on the teacher's `link_index::mod` (sqlx SQLite pool with WAL
//! mode, `ON CONFLICT DO UPDATE` upserts, an LRU read-through cache layered
//! in front of the pool) generalized from a flat URL→path index to the
//! notebook/section/page hierarchy plus the page↔asset and page↔link
//! join tables it needs.

use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use tokio::sync::RwLock;

use crate::error::{CoreError, CoreResult};
use crate::model::{Asset, Counters, LinkKind, LinkRef, Notebook, Page, PageStatus, Section};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS notebooks (
    id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    created_at TEXT NOT NULL,
    modified_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sections (
    id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    notebook_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    modified_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sections_notebook ON sections(notebook_id);

CREATE TABLE IF NOT EXISTS pages (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    section_id TEXT NOT NULL,
    notebook_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    modified_at TEXT NOT NULL,
    content_etag TEXT,
    html_path TEXT,
    markdown_path TEXT,
    text_length INTEGER NOT NULL,
    status TEXT NOT NULL,
    modified_at_at_last_fetch TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pages_section ON pages(section_id);
CREATE INDEX IF NOT EXISTS idx_pages_notebook ON pages(notebook_id);
CREATE INDEX IF NOT EXISTS idx_pages_modified ON pages(modified_at);

CREATE TABLE IF NOT EXISTS assets (
    content_hash TEXT PRIMARY KEY,
    mime_type TEXT NOT NULL,
    byte_size INTEGER NOT NULL,
    original_url TEXT NOT NULL,
    local_path TEXT NOT NULL,
    first_seen_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS page_assets (
    page_id TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    PRIMARY KEY (page_id, content_hash)
);

CREATE TABLE IF NOT EXISTS link_refs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_page_id TEXT NOT NULL,
    target_spec TEXT NOT NULL,
    target_page_id TEXT,
    link_text TEXT NOT NULL,
    kind TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_link_refs_source ON link_refs(source_page_id);
CREATE INDEX IF NOT EXISTS idx_link_refs_target ON link_refs(target_page_id);
"#;

/// Optional filters for [`MetadataStore::list_pages`].
#[derive(Debug, Clone, Default)]
pub struct PageFilter {
    pub notebook_id: Option<String>,
    pub section_id: Option<String>,
    pub status: Option<PageStatus>,
}

pub struct MetadataStore {
    pool: SqlitePool,
    page_cache: Arc<RwLock<lru::LruCache<String, Page>>>,
}

impl MetadataStore {
    /// Opens (creating if absent) the metadata database at `db_path`.
    pub async fn open(db_path: &Path) -> CoreResult<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::storage_io(parent, e))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| CoreError::storage_io(db_path, e))?;

        sqlx::query(SCHEMA_SQL)
            .execute(&pool)
            .await
            .map_err(|e| CoreError::storage_io(db_path, e))?;

        let page_cache = Arc::new(RwLock::new(lru::LruCache::new(
            NonZeroUsize::new(500).expect("500 is nonzero"),
        )));

        Ok(Self { pool, page_cache })
    }

    pub async fn put_notebook(&self, notebook: &Notebook) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO notebooks (id, display_name, created_at, modified_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                modified_at = excluded.modified_at
            "#,
        )
        .bind(&notebook.id)
        .bind(&notebook.display_name)
        .bind(notebook.created_at)
        .bind(notebook.modified_at)
        .execute(&self.pool)
        .await
        .map_err(CoreError::from)?;
        Ok(())
    }

    pub async fn get_notebook(&self, id: &str) -> CoreResult<Option<Notebook>> {
        let row = sqlx::query(
            "SELECT id, display_name, created_at, modified_at FROM notebooks WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(CoreError::from)?;
        let Some(row) = row else { return Ok(None) };
        let notebook_id: String = row.get("id");
        let section_ids = self.list_sections(&notebook_id).await?.into_iter().map(|s| s.id).collect();
        Ok(Some(Notebook {
            id: notebook_id,
            display_name: row.get("display_name"),
            created_at: row.get("created_at"),
            modified_at: row.get("modified_at"),
            section_ids,
        }))
    }

    pub async fn list_notebooks(&self) -> CoreResult<Vec<Notebook>> {
        let rows = sqlx::query("SELECT id FROM notebooks ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(CoreError::from)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            if let Some(notebook) = self.get_notebook(&id).await? {
                out.push(notebook);
            }
        }
        Ok(out)
    }

    pub async fn delete_notebook(&self, id: &str) -> CoreResult<()> {
        sqlx::query("DELETE FROM notebooks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(CoreError::from)?;
        Ok(())
    }

    pub async fn put_section(&self, section: &Section) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sections (id, display_name, notebook_id, created_at, modified_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                notebook_id = excluded.notebook_id,
                modified_at = excluded.modified_at
            "#,
        )
        .bind(&section.id)
        .bind(&section.display_name)
        .bind(&section.notebook_id)
        .bind(section.created_at)
        .bind(section.modified_at)
        .execute(&self.pool)
        .await
        .map_err(CoreError::from)?;
        Ok(())
    }

    pub async fn get_section(&self, id: &str) -> CoreResult<Option<Section>> {
        let row = sqlx::query(
            "SELECT id, display_name, notebook_id, created_at, modified_at FROM sections WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(CoreError::from)?;
        let Some(row) = row else { return Ok(None) };
        let section_id: String = row.get("id");
        let page_ids = sqlx::query("SELECT id FROM pages WHERE section_id = ? ORDER BY id")
            .bind(&section_id)
            .fetch_all(&self.pool)
            .await
            .map_err(CoreError::from)?
            .into_iter()
            .map(|r| r.get("id"))
            .collect();
        Ok(Some(Section {
            id: section_id,
            display_name: row.get("display_name"),
            notebook_id: row.get("notebook_id"),
            created_at: row.get("created_at"),
            modified_at: row.get("modified_at"),
            page_ids,
        }))
    }

    pub async fn list_sections(&self, notebook_id: &str) -> CoreResult<Vec<Section>> {
        let rows = sqlx::query("SELECT id FROM sections WHERE notebook_id = ? ORDER BY id")
            .bind(notebook_id)
            .fetch_all(&self.pool)
            .await
            .map_err(CoreError::from)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            if let Some(section) = self.get_section(&id).await? {
                out.push(section);
            }
        }
        Ok(out)
    }

    pub async fn delete_section(&self, id: &str) -> CoreResult<()> {
        sqlx::query("DELETE FROM sections WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(CoreError::from)?;
        Ok(())
    }

    /// Upserts a page and replaces its `link_refs`/`page_assets` rows in one
    /// transaction, so a reader never observes a page whose links reflect an
    /// older fetch than its metadata.
    pub async fn put_page(&self, page: &Page) -> CoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(CoreError::from)?;

        sqlx::query(
            r#"
            INSERT INTO pages (
                id, title, section_id, notebook_id, created_at, modified_at,
                content_etag, html_path, markdown_path, text_length, status,
                modified_at_at_last_fetch
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                section_id = excluded.section_id,
                notebook_id = excluded.notebook_id,
                modified_at = excluded.modified_at,
                content_etag = excluded.content_etag,
                html_path = excluded.html_path,
                markdown_path = excluded.markdown_path,
                text_length = excluded.text_length,
                status = excluded.status,
                modified_at_at_last_fetch = excluded.modified_at_at_last_fetch
            "#,
        )
        .bind(&page.id)
        .bind(&page.title)
        .bind(&page.section_id)
        .bind(&page.notebook_id)
        .bind(page.created_at)
        .bind(page.modified_at)
        .bind(&page.content_etag)
        .bind(&page.html_path)
        .bind(&page.markdown_path)
        .bind(page.text_length as i64)
        .bind(page_status_str(page.status))
        .bind(page.modified_at_at_last_fetch)
        .execute(&mut *tx)
        .await
        .map_err(CoreError::from)?;

        sqlx::query("DELETE FROM link_refs WHERE source_page_id = ?")
            .bind(&page.id)
            .execute(&mut *tx)
            .await
            .map_err(CoreError::from)?;
        for link in &page.link_refs {
            sqlx::query(
                r#"
                INSERT INTO link_refs (source_page_id, target_spec, target_page_id, link_text, kind)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&link.source_page_id)
            .bind(&link.target_spec)
            .bind(&link.target_page_id)
            .bind(&link.link_text)
            .bind(link_kind_str(link.kind))
            .execute(&mut *tx)
            .await
            .map_err(CoreError::from)?;
        }

        sqlx::query("DELETE FROM page_assets WHERE page_id = ?")
            .bind(&page.id)
            .execute(&mut *tx)
            .await
            .map_err(CoreError::from)?;
        for content_hash in &page.asset_refs {
            sqlx::query("INSERT OR IGNORE INTO page_assets (page_id, content_hash) VALUES (?, ?)")
                .bind(&page.id)
                .bind(content_hash)
                .execute(&mut *tx)
                .await
                .map_err(CoreError::from)?;
        }

        tx.commit().await.map_err(CoreError::from)?;

        self.page_cache.write().await.put(page.id.clone(), page.clone());
        Ok(())
    }

    pub async fn get_page(&self, id: &str) -> CoreResult<Option<Page>> {
        if let Some(cached) = self.page_cache.write().await.get(id).cloned() {
            return Ok(Some(cached));
        }

        let row = sqlx::query(
            r#"
            SELECT id, title, section_id, notebook_id, created_at, modified_at,
                   content_etag, html_path, markdown_path, text_length, status,
                   modified_at_at_last_fetch
            FROM pages WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(CoreError::from)?;
        let Some(row) = row else { return Ok(None) };

        let page = self.hydrate_page(row).await?;
        self.page_cache.write().await.put(page.id.clone(), page.clone());
        Ok(Some(page))
    }

    pub async fn delete_page(&self, id: &str) -> CoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(CoreError::from)?;
        sqlx::query("DELETE FROM pages WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(CoreError::from)?;
        sqlx::query("DELETE FROM link_refs WHERE source_page_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(CoreError::from)?;
        sqlx::query("DELETE FROM page_assets WHERE page_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(CoreError::from)?;
        tx.commit().await.map_err(CoreError::from)?;
        self.page_cache.write().await.pop(id);
        Ok(())
    }

    pub async fn list_pages(&self, filter: &PageFilter) -> CoreResult<Vec<Page>> {
        let mut sql = String::from(
            "SELECT id, title, section_id, notebook_id, created_at, modified_at, content_etag, \
             html_path, markdown_path, text_length, status, modified_at_at_last_fetch FROM pages WHERE 1=1",
        );
        if filter.notebook_id.is_some() {
            sql.push_str(" AND notebook_id = ?");
        }
        if filter.section_id.is_some() {
            sql.push_str(" AND section_id = ?");
        }
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        sql.push_str(" ORDER BY id");

        let mut query = sqlx::query(&sql);
        if let Some(notebook_id) = &filter.notebook_id {
            query = query.bind(notebook_id);
        }
        if let Some(section_id) = &filter.section_id {
            query = query.bind(section_id);
        }
        if let Some(status) = filter.status {
            query = query.bind(page_status_str(status));
        }
        let rows = query.fetch_all(&self.pool).await.map_err(CoreError::from)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(self.hydrate_page(row).await?);
        }
        Ok(out)
    }

    /// Pages whose `modified_at` is strictly after `since`, used by sync and
    /// cache-status reporting.
    pub async fn iter_changed_since(&self, since: DateTime<Utc>) -> CoreResult<Vec<Page>> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, section_id, notebook_id, created_at, modified_at, content_etag,
                   html_path, markdown_path, text_length, status, modified_at_at_last_fetch
            FROM pages WHERE modified_at > ? ORDER BY modified_at
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(CoreError::from)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(self.hydrate_page(row).await?);
        }
        Ok(out)
    }

    pub async fn put_asset(&self, asset: &Asset) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO assets (content_hash, mime_type, byte_size, original_url, local_path, first_seen_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(content_hash) DO NOTHING
            "#,
        )
        .bind(&asset.content_hash)
        .bind(&asset.mime_type)
        .bind(asset.byte_size as i64)
        .bind(&asset.original_url)
        .bind(&asset.local_path)
        .bind(asset.first_seen_at)
        .execute(&self.pool)
        .await
        .map_err(CoreError::from)?;
        Ok(())
    }

    pub async fn get_asset(&self, content_hash: &str) -> CoreResult<Option<Asset>> {
        let row = sqlx::query(
            "SELECT content_hash, mime_type, byte_size, original_url, local_path, first_seen_at \
             FROM assets WHERE content_hash = ?",
        )
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(CoreError::from)?;
        Ok(row.map(|row| Asset {
            content_hash: row.get("content_hash"),
            mime_type: row.get("mime_type"),
            byte_size: row.get::<i64, _>("byte_size") as u64,
            original_url: row.get("original_url"),
            local_path: row.get("local_path"),
            first_seen_at: row.get("first_seen_at"),
        }))
    }

    /// Pages that link to `target_page_id`, used to build the cross-reference
    /// (backlink) index.
    pub async fn inbound_link_refs(&self, target_page_id: &str) -> CoreResult<Vec<LinkRef>> {
        let rows = sqlx::query(
            "SELECT source_page_id, target_spec, target_page_id, link_text, kind \
             FROM link_refs WHERE target_page_id = ?",
        )
        .bind(target_page_id)
        .fetch_all(&self.pool)
        .await
        .map_err(CoreError::from)?;
        Ok(rows
            .into_iter()
            .map(|r| LinkRef {
                source_page_id: r.get("source_page_id"),
                target_spec: r.get("target_spec"),
                target_page_id: r.get("target_page_id"),
                link_text: r.get("link_text"),
                kind: link_kind_from_str(&r.get::<String, _>("kind")),
            })
            .collect())
    }

    /// Pages whose title matches `title`, optionally scoped to a section or
    /// notebook. Tries an exact case-insensitive match first; if that finds
    /// nothing, falls back to comparing slugified titles (lowercase,
    /// whitespace/punctuation collapsed to hyphens) so an href like
    /// `onenote:Quarterly-Planning-2026` still resolves against a page
    /// titled "Quarterly Planning: 2026". Used by the link resolver's
    /// same-section-first / same-notebook-next / global-last search order.
    pub async fn find_pages_by_title(
        &self,
        title: &str,
        section_id: Option<&str>,
        notebook_id: Option<&str>,
    ) -> CoreResult<Vec<Page>> {
        let exact = self.find_pages_by_title_exact(title, section_id, notebook_id).await?;
        if !exact.is_empty() {
            return Ok(exact);
        }
        self.find_pages_by_normalized_title(title, section_id, notebook_id).await
    }

    async fn find_pages_by_title_exact(
        &self,
        title: &str,
        section_id: Option<&str>,
        notebook_id: Option<&str>,
    ) -> CoreResult<Vec<Page>> {
        let mut sql = String::from(
            "SELECT id, title, section_id, notebook_id, created_at, modified_at, content_etag, \
             html_path, markdown_path, text_length, status, modified_at_at_last_fetch \
             FROM pages WHERE LOWER(title) = LOWER(?)",
        );
        if section_id.is_some() {
            sql.push_str(" AND section_id = ?");
        }
        if notebook_id.is_some() {
            sql.push_str(" AND notebook_id = ?");
        }
        sql.push_str(" ORDER BY id");

        let mut query = sqlx::query(&sql).bind(title);
        if let Some(section_id) = section_id {
            query = query.bind(section_id);
        }
        if let Some(notebook_id) = notebook_id {
            query = query.bind(notebook_id);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(CoreError::from)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(self.hydrate_page(row).await?);
        }
        Ok(out)
    }

    async fn find_pages_by_normalized_title(
        &self,
        title: &str,
        section_id: Option<&str>,
        notebook_id: Option<&str>,
    ) -> CoreResult<Vec<Page>> {
        let mut sql = String::from(
            "SELECT id, title, section_id, notebook_id, created_at, modified_at, content_etag, \
             html_path, markdown_path, text_length, status, modified_at_at_last_fetch \
             FROM pages WHERE 1 = 1",
        );
        if section_id.is_some() {
            sql.push_str(" AND section_id = ?");
        }
        if notebook_id.is_some() {
            sql.push_str(" AND notebook_id = ?");
        }
        sql.push_str(" ORDER BY id");

        let mut query = sqlx::query(&sql);
        if let Some(section_id) = section_id {
            query = query.bind(section_id);
        }
        if let Some(notebook_id) = notebook_id {
            query = query.bind(notebook_id);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(CoreError::from)?;
        let target = slugify(title);
        let mut out = Vec::new();
        for row in rows {
            let page = self.hydrate_page(row).await?;
            if slugify(&page.title) == target {
                out.push(page);
            }
        }
        Ok(out)
    }

    /// Number of pages currently referencing `content_hash`.
    pub async fn asset_refcount(&self, content_hash: &str) -> CoreResult<u64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM page_assets WHERE content_hash = ?")
            .bind(content_hash)
            .fetch_one(&self.pool)
            .await
            .map_err(CoreError::from)?;
        Ok(row.0 as u64)
    }

    /// Assets with no remaining `page_assets` rows, candidates for garbage
    /// collection.
    pub async fn list_unreferenced_assets(&self) -> CoreResult<Vec<Asset>> {
        let rows = sqlx::query(
            "SELECT a.content_hash, a.mime_type, a.byte_size, a.original_url, a.local_path, a.first_seen_at \
             FROM assets a LEFT JOIN page_assets pa ON pa.content_hash = a.content_hash \
             WHERE pa.content_hash IS NULL",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(CoreError::from)?;
        Ok(rows
            .into_iter()
            .map(|row| Asset {
                content_hash: row.get("content_hash"),
                mime_type: row.get("mime_type"),
                byte_size: row.get::<i64, _>("byte_size") as u64,
                original_url: row.get("original_url"),
                local_path: row.get("local_path"),
                first_seen_at: row.get("first_seen_at"),
            })
            .collect())
    }

    /// Removes an asset's registry row (used once `AssetStore::unlink` has
    /// deleted the underlying file during garbage collection).
    pub async fn delete_asset(&self, content_hash: &str) -> CoreResult<()> {
        sqlx::query("DELETE FROM assets WHERE content_hash = ?")
            .bind(content_hash)
            .execute(&self.pool)
            .await
            .map_err(CoreError::from)?;
        Ok(())
    }

    pub async fn compute_counters(&self) -> CoreResult<Counters> {
        let notebooks: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM notebooks")
            .fetch_one(&self.pool)
            .await
            .map_err(CoreError::from)?;
        let sections: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sections")
            .fetch_one(&self.pool)
            .await
            .map_err(CoreError::from)?;
        let pages: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pages")
            .fetch_one(&self.pool)
            .await
            .map_err(CoreError::from)?;
        let (assets, total_bytes): (i64, Option<i64>) =
            sqlx::query_as("SELECT COUNT(*), SUM(byte_size) FROM assets")
                .fetch_one(&self.pool)
                .await
                .map_err(CoreError::from)?;

        Ok(Counters {
            notebooks: notebooks.0 as u64,
            sections: sections.0 as u64,
            pages: pages.0 as u64,
            assets: assets as u64,
            total_bytes: total_bytes.unwrap_or(0) as u64,
        })
    }

    async fn hydrate_page(&self, row: sqlx::sqlite::SqliteRow) -> CoreResult<Page> {
        let id: String = row.get("id");

        let link_rows = sqlx::query(
            "SELECT source_page_id, target_spec, target_page_id, link_text, kind FROM link_refs WHERE source_page_id = ?",
        )
        .bind(&id)
        .fetch_all(&self.pool)
        .await
        .map_err(CoreError::from)?;
        let link_refs = link_rows
            .into_iter()
            .map(|r| LinkRef {
                source_page_id: r.get("source_page_id"),
                target_spec: r.get("target_spec"),
                target_page_id: r.get("target_page_id"),
                link_text: r.get("link_text"),
                kind: link_kind_from_str(&r.get::<String, _>("kind")),
            })
            .collect();

        let asset_rows = sqlx::query("SELECT content_hash FROM page_assets WHERE page_id = ?")
            .bind(&id)
            .fetch_all(&self.pool)
            .await
            .map_err(CoreError::from)?;
        let asset_refs = asset_rows.into_iter().map(|r| r.get("content_hash")).collect();

        Ok(Page {
            id,
            title: row.get("title"),
            section_id: row.get("section_id"),
            notebook_id: row.get("notebook_id"),
            created_at: row.get("created_at"),
            modified_at: row.get("modified_at"),
            content_etag: row.get("content_etag"),
            html_path: row.get("html_path"),
            markdown_path: row.get("markdown_path"),
            asset_refs,
            link_refs,
            text_length: row.get::<i64, _>("text_length") as usize,
            status: page_status_from_str(&row.get::<String, _>("status")),
            modified_at_at_last_fetch: row.get("modified_at_at_last_fetch"),
        })
    }
}

fn page_status_str(status: PageStatus) -> &'static str {
    match status {
        PageStatus::Present => "present",
        PageStatus::Stub => "stub",
        PageStatus::Failed => "failed",
    }
}

fn page_status_from_str(s: &str) -> PageStatus {
    match s {
        "stub" => PageStatus::Stub,
        "failed" => PageStatus::Failed,
        _ => PageStatus::Present,
    }
}

fn link_kind_str(kind: LinkKind) -> &'static str {
    match kind {
        LinkKind::InternalResolved => "internal_resolved",
        LinkKind::InternalUnresolved => "internal_unresolved",
        LinkKind::External => "external",
    }
}

fn link_kind_from_str(s: &str) -> LinkKind {
    match s {
        "internal_resolved" => LinkKind::InternalResolved,
        "external" => LinkKind::External,
        _ => LinkKind::InternalUnresolved,
    }
}

/// Lowercases and collapses runs of whitespace/punctuation into single
/// hyphens, so differently-formatted titles referring to the same page
/// compare equal (e.g. "Quarterly Planning: 2026" and
/// "Quarterly-Planning-2026" both become `quarterly-planning-2026`).
fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_hyphen = false;
    for c in input.chars() {
        if c.is_alphanumeric() {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            out.extend(c.to_lowercase());
            pending_hyphen = false;
        } else {
            pending_hyphen = true;
        }
    }
    out
}
