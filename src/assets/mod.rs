//! Content-addressed binary asset store (C2).
//!
//! Every asset (image, attachment) referenced from a page's HTML is stored
//! exactly once, keyed by the SHA-256 hash of its bytes. Writes are atomic:
//! content is staged in a temp file in the same directory as the final
//! destination, then renamed into place, so a reader never observes a
//! partially-written asset. Grounded on the teacher's
//! `content_saver::compression` (temp-file-then-rename atomic write, gzip via
//! `flate2`) and `content_saver::cache_check` (existence-before-write).

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use flate2::Compression;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::cache::CacheLayout;
use crate::config::CoreConfig;
use crate::error::{CoreError, CoreResult};

/// Outcome of [`AssetStore::put`].
#[derive(Debug, Clone)]
pub struct AssetPutOutcome {
    pub content_hash: String,
    pub local_path: PathBuf,
    pub was_new: bool,
    pub byte_size: u64,
}

/// Content-addressed store for page assets, rooted at a [`CacheLayout`].
pub struct AssetStore {
    layout: CacheLayout,
    config: Arc<CoreConfig>,
}

impl AssetStore {
    #[must_use]
    pub fn new(layout: CacheLayout, config: Arc<CoreConfig>) -> Self {
        Self { layout, config }
    }

    /// Writes `bytes` (compressing first if configured) under the
    /// content-addressed path derived from the SHA-256 of what actually lands
    /// on disk — never of the pre-compression bytes — so a reader can always
    /// verify an asset by hashing `local_path`. Skips the write if the asset
    /// already exists.
    pub async fn put(&self, bytes: Vec<u8>, mime_type: &str) -> CoreResult<AssetPutOutcome> {
        let ext = extension_for_mime(mime_type, self.config.assets_unknown_mime_extension());
        let compress = self.config.assets_enable_compression();
        let stored_ext = if compress {
            format!("{ext}.gz")
        } else {
            ext
        };

        let (stored_bytes, content_hash) = tokio::task::spawn_blocking(move || -> CoreResult<(Vec<u8>, String)> {
            let stored = if compress { compress_bytes(&bytes)? } else { bytes };
            let hash = hash_bytes(&stored);
            Ok((stored, hash))
        })
        .await
        .map_err(|e| CoreError::storage_io(self.layout.assets_dir(), format!("compression task panicked: {e}")))??;

        let byte_size = stored_bytes.len() as u64;
        let final_path = self.layout.asset_path(&content_hash, &stored_ext);

        if tokio::fs::metadata(&final_path).await.is_ok() {
            return Ok(AssetPutOutcome {
                content_hash,
                local_path: final_path,
                was_new: false,
                byte_size,
            });
        }

        let parent = final_path
            .parent()
            .ok_or_else(|| CoreError::storage_io(&final_path, "asset path has no parent"))?
            .to_path_buf();
        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(|e| CoreError::storage_io(&parent, e))?;

        let write_path = final_path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&parent, &write_path, &stored_bytes))
            .await
            .map_err(|e| CoreError::storage_io(&final_path, format!("write task panicked: {e}")))??;

        Ok(AssetPutOutcome {
            content_hash,
            local_path: final_path,
            was_new: true,
            byte_size,
        })
    }

    /// Deterministic scratch path a streaming download should write `url`'s
    /// bytes to before they are hashed and finalized via
    /// [`Self::put_from_scratch`].
    #[must_use]
    pub fn scratch_path(&self, url: &str) -> PathBuf {
        self.layout.scratch_path(url)
    }

    /// Finalizes a completed download: reads the bytes a streaming download
    /// wrote to `scratch_path`, stores them through the same path as
    /// [`Self::put`], then removes the scratch file. The scratch file is left
    /// in place if reading or storing fails, so the caller's next attempt can
    /// still find it.
    pub async fn put_from_scratch(&self, scratch_path: &std::path::Path, mime_type: &str) -> CoreResult<AssetPutOutcome> {
        let bytes = tokio::fs::read(scratch_path)
            .await
            .map_err(|e| CoreError::storage_io(scratch_path, e))?;
        let outcome = self.put(bytes, mime_type).await?;
        tokio::fs::remove_file(scratch_path)
            .await
            .map_err(|e| CoreError::storage_io(scratch_path, e))?;
        Ok(outcome)
    }

    /// Reads an asset's decompressed bytes back by content hash, locating its
    /// file regardless of which extension [`Self::put`] stored it under.
    pub async fn open(&self, content_hash: &str) -> CoreResult<Vec<u8>> {
        let path = self.locate(content_hash).await?;
        let raw = tokio::fs::read(&path)
            .await
            .map_err(|e| CoreError::storage_io(&path, e))?;
        if path.extension().and_then(|e| e.to_str()) == Some("gz") {
            decompress(&raw).map_err(|e| CoreError::storage_io(&path, e))
        } else {
            Ok(raw)
        }
    }

    #[must_use]
    pub async fn exists(&self, content_hash: &str) -> bool {
        self.locate(content_hash).await.is_ok()
    }

    pub async fn unlink(&self, content_hash: &str) -> CoreResult<()> {
        let path = self.locate(content_hash).await?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| CoreError::storage_io(&path, e))
    }

    /// Scans the asset's shard directory for a file whose name starts with
    /// `content_hash`, since `put` may have stored it under any extension.
    async fn locate(&self, content_hash: &str) -> CoreResult<PathBuf> {
        let shard = &content_hash.get(0..2).unwrap_or("00");
        let shard_dir = self.layout.assets_dir().join(shard);
        let mut entries = tokio::fs::read_dir(&shard_dir)
            .await
            .map_err(|_| CoreError::NotFound(format!("asset {content_hash}")))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CoreError::storage_io(&shard_dir, e))?
        {
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            let hash_part = file_name.split('.').next().unwrap_or("");
            if hash_part == content_hash {
                return Ok(entry.path());
            }
        }
        Err(CoreError::NotFound(format!("asset {content_hash}")))
    }
}

fn write_atomic(parent: &std::path::Path, dest: &std::path::Path, bytes: &[u8]) -> CoreResult<()> {
    let mut temp_file = NamedTempFile::new_in(parent).map_err(|e| CoreError::storage_io(dest, e))?;
    temp_file
        .write_all(bytes)
        .map_err(|e| CoreError::storage_io(dest, e))?;
    temp_file
        .persist(dest)
        .map_err(|e| CoreError::storage_io(dest, e.error))?;
    Ok(())
}

/// Gzips `bytes` so the hash taken afterwards matches what's persisted.
fn compress_bytes(bytes: &[u8]) -> CoreResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(6));
    encoder
        .write_all(bytes)
        .map_err(|e| CoreError::storage_io(std::path::Path::new(""), e))?;
    encoder
        .finish()
        .map_err(|e| CoreError::storage_io(std::path::Path::new(""), e))
}

fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn decompress(raw: &[u8]) -> std::io::Result<Vec<u8>> {
    use flate2::read::GzDecoder;
    use std::io::Read;
    let mut decoder = GzDecoder::new(raw);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Maps a MIME type to a file extension (including the leading dot), falling
/// back to `unknown_ext` for anything not recognized.
fn extension_for_mime(mime_type: &str, unknown_ext: &str) -> String {
    let base = mime_type.split(';').next().unwrap_or(mime_type).trim();
    let ext = match base {
        "image/png" => ".png",
        "image/jpeg" | "image/jpg" => ".jpg",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        "image/svg+xml" => ".svg",
        "image/bmp" => ".bmp",
        "image/tiff" => ".tiff",
        "application/pdf" => ".pdf",
        "text/plain" => ".txt",
        "text/html" => ".html",
        "text/css" => ".css",
        "application/json" => ".json",
        "application/zip" => ".zip",
        "application/msword" => ".doc",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => ".docx",
        "application/vnd.ms-excel" => ".xls",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => ".xlsx",
        "audio/mpeg" => ".mp3",
        "audio/wav" | "audio/x-wav" => ".wav",
        "video/mp4" => ".mp4",
        "font/woff" => ".woff",
        "font/woff2" => ".woff2",
        _ => unknown_ext,
    };
    ext.to_string()
}
