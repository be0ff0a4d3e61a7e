//! `RemoteClient` (C4): a stateless wrapper around the remote notebook API.
//!
//! Every outbound request passes through the global rate limiter and circuit
//! breaker before it is sent, and transient failures are retried with
//! exponential backoff plus jitter — the same formula the teacher's
//! `crawl_engine::orchestrator::calculate_retry_backoff` uses for page
//! retries, generalized from per-page crawl retries to per-request API
//! calls. `AccessTokenProvider` is a borrowed capability: this crate does not
//! own OAuth flows, it only asks the embedder for a current token.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use rand::Rng;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use crate::config::CoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::model::{Notebook, Page, PageStatus, Section};

use super::circuit_breaker::CircuitBreaker;
use super::errors::RemoteError;
use super::rate_limiter::GlobalRateLimiter;

const BASE_DELAY_MS: u64 = 1000;
const MAX_DELAY_MS: u64 = 30_000;
const JITTER_PERCENT: f64 = 0.2;
const MAX_RETRIES: u8 = 4;
const CIRCUIT_FAILURE_THRESHOLD: u32 = 5;
const CIRCUIT_SUCCESS_THRESHOLD: u32 = 2;
const CIRCUIT_HALF_OPEN_TIMEOUT: Duration = Duration::from_secs(30);

/// Supplies a current bearer token on demand. Implementations are expected
/// to handle their own caching/refresh; `RemoteClient` calls this once per
/// attempt and never persists the token it's given.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn access_token(&self) -> CoreResult<String>;
}

/// Remote-observed state of a page, prior to markdown conversion.
#[derive(Debug, Clone)]
pub struct RemotePageContent {
    pub html: String,
    pub etag: Option<String>,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct NotebookDto {
    id: String,
    display_name: String,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct SectionDto {
    id: String,
    display_name: String,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct PageDto {
    id: String,
    title: String,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

pub struct RemoteClient {
    http: reqwest::Client,
    base_url: String,
    token_provider: Arc<dyn AccessTokenProvider>,
    rate_limiter: GlobalRateLimiter,
    circuit_breaker: CircuitBreaker,
}

impl RemoteClient {
    #[must_use]
    pub fn new(base_url: impl Into<String>, token_provider: Arc<dyn AccessTokenProvider>, config: &CoreConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs()))
            .build()
            .expect("reqwest client builder with only a timeout never fails");

        Self {
            http,
            base_url: base_url.into(),
            token_provider,
            rate_limiter: GlobalRateLimiter::new(
                config.rate_limit_requests_per_window(),
                config.rate_limit_window_seconds(),
                config.rate_limit_burst(),
            ),
            circuit_breaker: CircuitBreaker::new(
                CIRCUIT_FAILURE_THRESHOLD,
                CIRCUIT_SUCCESS_THRESHOLD,
                CIRCUIT_HALF_OPEN_TIMEOUT,
            ),
        }
    }

    pub async fn list_notebooks(&self) -> CoreResult<Vec<Notebook>> {
        let dtos: Vec<NotebookDto> = self.get_json("/me/onenote/notebooks").await?;
        Ok(dtos
            .into_iter()
            .map(|d| Notebook {
                id: d.id,
                display_name: d.display_name,
                created_at: d.created_at,
                modified_at: d.modified_at,
                section_ids: Vec::new(),
            })
            .collect())
    }

    pub async fn list_sections(&self, notebook_id: &str) -> CoreResult<Vec<Section>> {
        let path = format!("/me/onenote/notebooks/{notebook_id}/sections");
        let dtos: Vec<SectionDto> = self.get_json(&path).await?;
        Ok(dtos
            .into_iter()
            .map(|d| Section {
                id: d.id,
                display_name: d.display_name,
                notebook_id: notebook_id.to_string(),
                created_at: d.created_at,
                modified_at: d.modified_at,
                page_ids: Vec::new(),
            })
            .collect())
    }

    pub async fn list_pages(&self, notebook_id: &str, section_id: &str) -> CoreResult<Vec<Page>> {
        let path = format!("/me/onenote/sections/{section_id}/pages");
        let dtos: Vec<PageDto> = self.get_json(&path).await?;
        Ok(dtos
            .into_iter()
            .map(|d| Page {
                id: d.id,
                title: d.title,
                section_id: section_id.to_string(),
                notebook_id: notebook_id.to_string(),
                created_at: d.created_at,
                modified_at: d.modified_at,
                content_etag: None,
                html_path: None,
                markdown_path: None,
                asset_refs: Vec::new(),
                link_refs: Vec::new(),
                text_length: 0,
                status: PageStatus::Stub,
                modified_at_at_last_fetch: d.modified_at,
            })
            .collect())
    }

    /// Full-text search delegated to the remote service's own `$search`
    /// query parameter, for use when the local index can't serve a query.
    pub async fn search_pages(&self, query: &str) -> CoreResult<Vec<Page>> {
        let path = format!("/me/onenote/pages?$search={}", urlencoding::encode(query));
        let dtos: Vec<PageDto> = self.get_json(&path).await?;
        Ok(dtos
            .into_iter()
            .map(|d| Page {
                id: d.id,
                title: d.title,
                section_id: String::new(),
                notebook_id: String::new(),
                created_at: d.created_at,
                modified_at: d.modified_at,
                content_etag: None,
                html_path: None,
                markdown_path: None,
                asset_refs: Vec::new(),
                link_refs: Vec::new(),
                text_length: 0,
                status: PageStatus::Stub,
                modified_at_at_last_fetch: d.modified_at,
            })
            .collect())
    }

    pub async fn get_page_content(&self, page_id: &str) -> CoreResult<RemotePageContent> {
        let path = format!("/me/onenote/pages/{page_id}/content");
        let response = self.send_with_retry(Method::GET, &path).await?;
        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let modified_at = response
            .headers()
            .get("last-modified")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let html = response.text().await.map_err(RemoteError::from)?;
        Ok(RemotePageContent { html, etag, modified_at })
    }

    /// Streams the response body to `scratch_path` instead of buffering it in
    /// memory, so a multi-hundred-MB attachment never sits fully resident.
    /// Leaves the partial file in place on any error so a retry against the
    /// same scratch path (see `CacheLayout::scratch_path`) can pick up a
    /// future resume strategy without this method needing to know about one;
    /// today it always restarts the write from byte zero.
    pub async fn download_asset_to_scratch(&self, url: &str, scratch_path: &Path) -> CoreResult<String> {
        self.rate_limiter.acquire().await;
        if !self.circuit_breaker.should_attempt() {
            return Err(RemoteError::CircuitOpen.into());
        }
        let token = self.token_provider.access_token().await?;
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(RemoteError::from)?;
        if !response.status().is_success() {
            self.circuit_breaker.record_failure();
            return Err(status_to_error(response.status(), response.headers().get(reqwest::header::RETRY_AFTER)).into());
        }
        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();

        if let Some(parent) = scratch_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| CoreError::storage_io(parent, e))?;
        }
        let mut file = tokio::fs::File::create(scratch_path)
            .await
            .map_err(|e| CoreError::storage_io(scratch_path, e))?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    self.circuit_breaker.record_failure();
                    return Err(RemoteError::from(e).into());
                }
            };
            file.write_all(&chunk)
                .await
                .map_err(|e| CoreError::storage_io(scratch_path, e))?;
        }
        file.flush().await.map_err(|e| CoreError::storage_io(scratch_path, e))?;

        self.circuit_breaker.record_success();
        Ok(mime_type)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> CoreResult<T> {
        let response = self.send_with_retry(Method::GET, path).await?;
        let bytes = response.bytes().await.map_err(RemoteError::from)?;
        serde_json::from_slice(&bytes).map_err(|e| RemoteError::from(e).into())
    }

    /// Sends a request, retrying transient failures with exponential backoff
    /// and jitter, gated by the rate limiter and circuit breaker.
    async fn send_with_retry(&self, method: Method, path: &str) -> CoreResult<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);

        for attempt in 0..=MAX_RETRIES {
            self.rate_limiter.acquire().await;
            if !self.circuit_breaker.should_attempt() {
                return Err(RemoteError::CircuitOpen.into());
            }

            let token = self.token_provider.access_token().await?;
            let result = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(&token)
                .send()
                .await;

            let response = match result {
                Ok(r) => r,
                Err(e) => {
                    self.circuit_breaker.record_failure();
                    let err = RemoteError::from(e);
                    if err.is_transient() && attempt < MAX_RETRIES {
                        tokio::time::sleep(backoff_with_jitter(attempt)).await;
                        continue;
                    }
                    return Err(err.into());
                }
            };

            if response.status().is_success() {
                self.circuit_breaker.record_success();
                return Ok(response);
            }

            self.circuit_breaker.record_failure();
            let err = status_to_error(response.status(), response.headers().get(reqwest::header::RETRY_AFTER));
            if err.is_transient() && attempt < MAX_RETRIES {
                let delay = err.retry_delay().unwrap_or_else(|| backoff_with_jitter(attempt));
                tokio::time::sleep(delay).await;
                continue;
            }
            return Err(err.into());
        }

        Err(RemoteError::Transient("retries exhausted".to_string()).into())
    }
}

/// `base_delay * 2^attempt * (1 ± jitter)`, capped at `MAX_DELAY_MS`.
fn backoff_with_jitter(attempt: u8) -> Duration {
    let exp_delay = BASE_DELAY_MS.saturating_mul(1u64 << attempt.min(5));
    let jitter = rand::rng().random_range(-JITTER_PERCENT..=JITTER_PERCENT);
    let jittered = (exp_delay as f64 * (1.0 + jitter)) as u64;
    Duration::from_millis(jittered.min(MAX_DELAY_MS))
}

fn status_to_error(status: StatusCode, retry_after_header: Option<&reqwest::header::HeaderValue>) -> RemoteError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthorized,
        StatusCode::NOT_FOUND => RemoteError::NotFound(status.to_string()),
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = retry_after_header
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(5));
            RemoteError::RateLimited { retry_after }
        }
        s if s.is_server_error() => RemoteError::Transient(format!("server error {s}")),
        s => RemoteError::Permanent {
            status: s.as_u16(),
            body: s.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfigBuilder;

    struct StaticToken;

    #[async_trait]
    impl AccessTokenProvider for StaticToken {
        async fn access_token(&self) -> CoreResult<String> {
            Ok("test-token".to_string())
        }
    }

    fn test_config(tmp: &std::path::Path) -> CoreConfig {
        CoreConfigBuilder::new()
            .cache_root(tmp)
            .user_id("user-1")
            .rate_limit(1000, 60, 50)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn list_notebooks_parses_response() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/me/onenote/notebooks")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[{"id":"nb-1","display_name":"Work","created_at":"2026-01-01T00:00:00Z","modified_at":"2026-01-02T00:00:00Z"}]"#,
            )
            .create_async()
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let client = RemoteClient::new(server.url(), Arc::new(StaticToken), &config);

        let notebooks = client.list_notebooks().await.unwrap();
        assert_eq!(notebooks.len(), 1);
        assert_eq!(notebooks[0].id, "nb-1");
        assert_eq!(notebooks[0].display_name, "Work");
    }

    #[tokio::test]
    async fn not_found_status_maps_to_core_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/me/onenote/notebooks")
            .with_status(404)
            .create_async()
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let client = RemoteClient::new(server.url(), Arc::new(StaticToken), &config);

        let err = client.list_notebooks().await.unwrap_err();
        assert!(matches!(err, crate::error::CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn download_asset_to_scratch_writes_body_and_returns_mime() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/assets/a.png")
            .with_status(200)
            .with_header("content-type", "image/png")
            .with_body(b"binary-bytes".to_vec())
            .create_async()
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let client = RemoteClient::new(server.url(), Arc::new(StaticToken), &config);
        let scratch = tmp.path().join("scratch").join("a.part");

        let mime = client
            .download_asset_to_scratch(&format!("{}/assets/a.png", server.url()), &scratch)
            .await
            .unwrap();

        assert_eq!(mime, "image/png");
        assert_eq!(tokio::fs::read(&scratch).await.unwrap(), b"binary-bytes");
    }

    #[test]
    fn backoff_grows_exponentially_and_is_capped() {
        let d0 = backoff_with_jitter(0).as_millis();
        let d3 = backoff_with_jitter(3).as_millis();
        let d_capped = backoff_with_jitter(10).as_millis();
        assert!(d0 >= (BASE_DELAY_MS as f64 * 0.8) as u128);
        assert!(d3 > d0);
        assert!(d_capped <= MAX_DELAY_MS as u128);
    }
}
