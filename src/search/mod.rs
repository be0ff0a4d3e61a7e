//! Full-text search over cached pages, backed by Tantivy.
//!
//! [`SearchIndex`] owns the on-disk index and its lifecycle state; the
//! `query` submodule builds queries and snippets from a parsed search
//! string plus a structured [`SearchFilter`].

pub mod engine;
pub mod errors;
pub mod query;
pub mod runtime_helpers;
pub mod schema;
pub mod types;

pub use engine::SearchIndex;
pub use errors::{RetryConfig, SearchError, SearchResult};
pub use runtime_helpers::{fallback_task, retry_task};
pub use schema::{SchemaError, SearchSchema, SearchSchemaBuilder};
pub use types::{IndexState, IndexStats, SearchFilter, SearchHit};
