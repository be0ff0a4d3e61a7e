//! Configuration module for the notebook cache/search core.
//!
//! This module provides the `CoreConfig` struct and its builder for
//! configuring a `Core` instance with validation and sensible defaults.
//! Loading values from environment variables or files is left to the
//! embedding application.

mod builder;
mod getters;
mod types;

pub use builder::CoreConfigBuilder;
pub use types::{
    AssetConfig, BulkConfig, ConcurrencyConfig, ConflictPolicy, CoreConfig, RateLimitConfig,
    SearchConfig, SyncConfig,
};
