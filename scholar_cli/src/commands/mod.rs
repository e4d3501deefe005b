pub mod index;
pub mod profiles;
pub mod search;
pub mod sources;

use owo_colors::OwoColorize;
use scholar_core::{
    build_registry_enabled_only, ConnectorRegistry, IndexError, LocalIndex, RateLimiter,
    ScholarConfig,
};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Query error: {0}")]
    Query(#[from] scholar_core::QueryError),

    #[error("Search failed: {0}")]
    Search(#[from] scholar_core::SearchError),

    #[error("Local index error: {0}")]
    Index(#[from] IndexError),

    #[error("Config error: {0}")]
    Config(#[from] scholar_core::error::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CommandError>;

/// Registry of every connector compiled into this binary.
pub fn create_registry(config: &ScholarConfig) -> ConnectorRegistry {
    let limiter = Arc::new(RateLimiter::default());
    build_registry_enabled_only(limiter, &config.keys)
}

/// Open the configured index directory.
pub fn open_index(config: &ScholarConfig) -> Result<LocalIndex> {
    let dir = config.index_dir();
    tracing::debug!(path = %dir.display(), "Opening local index");
    Ok(LocalIndex::open(&dir)?)
}

/// Open the index for a search, degrading to no index when another process holds it.
pub fn open_index_optional(config: &ScholarConfig) -> Option<LocalIndex> {
    match open_index(config) {
        Ok(index) => Some(index),
        Err(CommandError::Index(e)) if e.is_lock_conflict() => {
            eprintln!(
                "{} {}",
                "Note:".yellow(),
                format!("local index unavailable ({}), results will not be stored", e).dimmed()
            );
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to open local index");
            None
        }
    }
}
