//! Federated search across multiple connectors.
//!
//! This module provides:
//! - `FederatedSearch`: engine for parallel multi-source search
//! - `aggregate`: deduplication, merging and ranking of the combined records
//! - `SourceProfile`: named groups of sources
//!
//! # Example
//!
//! ```ignore
//! use scholar_core::federated::{FederatedSearch, SourceProfile};
//!
//! let profile = SourceProfile::get_builtin("biomedical").unwrap();
//! let engine = FederatedSearch::new(registry);
//! let query = scholar_core::parse("choline supplementation year:2015..")?;
//! let results = engine.search(&query, &profile.effective_sources()).await?;
//! ```

mod aggregate;
mod engine;
mod profiles;
mod types;

pub use aggregate::{
    aggregate, dedup_key, filter_min_citations, filter_year_range, normalize_doi,
    normalize_pmid, normalize_preprint_id, normalize_title, normalize_url,
};
pub use engine::FederatedSearch;
pub use profiles::{SourceProfile, DEFAULT_PROFILE};
pub use types::{FederatedSearchResult, SourceError, SourceResults};
