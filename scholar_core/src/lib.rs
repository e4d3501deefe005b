// src/lib.rs
pub mod config;
pub mod connectors;
pub mod cpu_pool;
pub mod error;
pub mod federated;
pub mod index;
pub mod query;
pub mod rate_limit;
pub mod record;
pub mod utils;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

pub use crate::config::{ApiKeys, DispatcherConfig, ScholarConfig};
pub use crate::error::{ConnectorError, IndexError, QueryError, SearchError};
pub use crate::federated::{aggregate, FederatedSearch, FederatedSearchResult, SourceProfile};
pub use crate::index::{IndexStats, LocalIndex};
pub use crate::query::{parse, validate_query, QueryFilters, StructuredQuery};
pub use crate::rate_limit::RateLimiter;
pub use crate::record::{AccessLevel, ResultRecord, ScholarlyFields, SourceDescriptor, SourceTag};

#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Static metadata: tag, display name, base URL and throttle domain.
    fn descriptor(&self) -> &SourceDescriptor;

    fn tag(&self) -> SourceTag {
        self.descriptor().tag
    }

    /// Run `query` against the source and return at most `max_results` records,
    /// ranked by the source's own order.
    async fn search(
        &self,
        query: &StructuredQuery,
        max_results: usize,
    ) -> Result<Vec<ResultRecord>, ConnectorError>;

    /// Cheap liveness probe. Never fails; problems map to `false`.
    async fn is_available(&self) -> bool;
}

/// Connectors keyed by source tag. Entries are only removed by [`reset`](Self::reset).
pub struct ConnectorRegistry {
    connectors: HashMap<SourceTag, Arc<dyn SourceConnector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        ConnectorRegistry {
            connectors: HashMap::new(),
        }
    }

    /// Register `connector` under its tag, replacing any previous entry.
    pub fn register(&mut self, connector: Arc<dyn SourceConnector>) {
        let tag = connector.tag();
        if self.connectors.insert(tag, connector).is_some() {
            debug!(target: "scholar.dispatch", source = %tag, "Replaced registered connector");
        }
    }

    pub fn get(&self, tag: SourceTag) -> Option<Arc<dyn SourceConnector>> {
        self.connectors.get(&tag).cloned()
    }

    /// Every registered connector, in tag order.
    pub fn all(&self) -> Vec<Arc<dyn SourceConnector>> {
        self.tags()
            .into_iter()
            .filter_map(|tag| self.get(tag))
            .collect()
    }

    /// Connectors for `tags` in the given order; unknown tags are skipped.
    pub fn by_tags(&self, tags: &[SourceTag]) -> Vec<Arc<dyn SourceConnector>> {
        let mut seen = Vec::with_capacity(tags.len());
        let mut found = Vec::with_capacity(tags.len());
        for tag in tags {
            if seen.contains(tag) {
                continue;
            }
            seen.push(*tag);
            match self.connectors.get(tag) {
                Some(connector) => found.push(Arc::clone(connector)),
                None => debug!(target: "scholar.dispatch", source = %tag, "No connector registered"),
            }
        }
        found
    }

    /// Probe every connector concurrently.
    pub async fn available(&self) -> HashMap<SourceTag, bool> {
        let probes = self.all().into_iter().map(|connector| async move {
            let available = connector.is_available().await;
            if !available {
                warn!(target: "scholar.dispatch", source = %connector.tag(), "Source unavailable");
            }
            (connector.tag(), available)
        });
        futures::future::join_all(probes).await.into_iter().collect()
    }

    pub fn tags(&self) -> Vec<SourceTag> {
        let mut tags: Vec<SourceTag> = self.connectors.keys().copied().collect();
        tags.sort();
        tags
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    pub fn reset(&mut self) {
        self.connectors.clear();
    }
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a registry holding every connector enabled via Cargo features, all
/// sharing `limiter`. A connector that fails to construct is logged and skipped.
#[allow(unused_variables)]
pub fn build_registry_enabled_only(limiter: Arc<RateLimiter>, keys: &ApiKeys) -> ConnectorRegistry {
    #[allow(unused_mut)]
    let mut registry = ConnectorRegistry::new();

    #[cfg(feature = "arxiv")]
    {
        match connectors::arxiv::ArxivConnector::new(Arc::clone(&limiter)) {
            Ok(connector) => registry.register(Arc::new(connector)),
            Err(e) => warn!(target: "scholar.dispatch", error = %e, "Skipping arXiv connector"),
        }
    }

    #[cfg(feature = "pubmed")]
    {
        match connectors::pubmed::PubMedConnector::new(
            Arc::clone(&limiter),
            keys.ncbi_api_key.clone(),
        ) {
            Ok(connector) => registry.register(Arc::new(connector)),
            Err(e) => warn!(target: "scholar.dispatch", error = %e, "Skipping PubMed connector"),
        }
    }

    #[cfg(feature = "semantic-scholar")]
    {
        match connectors::semantic_scholar::SemanticScholarConnector::new(
            Arc::clone(&limiter),
            keys.semantic_scholar_api_key.clone(),
        ) {
            Ok(connector) => registry.register(Arc::new(connector)),
            Err(e) => {
                warn!(target: "scholar.dispatch", error = %e, "Skipping Semantic Scholar connector")
            }
        }
    }

    #[cfg(feature = "crossref")]
    {
        match connectors::crossref::CrossrefConnector::new(
            Arc::clone(&limiter),
            keys.crossref_mailto.clone(),
        ) {
            Ok(connector) => registry.register(Arc::new(connector)),
            Err(e) => warn!(target: "scholar.dispatch", error = %e, "Skipping Crossref connector"),
        }
    }

    registry
}
