//! Result types for federated search.

use crate::record::{ResultRecord, SourceTag};
use serde::{Deserialize, Serialize};

/// Per-source outcome of a completed search call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceResults {
    pub source: SourceTag,

    /// Number of records the source returned (before dedup)
    pub count: usize,

    /// Time taken by this source (ms)
    pub duration_ms: u64,
}

/// A source that failed or timed out during federated search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceError {
    pub source: SourceTag,

    /// Error message
    pub error: String,

    /// Whether this was a timeout
    #[serde(default)]
    pub is_timeout: bool,
}

/// Complete results from a federated search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederatedSearchResult {
    /// The original query text
    pub query: String,

    /// Deduplicated, ranked records
    pub results: Vec<ResultRecord>,

    /// Sources that completed (including those that returned nothing)
    pub completed: Vec<SourceTag>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceResults>,

    /// Sources that failed or timed out
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<SourceError>,

    /// Whether some source failed or timed out
    #[serde(default)]
    pub partial: bool,

    /// Total time taken (ms)
    pub duration_ms: u64,
}

impl FederatedSearchResult {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            results: Vec::new(),
            completed: Vec::new(),
            sources: Vec::new(),
            errors: Vec::new(),
            partial: false,
            duration_ms: 0,
        }
    }

    /// Record a source that finished with `count` records.
    pub fn add_source(&mut self, source: SourceResults) {
        self.completed.push(source.source);
        self.sources.push(source);
    }

    /// Record a failed source.
    pub fn add_error(&mut self, source: SourceTag, error: impl Into<String>, is_timeout: bool) {
        self.errors.push(SourceError {
            source,
            error: error.into(),
            is_timeout,
        });
        self.partial = true;
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Check if all sources failed (no source completed).
    pub fn all_failed(&self) -> bool {
        self.completed.is_empty() && !self.errors.is_empty()
    }

    pub fn timed_out(&self) -> Vec<SourceTag> {
        self.errors
            .iter()
            .filter(|e| e.is_timeout)
            .map(|e| e.source)
            .collect()
    }

    /// Records returned by `source` before dedup, if it completed.
    pub fn count_for(&self, source: SourceTag) -> Option<usize> {
        self.sources
            .iter()
            .find(|s| s.source == source)
            .map(|s| s.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_federated_result_bookkeeping() {
        let mut federated = FederatedSearchResult::new("test query");

        federated.add_source(SourceResults {
            source: SourceTag::PubMed,
            count: 2,
            duration_ms: 150,
        });
        federated.add_source(SourceResults {
            source: SourceTag::Arxiv,
            count: 0,
            duration_ms: 200,
        });
        assert!(!federated.partial);

        federated.add_error(SourceTag::Crossref, "timeout after 200ms", true);
        federated.add_error(SourceTag::SemanticScholar, "HTTP 500", false);

        assert_eq!(federated.completed, vec![SourceTag::PubMed, SourceTag::Arxiv]);
        assert_eq!(federated.count_for(SourceTag::PubMed), Some(2));
        assert_eq!(federated.count_for(SourceTag::Crossref), None);
        assert_eq!(federated.timed_out(), vec![SourceTag::Crossref]);
        assert!(federated.has_errors());
        assert!(federated.partial);
        assert!(!federated.all_failed());
    }

    #[test]
    fn test_all_failed() {
        let mut federated = FederatedSearchResult::new("q");
        assert!(!federated.all_failed());
        federated.add_error(SourceTag::Arxiv, "boom", false);
        assert!(federated.all_failed());
    }

    #[test]
    fn test_serialization() {
        let mut federated = FederatedSearchResult::new("q");
        federated.add_error(SourceTag::PubMed, "boom", false);
        let json = serde_json::to_string(&federated).unwrap();
        assert!(json.contains("\"source\":\"pubmed\""));
        assert!(json.contains("\"partial\":true"));
        assert!(!json.contains("\"sources\""));
    }
}
