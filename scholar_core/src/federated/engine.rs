//! Federated search execution engine.
//!
//! Fans a query out to many connectors in parallel, bounded by a semaphore and
//! a global deadline, then consolidates whatever came back.

use super::{aggregate, FederatedSearchResult, SourceResults};
use crate::config::DispatcherConfig;
use crate::cpu_pool::{self, panic_message};
use crate::error::{ConnectorError, QueryError, SearchError};
use crate::index::LocalIndex;
use crate::query::StructuredQuery;
use crate::record::{ResultRecord, SourceTag};
use crate::{ConnectorRegistry, SourceConnector};
use futures::FutureExt;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// How one connector task ended.
enum TaskOutcome {
    Finished(Result<Vec<ResultRecord>, ConnectorError>),
    Panicked(String),
}

/// Engine for executing federated searches across registered connectors.
pub struct FederatedSearch {
    registry: Arc<ConnectorRegistry>,
    config: DispatcherConfig,
    index: Option<Arc<LocalIndex>>,
}

impl FederatedSearch {
    pub fn new(registry: Arc<ConnectorRegistry>) -> Self {
        Self {
            registry,
            config: DispatcherConfig::default(),
            index: None,
        }
    }

    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach a local index for auto-ingestion and offline search.
    pub fn with_index(mut self, index: Arc<LocalIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn registry(&self) -> &ConnectorRegistry {
        &self.registry
    }

    pub fn index(&self) -> Option<&Arc<LocalIndex>> {
        self.index.as_ref()
    }

    pub fn set_max_results(&mut self, max_results: usize) {
        self.config.max_results = max_results.max(1);
    }

    pub fn set_timeout_ms(&mut self, timeout_ms: u64) {
        self.config.timeout_ms = timeout_ms;
    }

    pub fn set_max_concurrency(&mut self, max_concurrency: usize) {
        self.config.max_concurrency = max_concurrency.max(1);
    }

    pub fn set_auto_index(&mut self, auto_index: bool) {
        self.config.auto_index = auto_index;
    }

    /// Search the connectors registered for `sources`.
    ///
    /// Fails only when no connector resolves, the query is invalid, or every
    /// task was interrupted. Source errors and timeouts yield a partial result.
    pub async fn search(
        &self,
        query: &StructuredQuery,
        sources: &[SourceTag],
    ) -> Result<FederatedSearchResult, SearchError> {
        if !query.is_valid() {
            return Err(QueryError::InvalidQuery(format!(
                "query has no searchable terms: {:?}",
                query.original()
            ))
            .into());
        }
        let connectors = self.registry.by_tags(sources);
        if connectors.is_empty() {
            return Err(SearchError::NoConnectors);
        }
        self.dispatch(query, connectors).await
    }

    /// Search every registered connector.
    pub async fn search_all(
        &self,
        query: &StructuredQuery,
    ) -> Result<FederatedSearchResult, SearchError> {
        self.search(query, &self.registry.tags()).await
    }

    /// Liveness of every registered source.
    pub async fn source_status(&self) -> HashMap<SourceTag, bool> {
        self.registry.available().await
    }

    /// Query the attached local index only.
    pub async fn search_offline(
        &self,
        query: &StructuredQuery,
        max_results: usize,
    ) -> Result<Vec<ResultRecord>, SearchError> {
        let index = self.index.as_ref().ok_or(SearchError::NoIndex)?;
        let index = Arc::clone(index);
        let query = query.clone();
        let records = cpu_pool::spawn_cpu(move || index.search(&query, max_results)).await?;
        Ok(records)
    }

    async fn dispatch(
        &self,
        query: &StructuredQuery,
        connectors: Vec<Arc<dyn SourceConnector>>,
    ) -> Result<FederatedSearchResult, SearchError> {
        let start = Instant::now();
        let timeout_ms = self.config.timeout_ms;
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let max_results = self.config.max_results.max(1);
        let shared_query = Arc::new(query.clone());
        let total = connectors.len();

        info!(
            target: "scholar.dispatch",
            query = %query.original(),
            sources = total,
            timeout_ms,
            "Dispatching federated search"
        );

        let order: Vec<SourceTag> = connectors.iter().map(|c| c.tag()).collect();
        let mut pending: HashSet<SourceTag> = order.iter().copied().collect();
        let mut tasks = JoinSet::new();
        for connector in connectors {
            let tag = connector.tag();
            let semaphore = Arc::clone(&semaphore);
            let query = Arc::clone(&shared_query);
            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        let err = ConnectorError::Other(format!("dispatcher closed: {}", e));
                        return (tag, TaskOutcome::Finished(Err(err)), 0);
                    }
                };
                let started = Instant::now();
                let outcome = match AssertUnwindSafe(connector.search(&query, max_results))
                    .catch_unwind()
                    .await
                {
                    Ok(result) => TaskOutcome::Finished(result),
                    Err(payload) => TaskOutcome::Panicked(panic_message(payload.as_ref())),
                };
                (tag, outcome, started.elapsed().as_millis() as u64)
            });
        }

        let mut result = FederatedSearchResult::new(query.original());
        let mut found_by_source: HashMap<SourceTag, Vec<ResultRecord>> = HashMap::new();
        let mut interrupted = 0usize;

        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((tag, outcome, duration_ms)))) => {
                    pending.remove(&tag);
                    match outcome {
                        TaskOutcome::Finished(Ok(found)) => {
                            debug!(
                                target: "scholar.dispatch",
                                source = %tag,
                                count = found.len(),
                                duration_ms,
                                "Source completed"
                            );
                            result.add_source(SourceResults {
                                source: tag,
                                count: found.len(),
                                duration_ms,
                            });
                            found_by_source.insert(tag, found);
                        }
                        TaskOutcome::Finished(Err(e)) => {
                            warn!(
                                target: "scholar.dispatch",
                                source = %tag,
                                code = e.code_str(),
                                error = %e,
                                "Source failed"
                            );
                            let is_timeout = matches!(e, ConnectorError::Timeout(_));
                            result.add_error(tag, e.to_string(), is_timeout);
                        }
                        TaskOutcome::Panicked(reason) => {
                            warn!(target: "scholar.dispatch", source = %tag, %reason, "Source task panicked");
                            interrupted += 1;
                            result.add_error(tag, format!("task panicked: {}", reason), false);
                        }
                    }
                }
                Ok(Some(Err(e))) => {
                    // Cancelled before reporting; its tag stays pending
                    warn!(target: "scholar.dispatch", error = %e, "Source task did not complete");
                    interrupted += 1;
                }
                Ok(None) => break,
                Err(_) => {
                    let mut late: Vec<SourceTag> = pending.drain().collect();
                    late.sort();
                    for tag in late {
                        warn!(target: "scholar.dispatch", source = %tag, timeout_ms, "Source timed out");
                        result.add_error(tag, format!("timed out after {}ms", timeout_ms), true);
                    }
                    tasks.detach_all();
                    break;
                }
            }
        }

        let mut lost: Vec<SourceTag> = pending.into_iter().collect();
        lost.sort();
        for tag in lost {
            result.add_error(tag, "task interrupted", false);
        }

        if interrupted == total {
            return Err(SearchError::Interrupted(format!(
                "all {} source tasks panicked or were cancelled",
                total
            )));
        }

        // Merge in request order so the first-seen base does not depend on timing
        let records: Vec<ResultRecord> = order
            .iter()
            .filter_map(|tag| found_by_source.remove(tag))
            .flatten()
            .collect();
        result.results = aggregate(records);
        result.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            target: "scholar.dispatch",
            results = result.results.len(),
            completed = result.completed.len(),
            failed = result.errors.len(),
            duration_ms = result.duration_ms,
            "Federated search finished"
        );

        self.schedule_ingest(&result.results);
        Ok(result)
    }

    /// Hand `records` to the index in the background; never blocks the caller.
    fn schedule_ingest(&self, records: &[ResultRecord]) {
        if !self.config.auto_index || records.is_empty() {
            return;
        }
        let Some(index) = self.index.as_ref() else {
            return;
        };
        let index = Arc::clone(index);
        let records = records.to_vec();
        tokio::spawn(async move {
            let count = records.len();
            match cpu_pool::spawn_cpu(move || index.ingest(&records)).await {
                Ok(ingested) => {
                    debug!(target: "scholar.index", ingested, "Auto-indexed federated results")
                }
                Err(e) => {
                    warn!(target: "scholar.index", error = %e, count, "Auto-indexing failed")
                }
            }
        });
    }
}
