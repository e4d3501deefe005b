use async_trait::async_trait;
use scholar_core::{
    parse, ConnectorError, ConnectorRegistry, DispatcherConfig, FederatedSearch, LocalIndex,
    ResultRecord, ScholarlyFields, SearchError, SourceConnector, SourceDescriptor, SourceTag,
    StructuredQuery,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

enum Behavior {
    Records(Vec<ResultRecord>),
    Fail,
    Sleep(Duration),
    Panic,
}

struct FakeConnector {
    descriptor: SourceDescriptor,
    behavior: Behavior,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl FakeConnector {
    fn new(tag: SourceTag, behavior: Behavior) -> Self {
        Self {
            descriptor: SourceDescriptor::new(tag, tag.as_str(), "http://localhost", "localhost"),
            behavior,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn tracking(mut self, in_flight: &Arc<AtomicUsize>, peak: &Arc<AtomicUsize>) -> Self {
        self.in_flight = Arc::clone(in_flight);
        self.peak = Arc::clone(peak);
        self
    }
}

#[async_trait]
impl SourceConnector for FakeConnector {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn search(
        &self,
        _query: &StructuredQuery,
        _max_results: usize,
    ) -> Result<Vec<ResultRecord>, ConnectorError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let outcome = match &self.behavior {
            Behavior::Records(records) => Ok(records.clone()),
            Behavior::Fail => Err(ConnectorError::Status {
                tag: self.descriptor.tag,
                status: 503,
            }),
            Behavior::Sleep(duration) => {
                tokio::time::sleep(*duration).await;
                Ok(Vec::new())
            }
            Behavior::Panic => panic!("connector exploded"),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    async fn is_available(&self) -> bool {
        true
    }
}

fn paper(tag: SourceTag, id: &str, title: &str, doi: &str) -> ResultRecord {
    ResultRecord::new(tag, id, title)
        .with_authors("Barbara Liskov")
        .with_relevance(1.0)
        .with_scholarly(ScholarlyFields {
            doi: Some(doi.to_string()),
            ..Default::default()
        })
}

fn engine(connectors: Vec<FakeConnector>, config: DispatcherConfig) -> FederatedSearch {
    let mut registry = ConnectorRegistry::new();
    for connector in connectors {
        registry.register(Arc::new(connector));
    }
    FederatedSearch::new(Arc::new(registry)).with_config(config)
}

fn config(timeout_ms: u64) -> DispatcherConfig {
    DispatcherConfig {
        timeout_ms,
        auto_index: false,
        ..DispatcherConfig::default()
    }
}

#[tokio::test]
async fn test_timeout_keeps_completed_results() {
    let engine = engine(
        vec![
            FakeConnector::new(
                SourceTag::Arxiv,
                Behavior::Records(
                    (1..=5)
                        .map(|i| {
                            paper(
                                SourceTag::Arxiv,
                                &format!("arXiv:{}", i),
                                &format!("Fast {}", i),
                                &format!("10.1/{}", i),
                            )
                        })
                        .collect(),
                ),
            ),
            FakeConnector::new(SourceTag::PubMed, Behavior::Fail),
            FakeConnector::new(SourceTag::Crossref, Behavior::Sleep(Duration::from_secs(10))),
        ],
        config(200),
    );

    let started = Instant::now();
    let result = engine
        .search(
            &parse("abstraction").unwrap(),
            &[SourceTag::Arxiv, SourceTag::PubMed, SourceTag::Crossref],
        )
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(result.results.len(), 5);
    assert!(result.results.iter().all(|r| r.source == SourceTag::Arxiv));
    assert_eq!(result.completed, vec![SourceTag::Arxiv]);
    assert!(result.partial);
    assert_eq!(result.timed_out(), vec![SourceTag::Crossref]);
    let pubmed = result
        .errors
        .iter()
        .find(|e| e.source == SourceTag::PubMed)
        .unwrap();
    assert!(!pubmed.is_timeout);
    assert_eq!(result.query, "abstraction");
}

#[tokio::test]
async fn test_duplicates_merge_across_sources() {
    let engine = engine(
        vec![
            FakeConnector::new(
                SourceTag::Crossref,
                Behavior::Records(vec![paper(SourceTag::Crossref, "doi:10.1/x", "Same", "10.1/X")]),
            ),
            FakeConnector::new(
                SourceTag::SemanticScholar,
                Behavior::Records(vec![paper(
                    SourceTag::SemanticScholar,
                    "S2:x",
                    "Same",
                    "https://doi.org/10.1/x",
                )]),
            ),
        ],
        config(5_000),
    );
    let result = engine.search_all(&parse("same").unwrap()).await.unwrap();
    assert_eq!(result.results.len(), 1);
    assert_eq!(result.count_for(SourceTag::Crossref), Some(1));
    assert_eq!(result.count_for(SourceTag::SemanticScholar), Some(1));
}

#[tokio::test]
async fn test_unknown_sources_yield_no_connectors() {
    let engine = engine(
        vec![FakeConnector::new(SourceTag::Arxiv, Behavior::Records(vec![]))],
        config(1_000),
    );
    let err = engine
        .search(&parse("x").unwrap(), &[SourceTag::PubMed])
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::NoConnectors));
}

#[tokio::test]
async fn test_all_sources_failing_is_empty_success() {
    let engine = engine(
        vec![
            FakeConnector::new(SourceTag::Arxiv, Behavior::Fail),
            FakeConnector::new(SourceTag::PubMed, Behavior::Fail),
        ],
        config(1_000),
    );
    let result = engine.search_all(&parse("x").unwrap()).await.unwrap();
    assert!(result.results.is_empty());
    assert!(result.all_failed());
    assert_eq!(result.errors.len(), 2);
}

#[tokio::test]
async fn test_every_task_panicking_is_interrupted() {
    let engine = engine(
        vec![
            FakeConnector::new(SourceTag::Arxiv, Behavior::Panic),
            FakeConnector::new(SourceTag::Crossref, Behavior::Panic),
        ],
        config(1_000),
    );
    let err = engine.search_all(&parse("x").unwrap()).await.unwrap_err();
    assert!(matches!(err, SearchError::Interrupted(_)));
}

#[tokio::test]
async fn test_one_panic_is_contained() {
    let engine = engine(
        vec![
            FakeConnector::new(SourceTag::Arxiv, Behavior::Panic),
            FakeConnector::new(
                SourceTag::Crossref,
                Behavior::Records(vec![paper(SourceTag::Crossref, "doi:1", "Ok", "10.1/ok")]),
            ),
        ],
        config(1_000),
    );
    let result = engine.search_all(&parse("x").unwrap()).await.unwrap();
    assert_eq!(result.results.len(), 1);
    assert!(result.errors[0].error.contains("connector exploded"));
}

#[tokio::test]
async fn test_concurrency_is_bounded() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let sleepy = |tag| {
        FakeConnector::new(tag, Behavior::Sleep(Duration::from_millis(50)))
            .tracking(&in_flight, &peak)
    };
    let mut engine = engine(
        vec![
            sleepy(SourceTag::Arxiv),
            sleepy(SourceTag::PubMed),
            sleepy(SourceTag::Crossref),
        ],
        config(5_000),
    );
    engine.set_max_concurrency(1);

    let result = engine.search_all(&parse("x").unwrap()).await.unwrap();
    assert_eq!(result.completed.len(), 3);
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_auto_index_then_offline_search() {
    let tmp = TempDir::new().unwrap();
    let index = Arc::new(LocalIndex::open(tmp.path()).unwrap());
    let engine = engine(
        vec![FakeConnector::new(
            SourceTag::Crossref,
            Behavior::Records(vec![paper(
                SourceTag::Crossref,
                "doi:10.1/clu",
                "CLU abstraction mechanisms",
                "10.1/clu",
            )]),
        )],
        DispatcherConfig {
            timeout_ms: 5_000,
            ..DispatcherConfig::default()
        },
    )
    .with_index(Arc::clone(&index));

    let query = parse("abstraction").unwrap();
    let online = engine.search_all(&query).await.unwrap();
    assert_eq!(online.results.len(), 1);

    let mut offline = Vec::new();
    for _ in 0..100 {
        offline = engine.search_offline(&query, 10).await.unwrap();
        if !offline.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(offline.len(), 1);
    assert_eq!(offline[0].id, "doi:10.1/clu");
    assert_eq!(offline[0].doi(), Some("10.1/clu"));
}

#[tokio::test]
async fn test_auto_index_disabled_leaves_index_empty() {
    let tmp = TempDir::new().unwrap();
    let index = Arc::new(LocalIndex::open(tmp.path()).unwrap());
    let engine = engine(
        vec![FakeConnector::new(
            SourceTag::Arxiv,
            Behavior::Records(vec![paper(SourceTag::Arxiv, "arXiv:1", "Quiet", "10.1/q")]),
        )],
        config(5_000),
    )
    .with_index(Arc::clone(&index));

    engine.search_all(&parse("quiet").unwrap()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(index.stats().unwrap().live_docs, 0);
}

#[tokio::test]
async fn test_auto_index_failure_does_not_fail_search() {
    let tmp = TempDir::new().unwrap();
    let index = Arc::new(LocalIndex::open(tmp.path()).unwrap());
    index.close().unwrap();
    let engine = engine(
        vec![FakeConnector::new(
            SourceTag::PubMed,
            Behavior::Records(vec![paper(SourceTag::PubMed, "PMID:9", "Lost write", "10.1/lw")]),
        )],
        DispatcherConfig {
            timeout_ms: 5_000,
            auto_index: true,
            ..DispatcherConfig::default()
        },
    )
    .with_index(Arc::clone(&index));

    let result = engine.search_all(&parse("lost").unwrap()).await.unwrap();
    assert_eq!(result.results.len(), 1);
    assert_eq!(result.results[0].id, "PMID:9");
    assert!(!result.has_errors());
    tokio::time::sleep(Duration::from_millis(100)).await;
}
