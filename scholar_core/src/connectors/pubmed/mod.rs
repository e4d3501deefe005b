//! PubMed via NCBI E-utilities: `esearch` (JSON) for ids, then `efetch` (XML) for records.

pub mod parse;

use crate::connectors::{reciprocal_rank, HttpTransport};
use crate::cpu_pool;
use crate::error::ConnectorError;
use crate::query::StructuredQuery;
use crate::rate_limit::RateLimiter;
use crate::record::{
    parse_publication_date, AccessLevel, ResultRecord, ScholarlyFields, SourceDescriptor, SourceTag,
};
use crate::utils::{collapse_whitespace, join_authors, truncate_snippet, SNIPPET_CHARS};
use crate::SourceConnector;
use async_trait::async_trait;
use parse::{parse_efetch_document, ESearchResponse};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DOMAIN: &str = "eutils.ncbi.nlm.nih.gov";
pub const BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
/// Three requests per second without a key, ten with one.
pub const MIN_INTERVAL: Duration = Duration::from_millis(334);
pub const MIN_INTERVAL_WITH_KEY: Duration = Duration::from_millis(100);

const MAX_RESULTS_CAP: usize = 500;
const TOOL_NAME: &str = "scholar_core";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PubMedArticle {
    pub pmid: String,
    pub title: String,
    pub abstract_sections: Vec<String>,
    pub authors: Vec<String>,
    pub journal: Option<String>,
    pub pub_year: Option<String>,
    pub pub_month: Option<String>,
    pub pub_day: Option<String>,
    pub medline_date: Option<String>,
    pub doi: Option<String>,
    pub pmc_id: Option<String>,
    pub keywords: Vec<String>,
}

impl PubMedArticle {
    /// Publication date in PubMed's `YYYY Mon DD` display form.
    pub fn pub_date_string(&self) -> Option<String> {
        if let Some(year) = &self.pub_year {
            let parts: Vec<&str> = [Some(year), self.pub_month.as_ref(), self.pub_day.as_ref()]
                .into_iter()
                .flatten()
                .map(String::as_str)
                .collect();
            return Some(parts.join(" "));
        }
        self.medline_date.clone()
    }

    fn abstract_text(&self) -> Option<String> {
        if self.abstract_sections.is_empty() {
            None
        } else {
            Some(self.abstract_sections.join("\n"))
        }
    }

    fn into_record(self, rank: usize) -> ResultRecord {
        let abstract_text = self.abstract_text();
        let access = if self.pmc_id.is_some() {
            AccessLevel::Open
        } else {
            AccessLevel::Unknown
        };
        let pdf_url = self
            .pmc_id
            .as_ref()
            .map(|pmc| format!("https://www.ncbi.nlm.nih.gov/pmc/articles/{}/pdf/", pmc));
        let scholarly = ScholarlyFields {
            doi: self.doi.clone(),
            pmid: Some(self.pmid.clone()),
            abstract_text: abstract_text.clone(),
            publication_date: self
                .pub_date_string()
                .as_deref()
                .and_then(parse_publication_date),
            journal: self.journal.clone(),
            keywords: self.keywords.clone(),
            pdf_url,
            ..Default::default()
        };

        ResultRecord::new(
            SourceTag::PubMed,
            format!("PMID:{}", self.pmid),
            collapse_whitespace(&self.title),
        )
        .with_authors(join_authors(&self.authors))
        .with_url(format!("https://pubmed.ncbi.nlm.nih.gov/{}/", self.pmid))
        .with_snippet(
            abstract_text
                .map(|a| truncate_snippet(&a, SNIPPET_CHARS))
                .unwrap_or_default(),
        )
        .with_access(access)
        .with_relevance(reciprocal_rank(rank))
        .with_scholarly(scholarly)
    }
}

#[derive(Clone)]
pub struct PubMedConnector {
    descriptor: SourceDescriptor,
    transport: HttpTransport,
    base_url: String,
    api_key: Option<String>,
}

impl PubMedConnector {
    pub fn new(limiter: Arc<RateLimiter>, api_key: Option<String>) -> Result<Self, ConnectorError> {
        let interval = if api_key.is_some() {
            MIN_INTERVAL_WITH_KEY
        } else {
            MIN_INTERVAL
        };
        limiter.set_interval(DOMAIN, interval);

        Ok(Self {
            descriptor: SourceDescriptor::new(SourceTag::PubMed, "PubMed", BASE_URL, DOMAIN),
            transport: HttpTransport::new(SourceTag::PubMed, DOMAIN, limiter)?,
            base_url: BASE_URL.to_string(),
            api_key,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Translate a query into an Entrez search term.
    pub fn build_term(query: &StructuredQuery) -> String {
        let mut positive: Vec<String> = Vec::new();
        positive.extend(query.phrases().iter().map(|p| format!("\"{}\"", p)));
        positive.extend(query.required_terms().iter().cloned());
        positive.extend(query.keywords().iter().cloned());

        if positive.is_empty() && !query.optional_terms().is_empty() {
            positive.push(format!("({})", query.optional_terms().join(" OR ")));
        }

        if let Some(author) = &query.filters.author {
            if author.contains(char::is_whitespace) {
                positive.push(format!("\"{}\"[au]", author));
            } else {
                positive.push(format!("{}[au]", author));
            }
        }

        let filters = &query.filters;
        if filters.date_after.is_some() || filters.date_before.is_some() {
            let from = filters
                .date_after
                .map(|d| d.format("%Y/%m/%d").to_string())
                .unwrap_or_else(|| "1800/01/01".to_string());
            let to = filters
                .date_before
                .map(|d| d.format("%Y/%m/%d").to_string())
                .unwrap_or_else(|| "3000/12/31".to_string());
            positive.push(format!("{}:{}[dp]", from, to));
        } else if filters.has_year_bounds() {
            positive.push(format!(
                "{}:{}[dp]",
                filters.year_from.unwrap_or(1800),
                filters.year_to.unwrap_or(3000)
            ));
        }

        if let Some(doc_type) = &filters.doc_type {
            positive.push(format!("{}[pt]", doc_type));
        }

        let mut term = positive.join(" AND ");
        for excluded in query.excluded_terms() {
            term.push_str(" NOT ");
            term.push_str(excluded);
        }
        term
    }

    async fn esearch(&self, term: &str, max_results: usize) -> Result<Vec<String>, ConnectorError> {
        let url = format!("{}/esearch.fcgi", self.base_url);
        let retmax = max_results.clamp(1, MAX_RESULTS_CAP).to_string();
        let response: ESearchResponse = self
            .transport
            .get_json(|client| {
                let mut request = client.get(&url).query(&[
                    ("db", "pubmed"),
                    ("term", term),
                    ("retmax", retmax.as_str()),
                    ("retmode", "json"),
                    ("sort", "relevance"),
                    ("tool", TOOL_NAME),
                ]);
                if let Some(key) = &self.api_key {
                    request = request.query(&[("api_key", key.as_str())]);
                }
                request
            })
            .await?;

        if let Some(error) = response.esearchresult.error {
            return Err(ConnectorError::InvalidInput(error));
        }
        Ok(response.esearchresult.idlist)
    }

    async fn efetch(&self, ids: &[String]) -> Result<Vec<PubMedArticle>, ConnectorError> {
        let url = format!("{}/efetch.fcgi", self.base_url);
        let id_list = ids.join(",");
        let content = self
            .transport
            .get_text(|client| {
                let mut request = client.get(&url).query(&[
                    ("db", "pubmed"),
                    ("id", id_list.as_str()),
                    ("retmode", "xml"),
                    ("rettype", "abstract"),
                    ("tool", TOOL_NAME),
                ]);
                if let Some(key) = &self.api_key {
                    request = request.query(&[("api_key", key.as_str())]);
                }
                request
            })
            .await?;

        info!(
            target: "scholar.connector.pubmed",
            queue_depth = cpu_pool::queue_depth(),
            workers = cpu_pool::worker_count(),
            bytes = content.len(),
            "Dispatching efetch parse to CPU pool"
        );
        cpu_pool::spawn_cpu(move || parse_efetch_document(&content)).await
    }
}

#[async_trait]
impl SourceConnector for PubMedConnector {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn search(
        &self,
        query: &StructuredQuery,
        max_results: usize,
    ) -> Result<Vec<ResultRecord>, ConnectorError> {
        let term = Self::build_term(query);
        if term.is_empty() {
            return Err(ConnectorError::InvalidInput(
                "query has no terms PubMed can search".to_string(),
            ));
        }
        debug!(target: "scholar.connector.pubmed", %term, max_results, "Searching PubMed");

        let ids = self.esearch(&term, max_results).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        // efetch does not promise to keep the relevance order of esearch
        let rank_of: HashMap<&str, usize> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i + 1))
            .collect();
        let mut articles = self.efetch(&ids).await?;
        articles.sort_by_key(|a| rank_of.get(a.pmid.as_str()).copied().unwrap_or(usize::MAX));

        let records: Vec<ResultRecord> = articles
            .into_iter()
            .take(max_results)
            .enumerate()
            .map(|(i, article)| article.into_record(i + 1))
            .collect();
        debug!(target: "scholar.connector.pubmed", count = records.len(), "PubMed search complete");
        Ok(records)
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/einfo.fcgi", self.base_url);
        match self.transport.probe(&url).await {
            Ok(status) => status.is_success(),
            Err(e) => {
                warn!(target: "scholar.connector.pubmed", error = %e, "PubMed probe failed");
                false
            }
        }
    }
}
