use crate::connectors::{refine_client_side, HttpTransport};
use crate::error::ConnectorError;
use crate::query::StructuredQuery;
use crate::rate_limit::RateLimiter;
use crate::record::{
    parse_publication_date, AccessLevel, ResultRecord, ScholarlyFields, SourceDescriptor, SourceTag,
};
use crate::utils::{collapse_whitespace, join_authors, non_empty, truncate_snippet, SNIPPET_CHARS};
use crate::SourceConnector;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DOMAIN: &str = "api.semanticscholar.org";
pub const BASE_URL: &str = "https://api.semanticscholar.org/graph/v1";
pub const MIN_INTERVAL: Duration = Duration::from_millis(3000);
pub const MIN_INTERVAL_WITH_KEY: Duration = Duration::from_millis(1000);

const MAX_LIMIT_PER_REQUEST: usize = 100;
const SEARCH_FIELDS: &str = "paperId,externalIds,url,title,abstract,venue,year,publicationDate,journal,citationCount,openAccessPdf,fieldsOfStudy,authors";

#[derive(Debug, Deserialize)]
struct PaperSearchResponse {
    #[serde(default)]
    data: Vec<Paper>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Paper {
    paper_id: String,
    external_ids: Option<ExternalIds>,
    url: Option<String>,
    title: Option<String>,
    #[serde(rename = "abstract")]
    abstract_field: Option<String>,
    venue: Option<String>,
    year: Option<i32>,
    publication_date: Option<String>,
    journal: Option<Journal>,
    citation_count: Option<u64>,
    open_access_pdf: Option<OpenAccessPdf>,
    #[serde(default)]
    fields_of_study: Option<Vec<String>>,
    #[serde(default)]
    authors: Vec<Author>,
}

#[derive(Debug, Deserialize)]
struct Author {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Journal {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAccessPdf {
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ExternalIds {
    #[serde(rename = "DOI")]
    doi: Option<String>,
    #[serde(rename = "ArXiv")]
    arxiv: Option<String>,
    #[serde(rename = "PubMed")]
    pubmed: Option<String>,
}

impl Paper {
    fn into_record(self) -> ResultRecord {
        let ids = self.external_ids.unwrap_or_default();
        let pdf_url = self.open_access_pdf.and_then(|p| non_empty(p.url));
        let access = if pdf_url.is_some() {
            AccessLevel::Open
        } else {
            AccessLevel::Unknown
        };
        let publication_date = self
            .publication_date
            .as_deref()
            .and_then(parse_publication_date)
            .or_else(|| self.year.and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1)));
        let abstract_text = non_empty(self.abstract_field.map(|a| collapse_whitespace(&a)));
        let authors = join_authors(self.authors.iter().filter_map(|a| a.name.as_deref()));
        let url = non_empty(self.url)
            .unwrap_or_else(|| format!("https://www.semanticscholar.org/paper/{}", self.paper_id));

        let scholarly = ScholarlyFields {
            doi: non_empty(ids.doi),
            preprint_id: non_empty(ids.arxiv),
            pmid: non_empty(ids.pubmed),
            abstract_text: abstract_text.clone(),
            publication_date,
            journal: self.journal.and_then(|j| non_empty(j.name)),
            venue: non_empty(self.venue),
            keywords: self.fields_of_study.unwrap_or_default(),
            citation_count: self.citation_count,
            pdf_url,
        };

        ResultRecord::new(
            SourceTag::SemanticScholar,
            format!("S2:{}", self.paper_id),
            collapse_whitespace(self.title.as_deref().unwrap_or_default()),
        )
        .with_authors(authors)
        .with_url(url)
        .with_snippet(
            abstract_text
                .map(|a| truncate_snippet(&a, SNIPPET_CHARS))
                .unwrap_or_default(),
        )
        .with_access(access)
        .with_scholarly(scholarly)
    }
}

pub struct SemanticScholarConnector {
    descriptor: SourceDescriptor,
    transport: HttpTransport,
    base_url: String,
    api_key: Option<String>,
}

impl SemanticScholarConnector {
    pub fn new(limiter: Arc<RateLimiter>, api_key: Option<String>) -> Result<Self, ConnectorError> {
        let interval = if api_key.is_some() {
            MIN_INTERVAL_WITH_KEY
        } else {
            MIN_INTERVAL
        };
        limiter.set_interval(DOMAIN, interval);

        Ok(Self {
            descriptor: SourceDescriptor::new(
                SourceTag::SemanticScholar,
                "Semantic Scholar",
                BASE_URL,
                DOMAIN,
            ),
            transport: HttpTransport::new(SourceTag::SemanticScholar, DOMAIN, limiter)?,
            base_url: BASE_URL.to_string(),
            api_key,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Free-text query; the relevance endpoint takes no boolean syntax.
    pub fn build_query_text(query: &StructuredQuery) -> String {
        let mut parts: Vec<String> = Vec::new();
        parts.extend(query.phrases().iter().map(|p| format!("\"{}\"", p)));
        parts.extend(query.required_terms().iter().cloned());
        parts.extend(query.keywords().iter().cloned());
        parts.extend(query.optional_terms().iter().cloned());
        parts.join(" ")
    }

    /// `year` parameter: `2019-2022`, `2019-`, `-2022` or `2020`.
    pub fn build_year_param(query: &StructuredQuery) -> Option<String> {
        let filters = &query.filters;
        let from = filters
            .year_from
            .or_else(|| filters.date_after.map(|d| chrono::Datelike::year(&d)));
        let to = filters
            .year_to
            .or_else(|| filters.date_before.map(|d| chrono::Datelike::year(&d)));
        match (from, to) {
            (Some(f), Some(t)) if f == t => Some(f.to_string()),
            (Some(f), Some(t)) => Some(format!("{}-{}", f, t)),
            (Some(f), None) => Some(format!("{}-", f)),
            (None, Some(t)) => Some(format!("-{}", t)),
            (None, None) => None,
        }
    }
}

#[async_trait]
impl SourceConnector for SemanticScholarConnector {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn search(
        &self,
        query: &StructuredQuery,
        max_results: usize,
    ) -> Result<Vec<ResultRecord>, ConnectorError> {
        let text = Self::build_query_text(query);
        if text.is_empty() {
            return Err(ConnectorError::InvalidInput(
                "query has no terms Semantic Scholar can search".to_string(),
            ));
        }
        let year = Self::build_year_param(query);
        // Over-fetch a little when client-side filters may drop records
        let needs_refine = !query.excluded_terms().is_empty() || query.filters.author.is_some();
        let wanted = if needs_refine {
            max_results * 2
        } else {
            max_results
        };
        let limit = wanted.clamp(1, MAX_LIMIT_PER_REQUEST).to_string();
        debug!(target: "scholar.connector.semantic_scholar", %text, ?year, "Searching Semantic Scholar");

        let url = format!("{}/paper/search", self.base_url);
        let response: PaperSearchResponse = self
            .transport
            .get_json(|client| {
                let mut request = client.get(&url).query(&[
                    ("query", text.as_str()),
                    ("limit", limit.as_str()),
                    ("offset", "0"),
                    ("fields", SEARCH_FIELDS),
                ]);
                if let Some(year) = &year {
                    request = request.query(&[("year", year.as_str())]);
                }
                if let Some(api_key) = &self.api_key {
                    request = request.header("x-api-key", api_key);
                }
                request
            })
            .await?;

        let records: Vec<ResultRecord> = response.data.into_iter().map(Paper::into_record).collect();
        let records = refine_client_side(records, query, max_results);
        debug!(target: "scholar.connector.semantic_scholar", count = records.len(), "Semantic Scholar search complete");
        Ok(records)
    }

    /// The API answers HEAD inconsistently, so only a server error counts as down;
    /// a failed probe still reports available.
    async fn is_available(&self) -> bool {
        match self.transport.probe(&self.base_url).await {
            Ok(status) => !status.is_server_error(),
            Err(e) => {
                warn!(
                    target: "scholar.connector.semantic_scholar",
                    error = %e,
                    "Semantic Scholar probe failed; reporting available"
                );
                true
            }
        }
    }
}
