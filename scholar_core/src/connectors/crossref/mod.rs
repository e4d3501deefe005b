use crate::connectors::{refine_client_side, HttpTransport};
use crate::error::ConnectorError;
use crate::query::StructuredQuery;
use crate::rate_limit::RateLimiter;
use crate::record::{AccessLevel, ResultRecord, ScholarlyFields, SourceDescriptor, SourceTag};
use crate::utils::{collapse_whitespace, join_authors, non_empty, strip_markup, truncate_snippet, SNIPPET_CHARS};
use crate::SourceConnector;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DOMAIN: &str = "api.crossref.org";
pub const BASE_URL: &str = "https://api.crossref.org";
pub const MIN_INTERVAL: Duration = Duration::from_millis(500);
/// Interval for the "polite" pool, reached by identifying with a mailto.
pub const MIN_INTERVAL_POLITE: Duration = Duration::from_millis(100);

const MAX_ROWS: usize = 1000;

/// Work types the `type:` filter accepts.
const WORK_TYPES: &[&str] = &[
    "book",
    "book-chapter",
    "dataset",
    "dissertation",
    "journal-article",
    "monograph",
    "peer-review",
    "posted-content",
    "proceedings-article",
    "reference-entry",
    "report",
    "standard",
];

#[derive(Debug, Deserialize)]
struct WorksResponse {
    message: WorksMessage,
}

#[derive(Debug, Deserialize)]
struct WorksMessage {
    #[serde(default)]
    items: Vec<Work>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Work {
    #[serde(rename = "DOI")]
    doi: String,
    #[serde(default)]
    title: Vec<String>,
    #[serde(default)]
    author: Vec<WorkAuthor>,
    #[serde(default)]
    container_title: Vec<String>,
    publisher: Option<String>,
    issued: Option<DateParts>,
    published: Option<DateParts>,
    #[serde(rename = "abstract")]
    abstract_field: Option<String>,
    #[serde(rename = "URL")]
    url: Option<String>,
    is_referenced_by_count: Option<u64>,
    #[serde(default)]
    subject: Vec<String>,
    #[serde(default)]
    link: Vec<WorkLink>,
    #[serde(default)]
    license: Vec<WorkLicense>,
}

#[derive(Debug, Deserialize)]
struct WorkAuthor {
    given: Option<String>,
    family: Option<String>,
    name: Option<String>,
}

impl WorkAuthor {
    fn display_name(&self) -> String {
        match (&self.given, &self.family) {
            (Some(given), Some(family)) => format!("{} {}", given, family),
            (None, Some(family)) => family.clone(),
            _ => self.name.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DateParts {
    #[serde(rename = "date-parts", default)]
    date_parts: Vec<Vec<Option<i32>>>,
}

impl DateParts {
    /// First date; missing month or day default to 1.
    fn to_date(&self) -> Option<NaiveDate> {
        let parts = self.date_parts.first()?;
        let year = (*parts.first()?)?;
        let month = parts.get(1).copied().flatten().unwrap_or(1) as u32;
        let day = parts.get(2).copied().flatten().unwrap_or(1) as u32;
        NaiveDate::from_ymd_opt(year, month, day).or_else(|| NaiveDate::from_ymd_opt(year, 1, 1))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct WorkLink {
    #[serde(rename = "URL")]
    url: String,
    content_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WorkLicense {
    #[serde(rename = "URL")]
    url: String,
}

impl Work {
    fn into_record(self) -> ResultRecord {
        let abstract_text = non_empty(self.abstract_field.map(|a| strip_markup(&a)));
        let open = self
            .license
            .iter()
            .any(|l| l.url.contains("creativecommons.org"));
        let pdf_url = self
            .link
            .iter()
            .find(|l| l.content_type.as_deref() == Some("application/pdf"))
            .map(|l| l.url.clone());
        let publication_date = self
            .issued
            .as_ref()
            .and_then(DateParts::to_date)
            .or_else(|| self.published.as_ref().and_then(DateParts::to_date));
        let title = self
            .title
            .first()
            .map(|t| strip_markup(t))
            .unwrap_or_default();
        let authors = join_authors(self.author.iter().map(WorkAuthor::display_name));
        let url = non_empty(self.url).unwrap_or_else(|| format!("https://doi.org/{}", self.doi));

        let scholarly = ScholarlyFields {
            doi: Some(self.doi.clone()),
            abstract_text: abstract_text.clone(),
            publication_date,
            journal: self.container_title.into_iter().next().and_then(|j| non_empty(Some(j))),
            venue: non_empty(self.publisher),
            keywords: self.subject,
            citation_count: self.is_referenced_by_count,
            pdf_url,
            ..Default::default()
        };

        ResultRecord::new(SourceTag::Crossref, format!("doi:{}", self.doi), collapse_whitespace(&title))
            .with_authors(authors)
            .with_url(url)
            .with_snippet(
                abstract_text
                    .map(|a| truncate_snippet(&a, SNIPPET_CHARS))
                    .unwrap_or_default(),
            )
            .with_access(if open { AccessLevel::Open } else { AccessLevel::Unknown })
            .with_scholarly(scholarly)
    }
}

pub struct CrossrefConnector {
    descriptor: SourceDescriptor,
    transport: HttpTransport,
    base_url: String,
    mailto: Option<String>,
}

impl CrossrefConnector {
    pub fn new(limiter: Arc<RateLimiter>, mailto: Option<String>) -> Result<Self, ConnectorError> {
        let interval = if mailto.is_some() {
            MIN_INTERVAL_POLITE
        } else {
            MIN_INTERVAL
        };
        limiter.set_interval(DOMAIN, interval);

        Ok(Self {
            descriptor: SourceDescriptor::new(SourceTag::Crossref, "Crossref", BASE_URL, DOMAIN),
            transport: HttpTransport::new(SourceTag::Crossref, DOMAIN, limiter)?,
            base_url: BASE_URL.to_string(),
            mailto,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Comma-separated `filter` value, or None when nothing applies.
    pub fn build_filter(query: &StructuredQuery) -> Option<String> {
        let filters = &query.filters;
        let mut parts = Vec::new();

        if let Some(after) = filters.date_after {
            parts.push(format!("from-pub-date:{}", after.format("%Y-%m-%d")));
        } else if let Some(from) = filters.year_from {
            parts.push(format!("from-pub-date:{}", from));
        }
        if let Some(before) = filters.date_before {
            parts.push(format!("until-pub-date:{}", before.format("%Y-%m-%d")));
        } else if let Some(to) = filters.year_to {
            parts.push(format!("until-pub-date:{}", to));
        }
        if let Some(doc_type) = &filters.doc_type {
            let doc_type = doc_type.to_ascii_lowercase();
            if WORK_TYPES.contains(&doc_type.as_str()) {
                parts.push(format!("type:{}", doc_type));
            }
        }

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(","))
        }
    }

    pub fn build_query_text(query: &StructuredQuery) -> String {
        let mut parts: Vec<String> = Vec::new();
        parts.extend(query.phrases().iter().map(|p| format!("\"{}\"", p)));
        parts.extend(query.required_terms().iter().cloned());
        parts.extend(query.keywords().iter().cloned());
        parts.extend(query.optional_terms().iter().cloned());
        parts.join(" ")
    }
}

#[async_trait]
impl SourceConnector for CrossrefConnector {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn search(
        &self,
        query: &StructuredQuery,
        max_results: usize,
    ) -> Result<Vec<ResultRecord>, ConnectorError> {
        let text = Self::build_query_text(query);
        if text.is_empty() && query.filters.author.is_none() {
            return Err(ConnectorError::InvalidInput(
                "query has no terms Crossref can search".to_string(),
            ));
        }
        let filter = Self::build_filter(query);
        let rows = max_results.clamp(1, MAX_ROWS).to_string();
        debug!(target: "scholar.connector.crossref", %text, ?filter, "Searching Crossref");

        let url = format!("{}/works", self.base_url);
        let response: WorksResponse = self
            .transport
            .get_json(|client| {
                let mut request = client.get(&url).query(&[("rows", rows.as_str())]);
                if !text.is_empty() {
                    request = request.query(&[("query", text.as_str())]);
                }
                if let Some(author) = &query.filters.author {
                    request = request.query(&[("query.author", author.as_str())]);
                }
                if let Some(filter) = &filter {
                    request = request.query(&[("filter", filter.as_str())]);
                }
                if let Some(mailto) = &self.mailto {
                    request = request.query(&[("mailto", mailto.as_str())]);
                }
                request
            })
            .await?;

        let records: Vec<ResultRecord> = response
            .message
            .items
            .into_iter()
            .map(Work::into_record)
            .collect();
        let records = refine_client_side(records, query, max_results);
        debug!(target: "scholar.connector.crossref", count = records.len(), "Crossref search complete");
        Ok(records)
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/works?rows=0", self.base_url);
        match self.transport.probe(&url).await {
            Ok(status) => status.is_success(),
            Err(e) => {
                warn!(target: "scholar.connector.crossref", error = %e, "Crossref probe failed");
                false
            }
        }
    }
}
