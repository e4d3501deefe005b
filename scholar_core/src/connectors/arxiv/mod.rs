use crate::connectors::{reciprocal_rank, HttpTransport};
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
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DOMAIN: &str = "export.arxiv.org";
pub const BASE_URL: &str = "http://export.arxiv.org/api/query";
/// arXiv asks for no more than one request every three seconds.
pub const MIN_INTERVAL: Duration = Duration::from_millis(3000);

const MAX_RESULTS_CAP: usize = 2000;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArxivEntry {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub authors: Vec<String>,
    pub published: String,
    pub categories: Vec<String>,
    pub links: Vec<ArxivLink>,
    pub doi: Option<String>,
    pub journal_ref: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArxivLink {
    pub href: String,
    pub rel: String,
    pub title: Option<String>,
    pub link_type: Option<String>,
}

impl ArxivEntry {
    fn pdf_url(&self) -> String {
        self.links
            .iter()
            .find(|link| link.title.as_deref() == Some("pdf") || link.href.contains("/pdf/"))
            .map(|link| link.href.clone())
            .unwrap_or_else(|| format!("https://arxiv.org/pdf/{}", self.id))
    }

    fn abstract_url(&self) -> String {
        self.links
            .iter()
            .find(|link| link.rel == "alternate" && link.link_type.as_deref() == Some("text/html"))
            .map(|link| link.href.clone())
            .unwrap_or_else(|| format!("https://arxiv.org/abs/{}", self.id))
    }

    fn into_record(self, rank: usize) -> ResultRecord {
        let scholarly = ScholarlyFields {
            doi: non_empty(self.doi.clone()),
            preprint_id: Some(self.id.clone()),
            abstract_text: non_empty(Some(collapse_whitespace(&self.summary))),
            publication_date: parse_publication_date(&self.published),
            journal: non_empty(self.journal_ref.clone()),
            venue: Some("arXiv".to_string()),
            keywords: self.categories.clone(),
            pdf_url: Some(self.pdf_url()),
            ..Default::default()
        };

        ResultRecord::new(
            SourceTag::Arxiv,
            format!("arXiv:{}", self.id),
            collapse_whitespace(&self.title),
        )
        .with_authors(join_authors(&self.authors))
        .with_url(self.abstract_url())
        .with_snippet(truncate_snippet(&self.summary, SNIPPET_CHARS))
        .with_access(AccessLevel::Open)
        .with_relevance(reciprocal_rank(rank))
        .with_scholarly(scholarly)
    }
}

pub struct ArxivConnector {
    descriptor: SourceDescriptor,
    transport: HttpTransport,
    base_url: String,
}

impl ArxivConnector {
    pub fn new(limiter: Arc<RateLimiter>) -> Result<Self, ConnectorError> {
        limiter.set_interval(DOMAIN, MIN_INTERVAL);
        Ok(Self {
            descriptor: SourceDescriptor::new(SourceTag::Arxiv, "arXiv", BASE_URL, DOMAIN),
            transport: HttpTransport::new(SourceTag::Arxiv, DOMAIN, limiter)?,
            base_url: BASE_URL.to_string(),
        })
    }

    /// Point the connector at a mirror of the export API.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Translate a query into arXiv's `search_query` syntax.
    pub fn build_search_query(query: &StructuredQuery) -> String {
        let mut positive: Vec<String> = Vec::new();
        positive.extend(query.phrases().iter().map(|p| format!("all:\"{}\"", p)));
        positive.extend(query.required_terms().iter().map(|t| field_term("all", t)));
        positive.extend(query.keywords().iter().map(|t| field_term("all", t)));

        if positive.is_empty() && !query.optional_terms().is_empty() {
            let any: Vec<String> = query
                .optional_terms()
                .iter()
                .map(|t| field_term("all", t))
                .collect();
            positive.push(format!("({})", any.join(" OR ")));
        }

        if let Some(author) = &query.filters.author {
            positive.push(field_term("au", author));
        }

        if let Some((from, to)) = submitted_range(query) {
            positive.push(format!("submittedDate:[{} TO {}]", from, to));
        }

        let mut search = positive.join(" AND ");
        for term in query.excluded_terms() {
            search.push_str(" ANDNOT ");
            search.push_str(&field_term("all", term));
        }
        search
    }

    async fn fetch_feed(&self, search_query: &str, max_results: usize) -> Result<String, ConnectorError> {
        let max_results = max_results.clamp(1, MAX_RESULTS_CAP).to_string();
        self.transport
            .get_text(|client| {
                client.get(&self.base_url).query(&[
                    ("search_query", search_query),
                    ("start", "0"),
                    ("max_results", max_results.as_str()),
                    ("sortBy", "relevance"),
                    ("sortOrder", "descending"),
                ])
            })
            .await
    }
}

fn field_term(field: &str, term: &str) -> String {
    if term.contains(char::is_whitespace) {
        format!("{}:\"{}\"", field, term)
    } else {
        format!("{}:{}", field, term)
    }
}

fn submitted_range(query: &StructuredQuery) -> Option<(String, String)> {
    let filters = &query.filters;
    let from = filters
        .date_after
        .or_else(|| filters.year_from.and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1)));
    let to = filters
        .date_before
        .or_else(|| filters.year_to.and_then(|y| NaiveDate::from_ymd_opt(y, 12, 31)));
    if from.is_none() && to.is_none() {
        return None;
    }
    let from = from
        .map(|d| format!("{}0000", d.format("%Y%m%d")))
        .unwrap_or_else(|| "199101010000".to_string());
    let to = to
        .map(|d| format!("{}2359", d.format("%Y%m%d")))
        .unwrap_or_else(|| "299912312359".to_string());
    Some((from, to))
}

/// Parse an arXiv Atom feed into entries.
pub fn parse_feed(xml_content: &str) -> Result<Vec<ArxivEntry>, ConnectorError> {
    let mut reader = Reader::from_str(xml_content);
    reader.trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<ArxivEntry> = None;
    let mut current_tag: Option<String> = None;
    let mut buffer = Vec::new();

    loop {
        buffer.clear();
        match reader.read_event_into(&mut buffer) {
            Ok(Event::Start(ref e)) => {
                let tag_name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match tag_name.as_str() {
                    "entry" => current = Some(ArxivEntry::default()),
                    "id" | "title" | "summary" | "published" | "name" | "arxiv:journal_ref"
                    | "arxiv:doi"
                        if current.is_some() =>
                    {
                        current_tag = Some(tag_name);
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(ref e)) => {
                if let (Some(tag), Some(entry)) = (current_tag.as_deref(), current.as_mut()) {
                    let text = e
                        .unescape()
                        .map_err(|err| ConnectorError::ParseError(err.to_string()))?
                        .to_string();
                    match tag {
                        "id" => {
                            entry.id = text
                                .trim_start_matches("http://arxiv.org/abs/")
                                .trim_start_matches("https://arxiv.org/abs/")
                                .to_string()
                        }
                        "title" => entry.title.push_str(&text),
                        "summary" => entry.summary.push_str(&text),
                        "published" => entry.published = text,
                        "name" => entry.authors.push(text),
                        "arxiv:journal_ref" => entry.journal_ref = Some(text),
                        "arxiv:doi" => entry.doi = Some(text),
                        _ => {}
                    }
                }
            }
            Ok(Event::Empty(ref e)) => {
                let Some(entry) = current.as_mut() else {
                    continue;
                };
                let tag_name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag_name == "link" {
                    let mut link = ArxivLink::default();
                    for attr in e.attributes().filter_map(Result::ok) {
                        let attr_value = String::from_utf8_lossy(&attr.value).to_string();
                        match attr.key.as_ref() {
                            b"href" => link.href = attr_value,
                            b"rel" => link.rel = attr_value,
                            b"title" => link.title = Some(attr_value),
                            b"type" => link.link_type = Some(attr_value),
                            _ => {}
                        }
                    }
                    entry.links.push(link);
                } else if tag_name == "category" {
                    for attr in e.attributes().filter_map(Result::ok) {
                        if attr.key.as_ref() == b"term" {
                            let term = String::from_utf8_lossy(&attr.value).to_string();
                            if !entry.categories.contains(&term) {
                                entry.categories.push(term);
                            }
                        }
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                let tag_name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag_name == "entry" {
                    if let Some(entry) = current.take() {
                        entries.push(entry);
                    }
                    current_tag = None;
                } else if current_tag.as_deref() == Some(tag_name.as_str()) {
                    current_tag = None;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ConnectorError::ParseError(e.to_string())),
            _ => {}
        }
    }

    // The API reports bad queries as a single entry pointing at its error page
    if let Some(error) = entries.iter().find(|e| e.id.contains("/api/errors")) {
        return Err(ConnectorError::InvalidInput(collapse_whitespace(&error.summary)));
    }

    Ok(entries)
}

#[async_trait]
impl SourceConnector for ArxivConnector {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn search(
        &self,
        query: &StructuredQuery,
        max_results: usize,
    ) -> Result<Vec<ResultRecord>, ConnectorError> {
        let search_query = Self::build_search_query(query);
        if search_query.is_empty() {
            return Err(ConnectorError::InvalidInput(
                "query has no terms arXiv can search".to_string(),
            ));
        }
        debug!(target: "scholar.connector.arxiv", %search_query, max_results, "Searching arXiv");

        let feed = self.fetch_feed(&search_query, max_results).await?;
        let records: Vec<ResultRecord> = parse_feed(&feed)?
            .into_iter()
            .filter(|entry| !entry.id.is_empty())
            .take(max_results)
            .enumerate()
            .map(|(i, entry)| entry.into_record(i + 1))
            .collect();

        debug!(target: "scholar.connector.arxiv", count = records.len(), "arXiv search complete");
        Ok(records)
    }

    async fn is_available(&self) -> bool {
        match self.transport.probe(&self.base_url).await {
            Ok(status) => status.is_success(),
            Err(e) => {
                warn!(target: "scholar.connector.arxiv", error = %e, "arXiv probe failed");
                false
            }
        }
    }
}
