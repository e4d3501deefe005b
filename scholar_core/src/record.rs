//! The normalized record shape exchanged between every component.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Enumerated identifier of an external source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    Arxiv,
    #[serde(rename = "pubmed")]
    PubMed,
    SemanticScholar,
    Crossref,
}

impl SourceTag {
    pub const ALL: [SourceTag; 4] = [
        SourceTag::Arxiv,
        SourceTag::PubMed,
        SourceTag::SemanticScholar,
        SourceTag::Crossref,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::Arxiv => "arxiv",
            SourceTag::PubMed => "pubmed",
            SourceTag::SemanticScholar => "semantic_scholar",
            SourceTag::Crossref => "crossref",
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "arxiv" => Ok(SourceTag::Arxiv),
            "pubmed" => Ok(SourceTag::PubMed),
            "semantic_scholar" | "semantic-scholar" | "s2" => Ok(SourceTag::SemanticScholar),
            "crossref" => Ok(SourceTag::Crossref),
            other => Err(format!("unknown source: {}", other)),
        }
    }
}

/// Access classification of the full text behind a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    Open,
    Licensed,
    Restricted,
    #[default]
    Unknown,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Open => "open",
            AccessLevel::Licensed => "licensed",
            AccessLevel::Restricted => "restricted",
            AccessLevel::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "open" => AccessLevel::Open,
            "licensed" => AccessLevel::Licensed,
            "restricted" => AccessLevel::Restricted,
            _ => AccessLevel::Unknown,
        }
    }
}

/// Static metadata describing one connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub tag: SourceTag,
    pub display_name: String,
    pub base_url: String,
    /// Domain whose throttle this source shares.
    pub rate_limit_domain: String,
}

impl SourceDescriptor {
    pub fn new(
        tag: SourceTag,
        display_name: impl Into<String>,
        base_url: impl Into<String>,
        rate_limit_domain: impl Into<String>,
    ) -> Self {
        Self {
            tag,
            display_name: display_name.into(),
            base_url: base_url.into(),
            rate_limit_domain: rate_limit_domain.into(),
        }
    }
}

/// Fields only scholarly-paper results carry.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScholarlyFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    /// Preprint identifier (arXiv id).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preprint_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pmid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abstract_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publication_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal: Option<String>,
    /// Venue or publisher name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub citation_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,
}

/// A normalized search result from any source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Source-local identifier, prefixed with a source marker (e.g. "PMID:12345678").
    pub id: String,
    pub title: String,
    /// Comma-joined author names.
    pub authors: String,
    pub url: String,
    pub snippet: String,
    pub source: SourceTag,
    pub access: AccessLevel,
    pub retrieved_at: DateTime<Utc>,
    pub relevance: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scholarly: Option<ScholarlyFields>,
}

impl ResultRecord {
    pub fn new(source: SourceTag, id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            authors: String::new(),
            url: String::new(),
            snippet: String::new(),
            source,
            access: AccessLevel::Unknown,
            retrieved_at: Utc::now(),
            relevance: 0.0,
            scholarly: None,
        }
    }

    pub fn with_authors(mut self, authors: impl Into<String>) -> Self {
        self.authors = authors.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    pub fn with_access(mut self, access: AccessLevel) -> Self {
        self.access = access;
        self
    }

    pub fn with_relevance(mut self, relevance: f64) -> Self {
        self.relevance = relevance;
        self
    }

    pub fn with_retrieved_at(mut self, retrieved_at: DateTime<Utc>) -> Self {
        self.retrieved_at = retrieved_at;
        self
    }

    pub fn with_scholarly(mut self, scholarly: ScholarlyFields) -> Self {
        self.scholarly = Some(scholarly);
        self
    }

    /// Mutable access to the scholarly fields, creating them if absent.
    pub fn scholarly_mut(&mut self) -> &mut ScholarlyFields {
        self.scholarly.get_or_insert_with(ScholarlyFields::default)
    }

    pub fn doi(&self) -> Option<&str> {
        self.scholarly.as_ref().and_then(|s| s.doi.as_deref())
    }

    pub fn preprint_id(&self) -> Option<&str> {
        self.scholarly.as_ref().and_then(|s| s.preprint_id.as_deref())
    }

    pub fn pmid(&self) -> Option<&str> {
        self.scholarly.as_ref().and_then(|s| s.pmid.as_deref())
    }

    pub fn abstract_text(&self) -> Option<&str> {
        self.scholarly
            .as_ref()
            .and_then(|s| s.abstract_text.as_deref())
    }

    pub fn publication_date(&self) -> Option<NaiveDate> {
        self.scholarly.as_ref().and_then(|s| s.publication_date)
    }

    pub fn year(&self) -> Option<i32> {
        self.publication_date().map(|d| d.year())
    }

    /// Citation count, treating non-paper records as zero.
    pub fn citations(&self) -> u64 {
        self.scholarly
            .as_ref()
            .and_then(|s| s.citation_count)
            .unwrap_or(0)
    }
}

static MONTH_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4})(?:[\s/-]+([A-Za-z]{3,}|\d{1,2}\b))?(?:[\s/-]+(\d{1,2})\b)?").unwrap()
});

fn month_number(token: &str) -> Option<u32> {
    if let Ok(n) = token.parse::<u32>() {
        return (1..=12).contains(&n).then_some(n);
    }
    let lower = token.to_ascii_lowercase();
    let month = match lower.get(..3)? {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

/// Parse the loose publication dates sources return.
///
/// Accepts RFC 3339 timestamps, `YYYY-MM-DD`, `YYYY-MM`, `YYYY`, and
/// PubMed-style `YYYY Mon DD`. Missing month/day default to 1.
pub fn parse_publication_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.date_naive());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }

    let caps = MONTH_DATE.captures(raw)?;
    let year: i32 = caps.get(1)?.as_str().parse().ok()?;
    let month = match caps.get(2) {
        Some(m) => month_number(m.as_str()).unwrap_or(1),
        None => 1,
    };
    let day = caps
        .get(3)
        .and_then(|d| d.as_str().parse::<u32>().ok())
        .unwrap_or(1);

    NaiveDate::from_ymd_opt(year, month, day).or_else(|| NaiveDate::from_ymd_opt(year, month, 1))
}
