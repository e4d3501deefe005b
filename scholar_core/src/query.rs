//! Query parsing DSL.
//!
//! Turns free text with embedded filter syntax into a [`StructuredQuery`].
//! Extraction runs in a fixed order so that every piece of input is claimed
//! by at most one rule:
//!
//! 1. double-quoted phrases
//! 2. `author:<name>`
//! 3. `year:>YYYY`, `year:<YYYY`, `year:YYYY..YYYY`, `year:YYYY..`, `year:YYYY`
//! 4. `type:`, `site:`, `filetype:`
//! 5. `after:YYYY-MM-DD`, `before:YYYY-MM-DD`
//! 6. boolean connectives and `+`/`-` prefixes on the remaining tokens
//!
//! Each filter is applied at most once; anything a rule does not match is left
//! in the text and tokenized as ordinary keywords.

use crate::error::QueryError;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static PHRASE: Lazy<Regex> = Lazy::new(|| Regex::new(r#""([^"]*)""#).unwrap());
static AUTHOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bauthor:").unwrap());
static NEXT_FILTER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s[A-Za-z]+:").unwrap());
static YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\byear:([<>])?(\d{4})(\.\.(\d{4})?)?").unwrap());
static DOC_TYPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\btype:(\S+)").unwrap());
static SITE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bsite:(\S+)").unwrap());
static FILE_TYPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bfiletype:(\S+)").unwrap());
static AFTER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bafter:(\d{4}-\d{2}-\d{2})").unwrap());
static BEFORE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bbefore:(\d{4}-\d{2}-\d{2})").unwrap());

/// Optional filters of a query. Callers may override these after parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year_from: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year_to: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_after: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_before: Option<NaiveDate>,
}

impl QueryFilters {
    pub fn has_year_bounds(&self) -> bool {
        self.year_from.is_some() || self.year_to.is_some()
    }
}

/// Parsed form of user input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredQuery {
    original: String,
    keywords: Vec<String>,
    required: Vec<String>,
    excluded: Vec<String>,
    optional: Vec<String>,
    phrases: Vec<String>,
    pub filters: QueryFilters,
}

fn push_unique(set: &mut Vec<String>, value: &str) {
    let value = value.trim();
    if !value.is_empty() && !set.iter().any(|v| v == value) {
        set.push(value.to_string());
    }
}

impl StructuredQuery {
    /// Build a query directly from stored keywords, bypassing the DSL.
    pub fn from_keywords<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut query = StructuredQuery::default();
        for keyword in keywords {
            push_unique(&mut query.keywords, keyword.as_ref());
        }
        query.original = query.keywords.join(" ");
        query
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn required_terms(&self) -> &[String] {
        &self.required
    }

    pub fn excluded_terms(&self) -> &[String] {
        &self.excluded
    }

    pub fn optional_terms(&self) -> &[String] {
        &self.optional
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    /// Add soft terms that should boost but not gate matches.
    pub fn with_optional_terms<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for term in terms {
            push_unique(&mut self.optional, term.as_ref());
        }
        self
    }

    /// Override both year bounds (e.g. a UI-level year picker).
    pub fn with_year_range(mut self, from: Option<i32>, to: Option<i32>) -> Self {
        self.filters.year_from = from;
        self.filters.year_to = to;
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.filters.author = Some(author.into());
        self
    }

    /// A query is valid when it carries at least one searchable term.
    pub fn is_valid(&self) -> bool {
        !(self.keywords.is_empty()
            && self.required.is_empty()
            && self.optional.is_empty()
            && self.phrases.is_empty())
    }

    /// Positive terms without prefixes: phrases, required, keywords, optional.
    pub fn positive_terms(&self) -> Vec<&str> {
        self.phrases
            .iter()
            .chain(&self.required)
            .chain(&self.keywords)
            .chain(&self.optional)
            .map(String::as_str)
            .collect()
    }

    /// All terms in a single Lucene-style string: phrases quoted, required
    /// terms prefixed `+`, excluded terms prefixed `-`.
    pub fn combined_terms(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        parts.extend(self.phrases.iter().map(|p| format!("\"{}\"", p)));
        parts.extend(self.required.iter().map(|t| format!("+{}", t)));
        parts.extend(self.keywords.iter().cloned());
        parts.extend(self.optional.iter().cloned());
        parts.extend(self.excluded.iter().map(|t| format!("-{}", t)));
        parts.join(" ")
    }
}

/// Parse raw query text into a [`StructuredQuery`].
pub fn parse(text: &str) -> Result<StructuredQuery, QueryError> {
    if text.trim().is_empty() {
        return Err(QueryError::InvalidQuery("query text is empty".to_string()));
    }

    let mut query = StructuredQuery {
        original: text.to_string(),
        ..Default::default()
    };
    let mut working = text.to_string();

    // 1. phrases
    for caps in PHRASE.captures_iter(text) {
        push_unique(&mut query.phrases, &caps[1]);
    }
    working = PHRASE.replace_all(&working, " ").into_owned();

    // 2. author
    extract_author(&mut working, &mut query.filters);

    // 3. year
    if let Some(caps) = YEAR.captures(&working) {
        let year: i32 = caps[2].parse().unwrap_or_default();
        match caps.get(1).map(|m| m.as_str()) {
            Some(">") => query.filters.year_from = Some(year),
            Some("<") => query.filters.year_to = Some(year),
            _ if caps.get(3).is_some() => {
                query.filters.year_from = Some(year);
                query.filters.year_to = caps.get(4).and_then(|m| m.as_str().parse().ok());
            }
            _ => {
                query.filters.year_from = Some(year);
                query.filters.year_to = Some(year);
            }
        }
        let range = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
        working.replace_range(range, " ");
    }

    // 4. single-token filters
    query.filters.doc_type = take_token(&DOC_TYPE, &mut working);
    query.filters.site = take_token(&SITE, &mut working);
    query.filters.file_type = take_token(&FILE_TYPE, &mut working);

    // 5. date bounds
    query.filters.date_after = take_date(&AFTER, &mut working);
    query.filters.date_before = take_date(&BEFORE, &mut working);

    // 6. connectives and term prefixes
    tokenize_terms(&working, &mut query);

    Ok(query)
}

/// Report whether `text` parses into a valid query, never failing.
pub fn validate_query(text: &str) -> bool {
    parse(text).map(|q| q.is_valid()).unwrap_or(false)
}

fn extract_author(working: &mut String, filters: &mut QueryFilters) {
    let Some(m) = AUTHOR.find(working) else {
        return;
    };
    let value_start = m.end();
    let rest = &working[value_start..];
    let window_end = NEXT_FILTER
        .find(rest)
        .map(|next| next.start())
        .unwrap_or(rest.len());
    let window = &rest[..window_end];
    let consumed = window
        .char_indices()
        .find(|(_, c)| !(c.is_alphanumeric() || *c == ' '))
        .map(|(i, _)| i)
        .unwrap_or(window.len());

    let value = window[..consumed].trim();
    if value.is_empty() {
        return;
    }
    filters.author = Some(value.to_string());
    working.replace_range(m.start()..value_start + consumed, " ");
}

fn take_token(pattern: &Regex, working: &mut String) -> Option<String> {
    let caps = pattern.captures(working)?;
    let value = caps[1].to_string();
    let range = caps.get(0)?.range();
    working.replace_range(range, " ");
    Some(value)
}

fn take_date(pattern: &Regex, working: &mut String) -> Option<NaiveDate> {
    let caps = pattern.captures(working)?;
    let date = NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d").ok()?;
    let range = caps.get(0)?.range();
    working.replace_range(range, " ");
    Some(date)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Pending {
    None,
    Required,
    Excluded,
}

fn tokenize_terms(working: &str, query: &mut StructuredQuery) {
    let mut pending = Pending::None;

    for raw in working.split_whitespace() {
        match raw {
            "AND" | "&&" => {
                pending = Pending::Required;
                continue;
            }
            "NOT" | "!" => {
                pending = Pending::Excluded;
                continue;
            }
            "OR" | "||" => {
                pending = Pending::None;
                continue;
            }
            _ => {}
        }

        let (kind, term) = if let Some(rest) = raw.strip_prefix('+') {
            (Pending::Required, rest)
        } else if let Some(rest) = raw.strip_prefix('-') {
            (Pending::Excluded, rest)
        } else if let Some(rest) = raw.strip_prefix('!') {
            (Pending::Excluded, rest)
        } else {
            (pending, raw)
        };
        pending = Pending::None;

        match kind {
            Pending::Required => push_unique(&mut query.required, term),
            Pending::Excluded => push_unique(&mut query.excluded, term),
            Pending::None => push_unique(&mut query.keywords, term),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_query_rejected() {
        assert!(matches!(parse(""), Err(QueryError::InvalidQuery(_))));
        assert!(matches!(parse("   \t "), Err(QueryError::InvalidQuery(_))));
        assert!(!validate_query(""));
    }

    #[test]
    fn test_plain_keywords() {
        let q = parse("protein folding dynamics").unwrap();
        assert_eq!(q.keywords(), &["protein", "folding", "dynamics"]);
        assert!(q.required_terms().is_empty());
        assert_eq!(q.original(), "protein folding dynamics");
        assert!(q.is_valid());
    }

    #[test]
    fn test_duplicate_keywords_collapse() {
        let q = parse("rna rna seq rna").unwrap();
        assert_eq!(q.keywords(), &["rna", "seq"]);
    }

    #[test]
    fn test_phrases_extracted_first() {
        let q = parse(r#""deep learning" for "author:nobody" imaging"#).unwrap();
        assert_eq!(q.phrases(), &["deep learning", "author:nobody"]);
        assert_eq!(q.filters.author, None);
        assert_eq!(q.keywords(), &["for", "imaging"]);
    }

    #[test]
    fn test_empty_phrase_dropped() {
        let q = parse(r#""" graphene"#).unwrap();
        assert!(q.phrases().is_empty());
        assert_eq!(q.keywords(), &["graphene"]);
    }

    #[test]
    fn test_year_range() {
        let q = parse("transformers year:2020..2024").unwrap();
        assert_eq!(q.filters.year_from, Some(2020));
        assert_eq!(q.filters.year_to, Some(2024));
        assert_eq!(q.keywords(), &["transformers"]);
    }

    #[test]
    fn test_year_range_holds_for_any_surrounding_text() {
        for text in [
            "year:2020..2024 a",
            "a year:2020..2024",
            "\"x y\" year:2020..2024 +b -c",
            "author:Smith year:2020..2024 z",
        ] {
            let q = parse(text).unwrap();
            assert_eq!(q.filters.year_from, Some(2020), "{}", text);
            assert_eq!(q.filters.year_to, Some(2024), "{}", text);
        }
    }

    #[test]
    fn test_year_forms() {
        let q = parse("x year:>2018").unwrap();
        assert_eq!((q.filters.year_from, q.filters.year_to), (Some(2018), None));

        let q = parse("x year:<2001").unwrap();
        assert_eq!((q.filters.year_from, q.filters.year_to), (None, Some(2001)));

        let q = parse("x year:2015..").unwrap();
        assert_eq!((q.filters.year_from, q.filters.year_to), (Some(2015), None));

        let q = parse("x year:1999").unwrap();
        assert_eq!(
            (q.filters.year_from, q.filters.year_to),
            (Some(1999), Some(1999))
        );
        assert_eq!(q.keywords(), &["x"]);
    }

    #[test]
    fn test_first_year_filter_wins() {
        let q = parse("x year:2001 year:2010").unwrap();
        assert_eq!(q.filters.year_from, Some(2001));
        assert_eq!(q.keywords(), &["x", "year:2010"]);
    }

    #[test]
    fn test_unmatched_filter_stays_text() {
        let q = parse("x year:abc").unwrap();
        assert_eq!(q.filters.year_from, None);
        assert_eq!(q.keywords(), &["x", "year:abc"]);
    }

    #[test]
    fn test_author_filter() {
        let q = parse("neural networks author:Hinton").unwrap();
        assert_eq!(q.filters.author.as_deref(), Some("Hinton"));
        assert_eq!(q.keywords(), &["neural", "networks"]);

        let q = parse("author:Geoffrey Hinton year:2012 imagenet").unwrap();
        assert_eq!(q.filters.author.as_deref(), Some("Geoffrey Hinton"));
        assert_eq!(q.filters.year_from, Some(2012));
        assert_eq!(q.keywords(), &["imagenet"]);
    }

    #[test]
    fn test_filter_only_query_is_invalid() {
        assert!(!validate_query("author:Smith"));
        assert!(!validate_query("year:2020..2024 type:journal"));
        assert!(!validate_query("site:nature.com after:2020-01-01"));
        assert!(validate_query("author:Smith \"gene drive\""));
        assert!(validate_query("+crispr"));

        let q = parse("author:Smith").unwrap();
        assert!(!q.is_valid());
    }

    #[test]
    fn test_single_token_filters() {
        let q = parse("ocean type:review site:nature.com filetype:pdf").unwrap();
        assert_eq!(q.filters.doc_type.as_deref(), Some("review"));
        assert_eq!(q.filters.site.as_deref(), Some("nature.com"));
        assert_eq!(q.filters.file_type.as_deref(), Some("pdf"));
        assert_eq!(q.keywords(), &["ocean"]);
    }

    #[test]
    fn test_filetype_does_not_feed_type() {
        let q = parse("ocean filetype:pdf").unwrap();
        assert_eq!(q.filters.doc_type, None);
        assert_eq!(q.filters.file_type.as_deref(), Some("pdf"));
    }

    #[test]
    fn test_date_bounds() {
        let q = parse("vaccine after:2020-03-01 before:2021-12-31").unwrap();
        assert_eq!(q.filters.date_after, NaiveDate::from_ymd_opt(2020, 3, 1));
        assert_eq!(q.filters.date_before, NaiveDate::from_ymd_opt(2021, 12, 31));
        assert_eq!(q.keywords(), &["vaccine"]);
    }

    #[test]
    fn test_invalid_date_left_as_text() {
        let q = parse("vaccine after:2020-13-45").unwrap();
        assert_eq!(q.filters.date_after, None);
        assert_eq!(q.keywords(), &["vaccine", "after:2020-13-45"]);
    }

    #[test]
    fn test_connectives() {
        let q = parse("cancer AND immunotherapy NOT mice OR rats").unwrap();
        assert_eq!(q.keywords(), &["cancer", "rats"]);
        assert_eq!(q.required_terms(), &["immunotherapy"]);
        assert_eq!(q.excluded_terms(), &["mice"]);

        let q = parse("a && b || c ! d !e").unwrap();
        assert_eq!(q.keywords(), &["a", "c"]);
        assert_eq!(q.required_terms(), &["b"]);
        assert_eq!(q.excluded_terms(), &["d", "e"]);
    }

    #[test]
    fn test_lowercase_connectives_are_keywords() {
        let q = parse("salt and pepper").unwrap();
        assert_eq!(q.keywords(), &["salt", "and", "pepper"]);
    }

    #[test]
    fn test_prefixes() {
        let q = parse("+quantum -classical computing").unwrap();
        assert_eq!(q.required_terms(), &["quantum"]);
        assert_eq!(q.excluded_terms(), &["classical"]);
        assert_eq!(q.keywords(), &["computing"]);
    }

    #[test]
    fn test_excluded_only_is_invalid() {
        assert!(!validate_query("-mice NOT rats"));
    }

    #[test]
    fn test_combined_terms() {
        let q = parse(r#""graph neural" +molecule -protein drug"#).unwrap();
        assert_eq!(
            q.combined_terms(),
            r#""graph neural" +molecule drug -protein"#
        );
        assert_eq!(q.positive_terms(), vec!["graph neural", "molecule", "drug"]);
    }

    #[test]
    fn test_filter_override() {
        let q = parse("x year:2000").unwrap().with_year_range(Some(2010), None);
        assert_eq!(q.filters.year_from, Some(2010));
        assert_eq!(q.filters.year_to, None);
        assert_eq!(q.keywords(), &["x"]);
    }

    #[test]
    fn test_from_keywords() {
        let q = StructuredQuery::from_keywords(["llm", "safety", "llm"]);
        assert_eq!(q.keywords(), &["llm", "safety"]);
        assert_eq!(q.original(), "llm safety");
        assert!(q.is_valid());
        assert!(!StructuredQuery::from_keywords(Vec::<String>::new()).is_valid());
    }
}
