//! Deduplication, merging and ranking of records from many sources.

use crate::record::{AccessLevel, ResultRecord};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::HashMap;

static ARXIV_VERSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"v\d+$").unwrap());
static URL_SCHEME: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^[a-z][a-z0-9+.-]*://").unwrap());

/// Deduplicate, merge and rank `records`. Deterministic and infallible.
pub fn aggregate(records: Vec<ResultRecord>) -> Vec<ResultRecord> {
    let mut records = dedup(records);
    records.sort_by(rank_order);
    records
}

/// Merge records sharing a [`dedup_key`], keeping first-seen order.
///
/// A duplicate shares its key's identifier level with the base, so it never
/// carries a higher-ranked identifier and merging leaves the key unchanged.
fn dedup(records: Vec<ResultRecord>) -> Vec<ResultRecord> {
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(records.len());
    let mut merged: Vec<ResultRecord> = Vec::with_capacity(records.len());

    for record in records {
        let key = dedup_key(&record);
        match positions.get(&key) {
            Some(&idx) => merge_into(&mut merged[idx], record),
            None => {
                positions.insert(key, merged.len());
                merged.push(record);
            }
        }
    }
    merged
}

/// The identity two records must share to be considered the same work.
pub fn dedup_key(record: &ResultRecord) -> String {
    if let Some(doi) = record.doi().and_then(normalize_doi) {
        return format!("doi:{}", doi);
    }
    if let Some(preprint) = record.preprint_id().and_then(normalize_preprint_id) {
        return format!("preprint:{}", preprint);
    }
    if let Some(pmid) = record.pmid().and_then(normalize_pmid) {
        return format!("pmid:{}", pmid);
    }
    if let Some(url) = normalize_url(&record.url) {
        return format!("url:{}", url);
    }
    let title = normalize_title(&record.title);
    if !title.is_empty() {
        return format!("title:{}", hex::encode(Sha256::digest(title.as_bytes())));
    }
    format!("id:{}", record.id)
}

pub fn normalize_doi(doi: &str) -> Option<String> {
    let mut doi = doi.trim().to_lowercase();
    for prefix in ["https://doi.org/", "http://doi.org/", "https://dx.doi.org/", "doi:"] {
        if let Some(rest) = doi.strip_prefix(prefix) {
            doi = rest.trim().to_string();
        }
    }
    (!doi.is_empty()).then_some(doi)
}

pub fn normalize_preprint_id(id: &str) -> Option<String> {
    let id = id.trim().to_lowercase();
    let id = id.strip_prefix("arxiv:").unwrap_or(&id).trim();
    let id = ARXIV_VERSION.replace(id, "");
    (!id.is_empty()).then(|| id.into_owned())
}

pub fn normalize_pmid(pmid: &str) -> Option<String> {
    let digits: String = pmid.chars().filter(char::is_ascii_digit).collect();
    (!digits.is_empty()).then_some(digits)
}

pub fn normalize_url(url: &str) -> Option<String> {
    let url = URL_SCHEME.replace(url.trim(), "").to_lowercase();
    let url = url.strip_prefix("www.").unwrap_or(&url);
    let url = url.trim_end_matches('/');
    (!url.is_empty()).then(|| url.to_string())
}

/// Lower-case, drop punctuation, collapse whitespace.
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn fill(target: &mut String, other: String) {
    if target.trim().is_empty() && !other.trim().is_empty() {
        *target = other;
    }
}

fn fill_opt<T>(target: &mut Option<T>, other: Option<T>) {
    if target.is_none() {
        *target = other;
    }
}

/// Merge `dup` into `base`. The base keeps every non-blank field.
fn merge_into(base: &mut ResultRecord, dup: ResultRecord) {
    let relevance = match (base.relevance > 0.0, dup.relevance > 0.0) {
        (true, true) => (base.relevance + dup.relevance) / 2.0,
        (true, false) => base.relevance,
        (false, _) => dup.relevance,
    };
    base.relevance = relevance;

    fill(&mut base.title, dup.title);
    fill(&mut base.authors, dup.authors);
    fill(&mut base.url, dup.url);
    fill(&mut base.snippet, dup.snippet);
    if base.access == AccessLevel::Unknown {
        base.access = dup.access;
    }

    let Some(other) = dup.scholarly else {
        return;
    };
    let fields = base.scholarly_mut();
    fill_opt(&mut fields.doi, other.doi);
    fill_opt(&mut fields.preprint_id, other.preprint_id);
    fill_opt(&mut fields.pmid, other.pmid);
    fill_opt(&mut fields.abstract_text, other.abstract_text);
    fill_opt(&mut fields.publication_date, other.publication_date);
    fill_opt(&mut fields.journal, other.journal);
    fill_opt(&mut fields.venue, other.venue);
    fill_opt(&mut fields.pdf_url, other.pdf_url);
    for keyword in other.keywords {
        if !fields.keywords.contains(&keyword) {
            fields.keywords.push(keyword);
        }
    }
    fields.citation_count = match (fields.citation_count, other.citation_count) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };
}

/// Relevance, then citations, then publication date (missing last), then
/// retrieval time; each descending.
fn rank_order(a: &ResultRecord, b: &ResultRecord) -> Ordering {
    b.relevance
        .total_cmp(&a.relevance)
        .then_with(|| b.citations().cmp(&a.citations()))
        .then_with(|| match (a.publication_date(), b.publication_date()) {
            (Some(da), Some(db)) => db.cmp(&da),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| b.retrieved_at.cmp(&a.retrieved_at))
}

/// Records with at least `min` citations (missing counts as 0).
pub fn filter_min_citations(records: &[ResultRecord], min: u64) -> Vec<ResultRecord> {
    records
        .iter()
        .filter(|r| r.citations() >= min)
        .cloned()
        .collect()
}

/// Records published within `from..=to`. Undated records are dropped when
/// either bound is set.
pub fn filter_year_range(
    records: &[ResultRecord],
    from: Option<i32>,
    to: Option<i32>,
) -> Vec<ResultRecord> {
    if from.is_none() && to.is_none() {
        return records.to_vec();
    }
    records
        .iter()
        .filter(|r| match r.year() {
            Some(year) => from.map_or(true, |f| year >= f) && to.map_or(true, |t| year <= t),
            None => false,
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ScholarlyFields, SourceTag};
    use chrono::{NaiveDate, TimeZone, Utc};

    fn paper(source: SourceTag, id: &str, title: &str) -> ResultRecord {
        ResultRecord::new(source, id, title)
            .with_retrieved_at(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    }

    fn with_fields(record: ResultRecord, fields: ScholarlyFields) -> ResultRecord {
        record.with_scholarly(fields)
    }

    #[test]
    fn test_normalizers() {
        assert_eq!(
            normalize_doi(" https://doi.org/10.1000/ABC ").as_deref(),
            Some("10.1000/abc")
        );
        assert_eq!(normalize_doi("doi:10.1/x").as_deref(), Some("10.1/x"));
        assert_eq!(normalize_doi("  "), None);
        assert_eq!(
            normalize_preprint_id("arXiv:2301.07041v3").as_deref(),
            Some("2301.07041")
        );
        assert_eq!(normalize_pmid("PMID: 12345").as_deref(), Some("12345"));
        assert_eq!(
            normalize_url("https://www.Example.org/paper/").as_deref(),
            Some("example.org/paper")
        );
        assert_eq!(normalize_title("  Deep   Learning: A Survey! "), "deep learning a survey");
    }

    #[test]
    fn test_key_precedence() {
        let record = with_fields(
            paper(SourceTag::PubMed, "PMID:1", "T").with_url("https://x.org/1"),
            ScholarlyFields {
                pmid: Some("1".into()),
                preprint_id: Some("2301.00001".into()),
                ..Default::default()
            },
        );
        assert_eq!(dedup_key(&record), "preprint:2301.00001");

        let bare = paper(SourceTag::Crossref, "raw", "");
        assert_eq!(dedup_key(&bare), "id:raw");

        let titled = paper(SourceTag::Crossref, "raw", "Hello, World");
        let same = paper(SourceTag::Arxiv, "other", "hello world");
        assert_eq!(dedup_key(&titled), dedup_key(&same));
        assert!(dedup_key(&titled).starts_with("title:"));
    }

    #[test]
    fn test_doi_merge_keeps_max_citations() {
        let first = with_fields(
            paper(SourceTag::Crossref, "doi:10.1/X", "Paper")
                .with_relevance(1.0)
                .with_url("https://doi.org/10.1/X"),
            ScholarlyFields {
                doi: Some("10.1/X".into()),
                citation_count: Some(10),
                keywords: vec!["a".into(), "b".into()],
                ..Default::default()
            },
        );
        let second = with_fields(
            paper(SourceTag::SemanticScholar, "S2:abc", "Paper")
                .with_relevance(0.5)
                .with_authors("Ada Lovelace"),
            ScholarlyFields {
                doi: Some("https://doi.org/10.1/x".into()),
                citation_count: Some(42),
                abstract_text: Some("Abstract".into()),
                keywords: vec!["b".into(), "c".into()],
                ..Default::default()
            },
        );

        let out = aggregate(vec![first, second]);
        assert_eq!(out.len(), 1);
        let merged = &out[0];
        assert_eq!(merged.id, "doi:10.1/X");
        assert_eq!(merged.source, SourceTag::Crossref);
        assert_eq!(merged.citations(), 42);
        assert_eq!(merged.relevance, 0.75);
        assert_eq!(merged.authors, "Ada Lovelace");
        assert_eq!(merged.abstract_text(), Some("Abstract"));
        assert_eq!(
            merged.scholarly.as_ref().unwrap().keywords,
            vec!["a", "b", "c"]
        );
    }

    #[test]
    fn test_zero_relevance_takes_other() {
        let a = paper(SourceTag::Arxiv, "a", "Same title");
        let b = paper(SourceTag::Crossref, "b", "Same title").with_relevance(0.4);
        let out = aggregate(vec![a, b]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].relevance, 0.4);
    }

    #[test]
    fn test_aggregate_is_idempotent() {
        let preprint_only = with_fields(
            paper(SourceTag::Arxiv, "arXiv:1", "Alpha").with_relevance(1.0),
            ScholarlyFields {
                preprint_id: Some("2301.00001v2".into()),
                ..Default::default()
            },
        );
        let both = with_fields(
            paper(SourceTag::SemanticScholar, "S2:1", "Alpha").with_relevance(0.5),
            ScholarlyFields {
                preprint_id: Some("arXiv:2301.00001".into()),
                doi: Some("10.1/alpha".into()),
                ..Default::default()
            },
        );
        let doi_only = with_fields(
            paper(SourceTag::Crossref, "doi:10.1/alpha", "Alpha").with_relevance(0.25),
            ScholarlyFields {
                doi: Some("10.1/ALPHA".into()),
                ..Default::default()
            },
        );
        let unrelated = paper(SourceTag::PubMed, "PMID:9", "Beta").with_relevance(0.9);

        let once = aggregate(vec![preprint_only, unrelated, both, doi_only]);
        assert_eq!(once.len(), 3);
        assert_eq!(once[0].id, "arXiv:1");
        assert_eq!(once[2].relevance, 0.375);
        let twice = aggregate(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_rank_order() {
        let date = |y| NaiveDate::from_ymd_opt(y, 1, 1);
        let dated = |id: &str, relevance: f64, citations: Option<u64>, year: Option<i32>| {
            with_fields(
                paper(SourceTag::Crossref, id, id).with_relevance(relevance),
                ScholarlyFields {
                    citation_count: citations,
                    publication_date: year.and_then(date),
                    ..Default::default()
                },
            )
        };
        let later = paper(SourceTag::Crossref, "later", "later")
            .with_relevance(0.1)
            .with_retrieved_at(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());

        let out = aggregate(vec![
            dated("undated", 0.5, Some(5), None),
            dated("low", 0.1, None, None),
            dated("old", 0.5, Some(5), Some(1999)),
            dated("cited", 0.5, Some(50), None),
            dated("top", 0.9, None, None),
            later,
            dated("new", 0.5, Some(5), Some(2020)),
        ]);
        let ids: Vec<&str> = out.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["top", "cited", "new", "old", "undated", "later", "low"]
        );
    }

    #[test]
    fn test_filters() {
        let records = vec![
            with_fields(
                paper(SourceTag::Crossref, "a", "a"),
                ScholarlyFields {
                    citation_count: Some(10),
                    publication_date: NaiveDate::from_ymd_opt(2019, 5, 1),
                    ..Default::default()
                },
            ),
            with_fields(
                paper(SourceTag::Crossref, "b", "b"),
                ScholarlyFields {
                    publication_date: NaiveDate::from_ymd_opt(2022, 5, 1),
                    ..Default::default()
                },
            ),
            paper(SourceTag::Crossref, "c", "c"),
        ];

        let ids = |v: Vec<ResultRecord>| v.into_iter().map(|r| r.id).collect::<Vec<_>>();
        assert_eq!(ids(filter_min_citations(&records, 5)), vec!["a"]);
        assert_eq!(ids(filter_min_citations(&records, 0)).len(), 3);
        assert_eq!(ids(filter_year_range(&records, Some(2020), None)), vec!["b"]);
        assert_eq!(ids(filter_year_range(&records, None, Some(2021))), vec!["a"]);
        assert_eq!(ids(filter_year_range(&records, None, None)).len(), 3);
        assert_eq!(records.len(), 3);
    }
}
