use crate::cli::OutputFormat;
use crate::commands::Result;
use scholar_core::{FederatedSearchResult, IndexStats, ResultRecord, SourceTag};
use serde::Serialize;

mod pretty;

/// One line of the `sources` table.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRow {
    pub source: SourceTag,
    pub name: String,
    pub base_url: String,
    pub available: bool,
}

/// One line of the `profiles` table.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileRow {
    pub name: String,
    pub description: String,
    pub sources: Vec<SourceTag>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum OutputData {
    SearchResults(FederatedSearchResult),
    OfflineResults {
        query: String,
        results: Vec<ResultRecord>,
    },
    SourceList(Vec<SourceRow>),
    ProfileList(Vec<ProfileRow>),
    IndexStats {
        path: String,
        stats: IndexStats,
    },
    Message(String),
}

pub fn format_output(data: &OutputData, format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(data)?);
        }
        OutputFormat::Text => {
            print!("{}", format_text_output(data));
        }
        OutputFormat::Pretty => {
            print!("{}", format_pretty_output(data));
        }
    }
    Ok(())
}

fn format_text_output(data: &OutputData) -> String {
    let mut out = String::new();
    match data {
        OutputData::SearchResults(result) => {
            out.push_str(&format!("Search results for '{}':\n", result.query));
            push_records(&mut out, &result.results);
            for err in &result.errors {
                out.push_str(&format!("error\t{}\t{}\n", err.source, err.error));
            }
        }
        OutputData::OfflineResults { query, results } => {
            out.push_str(&format!("Local index results for '{}':\n", query));
            push_records(&mut out, results);
        }
        OutputData::SourceList(rows) => {
            for row in rows {
                let status = if row.available { "available" } else { "unreachable" };
                out.push_str(&format!("{}\t{}\t{}\n", row.source, status, row.base_url));
            }
        }
        OutputData::ProfileList(rows) => {
            for row in rows {
                let sources: Vec<&str> = row.sources.iter().map(|s| s.as_str()).collect();
                out.push_str(&format!("{}: {}\n", row.name, sources.join(",")));
            }
        }
        OutputData::IndexStats { path, stats } => {
            out.push_str(&format!("path: {}\n", path));
            out.push_str(&format!("live_docs: {}\n", stats.live_docs));
            out.push_str(&format!("deleted_docs: {}\n", stats.deleted_docs));
            out.push_str(&format!("total_docs: {}\n", stats.total_docs));
            out.push_str(&format!("size_bytes: {}\n", stats.size_bytes));
        }
        OutputData::Message(msg) => {
            out.push_str(msg);
            out.push('\n');
        }
    }
    out
}

/// Tab-separated `id, year, title, url` per record.
fn push_records(out: &mut String, records: &[ResultRecord]) {
    for record in records {
        let year = record.year().map(|y| y.to_string()).unwrap_or_default();
        out.push_str(&format!(
            "{}\t{}\t{}\t{}\n",
            record.id, year, record.title, record.url
        ));
    }
}

fn format_pretty_output(data: &OutputData) -> String {
    match data {
        OutputData::SearchResults(result) => pretty::format_federated(result),
        OutputData::OfflineResults { query, results } => pretty::format_offline(query, results),
        OutputData::SourceList(rows) => pretty::format_sources(rows),
        OutputData::ProfileList(rows) => pretty::format_profiles(rows),
        OutputData::IndexStats { path, stats } => pretty::format_index_stats(path, stats),
        OutputData::Message(msg) => format!("{}\n", msg),
    }
}
