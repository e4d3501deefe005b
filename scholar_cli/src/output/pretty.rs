//! Pretty formatter for terminal output.
//!
//! Results render as cards: number and title, a link line, dimmed metadata,
//! then a wrapped snippet. Failures and timing go last, where the eye settles.

use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, ContentArrangement, Table};
use owo_colors::OwoColorize;
use scholar_core::{AccessLevel, FederatedSearchResult, IndexStats, ResultRecord};

use super::{ProfileRow, SourceRow};

/// Terminal width for formatting (default fallback)
const DEFAULT_WIDTH: usize = 80;

/// Indent for card content (after number)
const CARD_INDENT: usize = 6;

/// Lines of snippet shown per card
const SNIPPET_LINES: usize = 3;

pub fn format_federated(result: &FederatedSearchResult) -> String {
    let width = terminal_width();
    let mut output = String::new();

    output.push_str(&format!(
        "{} {}\n\n",
        "Search:".bold().cyan(),
        result.query.yellow()
    ));
    output.push_str(&format_section_header(
        "Results",
        Some(result.results.len()),
        width,
    ));
    output.push_str("\n\n");
    output.push_str(&format_records(&result.results, width));

    if !result.sources.is_empty() {
        let counts: Vec<String> = result
            .sources
            .iter()
            .map(|s| format!("{} {} ({}ms)", s.source, s.count, s.duration_ms))
            .collect();
        output.push_str(&format!("{} {}\n", "Sources:".dimmed(), counts.join(", ").dimmed()));
    }

    if result.partial && !result.errors.is_empty() {
        output.push('\n');
        output.push_str(&format!(
            "{}\n",
            "⚠ Partial results - some sources failed:".yellow()
        ));
        for err in &result.errors {
            let timeout_marker = if err.is_timeout { " (timeout)" } else { "" };
            output.push_str(&format!(
                "   {} {}: {}{}\n",
                "•".dimmed(),
                err.source.as_str().yellow(),
                err.error.dimmed(),
                timeout_marker.dimmed()
            ));
        }
    }

    output.push('\n');
    output.push_str(&format!(
        "{}\n",
        format!("Completed in {}ms", result.duration_ms).dimmed()
    ));
    output
}

pub fn format_offline(query: &str, results: &[ResultRecord]) -> String {
    let width = terminal_width();
    let mut output = String::new();
    output.push_str(&format!(
        "{} {} {}\n\n",
        "Search:".bold().cyan(),
        query.yellow(),
        "(local index)".dimmed()
    ));
    output.push_str(&format_section_header("Results", Some(results.len()), width));
    output.push_str("\n\n");
    output.push_str(&format_records(results, width));
    output
}

fn format_records(records: &[ResultRecord], width: usize) -> String {
    if records.is_empty() {
        return format!("   {}\n\n", "No results".dimmed());
    }
    let mut output = String::new();
    for (i, record) in records.iter().enumerate() {
        output.push_str(&format_card(record, i + 1, width));
        output.push('\n');
    }
    output
}

fn format_card(record: &ResultRecord, index: usize, width: usize) -> String {
    let mut output = String::new();
    let content_width = width.saturating_sub(CARD_INDENT + 2).max(20);

    output.push_str(&format!(
        " {:>3}. {} {}\n",
        index.to_string().cyan().bold(),
        truncate_str(&record.title, content_width.saturating_sub(12).max(20)).bold(),
        format!("[{}]", record.source).dimmed()
    ));

    if !record.url.is_empty() {
        output.push_str(&format!(
            "      {}\n",
            format_hyperlink(&record.url, &record.url).blue()
        ));
    }

    let meta = meta_line(record);
    if !meta.is_empty() {
        output.push_str(&format!(
            "      {}\n",
            truncate_str(&meta, content_width).dimmed()
        ));
    }

    let snippet = clean_snippet(&record.snippet);
    if !snippet.is_empty() {
        let wrapped = textwrap::wrap(&snippet, content_width);
        for line in wrapped.iter().take(SNIPPET_LINES) {
            output.push_str(&format!("      {}\n", line.dimmed()));
        }
        if wrapped.len() > SNIPPET_LINES {
            output.push_str(&format!("      {}\n", "...".dimmed()));
        }
    }
    output
}

/// Authors, year, venue, citations and access joined for one dimmed line.
fn meta_line(record: &ResultRecord) -> String {
    let mut parts = Vec::new();
    if !record.authors.is_empty() {
        parts.push(truncate_str(&record.authors, 40));
    }
    if let Some(year) = record.year() {
        parts.push(year.to_string());
    }
    if let Some(scholarly) = &record.scholarly {
        if let Some(journal) = scholarly.journal.as_ref().or(scholarly.venue.as_ref()) {
            parts.push(truncate_str(journal, 40));
        }
        if let Some(count) = scholarly.citation_count {
            parts.push(format!("{} citations", count));
        }
        if let Some(doi) = &scholarly.doi {
            parts.push(format!("doi:{}", doi));
        }
    }
    if record.access == AccessLevel::Open {
        parts.push("open access".to_string());
    }
    parts.join(" · ")
}

pub fn format_sources(rows: &[SourceRow]) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(terminal_width() as u16)
        .set_header(vec!["Source", "Name", "Endpoint", "Status"]);

    for row in rows {
        let status = if row.available {
            Cell::new("available".green().to_string())
        } else {
            Cell::new("unreachable".red().to_string())
        };
        table.add_row(vec![
            Cell::new(row.source.as_str()),
            Cell::new(&row.name),
            Cell::new(&row.base_url),
            status,
        ]);
    }
    format!("{}\n", table)
}

pub fn format_profiles(rows: &[ProfileRow]) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(terminal_width() as u16)
        .set_header(vec!["Profile", "Sources", "Description"]);

    for row in rows {
        let sources: Vec<&str> = row.sources.iter().map(|s| s.as_str()).collect();
        table.add_row(vec![
            row.name.clone(),
            sources.join(", "),
            row.description.clone(),
        ]);
    }
    format!("{}\n", table)
}

pub fn format_index_stats(path: &str, stats: &IndexStats) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Metric", "Value"]);
    table.add_row(vec!["Live documents".to_string(), stats.live_docs.to_string()]);
    table.add_row(vec![
        "Deleted documents".to_string(),
        stats.deleted_docs.to_string(),
    ]);
    table.add_row(vec!["Total documents".to_string(), stats.total_docs.to_string()]);
    table.add_row(vec!["Size on disk".to_string(), human_bytes(stats.size_bytes)]);

    format!("{} {}\n{}\n", "Index:".bold().cyan(), path.dimmed(), table)
}

// ============================================================================
// Section Headers
// ============================================================================

fn format_section_header(label: &str, count: Option<usize>, width: usize) -> String {
    let count_str = match count {
        Some(n) => format!(" ({} results)", n),
        None => String::new(),
    };

    let header_text = format!("{}{}", label, count_str);
    let line_len = (width.saturating_sub(header_text.len() + 4)).min(60);
    let line = "─".repeat(line_len);

    format!(
        "{} {} {}",
        "──".cyan(),
        header_text.green().bold(),
        line.cyan()
    )
}

// ============================================================================
// Helpers
// ============================================================================

pub(crate) fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

pub(crate) fn truncate_str(s: &str, max_len: usize) -> String {
    // Take first line only
    let first_line = s.lines().next().unwrap_or(s);

    if first_line.chars().count() <= max_len {
        first_line.to_string()
    } else {
        let truncated: String = first_line.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

fn clean_snippet(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn terminal_width() -> usize {
    terminal_size::terminal_size()
        .map(|(w, _)| w.0 as usize)
        .unwrap_or(DEFAULT_WIDTH)
}

/// Format a URL as a clickable hyperlink using OSC 8 escape sequences.
fn format_hyperlink(url: &str, display_text: &str) -> String {
    format!("\x1b]8;;{}\x07{}\x1b]8;;\x07", url, display_text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scholar_core::record::parse_publication_date;
    use scholar_core::{ScholarlyFields, SourceTag};

    fn record() -> ResultRecord {
        ResultRecord::new(SourceTag::Crossref, "doi:10.1/x", "A Study of Things")
            .with_authors("Ada Lovelace")
            .with_url("https://doi.org/10.1/x")
            .with_snippet("first line\n\n   second   line")
            .with_access(AccessLevel::Open)
            .with_scholarly(ScholarlyFields {
                doi: Some("10.1/x".to_string()),
                journal: Some("Nature".to_string()),
                citation_count: Some(12),
                publication_date: parse_publication_date("2019-05-01"),
                ..Default::default()
            })
    }

    #[test]
    fn test_format_card() {
        let output = format_card(&record(), 1, 100);
        assert!(output.contains("A Study of Things"));
        assert!(output.contains("https://doi.org/10.1/x"));
        assert!(output.contains("first line second line"));
        assert!(output.contains("12 citations"));
    }

    #[test]
    fn test_meta_line() {
        assert_eq!(
            meta_line(&record()),
            "Ada Lovelace · 2019 · Nature · 12 citations · doi:10.1/x · open access"
        );
        let bare = ResultRecord::new(SourceTag::Arxiv, "arXiv:1", "t");
        assert_eq!(meta_line(&bare), "");
    }

    #[test]
    fn test_truncate_str() {
        assert_eq!(truncate_str("short", 10), "short");
        assert_eq!(truncate_str("abcdefghijkl", 8), "abcde...");
        assert_eq!(truncate_str("line one\nline two", 20), "line one");
    }

    #[test]
    fn test_human_bytes() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(2048), "2.0 KiB");
        assert_eq!(human_bytes(5 * 1024 * 1024), "5.0 MiB");
    }

    #[test]
    fn test_empty_records() {
        assert!(format_records(&[], 80).contains("No results"));
    }
}
