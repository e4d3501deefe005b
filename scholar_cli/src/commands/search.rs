use crate::cli::{Cli, OutputFormat};
use crate::commands::{create_registry, open_index, open_index_optional, CommandError, Result};
use crate::output::{format_output, OutputData};
use indicatif::{ProgressBar, ProgressStyle};
use scholar_core::cpu_pool::spawn_cpu;
use scholar_core::federated::{filter_min_citations, DEFAULT_PROFILE};
use scholar_core::{
    parse, ConnectorRegistry, FederatedSearch, IndexError, LocalIndex, ResultRecord,
    ScholarConfig, SourceProfile, SourceTag, StructuredQuery,
};
use std::sync::Arc;

/// Run a search command - federated over the network, or against the local index.
///
/// # Arguments
/// - `query`: Query words, joined with spaces before parsing
/// - `limit`: Maximum results per source (offline: in total)
/// - `profile`: Named source profile
/// - `sources`: Comma-separated list of source tags
/// - `timeout_ms`: Overall deadline override
/// - `offline`: Query the local index only
/// - `min_citations`: Drop results cited fewer times
/// - `no_index`: Skip storing the results locally
#[allow(clippy::too_many_arguments)]
pub async fn run(
    cli: &Cli,
    query: &[String],
    limit: Option<usize>,
    profile: Option<&str>,
    sources: Option<&str>,
    timeout_ms: Option<u64>,
    offline: bool,
    min_citations: Option<u64>,
    no_index: bool,
) -> Result<()> {
    let text = query.join(" ");
    let config = ScholarConfig::load()?;
    let structured = parse(&text)?;

    if offline {
        return run_offline(cli, &config, &structured, limit, min_citations).await;
    }

    let tags = resolve_sources(&config, profile, sources)?;
    let registry = Arc::new(create_registry(&config));
    let mut engine = FederatedSearch::new(registry).with_config(config.dispatcher.clone());
    if let Some(limit) = limit {
        engine.set_max_results(limit);
    }
    if let Some(timeout_ms) = timeout_ms {
        engine.set_timeout_ms(timeout_ms);
    }
    // Ingestion runs below so it finishes before the process exits.
    engine.set_auto_index(false);

    let spinner = spinner(
        cli,
        format!(
            "Searching {} for '{}'...",
            tags.iter().map(|t| t.as_str()).collect::<Vec<_>>().join(", "),
            text
        ),
    );
    let outcome = engine.search(&structured, &tags).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    let mut result = outcome?;

    if config.dispatcher.auto_index && !no_index && !result.results.is_empty() {
        if let Some(index) = open_index_optional(&config) {
            store_results(index, result.results.clone()).await;
        }
    }

    if let Some(min) = min_citations {
        result.results = filter_min_citations(&result.results, min);
    }

    format_output(&OutputData::SearchResults(result), &cli.format())
}

async fn run_offline(
    cli: &Cli,
    config: &ScholarConfig,
    structured: &StructuredQuery,
    limit: Option<usize>,
    min_citations: Option<u64>,
) -> Result<()> {
    let index = Arc::new(open_index(config)?);
    let engine = FederatedSearch::new(Arc::new(ConnectorRegistry::new()))
        .with_config(config.dispatcher.clone())
        .with_index(index);

    let max = limit.unwrap_or(config.dispatcher.max_results).max(1);
    let mut results = engine.search_offline(structured, max).await?;
    if let Some(min) = min_citations {
        results = filter_min_citations(&results, min);
    }

    format_output(
        &OutputData::OfflineResults {
            query: structured.original().to_string(),
            results,
        },
        &cli.format(),
    )
}

async fn store_results(index: LocalIndex, records: Vec<ResultRecord>) {
    let stored = spawn_cpu(move || -> std::result::Result<usize, IndexError> {
        let count = index.ingest(&records)?;
        index.close()?;
        Ok(count)
    })
    .await;
    match stored {
        Ok(count) => tracing::debug!(count, "Stored results in local index"),
        Err(e) => tracing::warn!(error = %e, "Failed to store results in local index"),
    }
}

/// Explicit `--sources` win over `--profile`, which wins over the configured default.
fn resolve_sources(
    config: &ScholarConfig,
    profile: Option<&str>,
    sources: Option<&str>,
) -> Result<Vec<SourceTag>> {
    if let Some(list) = sources {
        return parse_source_list(list);
    }
    let name = profile
        .or(config.default_profile.as_deref())
        .unwrap_or(DEFAULT_PROFILE);
    let profile = SourceProfile::get_builtin(name).ok_or_else(|| {
        let known: Vec<&str> = SourceProfile::list_builtin()
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        CommandError::InvalidInput(format!(
            "Profile '{}' not found. Available built-in profiles: {}",
            name,
            known.join(", ")
        ))
    })?;
    Ok(profile.effective_sources())
}

fn parse_source_list(list: &str) -> Result<Vec<SourceTag>> {
    let mut tags = Vec::new();
    for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let tag: SourceTag = name.parse().map_err(CommandError::InvalidInput)?;
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    if tags.is_empty() {
        return Err(CommandError::InvalidInput(
            "No sources given. Use e.g. --sources arxiv,pubmed".to_string(),
        ));
    }
    Ok(tags)
}

fn spinner(cli: &Cli, message: String) -> Option<ProgressBar> {
    if cli.format() != OutputFormat::Pretty {
        return None;
    }
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(message);
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));
    Some(spinner)
}
