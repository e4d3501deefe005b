use crate::cli::{Cli, OutputFormat};
use crate::commands::{create_registry, Result};
use crate::output::{format_output, OutputData, SourceRow};
use indicatif::{ProgressBar, ProgressStyle};
use scholar_core::{FederatedSearch, ScholarConfig};
use std::sync::Arc;

/// Probe every compiled-in source and print a liveness table.
pub async fn run(cli: &Cli) -> Result<()> {
    let config = ScholarConfig::load()?;
    let registry = Arc::new(create_registry(&config));
    let engine = FederatedSearch::new(Arc::clone(&registry));

    let spinner = (cli.format() == OutputFormat::Pretty).then(|| {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            spinner.set_style(style);
        }
        spinner.set_message(format!("Probing {} sources...", registry.len()));
        spinner.enable_steady_tick(std::time::Duration::from_millis(100));
        spinner
    });
    let status = engine.source_status().await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    let rows: Vec<SourceRow> = registry
        .all()
        .iter()
        .map(|connector| {
            let descriptor = connector.descriptor();
            SourceRow {
                source: descriptor.tag,
                name: descriptor.display_name.clone(),
                base_url: descriptor.base_url.clone(),
                available: status.get(&descriptor.tag).copied().unwrap_or(false),
            }
        })
        .collect();

    if rows.is_empty() {
        return format_output(
            &OutputData::Message("No sources compiled into this build".to_string()),
            &cli.format(),
        );
    }
    format_output(&OutputData::SourceList(rows), &cli.format())
}
