use crate::cli::{Cli, IndexAction};
use crate::commands::{open_index, CommandError, Result};
use crate::output::{format_output, OutputData};
use scholar_core::cpu_pool::spawn_cpu;
use scholar_core::{IndexError, ScholarConfig};

pub async fn run(cli: &Cli, action: IndexAction) -> Result<()> {
    let config = ScholarConfig::load()?;
    let index = open_index(&config)?;
    let path = index.path().display().to_string();

    match action {
        IndexAction::Stats => {
            let stats = index.stats()?;
            index.close()?;
            format_output(&OutputData::IndexStats { path, stats }, &cli.format())
        }
        IndexAction::Optimize => {
            let stats = spawn_cpu(move || -> std::result::Result<_, IndexError> {
                index.optimize()?;
                let stats = index.stats()?;
                index.close()?;
                Ok(stats)
            })
            .await?;
            format_output(&OutputData::IndexStats { path, stats }, &cli.format())
        }
        IndexAction::Clear { yes } => {
            if !yes {
                index.close()?;
                return Err(CommandError::InvalidInput(
                    "Refusing to clear the index without --yes".to_string(),
                ));
            }
            let removed = index.stats()?.live_docs;
            index.delete_all()?;
            index.close()?;
            let message = format!("Removed {} documents from {}", removed, path);
            format_output(&OutputData::Message(message), &cli.format())
        }
    }
}
