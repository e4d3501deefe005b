use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use std::process;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod commands;
mod output;

use cli::{Cli, Commands};
use commands::*;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let default_filter = match cli.verbose {
        0 => "scholar_cli=info,scholar_core=warn,scholar=warn",
        1 => "scholar_cli=debug,scholar_core=info,scholar=info",
        _ => "scholar_cli=trace,scholar_core=debug,scholar=debug",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let result = match &cli.command {
        None => {
            let _ = Cli::command().print_help();
            Ok(())
        }
        Some(Commands::Search {
            query,
            limit,
            profile,
            sources,
            timeout_ms,
            offline,
            min_citations,
            no_index,
        }) => {
            search::run(
                &cli,
                query,
                *limit,
                profile.as_deref(),
                sources.as_deref(),
                *timeout_ms,
                *offline,
                *min_citations,
                *no_index,
            )
            .await
        }
        Some(Commands::Sources) => sources::run(&cli).await,
        Some(Commands::Profiles) => profiles::run(&cli).await,
        Some(Commands::Index { action }) => index::run(&cli, action.clone()).await,
    };

    if let Err(e) = result {
        eprintln!("{}: {}", "Error".red().bold(), e);
        process::exit(1);
    }
}
