use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "scholar")]
#[command(about = "Scholar - Federated search over arXiv, PubMed, Semantic Scholar and Crossref")]
#[command(version)]
#[command(after_help = "\x1b[1;36mQuick Start:\x1b[0m
  scholar search \"transformer attention\"         Search every source
  scholar search \"crispr year:2020..\" -p biomedical
  scholar search \"graph neural -survey\" -s arxiv,s2
  scholar search \"protein folding\" --offline     Search the local index only
  scholar sources                                Check which sources respond

\x1b[1;36mLocal Index:\x1b[0m
  scholar index stats                            Document counts and size
  scholar index optimize                         Merge segments, purge deletes
  scholar index clear --yes                      Remove every document

\x1b[1;36mQuery Syntax:\x1b[0m
  \"exact phrase\"  +required  -excluded  author:name
  year:2020  year:2015..2020  year:>2018  year:<2000
  after:2021-06-01  before:2022-01-01  type:review  site:nature.com  filetype:pdf")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Pretty)]
    pub output: OutputFormat,

    /// Shorthand for --output json
    #[arg(long, global = true)]
    pub json: bool,

    /// Verbose output (repeat for more)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else {
            self.output
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Search academic sources in parallel and merge the results
    ///
    /// Results are deduplicated across sources (DOI, preprint id, PMID, URL,
    /// then title) and ranked by relevance, citations and recency.
    #[command(after_help = "\x1b[1;33mExamples:\x1b[0m
  scholar search \"large language models\"
  scholar search \"mrna vaccine year:2021\" --profile biomedical --limit 10
  scholar search \"quantum supremacy\" -s crossref,arxiv --min-citations 50
  scholar search \"sparse attention\" --offline --json

\x1b[1;33mBuilt-in Profiles:\x1b[0m
  all         - arxiv, pubmed, semantic_scholar, crossref
  biomedical  - pubmed, semantic_scholar, crossref
  preprints   - arxiv
  computing   - all sources except pubmed")]
    Search {
        /// Query text (quote it, or pass several words)
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
        /// Maximum number of results per source
        #[arg(short, long)]
        limit: Option<usize>,
        /// Named source profile (all, biomedical, preprints, computing)
        #[arg(short, long, conflicts_with = "sources")]
        profile: Option<String>,
        /// Comma-separated list of sources (arxiv, pubmed, semantic_scholar, crossref)
        #[arg(short, long)]
        sources: Option<String>,
        /// Overall deadline in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Search the local index instead of the network
        #[arg(long, conflicts_with_all = ["profile", "sources", "timeout_ms"])]
        offline: bool,
        /// Drop results cited fewer times than this
        #[arg(long)]
        min_citations: Option<u64>,
        /// Do not store results in the local index
        #[arg(long)]
        no_index: bool,
    },

    /// Show the registered sources and whether they respond
    Sources,

    /// List built-in source profiles
    Profiles,

    /// Manage the local full-text index
    #[command(after_help = "\x1b[1;33mExamples:\x1b[0m
  scholar index stats
  scholar index optimize
  scholar index clear --yes")]
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },
}

#[derive(Subcommand, Clone)]
pub enum IndexAction {
    /// Show document counts and on-disk size
    Stats,
    /// Merge segments and purge deleted documents
    Optimize,
    /// Remove every document from the index
    Clear {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable formatted output
    Pretty,
    /// JSON output
    Json,
    /// Plain text output
    Text,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_search_collects_words() {
        let cli = Cli::parse_from(["scholar", "search", "deep", "learning", "-l", "5"]);
        match cli.command {
            Some(Commands::Search { query, limit, .. }) => {
                assert_eq!(query, vec!["deep", "learning"]);
                assert_eq!(limit, Some(5));
            }
            _ => panic!("expected search"),
        }
    }

    #[test]
    fn test_json_flag_overrides_output() {
        let cli = Cli::parse_from(["scholar", "--json", "sources"]);
        assert_eq!(cli.format(), OutputFormat::Json);
        let cli = Cli::parse_from(["scholar", "sources", "--output", "text"]);
        assert_eq!(cli.format(), OutputFormat::Text);
    }

    #[test]
    fn test_offline_conflicts_with_sources() {
        let parsed = Cli::try_parse_from(["scholar", "search", "x", "--offline", "-s", "arxiv"]);
        assert!(parsed.is_err());
    }
}
