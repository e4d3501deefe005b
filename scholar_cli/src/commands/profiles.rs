use crate::cli::Cli;
use crate::commands::Result;
use crate::output::{format_output, OutputData, ProfileRow};
use scholar_core::SourceProfile;

pub async fn run(cli: &Cli) -> Result<()> {
    let rows = profile_rows();
    format_output(&OutputData::ProfileList(rows), &cli.format())
}

fn profile_rows() -> Vec<ProfileRow> {
    SourceProfile::list_builtin()
        .iter()
        .map(|profile| ProfileRow {
            name: profile.name.clone(),
            description: profile.description.clone().unwrap_or_default(),
            sources: profile.effective_sources(),
        })
        .collect()
}
