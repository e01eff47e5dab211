//! `runr intervene <run_id> --reason <code> --note "..." ...`

use anyhow::Result;
use console::style;
use std::path::Path;

use crate::config::{RunrConfig, RunrPaths};
use crate::intervene::{record_intervention, trailer_block, InterventionRequest};

pub fn cmd_intervene(repo: &Path, request: &InterventionRequest) -> Result<()> {
    let paths = RunrPaths::new(repo.to_path_buf());
    let config = RunrConfig::load(&paths.config_file())?;

    let (receipt, receipt_path) = record_intervention(repo, request, config.workflow.mode)?;

    println!(
        "{} {} ({} commands, {} commits, {})",
        style("intervention recorded:").bold(),
        receipt_path.display(),
        receipt.commands.len(),
        receipt.commits_in_range.len(),
        receipt.diffstat.trim(),
    );

    // Users who prefer to commit by hand get the trailers ready to
    // paste, so the audit trail stays unbroken either way.
    if request.commit_message.is_none() && !request.amend_last {
        println!("\nto attribute a manual commit, append these trailers:\n");
        for line in trailer_block(&request.run_id, &request.reason).lines() {
            println!("    {line}");
        }
    }
    Ok(())
}
