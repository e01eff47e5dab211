//! `runr report <run_id> [--json]`

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::RunrPaths;
use crate::report::{build_report, render_human};

pub fn cmd_report(repo: &Path, run_ref: &str, json: bool) -> Result<()> {
    let run_id = if run_ref == "latest" {
        RunrPaths::new(repo.to_path_buf())
            .latest_run_id()
            .context("no runs found under the runs root")?
    } else {
        run_ref.to_string()
    };

    let report = build_report(repo, &run_id)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_human(&report));
    }
    Ok(())
}
