//! `runr resume <run_id | "latest"> [--auto-stash]`

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::{RunrConfig, RunrPaths};
use crate::resume::{prepare, ResumeOptions};
use crate::stop::StopReason;
use crate::supervisor::{Supervisor, SupervisorOptions};

use super::run::{cancel_flag, print_outcome};

pub async fn cmd_resume(
    repo: &Path,
    run_ref: &str,
    auto_stash: bool,
    auto: bool,
) -> Result<StopReason> {
    let paths = RunrPaths::new(repo.to_path_buf());
    let run_id = if run_ref == "latest" {
        paths
            .latest_run_id()
            .context("no runs found under the runs root")?
    } else {
        run_ref.to_string()
    };

    let (plan, state) = prepare(repo, &run_id, ResumeOptions { auto, auto_stash })?;
    tracing::info!(
        run_id = %run_id,
        source = ?plan.source,
        checkpoint = plan.checkpoint_sha.as_deref().unwrap_or("none"),
        target_phase = %plan.resume_target_phase,
        "resuming"
    );

    let config = RunrConfig::load(&paths.config_file())?;
    let mut supervisor = Supervisor::attach(
        repo,
        state,
        config,
        SupervisorOptions::default(),
        cancel_flag(),
    )?;

    let reason = supervisor.run().await?;
    print_outcome(&paths, &run_id, reason);
    Ok(reason)
}
