//! `runr submit <run_id> --to <branch> [--dry-run]`
//!
//! Lands the run's latest checkpoint on the target branch via
//! cherry-pick, journaling `run_submitted` or `submit_conflict`.

use anyhow::{Context, Result};
use serde_json::json;
use std::path::Path;

use crate::config::RunrPaths;
use crate::gitx::{Git, SubmitOutcome};
use crate::store::{find_latest_checkpoint_by_sidecar, EventType, RunStore};
use crate::supervisor::RunState;

pub fn cmd_submit(repo: &Path, run_id: &str, target: &str, dry_run: bool) -> Result<bool> {
    let paths = RunrPaths::new(repo.to_path_buf());
    let store = RunStore::open(paths.run_dir(run_id));

    let checkpoint_sha = match find_latest_checkpoint_by_sidecar(
        &paths.checkpoints_dir(),
        run_id,
    )? {
        Some(sidecar) => sidecar.sha,
        None => {
            let state: RunState = store
                .read_state()?
                .with_context(|| format!("no such run: {run_id}"))?;
            state
                .last_checkpoint_sha
                .with_context(|| format!("run {run_id} has no checkpoint to submit"))?
        }
    };

    if dry_run {
        println!("would cherry-pick {checkpoint_sha} onto {target}");
        return Ok(true);
    }

    let git = Git::new(repo);
    match git.submit(&checkpoint_sha, target)? {
        SubmitOutcome::Submitted { new_sha, target_branch } => {
            store.journal().append(
                EventType::RunSubmitted,
                json!({
                    "run_id": run_id,
                    "checkpoint_sha": checkpoint_sha,
                    "target_branch": target_branch,
                    "new_sha": new_sha,
                }),
            )?;
            println!("submitted {checkpoint_sha} to {target} as {new_sha}");
            Ok(true)
        }
        SubmitOutcome::Conflict { conflicted_files, recovery_commands } => {
            store.journal().append(
                EventType::SubmitConflict,
                json!({
                    "run_id": run_id,
                    "checkpoint_sha": checkpoint_sha,
                    "target_branch": target,
                    "conflicted_files": conflicted_files,
                    "recovery_commands": recovery_commands,
                }),
            )?;
            eprintln!("submit conflicted on: {}", conflicted_files.join(", "));
            eprintln!("recovery:");
            for command in &recovery_commands {
                eprintln!("  {command}");
            }
            Ok(false)
        }
    }
}
