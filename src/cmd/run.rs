//! `runr run --task <path> [--worktree]`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::{RunrConfig, RunrPaths};
use crate::gitx::Git;
use crate::report::stop_block;
use crate::stop::StopReason;
use crate::store::RunStore;
use crate::supervisor::{StopHandoff, Supervisor, SupervisorOptions};

/// Install a Ctrl-C handler that flips the cooperative cancel flag. The
/// machine notices between suspension points and stops as
/// `user_stopped` after persisting state.
pub fn cancel_flag() -> Arc<AtomicBool> {
    let cancel = Arc::new(AtomicBool::new(false));
    let handler_flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping cooperatively");
            handler_flag.store(true, Ordering::SeqCst);
        }
    });
    cancel
}

pub async fn cmd_run(repo: &Path, task: &Path, worktree: bool) -> Result<StopReason> {
    let repo = if worktree {
        prepare_worktree(repo)?
    } else {
        repo.to_path_buf()
    };

    let paths = RunrPaths::new(repo.clone());
    let config = RunrConfig::load(&paths.config_file())?;

    let mut supervisor = Supervisor::init(
        &repo,
        task,
        config,
        SupervisorOptions::default(),
        cancel_flag(),
    )?;
    let run_id = supervisor.run_id().to_string();
    tracing::info!(run_id = %run_id, task = %task.display(), "run starting");

    let reason = supervisor.run().await?;
    print_outcome(&paths, &run_id, reason);
    Ok(reason)
}

/// Isolate the run in a detached git worktree under `.runr/worktrees/`.
/// The run directory then lives inside the worktree, keeping the run
/// fully self-contained.
fn prepare_worktree(repo: &Path) -> Result<PathBuf> {
    let git = Git::new(repo);
    let worktree = repo
        .join(".runr")
        .join("worktrees")
        .join(format!("wt-{}", crate::supervisor::RunState::allocate_run_id()));
    std::fs::create_dir_all(worktree.parent().context("worktree path has no parent")?)?;
    git.worktree_add_detached(&worktree)?;
    tracing::info!(worktree = %worktree.display(), "running in isolated worktree");
    Ok(worktree)
}

pub fn print_outcome(paths: &RunrPaths, run_id: &str, reason: StopReason) {
    if reason == StopReason::Complete {
        println!("run {run_id} complete");
        return;
    }
    let store = RunStore::open(paths.run_dir(run_id));
    let handoff = crate::store::read_json::<StopHandoff>(
        &store.handoffs_dir().join("stop.json"),
    )
    .ok()
    .flatten();
    match handoff {
        Some(handoff) => print!("{}", stop_block(&handoff)),
        None => println!("run {run_id} stopped: {reason} (exit {})", reason.exit_code()),
    }
}
