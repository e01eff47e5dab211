//! Resume planning.
//!
//! Given a run id, reconstruct the last verified checkpoint and compute
//! where execution picks up. Checkpoint resolution precedence:
//!
//! 1. **sidecar**: the checkpoint directory scan;
//! 2. **run-branch log**: canonical subjects in `base..run_branch`;
//! 3. **trailer log**: the same scan across all refs, trailer-checked.
//!
//! The chosen source is journaled as `resume_checkpoint_selected` so a
//! later audit can see which layer of redundancy was needed.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::RunrPaths;
use crate::gitx::{CheckpointRef, Git};
use crate::store::{find_latest_checkpoint_by_sidecar, EventType, RunStore, TaskLedger, TaskStatus, TaskUpdate};
use crate::supervisor::{Phase, RunState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointSource {
    Sidecar,
    RunBranchLog,
    TrailerLog,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumePlan {
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_sha: Option<String>,
    pub source: CheckpointSource,
    pub resume_from_milestone_index: usize,
    pub resume_target_phase: Phase,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResumeOptions {
    /// Invoked by the orchestrator's auto-resume policy (bumps the
    /// counter) rather than by a human.
    pub auto: bool,
    /// Explicitly stash a dirty tree instead of refusing. Never implied.
    pub auto_stash: bool,
}

/// Read-only planning: no repository or run-directory mutation.
pub fn plan(repo: &std::path::Path, run_id: &str) -> Result<(ResumePlan, RunState)> {
    let paths = RunrPaths::new(repo.to_path_buf());
    let store = RunStore::open(paths.run_dir(run_id));
    let state: RunState = store
        .read_state()
        .with_context(|| format!("run {run_id}: state.json unreadable"))?
        .with_context(|| format!("run {run_id}: no state.json, cannot resume"))?;

    let git = Git::new(repo);
    let (checkpoint, source) = resolve_checkpoint(&git, &paths, &state)?;

    let resume_from_milestone_index = match &checkpoint {
        Some(cp) => state.milestone_index.max(cp.milestone_index + 1),
        None => state.milestone_index,
    };

    let plan = ResumePlan {
        run_id: run_id.to_string(),
        checkpoint_sha: checkpoint.as_ref().map(|cp| cp.sha.clone()),
        source,
        resume_from_milestone_index,
        resume_target_phase: Phase::resume_target(state.last_successful_phase),
    };
    Ok((plan, state))
}

/// Full preparation: enforce the dirty-tree policy, journal the source
/// selection, flip the ledger back to in_progress, restore the run
/// branch, and persist the cleared state.
pub fn prepare(
    repo: &std::path::Path,
    run_id: &str,
    opts: ResumeOptions,
) -> Result<(ResumePlan, RunState)> {
    let (plan, mut state) = self::plan(repo, run_id)?;
    let paths = RunrPaths::new(repo.to_path_buf());
    let store = RunStore::open(paths.run_dir(run_id));
    let git = Git::new(repo);

    if git.is_dirty()? {
        if !opts.auto_stash {
            anyhow::bail!(
                "working tree is dirty; commit, stash, or pass --auto-stash to resume {run_id}"
            );
        }
        git.stash_push(&format!("runr resume {run_id}"))?;
    }

    store.journal().append(
        EventType::ResumeCheckpointSelected,
        json!({
            "run_id": run_id,
            "source": plan.source,
            "checkpoint_sha": plan.checkpoint_sha,
            "resume_from_milestone_index": plan.resume_from_milestone_index,
            "resume_target_phase": plan.resume_target_phase,
        }),
    )?;

    if let Some(branch) = &state.branch {
        if git.branch_exists(branch) && git.current_branch()? != *branch {
            git.checkout(branch)?;
        }
    }

    state.milestone_index = plan.resume_from_milestone_index;
    if let Some(sha) = &plan.checkpoint_sha {
        state.last_checkpoint_sha = Some(sha.clone());
    }
    state.prepare_resume(opts.auto);

    let ledger = TaskLedger::new(paths.ledger_file());
    ledger.transition(
        &state.task_path,
        TaskStatus::InProgress,
        TaskUpdate {
            run_id: Some(run_id.to_string()),
            ..Default::default()
        },
    )?;

    store.snapshot_state(&state)?;
    Ok((plan, state))
}

fn resolve_checkpoint(
    git: &Git,
    paths: &RunrPaths,
    state: &RunState,
) -> Result<(Option<CheckpointRef>, CheckpointSource)> {
    // (a) sidecar
    if let Some(sidecar) =
        find_latest_checkpoint_by_sidecar(&paths.checkpoints_dir(), &state.run_id)?
    {
        return Ok((
            Some(CheckpointRef {
                sha: sidecar.sha,
                run_id: sidecar.run_id,
                milestone_index: sidecar.milestone_index,
                commit_time: sidecar.created_at.timestamp(),
            }),
            CheckpointSource::Sidecar,
        ));
    }

    // (b) run-specific git log
    if let (Some(base), Some(branch)) = (&state.base_sha, &state.branch) {
        if git.branch_exists(branch) {
            let range = format!("{base}..{branch}");
            if let Some(best) = pick_latest(git.checkpoints_in_range(&range, &state.run_id)?) {
                return Ok((Some(best), CheckpointSource::RunBranchLog));
            }
        }
    }

    // (c) trailer-matched scan across all refs
    if let Some(best) = pick_latest(git.checkpoints_by_trailer(&state.run_id)?) {
        return Ok((Some(best), CheckpointSource::TrailerLog));
    }

    Ok((None, CheckpointSource::None))
}

fn pick_latest(mut refs: Vec<CheckpointRef>) -> Option<CheckpointRef> {
    refs.sort_by_key(|r| (r.milestone_index, r.commit_time));
    refs.pop()
}
