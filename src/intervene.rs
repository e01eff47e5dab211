//! Intervention receipts.
//!
//! When a human fixes something by hand mid-run, the audit trail must
//! not break: the commands they ran, the commits they produced, and the
//! resulting tree delta are captured as a structured receipt under
//! `<run>/interventions/`, optionally committed with `Runr-Intervention`
//! trailers.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::{RunrPaths, WorkflowMode};
use crate::gitx::{Git, INTERVENTION_TRAILER_KEY, RUN_ID_TRAILER_KEY};
use crate::store::{atomic_write_bytes, EventType, RunStore};
use crate::util::slugify;

/// Outputs larger than either bound spill to a file instead of the
/// receipt.
const SPILL_BYTES: usize = 10 * 1024;
const SPILL_LINES: usize = 50;

#[derive(Debug, Clone, Default)]
pub struct InterventionRequest {
    pub run_id: String,
    pub reason: String,
    pub note: String,
    pub commands: Vec<String>,
    /// Explicit base for the commit range; must be an ancestor of HEAD.
    pub since_sha: Option<String>,
    /// Commit the working tree with this message plus trailers.
    pub commit_message: Option<String>,
    /// Amend the last commit instead (guarded).
    pub amend_last: bool,
    pub force: bool,
    pub override_ledger: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRecord {
    pub command: String,
    pub exit_code: i32,
    pub duration_ms: u64,
    pub stdout_lines: usize,
    pub stderr_lines: usize,
    /// Set when the output was spilled to `cmd-N-output.txt`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
    /// Inline output, present only when small enough.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterventionReceipt {
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    pub reason: String,
    pub note: String,
    pub base_sha: String,
    pub head_sha: String,
    pub branch: String,
    pub dirty_before: bool,
    pub dirty_after: bool,
    pub commits_in_range: Vec<CommitLine>,
    pub commands: Vec<CommandRecord>,
    pub files_changed: Vec<String>,
    pub diffstat: String,
    pub lines_added: u64,
    pub lines_deleted: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitLine {
    pub sha: String,
    pub subject: String,
}

/// The paste-ready trailer block for users who commit by hand.
pub fn trailer_block(run_id: &str, reason: &str) -> String {
    format!(
        "{INTERVENTION_TRAILER_KEY}: true\n{RUN_ID_TRAILER_KEY}: {run_id}\nRunr-Reason: {reason}"
    )
}

/// Record an intervention end to end. Returns the receipt and its path.
pub fn record_intervention(
    repo: &Path,
    request: &InterventionRequest,
    mode: WorkflowMode,
) -> Result<(InterventionReceipt, PathBuf)> {
    let git = Git::new(repo);
    let paths = RunrPaths::new(repo.to_path_buf());
    let store = RunStore::open(paths.run_dir(&request.run_id));
    if !store.run_dir().is_dir() {
        anyhow::bail!("unknown run id '{}'", request.run_id);
    }

    let head = git.head_sha()?;
    let base_sha = match &request.since_sha {
        Some(since) => {
            let resolved = git
                .rev_parse(since)
                .with_context(|| format!("sinceSha '{since}' does not resolve"))?;
            if !git.is_ancestor(&resolved, &head)? {
                anyhow::bail!("sinceSha {resolved} is not an ancestor of HEAD");
            }
            resolved
        }
        None => head.clone(),
    };

    let branch = git.current_branch()?;
    let dirty_before = git.is_dirty()?;

    let slug = format!(
        "{}-{}",
        Utc::now().format("%Y%m%d%H%M%S"),
        slugify(&request.reason)
    );
    let spill_dir = store.interventions_dir().join(&slug);

    let mut commands = Vec::with_capacity(request.commands.len());
    for (i, command) in request.commands.iter().enumerate() {
        commands.push(run_recorded_command(repo, &spill_dir, i, command)?);
    }

    // Optional commit or amend, after the commands have run.
    if let Some(message) = &request.commit_message {
        git.run(["add", "-A"])?;
        let trailers = trailer_block(&request.run_id, &request.reason);
        git.run(["commit", "-q", "-m", message.as_str(), "-m", trailers.as_str()])?;
    } else if request.amend_last {
        git.amend_guard(
            &paths.checkpoints_dir(),
            mode,
            request.force,
            request.override_ledger,
        )?;
        if is_pushed(&git)? {
            anyhow::bail!("refusing to amend: the last commit has been pushed");
        }
        git.run(["add", "-A"])?;
        git.run(["commit", "-q", "--amend", "--no-edit"])?;
    }

    let head_sha = git.head_sha()?;
    let dirty_after = git.is_dirty()?;
    let commits_in_range = git
        .commits_in_range(&base_sha, &head_sha)?
        .into_iter()
        .map(|(sha, subject)| CommitLine { sha, subject })
        .collect();
    let files_changed = git.files_changed_between(&base_sha, &head_sha)?;
    let (diffstat, lines_added, lines_deleted) = git.diffstat(&base_sha, &head_sha)?;

    let receipt = InterventionReceipt {
        version: "1".to_string(),
        timestamp: Utc::now(),
        run_id: request.run_id.clone(),
        reason: request.reason.clone(),
        note: request.note.clone(),
        base_sha,
        head_sha,
        branch,
        dirty_before,
        dirty_after,
        commits_in_range,
        commands,
        files_changed,
        diffstat,
        lines_added,
        lines_deleted,
    };

    let receipt_path = store.interventions_dir().join(format!("{slug}.json"));
    let json = serde_json::to_string_pretty(&receipt).context("Failed to serialize receipt")?;
    atomic_write_bytes(&receipt_path, json.as_bytes())?;

    store.journal().append(
        EventType::InterventionRecorded,
        json!({
            "run_id": receipt.run_id,
            "reason": receipt.reason,
            "receipt": receipt_path.display().to_string(),
            "commands": receipt.commands.len(),
            "commits": receipt.commits_in_range.len(),
        }),
    )?;

    Ok((receipt, receipt_path))
}

fn run_recorded_command(
    repo: &Path,
    spill_dir: &Path,
    index: usize,
    command: &str,
) -> Result<CommandRecord> {
    let started = Instant::now();
    let output = std::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(repo)
        .output()
        .with_context(|| format!("Failed to run intervention command: {command}"))?;
    let duration_ms = started.elapsed().as_millis() as u64;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let combined = format!("{stdout}{stderr}");
    let total_lines = combined.lines().count();

    let (output_inline, output_file) =
        if combined.len() > SPILL_BYTES || total_lines > SPILL_LINES {
            std::fs::create_dir_all(spill_dir)?;
            let file = spill_dir.join(format!("cmd-{index}-output.txt"));
            std::fs::write(&file, combined.as_bytes())?;
            (None, Some(file.display().to_string()))
        } else if combined.is_empty() {
            (None, None)
        } else {
            (Some(combined.to_string()), None)
        };

    Ok(CommandRecord {
        command: command.to_string(),
        exit_code: output.status.code().unwrap_or(-1),
        duration_ms,
        stdout_lines: stdout.lines().count(),
        stderr_lines: stderr.lines().count(),
        output_file,
        output: output_inline,
    })
}

/// Is HEAD already on its upstream? No upstream means not pushed.
fn is_pushed(git: &Git) -> Result<bool> {
    let upstream = match git.run(["rev-parse", "--abbrev-ref", "@{upstream}"]) {
        Ok(name) => name,
        Err(_) => return Ok(false),
    };
    let head = git.head_sha()?;
    Ok(git.is_ancestor(&head, &upstream)?)
}
