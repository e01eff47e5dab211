//! Checkpoint commit creation and recognition.
//!
//! Subject: `chore(runr): checkpoint <run_id> milestone <index>`
//! Trailers: `Runr-Checkpoint: true`, `Runr-Run-Id: <run_id>`, optional
//! `Runr-Reason`.

use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

use crate::config::WorkflowMode;

use super::{Git, GitError, Result};

pub const CHECKPOINT_TRAILER_KEY: &str = "Runr-Checkpoint";
pub const RUN_ID_TRAILER_KEY: &str = "Runr-Run-Id";
pub const INTERVENTION_TRAILER_KEY: &str = "Runr-Intervention";

/// Canonical checkpoint subject.
pub fn checkpoint_subject(run_id: &str, milestone_index: usize) -> String {
    format!("chore(runr): checkpoint {run_id} milestone {milestone_index}")
}

fn subject_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^chore\(runr\): checkpoint (\d{14}) milestone (\d+)$")
            .expect("checkpoint subject regex is valid")
    })
}

/// Parse a subject into `(run_id, milestone_index)` when it is canonical.
pub fn parse_checkpoint_subject(subject: &str) -> Option<(String, usize)> {
    let caps = subject_regex().captures(subject.trim())?;
    let run_id = caps.get(1)?.as_str().to_string();
    let index = caps.get(2)?.as_str().parse().ok()?;
    Some((run_id, index))
}

/// Does a full commit message look like a checkpoint (subject or trailer)?
pub fn is_checkpoint_message(message: &str) -> bool {
    let subject = message.lines().next().unwrap_or("");
    if parse_checkpoint_subject(subject).is_some() {
        return true;
    }
    message
        .lines()
        .any(|line| line.trim() == format!("{CHECKPOINT_TRAILER_KEY}: true"))
}

/// Extract a `Runr-Run-Id` trailer value from a commit message.
pub fn run_id_trailer(message: &str) -> Option<String> {
    message.lines().rev().find_map(|line| {
        line.trim()
            .strip_prefix(&format!("{RUN_ID_TRAILER_KEY}:"))
            .map(|v| v.trim().to_string())
    })
}

/// A checkpoint commit located in history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRef {
    pub sha: String,
    pub run_id: String,
    pub milestone_index: usize,
    pub commit_time: i64,
}

impl Git {
    /// Stage exactly `files` and create the checkpoint commit. Refuses to
    /// create empty commits: if staging produces no diff the adapter
    /// returns [`GitError::NothingToCommit`].
    pub fn checkpoint_commit(
        &self,
        run_id: &str,
        milestone_index: usize,
        title: &str,
        files: &[String],
    ) -> Result<String> {
        if files.is_empty() {
            return Err(GitError::NothingToCommit);
        }
        let mut add_args: Vec<&str> = vec!["add", "--"];
        add_args.extend(files.iter().map(String::as_str));
        self.run(add_args)?;

        // Exit 0 means no staged changes.
        if self.run(["diff", "--cached", "--quiet"]).is_ok() {
            return Err(GitError::NothingToCommit);
        }

        let subject = checkpoint_subject(run_id, milestone_index);
        let trailers = format!(
            "{CHECKPOINT_TRAILER_KEY}: true\n{RUN_ID_TRAILER_KEY}: {run_id}"
        );
        self.run(["commit", "-q", "-m", subject.as_str(), "-m", title, "-m", trailers.as_str()])?;
        self.head_sha()
    }

    /// Checkpoint commits for `run_id` in `range` (e.g. `base..branch`),
    /// matched by canonical subject. Newest first.
    pub fn checkpoints_in_range(&self, range: &str, run_id: &str) -> Result<Vec<CheckpointRef>> {
        Ok(self
            .log_subjects(range)?
            .into_iter()
            .filter_map(|line| {
                let (rid, index) = parse_checkpoint_subject(&line.subject)?;
                (rid == run_id).then_some(CheckpointRef {
                    sha: line.sha,
                    run_id: rid,
                    milestone_index: index,
                    commit_time: line.commit_time,
                })
            })
            .collect())
    }

    /// Checkpoint commits for `run_id` anywhere in history, preferring
    /// trailer confirmation: subject-matched candidates are kept only if
    /// they carry no contradicting `Runr-Run-Id` trailer.
    pub fn checkpoints_by_trailer(&self, run_id: &str) -> Result<Vec<CheckpointRef>> {
        let mut found = Vec::new();
        for line in self.log_subjects_all()? {
            let Some((rid, index)) = parse_checkpoint_subject(&line.subject) else {
                continue;
            };
            if rid != run_id {
                continue;
            }
            let message = self.commit_message(&line.sha)?;
            if let Some(trailer_rid) = run_id_trailer(&message) {
                if trailer_rid != run_id {
                    continue;
                }
            }
            found.push(CheckpointRef {
                sha: line.sha,
                run_id: rid,
                milestone_index: index,
                commit_time: line.commit_time,
            });
        }
        Ok(found)
    }

    /// Refuse to amend when HEAD is a checkpoint. Detection looks at the
    /// subject, the trailer, or a sidecar file matching the sha. Flow
    /// mode yields to `force`; ledger mode additionally requires
    /// `override_ledger`.
    pub fn amend_guard(
        &self,
        checkpoints_dir: &Path,
        mode: WorkflowMode,
        force: bool,
        override_ledger: bool,
    ) -> Result<()> {
        let head = self.head_sha()?;
        let message = self.commit_message(&head)?;

        let is_checkpoint = is_checkpoint_message(&message)
            || checkpoints_dir.join(format!("{head}.json")).is_file();

        if !is_checkpoint {
            return Ok(());
        }
        match mode {
            WorkflowMode::Flow => {
                if force {
                    Ok(())
                } else {
                    Err(GitError::AmendBlocked)
                }
            }
            WorkflowMode::Ledger => {
                if force && override_ledger {
                    Ok(())
                } else {
                    Err(GitError::AmendBlockedLedger)
                }
            }
        }
    }
}
