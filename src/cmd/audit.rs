//! `runr audit --range <gitrev>`
//!
//! Classifies every commit in a revision range as a checkpoint, an
//! intervention, or unattributed work, and cross-checks checkpoint
//! commits against their sidecars.

use anyhow::Result;
use console::style;
use serde::Serialize;
use std::path::Path;

use crate::config::RunrPaths;
use crate::gitx::checkpoint::{
    is_checkpoint_message, parse_checkpoint_subject, run_id_trailer, INTERVENTION_TRAILER_KEY,
};
use crate::gitx::Git;
use crate::store::CheckpointSidecar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitClass {
    Checkpoint,
    Intervention,
    Unattributed,
}

#[derive(Debug, Serialize)]
pub struct AuditedCommit {
    pub sha: String,
    pub subject: String,
    pub class: CommitClass,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Checkpoint-only: does a sidecar exist and agree with the commit?
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sidecar_ok: Option<bool>,
}

#[derive(Debug, Default, Serialize)]
pub struct AuditSummary {
    pub commits: Vec<AuditedCommit>,
    pub checkpoints: usize,
    pub interventions: usize,
    pub unattributed: usize,
    pub sidecar_mismatches: usize,
}

pub fn audit_range(repo: &Path, range: &str) -> Result<AuditSummary> {
    let git = Git::new(repo);
    let paths = RunrPaths::new(repo.to_path_buf());
    let mut summary = AuditSummary::default();

    for line in git.log_subjects(range)? {
        let message = git.commit_message(&line.sha)?;
        let run_id = run_id_trailer(&message);

        let (class, sidecar_ok) = if is_checkpoint_message(&message) {
            (CommitClass::Checkpoint, Some(sidecar_agrees(&paths, &line.sha, &message)))
        } else if message
            .lines()
            .any(|l| l.trim() == format!("{INTERVENTION_TRAILER_KEY}: true"))
        {
            (CommitClass::Intervention, None)
        } else {
            (CommitClass::Unattributed, None)
        };

        match class {
            CommitClass::Checkpoint => {
                summary.checkpoints += 1;
                if sidecar_ok == Some(false) {
                    summary.sidecar_mismatches += 1;
                }
            }
            CommitClass::Intervention => summary.interventions += 1,
            CommitClass::Unattributed => summary.unattributed += 1,
        }

        summary.commits.push(AuditedCommit {
            sha: line.sha,
            subject: line.subject,
            class,
            run_id,
            sidecar_ok,
        });
    }
    Ok(summary)
}

/// A checkpoint's sidecar must exist and agree on sha, run id, and
/// milestone index.
fn sidecar_agrees(paths: &RunrPaths, sha: &str, message: &str) -> bool {
    let path = paths.checkpoints_dir().join(format!("{sha}.json"));
    let Ok(content) = std::fs::read_to_string(&path) else {
        return false;
    };
    let Ok(sidecar) = serde_json::from_str::<CheckpointSidecar>(&content) else {
        return false;
    };
    if sidecar.sha != sha {
        return false;
    }
    let subject = message.lines().next().unwrap_or("");
    match parse_checkpoint_subject(subject) {
        Some((run_id, index)) => sidecar.run_id == run_id && sidecar.milestone_index == index,
        // Trailer-only checkpoints: the sidecar existing for this sha is
        // the agreement.
        None => true,
    }
}

pub fn cmd_audit(repo: &Path, range: &str) -> Result<()> {
    let summary = audit_range(repo, range)?;

    for commit in &summary.commits {
        let label = match commit.class {
            CommitClass::Checkpoint => {
                if commit.sidecar_ok == Some(true) {
                    style("checkpoint ").green()
                } else {
                    style("checkpoint!").red()
                }
            }
            CommitClass::Intervention => style("intervene  ").yellow(),
            CommitClass::Unattributed => style("unattrib   ").dim(),
        };
        println!("{} {} {}", label, &commit.sha[..12.min(commit.sha.len())], commit.subject);
    }

    println!(
        "\n{} checkpoints ({} sidecar mismatches), {} interventions, {} unattributed",
        summary.checkpoints, summary.sidecar_mismatches, summary.interventions, summary.unattributed
    );
    if summary.sidecar_mismatches > 0 {
        anyhow::bail!("audit found checkpoint commits without agreeing sidecars");
    }
    Ok(())
}
