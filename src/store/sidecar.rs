//! Checkpoint sidecars.
//!
//! Every checkpoint commit is mirrored by `<runs-root>/checkpoints/
//! <sha>.json`, written atomically strictly after the commit exists. The
//! sidecar is the highest-precedence source when resume reconstructs the
//! last verified checkpoint, so reads are defensive: anything that does
//! not satisfy the invariants is skipped, not repaired.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::state::atomic_write_bytes;

pub const SIDECAR_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSidecar {
    pub schema_version: u32,
    pub sha: String,
    pub run_id: String,
    pub milestone_index: usize,
    pub milestone_title: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_commands: Option<Vec<String>>,
}

impl CheckpointSidecar {
    pub fn new(sha: &str, run_id: &str, milestone_index: usize, milestone_title: &str) -> Self {
        Self {
            schema_version: SIDECAR_SCHEMA_VERSION,
            sha: sha.to_string(),
            run_id: run_id.to_string(),
            milestone_index,
            milestone_title: milestone_title.to_string(),
            created_at: Utc::now(),
            tier: None,
            verification_commands: None,
        }
    }

    pub fn with_verification(mut self, tier: &str, commands: Vec<String>) -> Self {
        self.tier = Some(tier.to_string());
        self.verification_commands = Some(commands);
        self
    }

    /// Write to `<dir>/<sha>.json` atomically.
    pub fn write(&self, checkpoints_dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(checkpoints_dir).with_context(|| {
            format!("Failed to create checkpoints dir: {}", checkpoints_dir.display())
        })?;
        let path = checkpoints_dir.join(format!("{}.json", self.sha));
        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize sidecar")?;
        atomic_write_bytes(&path, json.as_bytes())?;
        Ok(path)
    }
}

/// Scan the sidecar directory for this run's latest checkpoint.
///
/// Selection order: highest `milestone_index`, then latest `created_at`,
/// then latest file mtime. Entries are skipped when the filename stem
/// disagrees with the `sha` field, the schema version is foreign, required
/// fields are missing, or the record belongs to another run.
pub fn find_latest_checkpoint_by_sidecar(
    checkpoints_dir: &Path,
    run_id: &str,
) -> Result<Option<CheckpointSidecar>> {
    if !checkpoints_dir.is_dir() {
        return Ok(None);
    }

    let mut best: Option<(CheckpointSidecar, std::time::SystemTime)> = None;

    for entry in std::fs::read_dir(checkpoints_dir)
        .with_context(|| format!("Failed to scan {}", checkpoints_dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }

        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "unreadable sidecar, skipping");
                continue;
            }
        };
        let sidecar: CheckpointSidecar = match serde_json::from_str(&content) {
            Ok(s) => s,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "malformed sidecar, skipping");
                continue;
            }
        };

        if sidecar.schema_version != SIDECAR_SCHEMA_VERSION {
            continue;
        }
        if sidecar.run_id != run_id {
            continue;
        }
        if sidecar.sha.is_empty() {
            continue;
        }
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
        if stem != sidecar.sha {
            tracing::warn!(path = %path.display(), "sidecar filename disagrees with sha, skipping");
            continue;
        }

        let mtime = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(std::time::UNIX_EPOCH);

        let better = match &best {
            None => true,
            Some((current, current_mtime)) => {
                (sidecar.milestone_index, sidecar.created_at, mtime)
                    > (current.milestone_index, current.created_at, *current_mtime)
            }
        };
        if better {
            best = Some((sidecar, mtime));
        }
    }

    Ok(best.map(|(sidecar, _)| sidecar))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const RUN: &str = "20260101120000";

    #[test]
    fn test_write_and_reparse_round_trip() {
        let dir = tempdir().unwrap();
        let sidecar = CheckpointSidecar::new("a1b2c3", RUN, 0, "first milestone")
            .with_verification("tier1", vec!["cargo test".into()]);
        let path = sidecar.write(dir.path()).unwrap();
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), "a1b2c3.json");

        let reread: CheckpointSidecar =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(reread, sidecar);
    }

    #[test]
    fn test_latest_prefers_higher_milestone() {
        let dir = tempdir().unwrap();
        CheckpointSidecar::new("aaa", RUN, 0, "m0").write(dir.path()).unwrap();
        CheckpointSidecar::new("bbb", RUN, 2, "m2").write(dir.path()).unwrap();
        CheckpointSidecar::new("ccc", RUN, 1, "m1").write(dir.path()).unwrap();

        let found = find_latest_checkpoint_by_sidecar(dir.path(), RUN).unwrap().unwrap();
        assert_eq!(found.sha, "bbb");
        assert_eq!(found.milestone_index, 2);
    }

    #[test]
    fn test_latest_breaks_ties_by_created_at() {
        let dir = tempdir().unwrap();
        let mut older = CheckpointSidecar::new("aaa", RUN, 1, "m1");
        older.created_at = "2026-01-01T00:00:00Z".parse().unwrap();
        older.write(dir.path()).unwrap();
        let mut newer = CheckpointSidecar::new("bbb", RUN, 1, "m1 again");
        newer.created_at = "2026-01-02T00:00:00Z".parse().unwrap();
        newer.write(dir.path()).unwrap();

        let found = find_latest_checkpoint_by_sidecar(dir.path(), RUN).unwrap().unwrap();
        assert_eq!(found.sha, "bbb");
    }

    #[test]
    fn test_foreign_run_and_schema_are_skipped() {
        let dir = tempdir().unwrap();
        CheckpointSidecar::new("aaa", "19990101000000", 5, "other run")
            .write(dir.path())
            .unwrap();
        let mut wrong_schema = CheckpointSidecar::new("bbb", RUN, 3, "v2");
        wrong_schema.schema_version = 2;
        wrong_schema.write(dir.path()).unwrap();

        assert!(find_latest_checkpoint_by_sidecar(dir.path(), RUN).unwrap().is_none());
    }

    #[test]
    fn test_filename_sha_mismatch_is_skipped() {
        let dir = tempdir().unwrap();
        let sidecar = CheckpointSidecar::new("real-sha", RUN, 0, "m");
        let json = serde_json::to_string(&sidecar).unwrap();
        std::fs::write(dir.path().join("other-name.json"), json).unwrap();

        assert!(find_latest_checkpoint_by_sidecar(dir.path(), RUN).unwrap().is_none());
    }

    #[test]
    fn test_malformed_sidecar_does_not_poison_scan() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("junk.json"), "not json").unwrap();
        std::fs::write(dir.path().join("partial.json"), r#"{"sha": "x"}"#).unwrap();
        CheckpointSidecar::new("good", RUN, 0, "m").write(dir.path()).unwrap();

        let found = find_latest_checkpoint_by_sidecar(dir.path(), RUN).unwrap().unwrap();
        assert_eq!(found.sha, "good");
    }

    #[test]
    fn test_missing_dir_is_none() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(find_latest_checkpoint_by_sidecar(&missing, RUN).unwrap().is_none());
    }
}
