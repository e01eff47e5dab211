//! Durable run storage.
//!
//! Each run owns one directory under the runs root and is the only
//! writer to it. The module splits by concern:
//!
//! | File         | What it persists                                     |
//! |--------------|------------------------------------------------------|
//! | `journal.rs` | `timeline.jsonl`, the append-only event log          |
//! | `state.rs`   | `state.json`, the atomically-rewritten snapshot      |
//! | `sidecar.rs` | `checkpoints/<sha>.json` checkpoint mirrors          |
//! | `ledger.rs`  | `task-status.json`, the per-repo task status ledger  |
//!
//! The journal and ledger take filesystem locks because the orchestrator
//! may run several supervisors against one repo; everything else is
//! single-writer by the run-directory ownership rule.

pub mod journal;
pub mod ledger;
pub mod sidecar;
pub mod state;

pub use journal::{EventRecord, EventType, Journal};
pub use ledger::{TaskLedger, TaskStatus, TaskStatusEntry, TaskUpdate};
pub use sidecar::{find_latest_checkpoint_by_sidecar, CheckpointSidecar};
pub use state::{atomic_write_bytes, atomic_write_json, read_json};

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Handle on one run directory.
#[derive(Debug, Clone)]
pub struct RunStore {
    run_dir: PathBuf,
}

impl RunStore {
    /// Open a handle without touching the filesystem.
    pub fn open(run_dir: PathBuf) -> Self {
        Self { run_dir }
    }

    /// Create the run directory skeleton. Run directories are never
    /// reused: an existing directory for this id is an error.
    pub fn create(run_dir: PathBuf) -> Result<Self> {
        if run_dir.exists() {
            anyhow::bail!("run directory already exists: {}", run_dir.display());
        }
        for sub in ["artifacts", "handoffs", "interventions"] {
            std::fs::create_dir_all(run_dir.join(sub))
                .with_context(|| format!("Failed to create {}/{}", run_dir.display(), sub))?;
        }
        Ok(Self { run_dir })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn state_file(&self) -> PathBuf {
        self.run_dir.join("state.json")
    }

    pub fn timeline_file(&self) -> PathBuf {
        self.run_dir.join("timeline.jsonl")
    }

    pub fn config_snapshot_file(&self) -> PathBuf {
        self.run_dir.join("config.snapshot.json")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.run_dir.join("artifacts")
    }

    pub fn handoffs_dir(&self) -> PathBuf {
        self.run_dir.join("handoffs")
    }

    pub fn interventions_dir(&self) -> PathBuf {
        self.run_dir.join("interventions")
    }

    pub fn journal(&self) -> Journal {
        Journal::new(self.timeline_file())
    }

    /// Write the state snapshot atomically.
    pub fn snapshot_state<T: serde::Serialize>(&self, state: &T) -> Result<()> {
        atomic_write_json(&self.state_file(), state)
    }

    /// Best-effort state read: missing file is `None`, a corrupt file is
    /// an error the caller must treat as fatal for this run id.
    pub fn read_state<T: serde::de::DeserializeOwned>(&self) -> Result<Option<T>> {
        read_json(&self.state_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::tempdir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Probe {
        n: u32,
    }

    #[test]
    fn test_create_builds_skeleton() {
        let dir = tempdir().unwrap();
        let store = RunStore::create(dir.path().join("20260101120000")).unwrap();
        assert!(store.artifacts_dir().is_dir());
        assert!(store.handoffs_dir().is_dir());
        assert!(store.interventions_dir().is_dir());
    }

    #[test]
    fn test_create_refuses_existing_dir() {
        let dir = tempdir().unwrap();
        let run_dir = dir.path().join("20260101120000");
        RunStore::create(run_dir.clone()).unwrap();
        assert!(RunStore::create(run_dir).is_err());
    }

    #[test]
    fn test_state_round_trip() {
        let dir = tempdir().unwrap();
        let store = RunStore::create(dir.path().join("r")).unwrap();
        assert_eq!(store.read_state::<Probe>().unwrap(), None);
        store.snapshot_state(&Probe { n: 7 }).unwrap();
        assert_eq!(store.read_state::<Probe>().unwrap(), Some(Probe { n: 7 }));
    }

    #[test]
    fn test_corrupt_state_is_an_error() {
        let dir = tempdir().unwrap();
        let store = RunStore::create(dir.path().join("r")).unwrap();
        std::fs::write(store.state_file(), "{ truncated").unwrap();
        assert!(store.read_state::<Probe>().is_err());
    }
}
