//! The task status ledger (`task-status.json`).
//!
//! One JSON file per repo mapping task path to its latest status. The
//! orchestrator gates `depends_on` against it, and `resume` flips
//! stopped tasks back to in_progress. All mutation goes through a single
//! read-modify-write path guarded by an advisory lock on a sibling
//! `.lock` file (the ledger itself is replaced by rename, so the lock
//! must live on a stable inode).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::stop::StopReason;

use super::state::atomic_write_bytes;

pub const LEDGER_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Stopped,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Legal transitions. `Completed` is terminal until the task file
    /// changes, which callers express by passing `task_changed = true`.
    fn can_transition(self, next: TaskStatus, task_changed: bool) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Pending, InProgress) => true,
            (InProgress, Stopped) | (InProgress, Completed) | (InProgress, Failed) => true,
            (Stopped, InProgress) => true,
            (Failed, InProgress) => true,
            (Completed, InProgress) => task_changed,
            (a, b) if a == b => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusEntry {
    pub status: TaskStatus,
    pub first_seen_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checkpoint_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_stop_reason: Option<StopReason>,
    /// Content hash of the task file at last update; a different hash
    /// reopens a completed task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LedgerFile {
    schema_version: u32,
    tasks: BTreeMap<String, TaskStatusEntry>,
}

impl Default for LedgerFile {
    fn default() -> Self {
        Self {
            schema_version: LEDGER_SCHEMA_VERSION,
            tasks: BTreeMap::new(),
        }
    }
}

/// Mutation applied inside one locked read-modify-write cycle.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub run_id: Option<String>,
    pub checkpoint_sha: Option<String>,
    pub error_summary: Option<String>,
    pub stop_reason: Option<StopReason>,
    pub task_hash: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TaskLedger {
    path: PathBuf,
}

impl TaskLedger {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current status for a task path, if the ledger knows it.
    pub fn status_of(&self, task_path: &str) -> Result<Option<TaskStatusEntry>> {
        let file = self.load()?;
        Ok(file.tasks.get(task_path).cloned())
    }

    /// All entries, for reports and the orchestrator snapshot.
    pub fn entries(&self) -> Result<BTreeMap<String, TaskStatusEntry>> {
        Ok(self.load()?.tasks)
    }

    /// Transition a task, enforcing the lifecycle rules. The whole cycle
    /// holds the ledger lock so concurrent supervisors serialize here.
    pub fn transition(
        &self,
        task_path: &str,
        next: TaskStatus,
        update: TaskUpdate,
    ) -> Result<TaskStatusEntry> {
        let _lock = LedgerLock::acquire(&self.path)?;

        let mut file = self.load()?;
        let now = Utc::now();

        let entry = file.tasks.entry(task_path.to_string()).or_insert_with(|| {
            TaskStatusEntry {
                status: TaskStatus::Pending,
                first_seen_at: now,
                last_updated_at: now,
                last_run_id: None,
                last_checkpoint_sha: None,
                last_error_summary: None,
                last_stop_reason: None,
                task_hash: None,
            }
        });

        let task_changed = match (&update.task_hash, &entry.task_hash) {
            (Some(new), Some(old)) => new != old,
            (Some(_), None) => true,
            _ => false,
        };

        if !entry.status.can_transition(next, task_changed) {
            anyhow::bail!(
                "illegal task transition {:?} -> {:?} for {}",
                entry.status,
                next,
                task_path
            );
        }

        entry.status = next;
        entry.last_updated_at = now;
        if let Some(run_id) = update.run_id {
            entry.last_run_id = Some(run_id);
        }
        if let Some(sha) = update.checkpoint_sha {
            entry.last_checkpoint_sha = Some(sha);
        }
        if let Some(summary) = update.error_summary {
            entry.last_error_summary = Some(summary);
        }
        if let Some(reason) = update.stop_reason {
            entry.last_stop_reason = Some(reason);
        }
        if let Some(hash) = update.task_hash {
            entry.task_hash = Some(hash);
        }

        let snapshot = entry.clone();
        self.save(&file)?;
        Ok(snapshot)
    }

    /// True iff the ledger records the dependency as completed.
    pub fn is_completed(&self, task_path: &str) -> Result<bool> {
        Ok(matches!(
            self.status_of(task_path)?.map(|e| e.status),
            Some(TaskStatus::Completed)
        ))
    }

    fn load(&self) -> Result<LedgerFile> {
        if !self.path.exists() {
            return Ok(LedgerFile::default());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read ledger: {}", self.path.display()))?;
        let file: LedgerFile = serde_json::from_str(&content)
            .with_context(|| format!("Corrupt task ledger: {}", self.path.display()))?;
        if file.schema_version != LEDGER_SCHEMA_VERSION {
            anyhow::bail!(
                "unsupported ledger schema_version {} in {}",
                file.schema_version,
                self.path.display()
            );
        }
        Ok(file)
    }

    fn save(&self, file: &LedgerFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(file).context("Failed to serialize ledger")?;
        atomic_write_bytes(&self.path, json.as_bytes())
    }
}

/// Advisory lock held for one ledger mutation.
struct LedgerLock {
    file: std::fs::File,
}

impl LedgerLock {
    fn acquire(ledger_path: &Path) -> Result<Self> {
        let lock_path = ledger_path.with_extension("json.lock");
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("Failed to open ledger lock: {}", lock_path.display()))?;
        file.lock_exclusive().context("Failed to lock task ledger")?;
        Ok(Self { file })
    }
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ledger() -> (TaskLedger, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        (TaskLedger::new(dir.path().join("task-status.json")), dir)
    }

    #[test]
    fn test_unknown_task_starts_pending_then_runs() {
        let (ledger, _dir) = ledger();
        let entry = ledger
            .transition(
                "tasks/a.md",
                TaskStatus::InProgress,
                TaskUpdate {
                    run_id: Some("20260101120000".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(entry.status, TaskStatus::InProgress);
        assert_eq!(entry.last_run_id.as_deref(), Some("20260101120000"));
    }

    #[test]
    fn test_full_lifecycle() {
        let (ledger, _dir) = ledger();
        ledger
            .transition("tasks/a.md", TaskStatus::InProgress, TaskUpdate::default())
            .unwrap();
        ledger
            .transition(
                "tasks/a.md",
                TaskStatus::Stopped,
                TaskUpdate {
                    stop_reason: Some(StopReason::StalledTimeout),
                    ..Default::default()
                },
            )
            .unwrap();
        // stopped -> in_progress on resume
        ledger
            .transition("tasks/a.md", TaskStatus::InProgress, TaskUpdate::default())
            .unwrap();
        let entry = ledger
            .transition("tasks/a.md", TaskStatus::Completed, TaskUpdate::default())
            .unwrap();
        assert_eq!(entry.status, TaskStatus::Completed);
        assert_eq!(entry.last_stop_reason, Some(StopReason::StalledTimeout));
    }

    #[test]
    fn test_completed_is_terminal_until_task_changes() {
        let (ledger, _dir) = ledger();
        ledger
            .transition(
                "tasks/a.md",
                TaskStatus::InProgress,
                TaskUpdate {
                    task_hash: Some("hash-v1".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        ledger
            .transition("tasks/a.md", TaskStatus::Completed, TaskUpdate::default())
            .unwrap();

        // Same hash: refuse to reopen.
        let err = ledger.transition(
            "tasks/a.md",
            TaskStatus::InProgress,
            TaskUpdate {
                task_hash: Some("hash-v1".into()),
                ..Default::default()
            },
        );
        assert!(err.is_err());

        // New hash: the task file changed, reopening is legal.
        let entry = ledger
            .transition(
                "tasks/a.md",
                TaskStatus::InProgress,
                TaskUpdate {
                    task_hash: Some("hash-v2".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(entry.status, TaskStatus::InProgress);
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let (ledger, _dir) = ledger();
        // pending -> completed skips in_progress
        assert!(ledger
            .transition("tasks/a.md", TaskStatus::Completed, TaskUpdate::default())
            .is_err());
        // pending -> stopped
        assert!(ledger
            .transition("tasks/a.md", TaskStatus::Stopped, TaskUpdate::default())
            .is_err());
    }

    #[test]
    fn test_is_completed_gate() {
        let (ledger, _dir) = ledger();
        assert!(!ledger.is_completed("tasks/dep.md").unwrap());
        ledger
            .transition("tasks/dep.md", TaskStatus::InProgress, TaskUpdate::default())
            .unwrap();
        assert!(!ledger.is_completed("tasks/dep.md").unwrap());
        ledger
            .transition("tasks/dep.md", TaskStatus::Completed, TaskUpdate::default())
            .unwrap();
        assert!(ledger.is_completed("tasks/dep.md").unwrap());
    }

    #[test]
    fn test_ledger_survives_reload() {
        let (ledger, _dir) = ledger();
        ledger
            .transition("tasks/a.md", TaskStatus::InProgress, TaskUpdate::default())
            .unwrap();
        let reopened = TaskLedger::new(ledger.path().to_path_buf());
        let entry = reopened.status_of("tasks/a.md").unwrap().unwrap();
        assert_eq!(entry.status, TaskStatus::InProgress);
    }

    #[test]
    fn test_corrupt_ledger_is_an_error() {
        let (ledger, dir) = ledger();
        std::fs::write(dir.path().join("task-status.json"), "{ nope").unwrap();
        assert!(ledger.entries().is_err());
    }
}
