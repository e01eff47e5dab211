//! The append-only event journal (`timeline.jsonl`).
//!
//! One JSON object per line, flushed per event, never rewritten. Writers
//! take an exclusive advisory lock for the duration of a single append so
//! concurrent processes cannot interleave partial lines.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

/// Canonical event types. The wire name is the snake_case string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RunStarted,
    PhaseStart,
    MilestonesPlanned,
    WorkerCallStarted,
    WorkerCallCompleted,
    WorkerRetry,
    Verification,
    VerificationRetry,
    ScopeViolation,
    ReviewDecision,
    MilestoneCompleted,
    CheckpointCreated,
    ResumeCheckpointSelected,
    SubmitConflict,
    RunSubmitted,
    InterventionRecorded,
    Stop,
    StopReasonClassified,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RunStarted => "run_started",
            Self::PhaseStart => "phase_start",
            Self::MilestonesPlanned => "milestones_planned",
            Self::WorkerCallStarted => "worker_call_started",
            Self::WorkerCallCompleted => "worker_call_completed",
            Self::WorkerRetry => "worker_retry",
            Self::Verification => "verification",
            Self::VerificationRetry => "verification_retry",
            Self::ScopeViolation => "scope_violation",
            Self::ReviewDecision => "review_decision",
            Self::MilestoneCompleted => "milestone_completed",
            Self::CheckpointCreated => "checkpoint_created",
            Self::ResumeCheckpointSelected => "resume_checkpoint_selected",
            Self::SubmitConflict => "submit_conflict",
            Self::RunSubmitted => "run_submitted",
            Self::InterventionRecorded => "intervention_recorded",
            Self::Stop => "stop",
            Self::StopReasonClassified => "stop_reason_classified",
        }
    }
}

/// One journal line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

/// Appender/reader for one `timeline.jsonl`.
#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Append one event. Exclusive append: lock, write one line, flush,
    /// sync, unlock (on close).
    pub fn append(&self, event_type: EventType, payload: Value) -> Result<()> {
        let record = EventRecord {
            event_type: event_type.as_str().to_string(),
            timestamp: Utc::now(),
            payload,
        };
        let mut line = serde_json::to_string(&record).context("Failed to serialize event")?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open journal: {}", self.path.display()))?;
        file.lock_exclusive()
            .context("Failed to lock journal for append")?;
        let outcome = file
            .write_all(line.as_bytes())
            .and_then(|()| file.flush())
            .and_then(|()| file.sync_data())
            .context("Failed to append event");
        let _ = fs2::FileExt::unlock(&file);
        outcome
    }

    /// Read every well-formed event. A torn final line (crash mid-append)
    /// is skipped rather than failing the whole read.
    pub fn read_all(&self) -> Result<Vec<EventRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read journal: {}", self.path.display()))?;
        let mut events = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<EventRecord>(line) {
                Ok(event) => events.push(event),
                Err(err) => {
                    tracing::warn!(error = %err, "skipping malformed journal line");
                }
            }
        }
        Ok(events)
    }

    /// Events of one type, in append order.
    pub fn read_of_type(&self, event_type: EventType) -> Result<Vec<EventRecord>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|e| e.event_type == event_type.as_str())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_append_and_read_back() {
        let dir = tempdir().unwrap();
        let journal = Journal::new(dir.path().join("timeline.jsonl"));

        journal
            .append(EventType::RunStarted, json!({"run_id": "20260101120000"}))
            .unwrap();
        journal
            .append(EventType::PhaseStart, json!({"phase": "plan"}))
            .unwrap();

        let events = journal.read_all().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "run_started");
        assert_eq!(events[0].payload["run_id"], "20260101120000");
        assert_eq!(events[1].event_type, "phase_start");
        assert!(events[0].timestamp <= events[1].timestamp);
    }

    #[test]
    fn test_read_missing_journal_is_empty() {
        let dir = tempdir().unwrap();
        let journal = Journal::new(dir.path().join("none.jsonl"));
        assert!(journal.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_torn_final_line_is_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("timeline.jsonl");
        let journal = Journal::new(path.clone());
        journal.append(EventType::Stop, json!({"reason": "complete"})).unwrap();
        // Simulate a crash mid-append.
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{\"type\": \"stop\", \"time");
        std::fs::write(&path, content).unwrap();

        let events = journal.read_all().unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_read_of_type_filters() {
        let dir = tempdir().unwrap();
        let journal = Journal::new(dir.path().join("timeline.jsonl"));
        journal.append(EventType::PhaseStart, json!({"phase": "plan"})).unwrap();
        journal
            .append(EventType::CheckpointCreated, json!({"sha": "abc"}))
            .unwrap();
        journal.append(EventType::PhaseStart, json!({"phase": "implement"})).unwrap();

        let phases = journal.read_of_type(EventType::PhaseStart).unwrap();
        assert_eq!(phases.len(), 2);
        let checkpoints = journal.read_of_type(EventType::CheckpointCreated).unwrap();
        assert_eq!(checkpoints.len(), 1);
        assert_eq!(checkpoints[0].payload["sha"], "abc");
    }

    #[test]
    fn test_one_line_per_event() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("timeline.jsonl");
        let journal = Journal::new(path.clone());
        for i in 0..5 {
            journal.append(EventType::Verification, json!({"tier": i})).unwrap();
        }
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 5);
        assert!(content.ends_with('\n'));
    }
}
