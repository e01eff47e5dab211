//! The run's durable state record.
//!
//! One structured record, snapshotted to `state.json` after every
//! mutation. No back-references, no hidden caches: resume rebuilds the
//! supervisor from this plus the journal and the sidecars.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::scope::ScopeLock;
use crate::stop::StopReason;

use super::phase::Phase;

pub const STATE_SCHEMA_VERSION: u32 = 1;

/// Milestone risk, set by the planner and immutable afterward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl FromStr for RiskLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => anyhow::bail!("unknown risk level '{other}'"),
        }
    }
}

/// One planned unit of work: goal text, done-checks, risk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub title: String,
    #[serde(default)]
    pub done_checks: Vec<String>,
    #[serde(default)]
    pub risk: RiskLevel,
}

/// The full per-run state snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub schema_version: u32,
    /// UTC timestamp to the second, `YYYYMMDDHHMMSS`.
    pub run_id: String,
    pub repo: String,
    pub task_path: String,
    /// The run branch (`runr/<run_id>`), once created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// HEAD at run start; the run's commits live in `base_sha..branch`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_sha: Option<String>,
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_successful_phase: Option<Phase>,
    /// 0-based; monotonically non-decreasing within one run.
    pub milestone_index: usize,
    pub milestones: Vec<Milestone>,
    pub scope: ScopeLock,
    /// Worker-call retries consumed in the current phase.
    pub phase_retries: u32,
    /// Consecutive verification failures for the current milestone.
    pub verify_failures: u32,
    /// Consecutive reviewer rejections for the current milestone.
    pub review_rejections: u32,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub phase_started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checkpoint_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub auto_resume_count: u32,
}

impl RunState {
    pub fn new(run_id: &str, repo: &str, task_path: &str, scope: ScopeLock) -> Self {
        let now = Utc::now();
        Self {
            schema_version: STATE_SCHEMA_VERSION,
            run_id: run_id.to_string(),
            repo: repo.to_string(),
            task_path: task_path.to_string(),
            branch: None,
            base_sha: None,
            phase: Phase::Init,
            last_successful_phase: None,
            milestone_index: 0,
            milestones: Vec::new(),
            scope,
            phase_retries: 0,
            verify_failures: 0,
            review_rejections: 0,
            started_at: now,
            updated_at: now,
            phase_started_at: now,
            last_checkpoint_sha: None,
            stop_reason: None,
            last_error: None,
            auto_resume_count: 0,
        }
    }

    /// Allocate a run id from the current UTC second.
    pub fn allocate_run_id() -> String {
        Utc::now().format("%Y%m%d%H%M%S").to_string()
    }

    pub fn current_milestone(&self) -> Option<&Milestone> {
        self.milestones.get(self.milestone_index)
    }

    pub fn is_last_milestone(&self) -> bool {
        self.milestone_index + 1 >= self.milestones.len()
    }

    /// Record a successful transition into `next`. Phase-level retry
    /// counters reset on progression.
    pub fn advance(&mut self, next: Phase) {
        self.last_successful_phase = Some(self.phase);
        self.phase = next;
        self.phase_retries = 0;
        let now = Utc::now();
        self.phase_started_at = now;
        self.updated_at = now;
    }

    /// Re-enter a phase without claiming the current one succeeded
    /// (verification failure looping back into IMPLEMENT).
    pub fn reenter(&mut self, phase: Phase) {
        self.phase = phase;
        self.phase_retries = 0;
        let now = Utc::now();
        self.phase_started_at = now;
        self.updated_at = now;
    }

    /// Terminal transition.
    pub fn stop(&mut self, reason: StopReason, error: Option<String>) {
        if reason == StopReason::Complete {
            self.last_successful_phase = Some(self.phase);
        }
        self.phase = Phase::Stopped;
        self.stop_reason = Some(reason);
        self.last_error = error;
        self.updated_at = Utc::now();
    }

    /// Prepare the state for a resumed invocation: target phase from the
    /// last successful one, stop bookkeeping cleared, milestones, scope,
    /// and retry counters preserved.
    pub fn prepare_resume(&mut self, auto: bool) {
        self.phase = Phase::resume_target(self.last_successful_phase);
        self.stop_reason = None;
        self.last_error = None;
        if auto {
            self.auto_resume_count += 1;
        }
        let now = Utc::now();
        self.phase_started_at = now;
        self.updated_at = now;
    }
}
