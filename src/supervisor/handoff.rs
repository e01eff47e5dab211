//! Terminal stop handoffs.
//!
//! Every run ends by writing `handoffs/stop.json` (machine form) and
//! `handoffs/stop.md` (human form). The three lines a user always gets:
//! the stop reason code, the last checkpoint with its milestone, and the
//! next actions.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stop::{StopFamily, StopReason};
use crate::store::{atomic_write_json, RunStore};
use crate::util::is_safe_command;

use super::state::RunState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopHandoff {
    pub schema_version: u32,
    pub run_id: String,
    pub reason: StopReason,
    pub family: StopFamily,
    pub exit_code: i32,
    pub auto_resumable: bool,
    pub diagnosis: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checkpoint_sha: Option<String>,
    pub milestone_index: usize,
    pub milestone_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub next_actions: Vec<String>,
    pub stopped_at: DateTime<Utc>,
}

impl StopHandoff {
    pub fn from_state(state: &RunState) -> Self {
        let reason = state.stop_reason.unwrap_or(StopReason::Complete);
        let entry = reason.entry();

        let mut next_actions = vec![
            format!("runr resume {}", state.run_id),
            format!(
                "runr intervene {} --reason {} --note \"...\"",
                state.run_id, reason
            ),
            format!("runr report {}", state.run_id),
        ];
        // Suggested commands must survive the shell-metachar safety
        // filter; auto-fix offers are gated further by the CLI layer.
        next_actions.retain(|cmd| is_safe_command(cmd));

        Self {
            schema_version: 1,
            run_id: state.run_id.clone(),
            reason,
            family: entry.family,
            exit_code: entry.exit_code,
            auto_resumable: entry.auto_resumable,
            diagnosis: entry.diagnosis.to_string(),
            last_checkpoint_sha: state.last_checkpoint_sha.clone(),
            milestone_index: state.milestone_index,
            milestone_count: state.milestones.len(),
            last_error: state.last_error.clone(),
            next_actions,
            stopped_at: Utc::now(),
        }
    }

    pub fn write(&self, store: &RunStore) -> Result<()> {
        let dir = store.handoffs_dir();
        std::fs::create_dir_all(&dir)?;
        atomic_write_json(&dir.join("stop.json"), self)?;
        std::fs::write(dir.join("stop.md"), self.to_markdown())?;
        Ok(())
    }

    pub fn to_markdown(&self) -> String {
        let checkpoint = match &self.last_checkpoint_sha {
            Some(sha) => format!("`{}` (milestone {})", sha, self.milestone_index),
            None => "none".to_string(),
        };
        let mut md = format!(
            "# Run {} stopped: {}\n\n\
             - **Reason**: `{}` (exit {})\n\
             - **Last checkpoint**: {}\n\
             - **Progress**: milestone {}/{}\n\
             - **Auto-resumable**: {}\n\n\
             {}\n\n## Next actions\n",
            self.run_id,
            self.reason,
            self.reason,
            self.exit_code,
            checkpoint,
            self.milestone_index,
            self.milestone_count,
            if self.auto_resumable { "yes" } else { "no" },
            self.diagnosis,
        );
        for action in &self.next_actions {
            md.push_str(&format!("- `{action}`\n"));
        }
        if let Some(error) = &self.last_error {
            md.push_str(&format!("\n## Last error\n\n```\n{error}\n```\n"));
        }
        md
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::ScopeLock;
    use crate::supervisor::phase::Phase;
    use tempfile::tempdir;

    fn stopped_state(reason: StopReason) -> RunState {
        let mut state = RunState::new(
            "20260101120000",
            "/repo",
            "tasks/a.md",
            ScopeLock::new(vec!["src/**".into()], vec![]),
        );
        state.advance(Phase::Plan);
        state.last_checkpoint_sha = Some("abc123".into());
        state.stop(reason, Some("the detail".into()));
        state
    }

    #[test]
    fn test_handoff_carries_registry_facts() {
        let handoff = StopHandoff::from_state(&stopped_state(StopReason::ReviewLoopDetected));
        assert_eq!(handoff.exit_code, 20);
        assert_eq!(handoff.family, StopFamily::Review);
        assert!(!handoff.auto_resumable);
        assert!(!handoff.diagnosis.is_empty());
    }

    #[test]
    fn test_next_actions_are_safe_commands() {
        let handoff = StopHandoff::from_state(&stopped_state(StopReason::StalledTimeout));
        assert!(!handoff.next_actions.is_empty());
        for action in &handoff.next_actions {
            assert!(is_safe_command(action), "unsafe suggestion: {action}");
        }
        assert!(handoff.next_actions[0].contains("resume"));
    }

    #[test]
    fn test_write_produces_both_forms() {
        let dir = tempdir().unwrap();
        let store = RunStore::create(dir.path().join("run")).unwrap();
        let handoff = StopHandoff::from_state(&stopped_state(StopReason::ScopeViolation));
        handoff.write(&store).unwrap();

        let json_path = store.handoffs_dir().join("stop.json");
        let md_path = store.handoffs_dir().join("stop.md");
        assert!(json_path.exists());
        assert!(md_path.exists());

        let back: StopHandoff =
            serde_json::from_str(&std::fs::read_to_string(json_path).unwrap()).unwrap();
        assert_eq!(back.reason, StopReason::ScopeViolation);

        let md = std::fs::read_to_string(md_path).unwrap();
        assert!(md.contains("scope_violation"));
        assert!(md.contains("abc123"));
        assert!(md.contains("Next actions"));
    }

    #[test]
    fn test_markdown_three_lines_always_present() {
        let handoff = StopHandoff::from_state(&stopped_state(StopReason::DirtyTree));
        let md = handoff.to_markdown();
        // reason code, checkpoint sha + milestone, next actions
        assert!(md.contains("`dirty_tree`"));
        assert!(md.contains("milestone"));
        assert!(md.contains("runr resume"));
        assert!(md.contains("runr report"));
    }
}
