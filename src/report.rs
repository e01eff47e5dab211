//! Run reports.
//!
//! `runr report <run_id>` assembles the state snapshot, the terminal
//! handoff (when present), the latest checkpoint sidecar, and the tail
//! of the timeline into one record, rendered as text or JSON. The same
//! module owns the three-line stop block the CLI prints after every
//! non-complete stop.

use anyhow::{Context, Result};
use console::style;
use serde::Serialize;
use std::path::Path;

use crate::config::RunrPaths;
use crate::store::{
    find_latest_checkpoint_by_sidecar, CheckpointSidecar, EventRecord, RunStore,
};
use crate::supervisor::{RunState, StopHandoff};

/// How many trailing events a report includes.
const EVENT_TAIL: usize = 20;

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub state: RunState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handoff: Option<StopHandoff>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<CheckpointSidecar>,
    pub recent_events: Vec<EventRecord>,
}

pub fn build_report(repo: &Path, run_id: &str) -> Result<RunReport> {
    let paths = RunrPaths::new(repo.to_path_buf());
    let store = RunStore::open(paths.run_dir(run_id));

    let state: RunState = store
        .read_state()
        .with_context(|| format!("run {run_id}: unreadable state"))?
        .with_context(|| format!("no such run: {run_id}"))?;

    let handoff = crate::store::read_json::<StopHandoff>(
        &store.handoffs_dir().join("stop.json"),
    )
    .unwrap_or(None);

    let checkpoint = find_latest_checkpoint_by_sidecar(&paths.checkpoints_dir(), run_id)?;

    let mut recent_events = store.journal().read_all()?;
    if recent_events.len() > EVENT_TAIL {
        recent_events.drain(..recent_events.len() - EVENT_TAIL);
    }

    Ok(RunReport {
        state,
        handoff,
        checkpoint,
        recent_events,
    })
}

pub fn render_human(report: &RunReport) -> String {
    let state = &report.state;
    let mut out = String::new();

    out.push_str(&format!(
        "{} {}\n",
        style("Run").bold(),
        style(&state.run_id).cyan()
    ));
    out.push_str(&format!("  task:      {}\n", state.task_path));
    out.push_str(&format!("  phase:     {}\n", state.phase));
    out.push_str(&format!(
        "  milestone: {}/{}\n",
        state.milestone_index,
        state.milestones.len()
    ));
    if let Some(branch) = &state.branch {
        out.push_str(&format!("  branch:    {branch}\n"));
    }
    if let Some(reason) = state.stop_reason {
        out.push_str(&format!(
            "  stopped:   {} (exit {})\n",
            style(reason).red(),
            reason.exit_code()
        ));
    }
    if let Some(checkpoint) = &report.checkpoint {
        out.push_str(&format!(
            "  checkpoint: {} (milestone {}, {})\n",
            checkpoint.sha, checkpoint.milestone_index, checkpoint.created_at
        ));
    }

    if !state.milestones.is_empty() {
        out.push_str("\nMilestones:\n");
        for (i, milestone) in state.milestones.iter().enumerate() {
            let marker = if i < state.milestone_index {
                style("done").green().to_string()
            } else if i == state.milestone_index && state.stop_reason.is_none() {
                style("active").yellow().to_string()
            } else {
                style("pending").dim().to_string()
            };
            out.push_str(&format!("  {i}. [{marker}] {}\n", milestone.title));
        }
    }

    if !report.recent_events.is_empty() {
        out.push_str("\nRecent events:\n");
        for event in &report.recent_events {
            out.push_str(&format!(
                "  {} {}\n",
                event.timestamp.format("%H:%M:%S"),
                event.event_type
            ));
        }
    }

    if let Some(handoff) = &report.handoff {
        out.push('\n');
        out.push_str(&handoff.diagnosis);
        out.push('\n');
    }
    out
}

/// The three lines every failing stop prints: the reason code, the last
/// checkpoint, and the next actions.
pub fn stop_block(handoff: &StopHandoff) -> String {
    let checkpoint = match &handoff.last_checkpoint_sha {
        Some(sha) => format!("{} (milestone {})", sha, handoff.milestone_index),
        None => "none".to_string(),
    };
    format!(
        "{} {} (exit {})\n{} {}\n{} {}\n",
        style("stop reason:").bold(),
        style(handoff.reason).red(),
        handoff.exit_code,
        style("last checkpoint:").bold(),
        checkpoint,
        style("next:").bold(),
        handoff.next_actions.join("  |  "),
    )
}
