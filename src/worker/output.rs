//! Worker output parsing and per-phase schema validation.
//!
//! Two transport shapes are accepted regardless of the configured one
//! (older workers emit a single JSON object with content blocks, newer
//! ones a stream of item events), so each parser falls back to the
//! other before giving up. Schema validation happens after text
//! extraction and is what turns sloppy worker output into a
//! `worker_parse_failed` stop.

use serde_json::Value;
use thiserror::Error;

use crate::scope::{CommandRun, NoChangesEvidence};
use crate::supervisor::state::{Milestone, RiskLevel};
use crate::util::extract_json_object;

use super::WorkerKind;

/// Planning must produce between one and seven milestones.
pub const MAX_PLANNED_MILESTONES: usize = 7;

#[derive(Debug, Error)]
pub enum WorkerParseError {
    #[error("worker output contained no JSON object")]
    MissingJson,
    #[error("worker output schema invalid: {0}")]
    Schema(String),
}

/// Extract the agent's message text from raw stdout.
pub fn extract_text(kind: WorkerKind, stdout: &str) -> String {
    let primary = match kind {
        WorkerKind::ClaudeLike => extract_json_shape(stdout),
        WorkerKind::CodexLike => extract_jsonl_shape(stdout),
    };
    let fallback = || match kind {
        WorkerKind::ClaudeLike => extract_jsonl_shape(stdout),
        WorkerKind::CodexLike => extract_json_shape(stdout),
    };
    primary
        .or_else(fallback)
        .unwrap_or_else(|| stdout.trim().to_string())
}

/// Single-object shape: `{"result": "..."}` (or content/message), where
/// the field may be a string or a list of content blocks.
fn extract_json_shape(stdout: &str) -> Option<String> {
    let object = serde_json::from_str::<Value>(stdout.trim())
        .ok()
        .or_else(|| {
            extract_json_object(stdout).and_then(|s| serde_json::from_str::<Value>(&s).ok())
        })?;

    for key in ["result", "content", "message"] {
        match object.get(key) {
            Some(Value::String(text)) => return Some(text.clone()),
            Some(Value::Array(blocks)) => {
                let text: Vec<&str> = blocks
                    .iter()
                    .filter_map(|b| b.get("text").and_then(Value::as_str))
                    .collect();
                if !text.is_empty() {
                    return Some(text.join("\n"));
                }
            }
            _ => {}
        }
    }
    None
}

/// Stream shape: newline-delimited events where
/// `type == "item.completed"` and `item.type == "agent_message"`
/// contribute their `item.text`.
fn extract_jsonl_shape(stdout: &str) -> Option<String> {
    let mut texts = Vec::new();
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(event) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        if event.get("type").and_then(Value::as_str) != Some("item.completed") {
            continue;
        }
        let Some(item) = event.get("item") else { continue };
        if item.get("type").and_then(Value::as_str) != Some("agent_message") {
            continue;
        }
        if let Some(text) = item.get("text").and_then(Value::as_str) {
            texts.push(text.to_string());
        }
    }
    if texts.is_empty() {
        None
    } else {
        Some(texts.join("\n"))
    }
}

fn json_payload(text: &str) -> Result<Value, WorkerParseError> {
    let raw = extract_json_object(text).ok_or(WorkerParseError::MissingJson)?;
    serde_json::from_str(&raw).map_err(|err| WorkerParseError::Schema(err.to_string()))
}

// ── plan ──────────────────────────────────────────────────────────────

/// Parse a planning response into milestones. The payload must carry a
/// `milestones` array of 1..=7 entries, each with a non-empty title.
pub fn parse_plan(text: &str) -> Result<Vec<Milestone>, WorkerParseError> {
    let payload = json_payload(text)?;
    let raw_milestones = payload
        .get("milestones")
        .and_then(Value::as_array)
        .ok_or_else(|| WorkerParseError::Schema("missing 'milestones' array".into()))?;

    if raw_milestones.is_empty() || raw_milestones.len() > MAX_PLANNED_MILESTONES {
        return Err(WorkerParseError::Schema(format!(
            "expected 1..={MAX_PLANNED_MILESTONES} milestones, got {}",
            raw_milestones.len()
        )));
    }

    let mut milestones = Vec::with_capacity(raw_milestones.len());
    for (i, raw) in raw_milestones.iter().enumerate() {
        let title = raw
            .get("title")
            .or_else(|| raw.get("goal"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| WorkerParseError::Schema(format!("milestone {i} has no title")))?;

        let done_checks = raw
            .get("done_checks")
            .and_then(Value::as_array)
            .map(|checks| {
                checks
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let risk = match raw.get("risk") {
            None | Some(Value::Null) => RiskLevel::Medium,
            Some(Value::String(s)) => s.parse().map_err(|_| {
                WorkerParseError::Schema(format!("milestone {i} has invalid risk '{s}'"))
            })?,
            Some(other) => {
                return Err(WorkerParseError::Schema(format!(
                    "milestone {i} risk must be a string, got {other}"
                )))
            }
        };

        milestones.push(Milestone {
            title: title.to_string(),
            done_checks,
            risk,
        });
    }
    Ok(milestones)
}

// ── implement ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImplementStatus {
    /// Files were (supposedly) edited; git decides what really changed.
    Ok,
    /// The worker claims no edits were needed; the evidence gate decides.
    NoChangesNeeded,
}

#[derive(Debug, Clone)]
pub struct ImplementReport {
    pub status: ImplementStatus,
    pub evidence: NoChangesEvidence,
}

/// Parse an implementation response. Implementers that just edit files
/// and narrate prose produce no JSON; that is a plain `Ok` report. JSON
/// with an unknown status is a schema failure.
pub fn parse_implement(text: &str) -> Result<ImplementReport, WorkerParseError> {
    let Ok(payload) = json_payload(text) else {
        return Ok(ImplementReport {
            status: ImplementStatus::Ok,
            evidence: NoChangesEvidence::default(),
        });
    };

    let status = match payload.get("status").and_then(Value::as_str) {
        None | Some("ok") | Some("done") => ImplementStatus::Ok,
        Some("no_changes_needed") => ImplementStatus::NoChangesNeeded,
        Some(other) => {
            return Err(WorkerParseError::Schema(format!(
                "unknown implement status '{other}'"
            )))
        }
    };

    let files_checked = payload
        .get("files_checked")
        .and_then(Value::as_array)
        .map(|files| {
            files
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let grep_output = payload
        .get("grep_output")
        .and_then(Value::as_str)
        .map(str::to_string);

    let commands_run = payload
        .get("commands_run")
        .and_then(Value::as_array)
        .map(|commands| {
            commands
                .iter()
                .filter_map(|c| {
                    let command = c
                        .get("command")
                        .or_else(|| c.get("cmd"))
                        .and_then(Value::as_str)?
                        .to_string();
                    let exit_code = c.get("exit_code").and_then(Value::as_i64)? as i32;
                    Some(CommandRun { command, exit_code })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ImplementReport {
        status,
        evidence: NoChangesEvidence {
            files_checked,
            grep_output,
            commands_run,
        },
    })
}

// ── review ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewDecision {
    Approve,
    RequestChanges,
}

/// Parse a review response. `reject` is a legacy synonym and folds to
/// `request_changes`.
pub fn parse_review(text: &str) -> Result<ReviewDecision, WorkerParseError> {
    let payload = json_payload(text)?;
    let decision = payload
        .get("decision")
        .or_else(|| payload.get("status"))
        .and_then(Value::as_str)
        .ok_or_else(|| WorkerParseError::Schema("missing review 'decision'".into()))?;

    match decision {
        "approve" => Ok(ReviewDecision::Approve),
        "request_changes" | "reject" => Ok(ReviewDecision::RequestChanges),
        other => Err(WorkerParseError::Schema(format!(
            "unknown review decision '{other}'"
        ))),
    }
}
