//! The per-run state machine.
//!
//! One supervisor drives one run: single-threaded and cooperative, with
//! exactly two suspension points (a worker call, a verification
//! command). All state mutation happens sequentially between those
//! points and every mutation is snapshotted before the next one, so a
//! crash at any instant leaves a resumable run directory behind.

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::{RunrConfig, RunrPaths};
use crate::gitx::{Git, GitError};
use crate::scope::{check_scope, evidence_accepts, ScopeReport};
use crate::stop::StopReason;
use crate::store::{
    CheckpointSidecar, EventType, Journal, RunStore, TaskLedger, TaskStatus, TaskUpdate,
};
use crate::task::TaskFile;
use crate::verify::{run_tiers, select_tiers, TierContext, VerifyOutcome};
use crate::worker::{
    parse_implement, parse_plan, parse_review, ImplementStatus, ReviewDecision, Worker,
    WorkerFailure, WorkerParseError,
};

use super::handoff::StopHandoff;
use super::phase::Phase;
use super::state::RunState;

/// Retry budgets and loop limits. Defaults match the documented policy;
/// tests shrink them.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Worker-call retries per phase.
    pub worker_retries: u32,
    /// Consecutive verification failures tolerated per milestone.
    pub verify_retries: u32,
    /// Consecutive request_changes before the review loop trips.
    pub review_loop_limit: u32,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            worker_retries: 2,
            verify_retries: 3,
            review_loop_limit: 3,
        }
    }
}

enum CallOutcome<T> {
    Ok(T),
    Stop(StopReason, String),
}

pub struct Supervisor {
    config: RunrConfig,
    paths: RunrPaths,
    git: Git,
    store: RunStore,
    journal: Journal,
    ledger: TaskLedger,
    task: TaskFile,
    options: SupervisorOptions,
    cancel: Arc<AtomicBool>,
    pub state: RunState,
    /// Allowed files from the most recent scope check; these are what a
    /// checkpoint stages.
    last_allowed: Vec<String>,
    last_verify: Option<VerifyOutcome>,
    /// Serializes checkpoint git operations within this process.
    checkpoint_guard: std::sync::Mutex<()>,
}

impl Supervisor {
    /// Create a brand new run for a task.
    pub fn init(
        repo: &Path,
        task_path: &Path,
        config: RunrConfig,
        options: SupervisorOptions,
        cancel: Arc<AtomicBool>,
    ) -> Result<Self> {
        let paths = RunrPaths::new(repo.to_path_buf());
        let task = TaskFile::load(task_path)?;

        let scope = crate::scope::ScopeLock::new(
            config.effective_allowlist(),
            config.scope.denylist.clone(),
        )
        .with_additions(&task.meta.allowlist_add)
        .with_lockfiles(&config.scope.lockfiles);

        let run_id = RunState::allocate_run_id();
        let store = RunStore::create(paths.run_dir(&run_id))?;
        let journal = store.journal();
        let ledger = TaskLedger::new(paths.ledger_file());
        let state = RunState::new(
            &run_id,
            &repo.display().to_string(),
            &task_path.display().to_string(),
            scope,
        );

        Ok(Self {
            config,
            paths,
            git: Git::new(repo),
            store,
            journal,
            ledger,
            task,
            options,
            cancel,
            state,
            last_allowed: Vec::new(),
            last_verify: None,
            checkpoint_guard: std::sync::Mutex::new(()),
        })
    }

    /// Rebuild a supervisor around an existing run directory whose state
    /// was already prepared by the resume planner.
    pub fn attach(
        repo: &Path,
        state: RunState,
        config: RunrConfig,
        options: SupervisorOptions,
        cancel: Arc<AtomicBool>,
    ) -> Result<Self> {
        let paths = RunrPaths::new(repo.to_path_buf());
        let task = TaskFile::load(Path::new(&state.task_path))?;
        let store = RunStore::open(paths.run_dir(&state.run_id));
        let journal = store.journal();
        let ledger = TaskLedger::new(paths.ledger_file());

        Ok(Self {
            config,
            paths,
            git: Git::new(repo),
            store,
            journal,
            ledger,
            task,
            options,
            cancel,
            state,
            last_allowed: Vec::new(),
            last_verify: None,
            checkpoint_guard: std::sync::Mutex::new(()),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.state.run_id
    }

    /// Drive the run to its terminal state and return the stop reason.
    pub async fn run(&mut self) -> Result<StopReason> {
        loop {
            if let Some(reason) = self.state.stop_reason {
                if self.state.phase.is_terminal() {
                    return Ok(reason);
                }
            }

            if self.cancel.load(Ordering::SeqCst) && self.state.phase != Phase::Stopped {
                self.stop(StopReason::UserStopped, None)?;
                continue;
            }

            // Run-level stall tick: a phase that has made no transition
            // for longer than the stall window is wedged.
            if self.state.phase != Phase::Init && self.state.phase != Phase::Stopped {
                let elapsed = Utc::now()
                    .signed_duration_since(self.state.phase_started_at)
                    .to_std()
                    .unwrap_or_default();
                if elapsed > self.config.stall_timeout() {
                    self.stop(
                        StopReason::StalledTimeout,
                        Some(format!(
                            "phase {} made no progress for {}s",
                            self.state.phase,
                            elapsed.as_secs()
                        )),
                    )?;
                    continue;
                }
            }

            match self.state.phase {
                Phase::Init => self.do_init()?,
                Phase::Plan => self.do_plan().await?,
                Phase::Implement => self.do_implement().await?,
                Phase::Verify => self.do_verify().await?,
                Phase::Review => self.do_review().await?,
                Phase::Checkpoint => self.do_checkpoint()?,
                Phase::Finalize => self.do_finalize()?,
                Phase::Stopped => {
                    return Ok(self
                        .state
                        .stop_reason
                        .unwrap_or(StopReason::UserStopped));
                }
            }
        }
    }

    // ── phases ────────────────────────────────────────────────────────

    fn do_init(&mut self) -> Result<()> {
        if self.config.workflow.require_clean_tree && self.git.is_dirty()? {
            return self.stop(
                StopReason::DirtyTree,
                Some("working tree must be clean at run start".into()),
            );
        }

        let base_sha = self.git.head_sha()?;
        let branch = format!("runr/{}", self.state.run_id);
        self.git.create_branch(&branch)?;
        self.state.base_sha = Some(base_sha.clone());
        self.state.branch = Some(branch.clone());

        crate::store::atomic_write_json(&self.store.config_snapshot_file(), &self.config)?;
        std::fs::write(self.store.artifacts_dir().join("task.md"), &self.task.raw)
            .context("Failed to copy task into artifacts")?;
        crate::store::atomic_write_json(
            &self.store.artifacts_dir().join("task.meta.json"),
            &self.task.meta_file(),
        )?;

        self.ledger.transition(
            &self.state.task_path,
            TaskStatus::InProgress,
            TaskUpdate {
                run_id: Some(self.state.run_id.clone()),
                task_hash: Some(self.task.content_hash()),
                ..Default::default()
            },
        )?;

        self.emit(
            EventType::RunStarted,
            json!({
                "run_id": self.state.run_id,
                "task": self.state.task_path,
                "branch": branch,
                "base_sha": base_sha,
            }),
        )?;

        self.transition(Phase::Plan)
    }

    async fn do_plan(&mut self) -> Result<()> {
        let prompt = self.plan_prompt();
        match self.worker_attempts(Phase::Plan, &prompt, parse_plan).await? {
            CallOutcome::Stop(reason, error) => self.stop(reason, Some(error)),
            CallOutcome::Ok(milestones) => {
                self.emit(
                    EventType::MilestonesPlanned,
                    json!({
                        "count": milestones.len(),
                        "titles": milestones.iter().map(|m| m.title.clone()).collect::<Vec<_>>(),
                    }),
                )?;
                self.state.milestones = milestones;
                self.transition(Phase::Implement)
            }
        }
    }

    async fn do_implement(&mut self) -> Result<()> {
        let prompt = self.implement_prompt();
        let report = match self
            .worker_attempts(Phase::Implement, &prompt, parse_implement)
            .await?
        {
            CallOutcome::Stop(reason, error) => return self.stop(reason, Some(error)),
            CallOutcome::Ok(report) => report,
        };

        // The scope guard runs immediately after every implementation
        // phase, before anything else can act on the changes.
        let changes = self.git.list_changed_files()?;
        let scope_report = check_scope(&self.state.scope, &changes);

        if !scope_report.lockfile_hits.is_empty() {
            self.emit_scope_event(&scope_report)?;
            return self.stop(
                StopReason::GuardFail,
                Some(format!(
                    "lockfiles modified: {}",
                    scope_report.lockfile_hits.join(", ")
                )),
            );
        }
        if !scope_report.violations.is_empty() {
            self.emit_scope_event(&scope_report)?;
            return self.stop(
                StopReason::ScopeViolation,
                Some(format!(
                    "files outside the scope lock: {}",
                    scope_report.violations.join(", ")
                )),
            );
        }

        self.last_allowed = scope_report.allowed.clone();

        if self.last_allowed.is_empty() {
            // Nothing actually changed. Legitimate only as an evidenced
            // no-changes claim.
            let claim_ok = report.status == ImplementStatus::NoChangesNeeded
                && evidence_accepts(&self.state.scope, &report.evidence);
            if claim_ok {
                self.emit(
                    EventType::MilestoneCompleted,
                    json!({
                        "milestone_index": self.state.milestone_index,
                        "no_changes": true,
                        "files_checked": report.evidence.files_checked,
                    }),
                )?;
                return self.complete_milestone(None);
            }
            self.state.review_rejections += 1;
            if self.state.review_rejections >= self.options.review_loop_limit {
                return self.stop(
                    StopReason::ReviewLoopDetected,
                    Some("repeated unevidenced no-change claims".into()),
                );
            }
            self.emit(
                EventType::WorkerRetry,
                json!({
                    "phase": "implement",
                    "reason": "no_changes_claim_rejected",
                    "rejections": self.state.review_rejections,
                }),
            )?;
            self.state.reenter(Phase::Implement);
            return self.persist();
        }

        self.transition(Phase::Verify)
    }

    async fn do_verify(&mut self) -> Result<()> {
        let milestone = self.state.current_milestone().cloned().unwrap_or_else(|| {
            super::state::Milestone {
                title: "unplanned".into(),
                done_checks: vec![],
                risk: Default::default(),
            }
        });

        let ctx = TierContext {
            end_of_milestone: true,
            end_of_run: self.state.is_last_milestone(),
            risk: milestone.risk,
            changed_files: &self.last_allowed,
            forced_tier: self.task.meta.verification_tier,
        };
        let tiers = select_tiers(&self.config.verification, &ctx);

        let outcome = run_tiers(
            self.git.repo(),
            &self.store.artifacts_dir(),
            &self.config.verification,
            &tiers,
            self.config.verify_budget(),
        )
        .await?;

        self.emit(
            EventType::Verification,
            json!({
                "milestone_index": self.state.milestone_index,
                "passed": outcome.passed,
                "timed_out": outcome.timed_out,
                "tiers": outcome.tiers.iter().map(|t| {
                    json!({
                        "tier": t.tier,
                        "passed": t.passed,
                        "failed_command": t.failed_command,
                        "exit_code": t.exit_code,
                    })
                }).collect::<Vec<_>>(),
            }),
        )?;

        if outcome.timed_out {
            return self.stop(
                StopReason::VerificationTimeout,
                Some("verification exceeded max_verify_time_per_milestone".into()),
            );
        }

        if !outcome.passed {
            self.state.verify_failures += 1;
            if self.state.verify_failures > self.options.verify_retries {
                let detail = outcome
                    .tiers
                    .iter()
                    .find_map(|t| t.failed_command.clone())
                    .unwrap_or_default();
                return self.stop(
                    StopReason::VerificationFailedMaxRetries,
                    Some(format!("verification kept failing at: {detail}")),
                );
            }
            self.emit(
                EventType::VerificationRetry,
                json!({
                    "milestone_index": self.state.milestone_index,
                    "consecutive_failures": self.state.verify_failures,
                }),
            )?;
            self.state.reenter(Phase::Implement);
            return self.persist();
        }

        self.state.verify_failures = 0;
        self.last_verify = Some(outcome);
        self.transition(Phase::Review)
    }

    async fn do_review(&mut self) -> Result<()> {
        let prompt = self.review_prompt();
        let decision = match self
            .worker_attempts(Phase::Review, &prompt, parse_review)
            .await?
        {
            CallOutcome::Stop(reason, error) => return self.stop(reason, Some(error)),
            CallOutcome::Ok(decision) => decision,
        };

        self.emit(
            EventType::ReviewDecision,
            json!({
                "milestone_index": self.state.milestone_index,
                "decision": match decision {
                    ReviewDecision::Approve => "approve",
                    ReviewDecision::RequestChanges => "request_changes",
                },
                "consecutive_rejections": match decision {
                    ReviewDecision::Approve => 0,
                    ReviewDecision::RequestChanges => self.state.review_rejections + 1,
                },
            }),
        )?;

        match decision {
            ReviewDecision::Approve => {
                self.state.review_rejections = 0;
                self.transition(Phase::Checkpoint)
            }
            ReviewDecision::RequestChanges => {
                self.state.review_rejections += 1;
                if self.state.review_rejections >= self.options.review_loop_limit {
                    return self.stop(
                        StopReason::ReviewLoopDetected,
                        Some(format!(
                            "reviewer requested changes {} times in a row",
                            self.state.review_rejections
                        )),
                    );
                }
                self.state.reenter(Phase::Implement);
                self.persist()
            }
        }
    }

    fn do_checkpoint(&mut self) -> Result<()> {
        let milestone_title = self
            .state
            .current_milestone()
            .map(|m| m.title.clone())
            .unwrap_or_default();

        // Commit + sidecar happen under the in-process lock so a run
        // cannot race its own watchdog into a partial commit. The guard
        // is scoped: milestone bookkeeping below needs `&mut self`.
        let committed: Option<String> = {
            let _guard = self
                .checkpoint_guard
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());

            match self.git.checkpoint_commit(
                &self.state.run_id,
                self.state.milestone_index,
                &milestone_title,
                &self.last_allowed,
            ) {
                Ok(sha) => {
                    // Sidecar strictly after the commit it describes.
                    let mut sidecar = CheckpointSidecar::new(
                        &sha,
                        &self.state.run_id,
                        self.state.milestone_index,
                        &milestone_title,
                    );
                    if let Some(verify) = &self.last_verify {
                        if let Some(tier) = verify.highest_tier() {
                            sidecar =
                                sidecar.with_verification(tier.as_str(), verify.commands());
                        }
                    }
                    sidecar.write(&self.paths.checkpoints_dir())?;

                    self.emit(
                        EventType::CheckpointCreated,
                        json!({
                            "sha": sha,
                            "milestone_index": self.state.milestone_index,
                            "milestone_title": milestone_title,
                        }),
                    )?;
                    Some(sha)
                }
                Err(GitError::NothingToCommit) => {
                    // Verified and approved, but the tree already
                    // matches; the milestone completes without a
                    // receipt commit.
                    self.emit(
                        EventType::MilestoneCompleted,
                        json!({
                            "milestone_index": self.state.milestone_index,
                            "no_changes": true,
                        }),
                    )?;
                    None
                }
                Err(err) => return Err(err.into()),
            }
        };

        match committed {
            Some(sha) => {
                self.ledger.transition(
                    &self.state.task_path,
                    TaskStatus::InProgress,
                    TaskUpdate {
                        checkpoint_sha: Some(sha.clone()),
                        ..Default::default()
                    },
                )?;
                self.complete_milestone(Some(sha))
            }
            None => self.complete_milestone(None),
        }
    }

    fn do_finalize(&mut self) -> Result<()> {
        self.ledger.transition(
            &self.state.task_path,
            TaskStatus::Completed,
            TaskUpdate {
                checkpoint_sha: self.state.last_checkpoint_sha.clone(),
                ..Default::default()
            },
        )?;
        self.finish(StopReason::Complete, None)
    }

    // ── transitions & bookkeeping ─────────────────────────────────────

    /// Milestone done (with or without a checkpoint commit): bump the
    /// index, reset per-milestone counters, and loop or finalize.
    fn complete_milestone(&mut self, checkpoint_sha: Option<String>) -> Result<()> {
        if let Some(sha) = checkpoint_sha {
            self.state.last_checkpoint_sha = Some(sha);
        }
        self.state.milestone_index += 1;
        self.state.verify_failures = 0;
        self.state.review_rejections = 0;
        self.last_verify = None;
        self.last_allowed.clear();

        if self.state.milestone_index >= self.state.milestones.len() {
            self.transition(Phase::Finalize)
        } else {
            self.transition(Phase::Implement)
        }
    }

    fn transition(&mut self, next: Phase) -> Result<()> {
        self.state.advance(next);
        self.emit(
            EventType::PhaseStart,
            json!({
                "phase": next,
                "milestone_index": self.state.milestone_index,
            }),
        )?;
        self.persist()
    }

    /// Terminal stop with a classified reason.
    fn stop(&mut self, reason: StopReason, error: Option<String>) -> Result<()> {
        self.finish(reason, error)
    }

    fn finish(&mut self, reason: StopReason, error: Option<String>) -> Result<()> {
        let entry = reason.entry();
        self.emit(
            EventType::StopReasonClassified,
            json!({
                "reason": reason,
                "family": entry.family,
                "exit_code": entry.exit_code,
                "auto_resumable": entry.auto_resumable,
            }),
        )?;
        self.emit(
            EventType::Stop,
            json!({
                "reason": reason,
                "error": error,
                "milestone_index": self.state.milestone_index,
                "last_checkpoint_sha": self.state.last_checkpoint_sha,
            }),
        )?;

        self.state.stop(reason, error);
        self.persist()?;

        StopHandoff::from_state(&self.state).write(&self.store)?;

        if reason != StopReason::Complete {
            let next = if reason == StopReason::UserStopped || entry.auto_resumable {
                TaskStatus::Stopped
            } else {
                TaskStatus::Failed
            };
            self.ledger.transition(
                &self.state.task_path,
                next,
                TaskUpdate {
                    stop_reason: Some(reason),
                    error_summary: self.state.last_error.clone(),
                    checkpoint_sha: self.state.last_checkpoint_sha.clone(),
                    ..Default::default()
                },
            )?;
        }
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        self.store.snapshot_state(&self.state)
    }

    fn emit(&self, event_type: EventType, payload: serde_json::Value) -> Result<()> {
        self.journal.append(event_type, payload)
    }

    fn emit_scope_event(&self, report: &ScopeReport) -> Result<()> {
        self.emit(
            EventType::ScopeViolation,
            json!({
                "milestone_index": self.state.milestone_index,
                "violations": report.violations,
                "lockfile_hits": report.lockfile_hits,
                "ignored_dropped": report.ignored_dropped,
                "ignore_check_degraded": report.degraded,
            }),
        )
    }

    // ── worker calls ──────────────────────────────────────────────────

    /// Run one worker call with bounded retries. Parse failures count as
    /// call failures. The final failure is classified into a stop
    /// reason; intermediate ones are journaled as retries.
    async fn worker_attempts<T>(
        &mut self,
        phase: Phase,
        prompt: &str,
        parse: impl Fn(&str) -> std::result::Result<T, WorkerParseError>,
    ) -> Result<CallOutcome<T>> {
        let worker_config = self.config.worker(self.config.agent.name.as_deref());
        let worker = Worker::new(
            worker_config.clone(),
            self.config.worker_call_timeout(&worker_config),
            self.config.stall_timeout(),
        );

        let mut last_failure: (StopReason, String) =
            (StopReason::WorkerParseFailed, "no attempt made".into());

        for attempt in 0..=self.options.worker_retries {
            if self.cancel.load(Ordering::SeqCst) {
                return Ok(CallOutcome::Stop(StopReason::UserStopped, "cancelled".into()));
            }

            self.emit(
                EventType::WorkerCallStarted,
                json!({
                    "phase": phase,
                    "attempt": attempt,
                    "worker": worker.config.bin,
                }),
            )?;

            match worker.call(self.git.repo(), prompt).await {
                Ok(response) => {
                    self.emit(
                        EventType::WorkerCallCompleted,
                        json!({
                            "phase": phase,
                            "attempt": attempt,
                            "status": "ok",
                            "duration_ms": response.duration.as_millis() as u64,
                            "stdout_bytes": response.stdout.len(),
                        }),
                    )?;
                    let text = crate::worker::output::extract_text(worker.kind, &response.stdout);
                    match parse(&text) {
                        Ok(value) => {
                            self.state.phase_retries = attempt;
                            return Ok(CallOutcome::Ok(value));
                        }
                        Err(err) => {
                            tracing::warn!(phase = %phase, attempt, error = %err, "worker output rejected");
                            last_failure = (StopReason::WorkerParseFailed, err.to_string());
                        }
                    }
                }
                Err(failure) => {
                    let observation = failure.to_string();
                    self.emit(
                        EventType::WorkerCallCompleted,
                        json!({
                            "phase": phase,
                            "attempt": attempt,
                            "status": "failed",
                            "observation": observation,
                        }),
                    )?;
                    last_failure = (classify_worker_failure(&failure), observation);
                }
            }

            if attempt < self.options.worker_retries {
                self.state.phase_retries = attempt + 1;
                self.emit(
                    EventType::WorkerRetry,
                    json!({
                        "phase": phase,
                        "attempt": attempt + 1,
                        "reason": last_failure.1,
                    }),
                )?;
                self.persist()?;
            }
        }

        Ok(CallOutcome::Stop(last_failure.0, last_failure.1))
    }

    // ── prompts ───────────────────────────────────────────────────────

    fn plan_prompt(&self) -> String {
        format!(
            r#"You are planning the execution of a coding task.

## TASK: {title}

{body}

## RESPONSE FORMAT
Respond with a single JSON object:
{{"milestones": [{{"title": "...", "done_checks": ["shell command", "..."], "risk": "low|medium|high"}}]}}

Rules:
1. Between 1 and 7 milestones, each independently verifiable.
2. done_checks are commands that prove the milestone is complete.
3. Order milestones so earlier ones never depend on later ones.
"#,
            title = self.task.title,
            body = self.task.body,
        )
    }

    fn implement_prompt(&self) -> String {
        let milestone = self.state.current_milestone();
        let (title, checks) = match milestone {
            Some(m) => (m.title.clone(), m.done_checks.join("\n- ")),
            None => (String::new(), String::new()),
        };
        format!(
            r#"You are implementing one milestone of a larger task.

## MILESTONE {index}: {title}

Done when:
- {checks}

## FILE SCOPE
You may only modify files matching:
{allow}

## RESPONSE FORMAT
Edit files directly. If and only if no edits are needed, respond with:
{{"status": "no_changes_needed", "files_checked": ["..."], "grep_output": "...", "commands_run": [{{"command": "...", "exit_code": 0}}]}}
"#,
            index = self.state.milestone_index,
            title = title,
            checks = checks,
            allow = self
                .state
                .scope
                .allowlist
                .iter()
                .chain(self.state.scope.allowlist_add.iter())
                .map(|g| format!("  - {g}"))
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }

    fn review_prompt(&self) -> String {
        let milestone_title = self
            .state
            .current_milestone()
            .map(|m| m.title.clone())
            .unwrap_or_default();
        format!(
            r#"You are reviewing a verified change for one milestone.

## MILESTONE {index}: {title}

## FILES CHANGED
{files}

## RESPONSE FORMAT
Respond with a single JSON object:
{{"decision": "approve"}} or {{"decision": "request_changes", "notes": "..."}}
"#,
            index = self.state.milestone_index,
            title = milestone_title,
            files = self
                .last_allowed
                .iter()
                .map(|f| format!("  - {f}"))
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }
}

fn classify_worker_failure(failure: &WorkerFailure) -> StopReason {
    match failure {
        WorkerFailure::Timeout(_) => StopReason::WorkerCallTimeout,
        WorkerFailure::Stalled(_) => StopReason::StalledTimeout,
        WorkerFailure::NonZeroExit { .. }
        | WorkerFailure::Spawn { .. }
        | WorkerFailure::Io(_) => StopReason::WorkerParseFailed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_worker_failure() {
        use std::time::Duration;
        assert_eq!(
            classify_worker_failure(&WorkerFailure::Timeout(Duration::from_secs(1))),
            StopReason::WorkerCallTimeout
        );
        assert_eq!(
            classify_worker_failure(&WorkerFailure::Stalled(Duration::from_secs(1))),
            StopReason::StalledTimeout
        );
        assert_eq!(
            classify_worker_failure(&WorkerFailure::NonZeroExit {
                code: 1,
                observation: "boom".into()
            }),
            StopReason::WorkerParseFailed
        );
    }

    #[test]
    fn test_default_options_match_documented_policy() {
        let opts = SupervisorOptions::default();
        assert_eq!(opts.worker_retries, 2);
        assert_eq!(opts.verify_retries, 3);
        assert_eq!(opts.review_loop_limit, 3);
    }
}
