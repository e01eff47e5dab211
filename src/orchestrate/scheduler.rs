//! The single-tick track scheduler.
//!
//! Each tick makes exactly one decision: launch an eligible track, wait,
//! or stop the orchestration. Eligibility for a pending track:
//!
//! 1. no running track's ownership set collides with its own;
//! 2. every `depends_on` task is `completed` in the ledger;
//! 3. under `serialize` policy, nothing else is running at all.
//!
//! Ties break toward the lowest track id (insertion order).

use anyhow::Result;
use std::time::{Duration, Instant};

use crate::scope::sets_collide;
use crate::stop::StopReason;
use crate::store::TaskLedger;

use super::{CollisionPolicy, OrchestrationConfig, Track, TrackStatus};

/// The scheduler's one-tick verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Launch {
        track_id: String,
        task: String,
        /// Set when this launch resumes a previously stopped run.
        resume_run_id: Option<String>,
    },
    Wait {
        reason: String,
    },
    Stop {
        reason: StopReason,
    },
}

pub struct Scheduler {
    policy: CollisionPolicy,
    max_ticks: u64,
    time_budget: Duration,
    max_auto_resume: u32,
    tracks: Vec<Track>,
    ticks: u64,
    started_at: Instant,
}

impl Scheduler {
    pub fn new(config: &OrchestrationConfig) -> Self {
        let tracks = config
            .tracks
            .iter()
            .enumerate()
            .map(|(i, t)| Track::from_config(i, t))
            .collect();
        Self {
            policy: config.collision_policy,
            max_ticks: config.max_ticks,
            time_budget: Duration::from_secs(config.time_budget_minutes * 60),
            max_auto_resume: config.max_auto_resume,
            tracks,
            ticks: 0,
            started_at: Instant::now(),
        }
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, id: &str) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    fn track_mut(&mut self, id: &str) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|t| t.id == id)
    }

    /// One scheduling decision. The caller (the outer loop) is
    /// responsible for acting on `Launch` and feeding results back via
    /// [`Scheduler::on_track_result`].
    pub fn tick(&mut self, ledger: &TaskLedger) -> Result<Decision> {
        self.ticks += 1;
        if self.ticks > self.max_ticks {
            return Ok(Decision::Stop {
                reason: StopReason::MaxTicksReached,
            });
        }
        if self.started_at.elapsed() > self.time_budget {
            return Ok(Decision::Stop {
                reason: StopReason::TimeBudgetExceeded,
            });
        }

        // Invariant check before anything else: two running tracks may
        // never hold colliding ownership sets.
        let running: Vec<&Track> = self
            .tracks
            .iter()
            .filter(|t| t.status == TrackStatus::Running)
            .collect();
        for (i, a) in running.iter().enumerate() {
            for b in &running[i + 1..] {
                if sets_collide(&a.owns(), &b.owns()) {
                    return Ok(Decision::Stop {
                        reason: StopReason::FileCollision,
                    });
                }
            }
        }
        let any_running = !running.is_empty();
        let running_owns: Vec<Vec<String>> = running.iter().map(|t| t.owns()).collect();

        // Demote tracks whose dependency chain is dead before looking
        // for work.
        self.block_tracks_with_dead_dependencies(ledger)?;

        let mut wait_reasons: Vec<String> = Vec::new();
        let mut launch: Option<(String, String, Option<String>)> = None;

        for track in self.tracks.iter().filter(|t| t.status == TrackStatus::Pending) {
            let Some(step) = track.current() else { continue };

            if self.policy == CollisionPolicy::Serialize && any_running {
                wait_reasons.push(format!("{}: serialize policy, another track running", track.id));
                continue;
            }

            let unmet: Vec<&String> = {
                let mut unmet = Vec::new();
                for dep in &step.depends_on {
                    if !ledger.is_completed(dep)? {
                        unmet.push(dep);
                    }
                }
                unmet
            };
            if !unmet.is_empty() {
                wait_reasons.push(format!(
                    "{}: waiting on {}",
                    track.id,
                    unmet.iter().map(|d| d.as_str()).collect::<Vec<_>>().join(", ")
                ));
                continue;
            }

            let owns = track.owns();
            if running_owns.iter().any(|r| sets_collide(r, &owns)) {
                wait_reasons.push(format!("{}: ownership conflict with a running track", track.id));
                continue;
            }

            // First eligible wins: tracks iterate in insertion order.
            launch = Some((track.id.clone(), step.task.clone(), step.run_id.clone()));
            break;
        }

        if let Some((track_id, task, resume_run_id)) = launch {
            if let Some(track) = self.track_mut(&track_id) {
                track.status = TrackStatus::Running;
            }
            return Ok(Decision::Launch {
                track_id,
                task,
                resume_run_id,
            });
        }

        if !wait_reasons.is_empty() && (any_running || self.dependency_may_still_complete(ledger)?) {
            return Ok(Decision::Wait {
                reason: wait_reasons.join("; "),
            });
        }

        // Nothing eligible, nothing running, nothing that can unblock:
        // all terminal or irrecoverably blocked.
        let all_complete = self.tracks.iter().all(|t| t.status == TrackStatus::Complete);
        if all_complete {
            return Ok(Decision::Stop {
                reason: StopReason::Complete,
            });
        }
        let reason = self
            .tracks
            .iter()
            .filter(|t| t.status != TrackStatus::Complete)
            .find_map(|t| t.steps.iter().find_map(|s| s.result))
            // No track ever produced a result: the block is a standing
            // constraint (e.g. a dependency nothing here provides).
            .unwrap_or(StopReason::GuardFail);
        Ok(Decision::Stop { reason })
    }

    /// Feed a finished track run back into the schedule.
    pub fn on_track_result(
        &mut self,
        track_id: &str,
        run_id: &str,
        reason: StopReason,
    ) -> Result<()> {
        let max_auto_resume = self.max_auto_resume;
        let Some(track) = self.track_mut(track_id) else {
            anyhow::bail!("unknown track '{track_id}'");
        };

        if let Some(step) = track.current_mut() {
            step.run_id = Some(run_id.to_string());
            step.result = Some(reason);
        }

        if reason == StopReason::Complete {
            if track.current_step + 1 < track.steps.len() {
                track.current_step += 1;
                track.status = TrackStatus::Pending;
            } else {
                track.status = TrackStatus::Complete;
            }
            return Ok(());
        }

        // A track stopping with an auto-resumable reason re-enters the
        // queue until the resume budget runs out, then blocks.
        if reason.auto_resumable() {
            if track.auto_resume_count < max_auto_resume {
                track.auto_resume_count += 1;
                track.status = TrackStatus::Pending;
            } else {
                track.status = TrackStatus::Blocked;
            }
            return Ok(());
        }

        track.status = if reason == StopReason::UserStopped {
            TrackStatus::Stopped
        } else {
            TrackStatus::Failed
        };
        Ok(())
    }

    /// A pending track whose dependency belongs to a failed, stopped, or
    /// blocked track can never launch; mark it blocked.
    fn block_tracks_with_dead_dependencies(&mut self, ledger: &TaskLedger) -> Result<()> {
        let dead_tasks: Vec<String> = self
            .tracks
            .iter()
            .filter(|t| {
                matches!(
                    t.status,
                    TrackStatus::Failed | TrackStatus::Stopped | TrackStatus::Blocked
                )
            })
            .flat_map(|t| t.steps.iter().map(|s| s.task.clone()))
            .collect();

        for track in &mut self.tracks {
            if track.status != TrackStatus::Pending {
                continue;
            }
            let mut dead_dep = false;
            if let Some(step) = track.current() {
                for dep in &step.depends_on {
                    if !ledger.is_completed(dep)? && dead_tasks.contains(dep) {
                        dead_dep = true;
                        break;
                    }
                }
            }
            if dead_dep {
                track.status = TrackStatus::Blocked;
            }
        }
        Ok(())
    }

    /// Could a currently-unmet dependency still flip to completed? True
    /// when the providing task belongs to a pending or running track.
    fn dependency_may_still_complete(&self, ledger: &TaskLedger) -> Result<bool> {
        let live_tasks: Vec<&str> = self
            .tracks
            .iter()
            .filter(|t| matches!(t.status, TrackStatus::Pending | TrackStatus::Running))
            .flat_map(|t| t.steps.iter().map(|s| s.task.as_str()))
            .collect();

        for track in self.tracks.iter().filter(|t| t.status == TrackStatus::Pending) {
            let Some(step) = track.current() else { continue };
            for dep in &step.depends_on {
                if !ledger.is_completed(dep)? && live_tasks.contains(&dep.as_str()) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}
