//! `runr orchestrate run --config <yaml>`
//!
//! The outer loop around the single-tick scheduler. Each launch spawns a
//! supervisor as a child process (`runr run` / `runr resume`), so tracks
//! get OS-level isolation; their exit codes map back to stop reasons
//! through the registry.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::config::RunrPaths;
use crate::orchestrate::{CollisionPolicy, Decision, OrchestrationConfig, Scheduler};
use crate::stop::StopReason;
use crate::store::TaskLedger;

const IDLE_POLL: Duration = Duration::from_millis(200);

struct RunningChild {
    child: tokio::process::Child,
    task: String,
}

pub async fn cmd_orchestrate(
    repo: &Path,
    config_path: &Path,
    policy_override: Option<CollisionPolicy>,
) -> Result<StopReason> {
    let mut config = OrchestrationConfig::load(config_path)?;
    if let Some(policy) = policy_override {
        config.collision_policy = policy;
    }

    let paths = RunrPaths::new(repo.to_path_buf());
    let ledger = TaskLedger::new(paths.ledger_file());
    let mut scheduler = Scheduler::new(&config);
    let mut children: HashMap<String, RunningChild> = HashMap::new();
    let exe = std::env::current_exe().context("cannot locate the runr binary")?;

    loop {
        reap_finished(&mut scheduler, &mut children, &ledger).await?;

        match scheduler.tick(&ledger)? {
            Decision::Launch {
                track_id,
                task,
                resume_run_id,
            } => {
                let mut command = tokio::process::Command::new(&exe);
                command.arg("--repo").arg(repo);
                match &resume_run_id {
                    Some(run_id) => {
                        command.arg("resume").arg(run_id).arg("--auto");
                    }
                    None => {
                        command.arg("run").arg("--task").arg(&task);
                    }
                }
                tracing::info!(
                    track = %track_id,
                    task = %task,
                    resume = resume_run_id.as_deref().unwrap_or("-"),
                    "launching track"
                );
                let child = command
                    .kill_on_drop(true)
                    .spawn()
                    .with_context(|| format!("failed to launch supervisor for {task}"))?;
                children.insert(track_id, RunningChild { child, task });
            }
            Decision::Wait { reason } => {
                tracing::debug!(reason = %reason, "waiting");
                tokio::time::sleep(IDLE_POLL).await;
            }
            Decision::Stop { reason } => {
                // Budget stops can leave children running; end them
                // cooperatively before reporting.
                for (track_id, mut running) in children.drain() {
                    tracing::warn!(track = %track_id, "stopping in-flight track");
                    running.child.start_kill().ok();
                    let _ = running.child.wait().await;
                }
                tracing::info!(reason = %reason, "orchestration stopped");
                return Ok(reason);
            }
        }
    }
}

/// Feed every exited child back into the scheduler.
async fn reap_finished(
    scheduler: &mut Scheduler,
    children: &mut HashMap<String, RunningChild>,
    ledger: &TaskLedger,
) -> Result<()> {
    let mut finished = Vec::new();
    for (track_id, running) in children.iter_mut() {
        if let Some(status) = running.child.try_wait()? {
            finished.push((track_id.clone(), status));
        }
    }

    for (track_id, status) in finished {
        let running = children.remove(&track_id).expect("finished child exists");
        let reason = status
            .code()
            .and_then(StopReason::from_exit_code)
            // killed by signal or an unmapped code: treat as a stall so
            // the auto-resume policy can take a crack at it
            .unwrap_or(StopReason::StalledTimeout);
        let run_id = ledger
            .status_of(&running.task)?
            .and_then(|entry| entry.last_run_id)
            .unwrap_or_default();
        tracing::info!(track = %track_id, reason = %reason, run_id = %run_id, "track finished");
        scheduler.on_track_result(&track_id, &run_id, reason)?;
    }
    Ok(())
}
