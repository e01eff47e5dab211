//! `runr doctor`
//!
//! Environment and repository health checks, plus a registry-backed
//! explanation of the most recent stop.

use anyhow::Result;
use console::style;
use std::path::Path;

use crate::config::{RunrConfig, RunrPaths};
use crate::gitx::Git;
use crate::store::{RunStore, TaskLedger};
use crate::supervisor::RunState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Ok,
    Warn,
    Fail,
}

#[derive(Debug)]
pub struct Check {
    pub name: &'static str,
    pub status: CheckStatus,
    pub detail: String,
}

pub fn run_checks(repo: &Path) -> Vec<Check> {
    let git = Git::new(repo);
    let paths = RunrPaths::new(repo.to_path_buf());
    let mut checks = Vec::new();

    checks.push(match git.run(["--version"]) {
        Ok(version) => Check {
            name: "git available",
            status: CheckStatus::Ok,
            detail: version,
        },
        Err(err) => Check {
            name: "git available",
            status: CheckStatus::Fail,
            detail: err.to_string(),
        },
    });

    checks.push(match git.run(["rev-parse", "--git-dir"]) {
        Ok(_) => Check {
            name: "repository",
            status: CheckStatus::Ok,
            detail: repo.display().to_string(),
        },
        Err(_) => Check {
            name: "repository",
            status: CheckStatus::Fail,
            detail: format!("{} is not a git repository", repo.display()),
        },
    });

    checks.push(match RunrConfig::load(&paths.config_file()) {
        Ok(config) => {
            let workers = config.workers.len();
            Check {
                name: "config",
                status: if workers == 0 { CheckStatus::Warn } else { CheckStatus::Ok },
                detail: if workers == 0 {
                    "no workers configured; falling back to `claude -p`".to_string()
                } else {
                    format!("{workers} worker(s) configured")
                },
            }
        }
        Err(err) => Check {
            name: "config",
            status: CheckStatus::Fail,
            detail: err.to_string(),
        },
    });

    checks.push(match TaskLedger::new(paths.ledger_file()).entries() {
        Ok(entries) => Check {
            name: "task ledger",
            status: CheckStatus::Ok,
            detail: format!("{} task(s) tracked", entries.len()),
        },
        Err(err) => Check {
            name: "task ledger",
            status: CheckStatus::Fail,
            detail: err.to_string(),
        },
    });

    // Sidecars must point at commits that still resolve.
    let mut dangling = Vec::new();
    if let Ok(entries) = std::fs::read_dir(paths.checkpoints_dir()) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if git.rev_parse(stem).is_err() {
                    dangling.push(stem.to_string());
                }
            }
        }
    }
    checks.push(if dangling.is_empty() {
        Check {
            name: "checkpoint sidecars",
            status: CheckStatus::Ok,
            detail: "all sidecars resolve to commits".to_string(),
        }
    } else {
        Check {
            name: "checkpoint sidecars",
            status: CheckStatus::Warn,
            detail: format!("dangling sidecars (gc can prune): {}", dangling.join(", ")),
        }
    });

    // Explain the latest stopped run through the registry.
    if let Some(run_id) = paths.latest_run_id() {
        let store = RunStore::open(paths.run_dir(&run_id));
        if let Ok(Some(state)) = store.read_state::<RunState>() {
            if let Some(reason) = state.stop_reason {
                let entry = reason.entry();
                checks.push(Check {
                    name: "last run",
                    status: if reason == crate::stop::StopReason::Complete {
                        CheckStatus::Ok
                    } else {
                        CheckStatus::Warn
                    },
                    detail: format!("{run_id} stopped with {reason}: {}", entry.diagnosis),
                });
            } else {
                checks.push(Check {
                    name: "last run",
                    status: CheckStatus::Warn,
                    detail: format!("{run_id} has no stop reason recorded (crashed mid-run?)"),
                });
            }
        }
    }

    checks
}

pub fn cmd_doctor(repo: &Path) -> Result<bool> {
    let checks = run_checks(repo);
    let mut healthy = true;

    for check in &checks {
        let marker = match check.status {
            CheckStatus::Ok => style("ok  ").green(),
            CheckStatus::Warn => style("warn").yellow(),
            CheckStatus::Fail => {
                healthy = false;
                style("FAIL").red()
            }
        };
        println!("[{marker}] {:<20} {}", check.name, check.detail);
    }
    Ok(healthy)
}
