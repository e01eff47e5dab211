//! `runr gc [--apply] [--retention-days N]`
//!
//! Prunes terminal run directories past the retention window and
//! sidecars whose commits no longer resolve. Dry-run by default.

use anyhow::Result;
use chrono::{Duration, Utc};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::RunrPaths;
use crate::gitx::Git;
use crate::store::RunStore;
use crate::supervisor::{Phase, RunState};

pub const DEFAULT_RETENTION_DAYS: i64 = 30;

#[derive(Debug, Default)]
pub struct GcPlan {
    pub run_dirs: Vec<PathBuf>,
    pub sidecars: Vec<PathBuf>,
    pub bytes: u64,
}

pub fn plan_gc(repo: &Path, retention_days: i64) -> Result<GcPlan> {
    let paths = RunrPaths::new(repo.to_path_buf());
    let git = Git::new(repo);
    let cutoff = Utc::now() - Duration::days(retention_days);
    let mut plan = GcPlan::default();

    if let Ok(entries) = std::fs::read_dir(&paths.runs_root) {
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if !path.is_dir() || name.len() != 14 || !name.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            let store = RunStore::open(path.clone());
            let Ok(Some(state)) = store.read_state::<RunState>() else {
                continue;
            };
            if state.phase == Phase::Stopped && state.updated_at < cutoff {
                plan.bytes += dir_size(&path);
                plan.run_dirs.push(path);
            }
        }
    }

    if let Ok(entries) = std::fs::read_dir(paths.checkpoints_dir()) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if git.rev_parse(stem).is_err() {
                plan.bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
                plan.sidecars.push(path);
            }
        }
    }

    Ok(plan)
}

pub fn apply_gc(plan: &GcPlan) -> Result<()> {
    for dir in &plan.run_dirs {
        std::fs::remove_dir_all(dir)?;
    }
    for sidecar in &plan.sidecars {
        std::fs::remove_file(sidecar)?;
    }
    Ok(())
}

fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum()
}

pub fn cmd_gc(repo: &Path, apply: bool, retention_days: i64) -> Result<()> {
    let plan = plan_gc(repo, retention_days)?;

    if plan.run_dirs.is_empty() && plan.sidecars.is_empty() {
        println!("nothing to prune");
        return Ok(());
    }

    for dir in &plan.run_dirs {
        println!("run dir:  {}", dir.display());
    }
    for sidecar in &plan.sidecars {
        println!("sidecar:  {}", sidecar.display());
    }
    println!("total: ~{} KiB", plan.bytes / 1024);

    if apply {
        apply_gc(&plan)?;
        println!("pruned");
    } else {
        println!("dry run; pass --apply to delete");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gitx::testutil::init_repo;
    use crate::scope::ScopeLock;
    use crate::stop::StopReason;
    use crate::store::CheckpointSidecar;
    use tempfile::tempdir;

    fn stopped_run(repo: &Path, run_id: &str, days_old: i64) {
        let paths = RunrPaths::new(repo.to_path_buf());
        let store = RunStore::create(paths.run_dir(run_id)).unwrap();
        let mut state = RunState::new(run_id, &repo.display().to_string(), "tasks/a.md",
            ScopeLock::default());
        state.stop(StopReason::Complete, None);
        state.updated_at = Utc::now() - Duration::days(days_old);
        store.snapshot_state(&state).unwrap();
    }

    #[test]
    fn test_gc_selects_old_terminal_runs_only() {
        let dir = tempdir().unwrap();
        let git = init_repo(dir.path());
        stopped_run(dir.path(), "20250101000000", 90);
        stopped_run(dir.path(), "20260101000000", 1);

        // dangling sidecar + one that resolves
        let paths = RunrPaths::new(dir.path().to_path_buf());
        CheckpointSidecar::new("deadbeefdeadbeefdeadbeefdeadbeefdeadbeef", "20250101000000", 0, "m")
            .write(&paths.checkpoints_dir())
            .unwrap();
        let head = git.head_sha().unwrap();
        CheckpointSidecar::new(&head, "20260101000000", 0, "m")
            .write(&paths.checkpoints_dir())
            .unwrap();

        let plan = plan_gc(dir.path(), DEFAULT_RETENTION_DAYS).unwrap();
        assert_eq!(plan.run_dirs.len(), 1);
        assert!(plan.run_dirs[0].ends_with("20250101000000"));
        assert_eq!(plan.sidecars.len(), 1);

        apply_gc(&plan).unwrap();
        assert!(!paths.run_dir("20250101000000").exists());
        assert!(paths.run_dir("20260101000000").exists());
        assert!(paths.checkpoints_dir().join(format!("{head}.json")).exists());
    }

    #[test]
    fn test_gc_keeps_active_runs() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        let paths = RunrPaths::new(dir.path().to_path_buf());
        let store = RunStore::create(paths.run_dir("20250101000000")).unwrap();
        let mut state = RunState::new("20250101000000", "r", "t", ScopeLock::default());
        // old but not terminal
        state.updated_at = Utc::now() - Duration::days(90);
        store.snapshot_state(&state).unwrap();

        let plan = plan_gc(dir.path(), DEFAULT_RETENTION_DAYS).unwrap();
        assert!(plan.run_dirs.is_empty());
    }
}
