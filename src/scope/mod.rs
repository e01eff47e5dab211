//! Scope and evidence guards.
//!
//! The scope guard runs after every implementation phase: every changed
//! path must match at least one allow pattern and no deny pattern.
//! Task-local `allowlist_add` globs widen the allowlist and can never
//! narrow it. The evidence gate vets `no_changes_needed` claims so a
//! worker cannot skip a milestone by assertion alone.

pub mod overlap;

pub use overlap::{normalize_pattern, patterns_overlap, sets_collide};

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};

use crate::gitx::{ChangeSet, IgnoreCheckStatus};

/// `*` must not cross `/`; `**` still recurses. Hidden files are in
/// scope like any other path.
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// The run's file-boundary contract, fixed at INIT.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopeLock {
    pub allowlist: Vec<String>,
    pub denylist: Vec<String>,
    /// Task-local additions, kept separate so receipts show provenance.
    #[serde(default)]
    pub allowlist_add: Vec<String>,
    /// Never editable by a worker, allowlisted or not.
    #[serde(default)]
    pub lockfiles: Vec<String>,
}

impl ScopeLock {
    pub fn new(allowlist: Vec<String>, denylist: Vec<String>) -> Self {
        Self {
            allowlist: allowlist.into_iter().map(|p| normalize_pattern(&p)).collect(),
            denylist: denylist.into_iter().map(|p| normalize_pattern(&p)).collect(),
            allowlist_add: Vec::new(),
            lockfiles: Vec::new(),
        }
    }

    pub fn with_additions(mut self, additions: &[String]) -> Self {
        self.allowlist_add
            .extend(additions.iter().map(|p| normalize_pattern(p)));
        self
    }

    pub fn with_lockfiles(mut self, lockfiles: &[String]) -> Self {
        self.lockfiles
            .extend(lockfiles.iter().map(|p| normalize_pattern(p)));
        self
    }

    fn matches_any(patterns: &[String], path: &str) -> bool {
        patterns.iter().any(|p| {
            Pattern::new(p)
                .map(|pat| pat.matches_with(path, MATCH_OPTIONS))
                .unwrap_or(false)
        })
    }

    /// A path is allowed iff it matches at least one allow pattern
    /// (base or task-local) and no deny pattern.
    pub fn allows(&self, path: &str) -> bool {
        let path = normalize_pattern(path);
        let allowed = Self::matches_any(&self.allowlist, &path)
            || Self::matches_any(&self.allowlist_add, &path);
        allowed && !Self::matches_any(&self.denylist, &path)
    }

    pub fn is_lockfile(&self, path: &str) -> bool {
        Self::matches_any(&self.lockfiles, &normalize_pattern(path))
    }
}

/// Outcome of a scope check over one change set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScopeReport {
    pub allowed: Vec<String>,
    pub violations: Vec<String>,
    pub lockfile_hits: Vec<String>,
    /// Ignored paths the adapter dropped before the guard ever saw them.
    pub ignored_dropped: usize,
    /// check-ignore failed; the guard treated every path as tracked.
    pub degraded: bool,
}

impl ScopeReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty() && self.lockfile_hits.is_empty()
    }
}

/// Check a change set against the lock. Renames already contribute both
/// paths in the `ChangeSet`, so each end is checked independently here.
pub fn check_scope(lock: &ScopeLock, changes: &ChangeSet) -> ScopeReport {
    let degraded = changes.ignore_check_status == IgnoreCheckStatus::Failed;
    if degraded {
        tracing::warn!("ignore check unavailable; scope guard running in strict mode");
    }

    let mut report = ScopeReport {
        ignored_dropped: changes.ignored,
        degraded,
        ..Default::default()
    };

    for path in &changes.files {
        if lock.is_lockfile(path) {
            report.lockfile_hits.push(path.clone());
        } else if lock.allows(path) {
            report.allowed.push(path.clone());
        } else {
            report.violations.push(path.clone());
        }
    }
    report
}

/// One command an implementer ran as evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRun {
    pub command: String,
    pub exit_code: i32,
}

/// Evidence attached to a `no_changes_needed` claim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoChangesEvidence {
    #[serde(default)]
    pub files_checked: Vec<String>,
    #[serde(default)]
    pub grep_output: Option<String>,
    #[serde(default)]
    pub commands_run: Vec<CommandRun>,
}

/// Cap applied to grep evidence before judging emptiness.
const GREP_EVIDENCE_CAP: usize = 8 * 1024;

/// Accept a no-changes claim iff at least one evidence channel holds up:
/// inspected files all inside the allowlist, non-empty search output, or
/// commands that all exited zero.
pub fn evidence_accepts(lock: &ScopeLock, evidence: &NoChangesEvidence) -> bool {
    if !evidence.files_checked.is_empty()
        && evidence.files_checked.iter().all(|f| lock.allows(f))
    {
        return true;
    }
    if let Some(grep) = &evidence.grep_output {
        let capped = crate::util::truncate_bytes(grep, GREP_EVIDENCE_CAP);
        if !capped.trim().is_empty() {
            return true;
        }
    }
    if !evidence.commands_run.is_empty()
        && evidence.commands_run.iter().all(|c| c.exit_code == 0)
    {
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn changes(files: &[&str]) -> ChangeSet {
        ChangeSet {
            files: files.iter().map(|s| s.to_string()).collect(),
            ignored: 0,
            ignore_check_status: IgnoreCheckStatus::Ok,
        }
    }

    fn lock() -> ScopeLock {
        ScopeLock::new(
            vec!["src/**".into(), "Cargo.toml".into()],
            vec!["src/secrets/**".into()],
        )
    }

    #[test]
    fn test_allow_and_deny() {
        let lock = lock();
        assert!(lock.allows("src/main.rs"));
        assert!(lock.allows("src/deep/nested/mod.rs"));
        assert!(lock.allows("Cargo.toml"));
        assert!(!lock.allows("README.md"));
        assert!(!lock.allows("src/secrets/key.pem"));
        assert!(!lock.allows("../outside.txt"));
    }

    #[test]
    fn test_allowlist_add_widens_only() {
        let lock = lock().with_additions(&["docs/**".to_string()]);
        assert!(lock.allows("docs/guide.md"));
        // the base allowlist is untouched
        assert!(lock.allows("src/main.rs"));
        // deny still wins over additions
        let lock = lock.with_additions(&["src/secrets/**".to_string()]);
        assert!(!lock.allows("src/secrets/key.pem"));
    }

    #[test]
    fn test_check_scope_splits_violations() {
        let report = check_scope(&lock(), &changes(&["src/ok.rs", "stray.txt"]));
        assert_eq!(report.allowed, vec!["src/ok.rs"]);
        assert_eq!(report.violations, vec!["stray.txt"]);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_rename_both_ends_checked() {
        // The adapter hands both ends of a rename; the stray end violates.
        let report = check_scope(&lock(), &changes(&["src/new.rs", "old_root.rs"]));
        assert_eq!(report.violations, vec!["old_root.rs"]);
    }

    #[test]
    fn test_lockfile_hit_is_not_a_plain_violation() {
        let lock = lock().with_lockfiles(&["Cargo.lock".to_string()]);
        let report = check_scope(&lock, &changes(&["Cargo.lock", "src/a.rs"]));
        assert_eq!(report.lockfile_hits, vec!["Cargo.lock"]);
        assert_eq!(report.allowed, vec!["src/a.rs"]);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_degraded_mode_flagged() {
        let set = ChangeSet {
            files: vec!["src/a.rs".into()],
            ignored: 0,
            ignore_check_status: IgnoreCheckStatus::Failed,
        };
        let report = check_scope(&lock(), &set);
        assert!(report.degraded);
        assert_eq!(report.allowed, vec!["src/a.rs"]);
    }

    #[test]
    fn test_ignored_count_propagates() {
        let set = ChangeSet {
            files: vec![],
            ignored: 3,
            ignore_check_status: IgnoreCheckStatus::Ok,
        };
        let report = check_scope(&lock(), &set);
        assert_eq!(report.ignored_dropped, 3);
        assert!(report.is_clean());
    }

    // ── evidence gate ─────────────────────────────────────────────────

    #[test]
    fn test_evidence_files_checked_must_be_allowlisted() {
        let lock = lock();
        let good = NoChangesEvidence {
            files_checked: vec!["src/a.rs".into(), "src/b.rs".into()],
            ..Default::default()
        };
        assert!(evidence_accepts(&lock, &good));

        let bad = NoChangesEvidence {
            files_checked: vec!["src/a.rs".into(), "/etc/passwd".into()],
            ..Default::default()
        };
        assert!(!evidence_accepts(&lock, &bad));
    }

    #[test]
    fn test_evidence_grep_requires_substance() {
        let lock = lock();
        let whitespace = NoChangesEvidence {
            grep_output: Some("   \n\t".into()),
            ..Default::default()
        };
        assert!(!evidence_accepts(&lock, &whitespace));

        let real = NoChangesEvidence {
            grep_output: Some("src/a.rs:42: already handled\n".into()),
            ..Default::default()
        };
        assert!(evidence_accepts(&lock, &real));
    }

    #[test]
    fn test_evidence_commands_all_must_pass() {
        let lock = lock();
        let good = NoChangesEvidence {
            commands_run: vec![
                CommandRun { command: "cargo test".into(), exit_code: 0 },
                CommandRun { command: "cargo clippy".into(), exit_code: 0 },
            ],
            ..Default::default()
        };
        assert!(evidence_accepts(&lock, &good));

        let bad = NoChangesEvidence {
            commands_run: vec![CommandRun { command: "cargo test".into(), exit_code: 1 }],
            ..Default::default()
        };
        assert!(!evidence_accepts(&lock, &bad));
    }

    #[test]
    fn test_empty_evidence_rejected() {
        assert!(!evidence_accepts(&lock(), &NoChangesEvidence::default()));
    }
}
