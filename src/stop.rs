//! Stop reason registry for the runr supervisor.
//!
//! Every way a run can end is a stable code in this table. Three surfaces
//! consume it and nothing else: CLI exit-code selection, `doctor`
//! diagnosis output, and the orchestrator's auto-resume policy. Exit
//! codes are disjoint across reasons; `0` is reserved for `complete`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical stop reason codes. Stable: these strings appear in
/// `state.json`, `handoffs/stop.json`, the task ledger, and timeline
/// events, so renaming one is a breaking change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// All milestones verified and checkpointed.
    Complete,
    /// Verification kept failing past the retry budget.
    VerificationFailedMaxRetries,
    /// A verification tier blew its wall-clock budget.
    VerificationTimeout,
    /// Reviewer returned request_changes three times in a row.
    ReviewLoopDetected,
    /// Implementer touched a path outside the scope lock.
    ScopeViolation,
    /// No worker output for longer than the stall window.
    StalledTimeout,
    /// A single worker call exceeded its wall-clock timeout.
    WorkerCallTimeout,
    /// Worker output failed schema validation.
    WorkerParseFailed,
    /// A guard other than scope rejected the run (evidence gate, lockfile).
    GuardFail,
    /// The working tree was dirty where a clean tree is required.
    DirtyTree,
    /// Two tracks' ownership sets collide irrecoverably.
    FileCollision,
    /// Operator interrupted the run.
    UserStopped,
    /// Orchestration consumed its tick budget.
    MaxTicksReached,
    /// Orchestration consumed its time budget.
    TimeBudgetExceeded,
}

/// Failure family, used for grouping in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopFamily {
    ResourceLimit,
    Constraint,
    Failure,
    Review,
    Worker,
    User,
}

/// One registry row.
#[derive(Debug, Clone, Copy)]
pub struct StopEntry {
    pub code: StopReason,
    pub title: &'static str,
    pub family: StopFamily,
    pub exit_code: i32,
    pub auto_resumable: bool,
    pub diagnosis: &'static str,
}

/// The registry. Immutable data, not a singleton: callers index it
/// through [`StopReason::entry`].
pub const STOP_REGISTRY: &[StopEntry] = &[
    StopEntry {
        code: StopReason::Complete,
        title: "Run complete",
        family: StopFamily::User,
        exit_code: 0,
        auto_resumable: false,
        diagnosis: "All milestones verified and checkpointed. Nothing to do.",
    },
    StopEntry {
        code: StopReason::ScopeViolation,
        title: "Scope violation",
        family: StopFamily::Constraint,
        exit_code: 2,
        auto_resumable: false,
        diagnosis: "The implementer modified files outside the allowlist. Inspect the \
                    violations in handoffs/stop.json, then widen the task's allowlist_add \
                    or revert the stray edits before resuming.",
    },
    StopEntry {
        code: StopReason::GuardFail,
        title: "Guard rejected the run",
        family: StopFamily::Constraint,
        exit_code: 3,
        auto_resumable: false,
        diagnosis: "A no-changes claim carried no usable evidence, or a lockfile was \
                    touched. Check the last worker output and re-run with a corrected task.",
    },
    StopEntry {
        code: StopReason::DirtyTree,
        title: "Dirty working tree",
        family: StopFamily::Constraint,
        exit_code: 4,
        auto_resumable: false,
        diagnosis: "The working tree has uncommitted changes where a clean tree is \
                    required. Commit, stash, or record an intervention, then retry.",
    },
    StopEntry {
        code: StopReason::FileCollision,
        title: "File ownership collision",
        family: StopFamily::Constraint,
        exit_code: 5,
        auto_resumable: false,
        diagnosis: "Two tracks own overlapping file patterns and can never run. Split \
                    the ownership globs or serialize the tracks.",
    },
    StopEntry {
        code: StopReason::VerificationFailedMaxRetries,
        title: "Verification failed",
        family: StopFamily::Failure,
        exit_code: 10,
        auto_resumable: false,
        diagnosis: "Verification commands kept failing past the retry budget. Read \
                    artifacts/tests_*.log, fix or intervene, then resume.",
    },
    StopEntry {
        code: StopReason::VerificationTimeout,
        title: "Verification timed out",
        family: StopFamily::Failure,
        exit_code: 11,
        auto_resumable: false,
        diagnosis: "The verification tiers exceeded max_verify_time_per_milestone. \
                    Raise the budget or trim the tier commands.",
    },
    StopEntry {
        code: StopReason::ReviewLoopDetected,
        title: "Review loop",
        family: StopFamily::Review,
        exit_code: 20,
        auto_resumable: false,
        diagnosis: "The reviewer requested changes three times in a row on one \
                    milestone. The task likely needs a human decision; record an \
                    intervention or rewrite the milestone goal.",
    },
    StopEntry {
        code: StopReason::WorkerParseFailed,
        title: "Worker output unparsable",
        family: StopFamily::Worker,
        exit_code: 31,
        auto_resumable: true,
        diagnosis: "The worker's output did not match the expected schema. Often \
                    transient; resume retries the same phase.",
    },
    StopEntry {
        code: StopReason::WorkerCallTimeout,
        title: "Worker call timed out",
        family: StopFamily::Worker,
        exit_code: 32,
        auto_resumable: true,
        diagnosis: "A single worker call exceeded its wall-clock timeout and was \
                    killed. Resume retries from the last successful phase.",
    },
    StopEntry {
        code: StopReason::TimeBudgetExceeded,
        title: "Time budget exceeded",
        family: StopFamily::ResourceLimit,
        exit_code: 124,
        auto_resumable: true,
        diagnosis: "The orchestration ran out of wall-clock budget. Resume continues \
                    from the recorded checkpoints.",
    },
    StopEntry {
        code: StopReason::MaxTicksReached,
        title: "Tick budget exceeded",
        family: StopFamily::ResourceLimit,
        exit_code: 125,
        auto_resumable: true,
        diagnosis: "The orchestration consumed max_ticks. Resume continues from the \
                    recorded checkpoints.",
    },
    StopEntry {
        code: StopReason::StalledTimeout,
        title: "Worker stalled",
        family: StopFamily::ResourceLimit,
        exit_code: 126,
        auto_resumable: true,
        diagnosis: "No worker output for longer than the stall window; the worker was \
                    killed on the last verified checkpoint. Resuming is usually safe.",
    },
    StopEntry {
        code: StopReason::UserStopped,
        title: "Stopped by user",
        family: StopFamily::User,
        exit_code: 130,
        auto_resumable: false,
        diagnosis: "The operator interrupted the run. State was persisted; resume when \
                    ready.",
    },
];

impl StopReason {
    /// Look up this reason's registry row.
    pub fn entry(self) -> &'static StopEntry {
        // The registry covers every variant; the expect documents the
        // invariant for anyone who adds a variant without a row.
        STOP_REGISTRY
            .iter()
            .find(|e| e.code == self)
            .expect("every StopReason has a registry entry")
    }

    pub fn exit_code(self) -> i32 {
        self.entry().exit_code
    }

    pub fn family(self) -> StopFamily {
        self.entry().family
    }

    pub fn auto_resumable(self) -> bool {
        self.entry().auto_resumable
    }

    pub fn diagnosis(self) -> &'static str {
        self.entry().diagnosis
    }

    /// Reverse lookup by exit code. Total because exit codes are
    /// injective across the registry.
    pub fn from_exit_code(code: i32) -> Option<StopReason> {
        STOP_REGISTRY
            .iter()
            .find(|e| e.exit_code == code)
            .map(|e| e.code)
    }

    /// The stable wire string, identical to the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::VerificationFailedMaxRetries => "verification_failed_max_retries",
            Self::VerificationTimeout => "verification_timeout",
            Self::ReviewLoopDetected => "review_loop_detected",
            Self::ScopeViolation => "scope_violation",
            Self::StalledTimeout => "stalled_timeout",
            Self::WorkerCallTimeout => "worker_call_timeout",
            Self::WorkerParseFailed => "worker_parse_failed",
            Self::GuardFail => "guard_fail",
            Self::DirtyTree => "dirty_tree",
            Self::FileCollision => "file_collision",
            Self::UserStopped => "user_stopped",
            Self::MaxTicksReached => "max_ticks_reached",
            Self::TimeBudgetExceeded => "time_budget_exceeded",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StopReason {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        STOP_REGISTRY
            .iter()
            .map(|e| e.code)
            .find(|c| c.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown stop reason '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn exit_codes_are_injective() {
        let mut seen = HashSet::new();
        for entry in STOP_REGISTRY {
            assert!(
                seen.insert(entry.exit_code),
                "duplicate exit code {} for {:?}",
                entry.exit_code,
                entry.code
            );
        }
    }

    #[test]
    fn every_reason_has_an_entry() {
        // entry() panics on a missing row; touch every variant.
        let all = [
            StopReason::Complete,
            StopReason::VerificationFailedMaxRetries,
            StopReason::VerificationTimeout,
            StopReason::ReviewLoopDetected,
            StopReason::ScopeViolation,
            StopReason::StalledTimeout,
            StopReason::WorkerCallTimeout,
            StopReason::WorkerParseFailed,
            StopReason::GuardFail,
            StopReason::DirtyTree,
            StopReason::FileCollision,
            StopReason::UserStopped,
            StopReason::MaxTicksReached,
            StopReason::TimeBudgetExceeded,
        ];
        for reason in all {
            let entry = reason.entry();
            assert_eq!(entry.code, reason);
            assert!(!entry.diagnosis.is_empty());
        }
    }

    #[test]
    fn complete_is_the_only_zero_exit() {
        for entry in STOP_REGISTRY {
            if entry.exit_code == 0 {
                assert_eq!(entry.code, StopReason::Complete);
            }
        }
        assert_eq!(StopReason::Complete.exit_code(), 0);
    }

    #[test]
    fn canonical_exit_codes() {
        assert_eq!(StopReason::ScopeViolation.exit_code(), 2);
        assert_eq!(StopReason::VerificationFailedMaxRetries.exit_code(), 10);
        assert_eq!(StopReason::ReviewLoopDetected.exit_code(), 20);
        assert_eq!(StopReason::WorkerCallTimeout.exit_code(), 32);
        assert_eq!(StopReason::StalledTimeout.exit_code(), 126);
        assert_eq!(StopReason::UserStopped.exit_code(), 130);
    }

    #[test]
    fn auto_resume_policy_matches_families() {
        // Transient resource and worker stops resume; constraint, failure,
        // and review stops need a human.
        assert!(StopReason::StalledTimeout.auto_resumable());
        assert!(StopReason::WorkerCallTimeout.auto_resumable());
        assert!(StopReason::MaxTicksReached.auto_resumable());
        assert!(!StopReason::ReviewLoopDetected.auto_resumable());
        assert!(!StopReason::ScopeViolation.auto_resumable());
        assert!(!StopReason::DirtyTree.auto_resumable());
    }

    #[test]
    fn wire_strings_round_trip() {
        for entry in STOP_REGISTRY {
            let s = entry.code.as_str();
            let parsed: StopReason = s.parse().unwrap();
            assert_eq!(parsed, entry.code);
            // serde agrees with as_str
            let json = serde_json::to_string(&entry.code).unwrap();
            assert_eq!(json, format!("\"{s}\""));
        }
    }

    #[test]
    fn unknown_reason_is_rejected() {
        assert!("not_a_reason".parse::<StopReason>().is_err());
    }
}
