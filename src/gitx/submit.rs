//! Landing a checkpoint on a target branch via cherry-pick.
//!
//! The invariant callers rely on: submit never leaves the repo on a
//! branch other than the one it started on, and a conflicted cherry-pick
//! is fully aborted before returning, leaving the working tree clean.

use thiserror::Error;

use super::{Git, GitError};

/// Pre-check failures with stable reason codes.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("dirty_tree: working tree has uncommitted changes")]
    DirtyTree,
    #[error("target_branch_missing: branch '{0}' does not exist")]
    TargetBranchMissing(String),
    #[error(transparent)]
    Git(#[from] GitError),
}

impl SubmitError {
    /// The stable reason code recorded in events and handoffs.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::DirtyTree => "dirty_tree",
            Self::TargetBranchMissing(_) => "target_branch_missing",
            Self::Git(_) => "git_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted {
        new_sha: String,
        target_branch: String,
    },
    Conflict {
        conflicted_files: Vec<String>,
        recovery_commands: Vec<String>,
    },
}

impl Git {
    /// Cherry-pick `checkpoint_sha` onto `target_branch`.
    pub fn submit(
        &self,
        checkpoint_sha: &str,
        target_branch: &str,
    ) -> Result<SubmitOutcome, SubmitError> {
        if self.is_dirty()? {
            return Err(SubmitError::DirtyTree);
        }
        if !self.branch_exists(target_branch) {
            return Err(SubmitError::TargetBranchMissing(target_branch.to_string()));
        }

        let starting_branch = self.current_branch()?;
        self.checkout(target_branch)?;

        match self.run(["cherry-pick", checkpoint_sha]) {
            Ok(_) => {
                let new_sha = self.head_sha()?;
                self.checkout(&starting_branch)?;
                Ok(SubmitOutcome::Submitted {
                    new_sha,
                    target_branch: target_branch.to_string(),
                })
            }
            Err(pick_err) => {
                tracing::warn!(error = %pick_err, "cherry-pick conflicted, aborting");
                let conflicted_files = self
                    .run(["diff", "--name-only", "--diff-filter=U"])
                    .map(|out| out.lines().map(str::to_string).collect())
                    .unwrap_or_default();

                // Abort may itself fail when the pick died before
                // creating CHERRY_PICK_HEAD; branch restoration still
                // has to happen.
                if let Err(abort_err) = self.run(["cherry-pick", "--abort"]) {
                    tracing::warn!(error = %abort_err, "cherry-pick --abort failed");
                }
                self.checkout(&starting_branch)?;

                let recovery_commands = vec![
                    format!("git checkout {target_branch}"),
                    format!("git cherry-pick {checkpoint_sha}"),
                    "git status".to_string(),
                    format!("git checkout {starting_branch}"),
                ];
                Ok(SubmitOutcome::Conflict {
                    conflicted_files,
                    recovery_commands,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{commit_file, init_repo};
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_submit_lands_commit_and_restores_branch() {
        let dir = tempdir().unwrap();
        let git = init_repo(dir.path());

        git.create_branch("target").unwrap();
        git.checkout("main").unwrap();
        git.create_branch("work").unwrap();
        let sha = commit_file(&git, "feature.txt", "feature\n", "add feature");

        let outcome = git.submit(&sha, "target").unwrap();
        match outcome {
            SubmitOutcome::Submitted { target_branch, .. } => {
                assert_eq!(target_branch, "target");
            }
            other => panic!("expected Submitted, got {other:?}"),
        }
        assert_eq!(git.current_branch().unwrap(), "work");

        git.checkout("target").unwrap();
        assert!(dir.path().join("feature.txt").exists());
    }

    #[test]
    fn test_submit_conflict_aborts_and_restores() {
        let dir = tempdir().unwrap();
        let git = init_repo(dir.path());

        // target branch changes the same file differently
        git.create_branch("target").unwrap();
        commit_file(&git, "shared.txt", "target version\n", "target edit");
        git.checkout("main").unwrap();
        git.create_branch("work").unwrap();
        let sha = commit_file(&git, "shared.txt", "work version\n", "work edit");

        let outcome = git.submit(&sha, "target").unwrap();
        match outcome {
            SubmitOutcome::Conflict {
                conflicted_files,
                recovery_commands,
            } => {
                assert_eq!(conflicted_files, vec!["shared.txt"]);
                assert!(recovery_commands.iter().any(|c| c.contains("cherry-pick")));
            }
            other => panic!("expected Conflict, got {other:?}"),
        }
        // branch restored, tree clean
        assert_eq!(git.current_branch().unwrap(), "work");
        assert!(!git.is_dirty().unwrap());
    }

    #[test]
    fn test_submit_refuses_dirty_tree() {
        let dir = tempdir().unwrap();
        let git = init_repo(dir.path());
        git.create_branch("target").unwrap();
        git.checkout("main").unwrap();
        let sha = git.head_sha().unwrap();
        std::fs::write(dir.path().join("dirty.txt"), "uncommitted").unwrap();

        let err = git.submit(&sha, "target").unwrap_err();
        assert!(matches!(err, SubmitError::DirtyTree));
        assert_eq!(err.reason_code(), "dirty_tree");
    }

    #[test]
    fn test_submit_refuses_missing_branch() {
        let dir = tempdir().unwrap();
        let git = init_repo(dir.path());
        let sha = git.head_sha().unwrap();

        let err = git.submit(&sha, "does-not-exist").unwrap_err();
        assert!(matches!(err, SubmitError::TargetBranchMissing(_)));
        assert_eq!(err.reason_code(), "target_branch_missing");
    }
}
