//! Subprocess wrapper over the `git` binary.
//!
//! Why the CLI and not a bindings crate: the supervisor's git needs are
//! working-tree-heavy (status, staging, cherry-pick, branch juggling),
//! and the CLI's refusal to clobber uncommitted work is exactly the
//! safety behavior we want to inherit rather than re-implement. All
//! operations are explicit; the adapter holds no state beyond the repo
//! path.
//!
//! Checkpoint commits are recognizable three ways, checked in this
//! order: canonical subject, `Runr-Checkpoint` trailer, sidecar file
//! matching the sha.

pub mod changes;
pub mod checkpoint;
pub mod submit;

pub use changes::{ChangeSet, IgnoreCheckStatus};
pub use checkpoint::{
    checkpoint_subject, is_checkpoint_message, parse_checkpoint_subject, CheckpointRef,
    CHECKPOINT_TRAILER_KEY, INTERVENTION_TRAILER_KEY, RUN_ID_TRAILER_KEY,
};
pub use submit::{SubmitError, SubmitOutcome};

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git executable not found or not runnable")]
    NotAvailable,
    #[error("git {args} failed: {stderr}")]
    CommandFailed { args: String, stderr: String },
    #[error("nothing to commit for checkpoint")]
    NothingToCommit,
    #[error("HEAD is a checkpoint commit; refusing to amend (use force)")]
    AmendBlocked,
    #[error("ledger mode refuses amend without an explicit override")]
    AmendBlockedLedger,
    #[error("io error running git: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GitError>;

/// One repository, addressed with `-C` on every call.
#[derive(Debug, Clone)]
pub struct Git {
    repo: PathBuf,
}

impl Git {
    pub fn new(repo: &Path) -> Self {
        Self {
            repo: repo.to_path_buf(),
        }
    }

    pub fn repo(&self) -> &Path {
        &self.repo
    }

    /// Run git with the given args; trimmed stdout on success, stderr in
    /// the error otherwise. Public as an escape hatch for callers that
    /// need a one-off plumbing command the typed surface does not cover.
    pub fn run<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let args: Vec<std::ffi::OsString> =
            args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.repo)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| {
                if err.kind() == std::io::ErrorKind::NotFound {
                    GitError::NotAvailable
                } else {
                    GitError::Io(err)
                }
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
        } else {
            Err(GitError::CommandFailed {
                args: args
                    .iter()
                    .map(|a| a.to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    /// Like [`run`], but feeds `stdin` to the child and returns raw
    /// stdout bytes along with the exit code. Used by check-ignore,
    /// where exit code 1 is a normal outcome.
    pub(crate) fn run_with_stdin(
        &self,
        args: &[&str],
        stdin: &[u8],
    ) -> Result<(Vec<u8>, Option<i32>)> {
        use std::io::Write;

        let mut child = Command::new("git")
            .arg("-C")
            .arg(&self.repo)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                if err.kind() == std::io::ErrorKind::NotFound {
                    GitError::NotAvailable
                } else {
                    GitError::Io(err)
                }
            })?;

        if let Some(mut pipe) = child.stdin.take() {
            pipe.write_all(stdin)?;
        }
        let output = child.wait_with_output()?;
        Ok((output.stdout, output.status.code()))
    }

    // ── read-only queries ──────────────────────────────────────────────

    pub fn head_sha(&self) -> Result<String> {
        self.run(["rev-parse", "HEAD"])
    }

    pub fn rev_parse(&self, rev: &str) -> Result<String> {
        let spec = format!("{rev}^{{commit}}");
        self.run(["rev-parse", "--verify", spec.as_str()])
    }

    pub fn current_branch(&self) -> Result<String> {
        self.run(["rev-parse", "--abbrev-ref", "HEAD"])
    }

    pub fn branch_exists(&self, branch: &str) -> bool {
        let refname = format!("refs/heads/{branch}");
        self.run(["rev-parse", "--verify", "--quiet", refname.as_str()])
            .is_ok()
    }

    pub fn is_dirty(&self) -> Result<bool> {
        Ok(!self.run(["status", "--porcelain"])?.is_empty())
    }

    /// True iff `ancestor` is an ancestor of `descendant`.
    pub fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        match self.run(["merge-base", "--is-ancestor", ancestor, descendant]) {
            Ok(_) => Ok(true),
            // exit 1 means "no"; anything else is a real failure
            Err(GitError::CommandFailed { stderr, .. }) if stderr.is_empty() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Full commit message (subject + body + trailers) for a sha.
    pub fn commit_message(&self, sha: &str) -> Result<String> {
        self.run(["log", "-1", "--format=%B", sha])
    }

    /// `%H|%ct|%s` lines for a revision range, newest first.
    pub fn log_subjects(&self, range: &str) -> Result<Vec<LogLine>> {
        let raw = self.run(["log", "--format=%H|%ct|%s", range])?;
        Ok(raw.lines().filter_map(LogLine::parse).collect())
    }

    /// Same, across all refs. Used by the trailer-matched resume scan.
    pub fn log_subjects_all(&self) -> Result<Vec<LogLine>> {
        let raw = self.run(["log", "--all", "--format=%H|%ct|%s"])?;
        Ok(raw.lines().filter_map(LogLine::parse).collect())
    }

    /// `sha<TAB>subject` pairs for `base..head`, oldest first.
    pub fn commits_in_range(&self, base: &str, head: &str) -> Result<Vec<(String, String)>> {
        let range = format!("{base}..{head}");
        let raw = self.run(["log", "--reverse", "--format=%H\t%s", range.as_str()])?;
        Ok(raw
            .lines()
            .filter_map(|line| {
                let (sha, subject) = line.split_once('\t')?;
                Some((sha.to_string(), subject.to_string()))
            })
            .collect())
    }

    /// Files changed between two revs.
    pub fn files_changed_between(&self, base: &str, head: &str) -> Result<Vec<String>> {
        let range = format!("{base}..{head}");
        let raw = self.run(["diff", "--name-only", range.as_str()])?;
        Ok(raw.lines().map(str::to_string).collect())
    }

    /// `--shortstat` summary plus (added, deleted) line counts.
    pub fn diffstat(&self, base: &str, head: &str) -> Result<(String, u64, u64)> {
        let range = format!("{base}..{head}");
        let stat = self.run(["diff", "--shortstat", range.as_str()])?;
        let numstat = self.run(["diff", "--numstat", range.as_str()])?;
        let mut added = 0u64;
        let mut deleted = 0u64;
        for line in numstat.lines() {
            let mut parts = line.split_whitespace();
            // binary files report "-"; treat as zero
            added += parts.next().and_then(|n| n.parse::<u64>().ok()).unwrap_or(0);
            deleted += parts.next().and_then(|n| n.parse::<u64>().ok()).unwrap_or(0);
        }
        Ok((stat.trim().to_string(), added, deleted))
    }

    // ── mutations ──────────────────────────────────────────────────────

    pub fn checkout(&self, branch: &str) -> Result<()> {
        self.run(["checkout", branch]).map(|_| ())
    }

    pub fn create_branch(&self, branch: &str) -> Result<()> {
        self.run(["checkout", "-b", branch]).map(|_| ())
    }

    /// Explicit stash used by `resume --auto-stash`. Never called
    /// silently.
    pub fn stash_push(&self, message: &str) -> Result<()> {
        self.run(["stash", "push", "--include-untracked", "-m", message])
            .map(|_| ())
    }

    /// Detached worktree for `run --worktree` isolation.
    pub fn worktree_add_detached(&self, path: &Path) -> Result<()> {
        let mut args: Vec<std::ffi::OsString> =
            vec!["worktree".into(), "add".into(), "--detach".into()];
        args.push(path.as_os_str().into());
        self.run(args).map(|_| ())
    }
}

/// One parsed `%H|%ct|%s` log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub sha: String,
    pub commit_time: i64,
    pub subject: String,
}

impl LogLine {
    fn parse(line: &str) -> Option<Self> {
        let mut parts = line.splitn(3, '|');
        let sha = parts.next()?.to_string();
        let commit_time = parts.next()?.parse().ok()?;
        let subject = parts.next()?.to_string();
        Some(Self {
            sha,
            commit_time,
            subject,
        })
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use std::fs;

    /// Initialize a scratch repo with one commit, identity configured.
    pub fn init_repo(dir: &Path) -> Git {
        let git = Git::new(dir);
        git.run(["init", "-q", "-b", "main"]).unwrap();
        git.run(["config", "user.name", "test"]).unwrap();
        git.run(["config", "user.email", "test@test.invalid"]).unwrap();
        fs::write(dir.join("README.md"), "# scratch\n").unwrap();
        git.run(["add", "README.md"]).unwrap();
        git.run(["commit", "-q", "-m", "init"]).unwrap();
        git
    }

    pub fn commit_file(git: &Git, name: &str, content: &str, msg: &str) -> String {
        let path = git.repo().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
        git.run(["add", name]).unwrap();
        git.run(["commit", "-q", "-m", msg]).unwrap();
        git.head_sha().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::{commit_file, init_repo};
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_head_branch_and_dirty() {
        let dir = tempdir().unwrap();
        let git = init_repo(dir.path());
        assert_eq!(git.current_branch().unwrap(), "main");
        assert_eq!(git.head_sha().unwrap().len(), 40);
        assert!(!git.is_dirty().unwrap());

        std::fs::write(dir.path().join("scratch.txt"), "x").unwrap();
        assert!(git.is_dirty().unwrap());
    }

    #[test]
    fn test_is_ancestor() {
        let dir = tempdir().unwrap();
        let git = init_repo(dir.path());
        let first = git.head_sha().unwrap();
        let second = commit_file(&git, "a.txt", "a", "second");
        assert!(git.is_ancestor(&first, &second).unwrap());
        assert!(!git.is_ancestor(&second, &first).unwrap());
    }

    #[test]
    fn test_branch_exists() {
        let dir = tempdir().unwrap();
        let git = init_repo(dir.path());
        assert!(git.branch_exists("main"));
        assert!(!git.branch_exists("no-such-branch"));
        git.create_branch("feature").unwrap();
        assert!(git.branch_exists("feature"));
    }

    #[test]
    fn test_log_subjects_parse() {
        let dir = tempdir().unwrap();
        let git = init_repo(dir.path());
        commit_file(&git, "a.txt", "a", "subject with | pipe");
        let lines = git.log_subjects("HEAD").unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].subject, "subject with | pipe");
        assert!(lines[0].commit_time >= lines[1].commit_time);
    }

    #[test]
    fn test_commits_in_range_oldest_first() {
        let dir = tempdir().unwrap();
        let git = init_repo(dir.path());
        let base = git.head_sha().unwrap();
        commit_file(&git, "a.txt", "a", "one");
        commit_file(&git, "b.txt", "b", "two");
        let commits = git.commits_in_range(&base, "HEAD").unwrap();
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].1, "one");
        assert_eq!(commits[1].1, "two");
    }

    #[test]
    fn test_diffstat_counts_lines() {
        let dir = tempdir().unwrap();
        let git = init_repo(dir.path());
        let base = git.head_sha().unwrap();
        commit_file(&git, "a.txt", "one\ntwo\nthree\n", "add a");
        let (stat, added, deleted) = git.diffstat(&base, "HEAD").unwrap();
        assert!(stat.contains("1 file"));
        assert_eq!(added, 3);
        assert_eq!(deleted, 0);
    }

    #[test]
    fn test_command_failure_carries_stderr() {
        let dir = tempdir().unwrap();
        let git = init_repo(dir.path());
        let err = git.rev_parse("not-a-rev").unwrap_err();
        match err {
            GitError::CommandFailed { args, .. } => assert!(args.contains("rev-parse")),
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }
}
