//! Ignore-aware change detection.
//!
//! `git status --porcelain=v1 -z` is the source of truth for the changed
//! set; `git check-ignore -z --stdin` filters out ignored paths. When
//! check-ignore cannot run, the adapter fails open: the unfiltered set is
//! returned and the summary flags `ignore_check_status = Failed` so the
//! scope guard can degrade to strict mode.

use super::{Git, Result};

/// Whether the ignore filter actually ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreCheckStatus {
    Ok,
    Failed,
}

/// The changed-file summary handed to the scope guard.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    /// Unique repo-relative paths, renames contributing both sides.
    pub files: Vec<String>,
    /// Ignored paths dropped from `files`.
    pub ignored: usize,
    pub ignore_check_status: IgnoreCheckStatus,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl Git {
    /// Collect every path the working tree touches relative to HEAD,
    /// ignore-filtered. Rename and copy entries contribute BOTH the old
    /// and the new path, because scope checks apply to both ends.
    pub fn list_changed_files(&self) -> Result<ChangeSet> {
        let (raw, code) = self.run_with_stdin(&["status", "--porcelain=v1", "-z"], &[])?;
        if code != Some(0) {
            // status itself failing is a hard error; re-run through the
            // normal path to surface stderr.
            self.run(["status", "--porcelain=v1"])?;
        }

        let mut paths = parse_porcelain_z(&raw);
        paths.sort();
        paths.dedup();

        if paths.is_empty() {
            return Ok(ChangeSet {
                files: paths,
                ignored: 0,
                ignore_check_status: IgnoreCheckStatus::Ok,
            });
        }

        match self.filter_ignored(&paths) {
            Ok(ignored_set) => {
                let before = paths.len();
                let files: Vec<String> = paths
                    .into_iter()
                    .filter(|p| !ignored_set.contains(p))
                    .collect();
                Ok(ChangeSet {
                    ignored: before - files.len(),
                    files,
                    ignore_check_status: IgnoreCheckStatus::Ok,
                })
            }
            Err(err) => {
                tracing::warn!(error = %err, "check-ignore failed; returning unfiltered set");
                Ok(ChangeSet {
                    files: paths,
                    ignored: 0,
                    ignore_check_status: IgnoreCheckStatus::Failed,
                })
            }
        }
    }

    /// Which of `paths` are gitignored. check-ignore exits 1 when none
    /// match, which is a normal outcome, and 128 on real errors.
    fn filter_ignored(&self, paths: &[String]) -> Result<std::collections::HashSet<String>> {
        let stdin: Vec<u8> = paths
            .iter()
            .flat_map(|p| p.as_bytes().iter().copied().chain(std::iter::once(0)))
            .collect();

        let (stdout, code) =
            self.run_with_stdin(&["check-ignore", "-z", "--stdin"], &stdin)?;

        match code {
            Some(0) | Some(1) => Ok(stdout
                .split(|b| *b == 0)
                .filter(|chunk| !chunk.is_empty())
                .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
                .collect()),
            other => Err(super::GitError::CommandFailed {
                args: "check-ignore -z --stdin".to_string(),
                stderr: format!("exit status {other:?}"),
            }),
        }
    }
}

/// Parse `status --porcelain=v1 -z` output. Entries are
/// `XY <path>\0`, and rename/copy entries carry a second
/// NUL-terminated path (the other end of the rename).
fn parse_porcelain_z(raw: &[u8]) -> Vec<String> {
    let mut paths = Vec::new();
    let mut tokens = raw.split(|b| *b == 0).filter(|t| !t.is_empty());

    while let Some(token) = tokens.next() {
        if token.len() < 4 {
            continue;
        }
        let status = &token[..2];
        let path = String::from_utf8_lossy(&token[3..]).into_owned();
        paths.push(path);

        let is_rename_or_copy = status
            .iter()
            .any(|b| *b == b'R' || *b == b'C');
        if is_rename_or_copy {
            if let Some(other) = tokens.next() {
                paths.push(String::from_utf8_lossy(other).into_owned());
            }
        }
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{commit_file, init_repo};
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_porcelain_simple() {
        let raw = b" M src/a.rs\0?? new.txt\0";
        let paths = parse_porcelain_z(raw);
        assert_eq!(paths, vec!["src/a.rs", "new.txt"]);
    }

    #[test]
    fn test_parse_porcelain_rename_yields_both_paths() {
        let raw = b"R  src/new.rs\0src/old.rs\0 M other.rs\0";
        let paths = parse_porcelain_z(raw);
        assert_eq!(paths, vec!["src/new.rs", "src/old.rs", "other.rs"]);
    }

    #[test]
    fn test_clean_tree_is_empty() {
        let dir = tempdir().unwrap();
        let git = init_repo(dir.path());
        let changes = git.list_changed_files().unwrap();
        assert!(changes.is_empty());
        assert_eq!(changes.ignore_check_status, IgnoreCheckStatus::Ok);
    }

    #[test]
    fn test_untracked_and_modified_detected() {
        let dir = tempdir().unwrap();
        let git = init_repo(dir.path());
        std::fs::write(dir.path().join("README.md"), "# changed\n").unwrap();
        std::fs::write(dir.path().join("new.txt"), "new").unwrap();

        let changes = git.list_changed_files().unwrap();
        assert!(changes.files.contains(&"README.md".to_string()));
        assert!(changes.files.contains(&"new.txt".to_string()));
    }

    #[test]
    fn test_ignored_paths_dropped_and_counted() {
        let dir = tempdir().unwrap();
        let git = init_repo(dir.path());
        commit_file(&git, ".gitignore", "*.log\n", "add gitignore");
        std::fs::write(dir.path().join("debug.log"), "noise").unwrap();
        std::fs::write(dir.path().join("keep.txt"), "keep").unwrap();

        let changes = git.list_changed_files().unwrap();
        assert!(changes.files.contains(&"keep.txt".to_string()));
        assert!(!changes.files.contains(&"debug.log".to_string()));
        assert_eq!(changes.ignored, 1);
        assert_eq!(changes.ignore_check_status, IgnoreCheckStatus::Ok);
    }

    #[test]
    fn test_tracked_rename_returns_both_paths() {
        let dir = tempdir().unwrap();
        let git = init_repo(dir.path());
        commit_file(&git, "old.txt", "same content here\n", "add old");
        git.run(["mv", "old.txt", "new.txt"]).unwrap();

        let changes = git.list_changed_files().unwrap();
        assert!(changes.files.contains(&"old.txt".to_string()));
        assert!(changes.files.contains(&"new.txt".to_string()));
    }

    #[test]
    fn test_staged_deletion_detected() {
        let dir = tempdir().unwrap();
        let git = init_repo(dir.path());
        commit_file(&git, "gone.txt", "bye\n", "add gone");
        git.run(["rm", "-q", "gone.txt"]).unwrap();

        let changes = git.list_changed_files().unwrap();
        assert!(changes.files.contains(&"gone.txt".to_string()));
    }
}
