//! Task file loading and metadata parsing.
//!
//! A task is a markdown file with an optional YAML frontmatter block.
//! Two metadata keys are recognized: `allowlist_add` (additional scope
//! globs, additive only) and `verification_tier` (force a tier for every
//! milestone). The same keys may appear in the body as directive lines
//! (`Allowlist-Add: <glob>`, `Verification-Tier: <tier>`); when both are
//! present the frontmatter wins.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::verify::Tier;

/// Effective task metadata after frontmatter/body resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMeta {
    #[serde(default)]
    pub allowlist_add: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_tier: Option<Tier>,
}

/// Frontmatter as written: optional fields so "absent" and "empty" are
/// distinguishable for override resolution.
#[derive(Debug, Default, Deserialize)]
struct RawFrontmatter {
    #[serde(default)]
    allowlist_add: Option<Vec<String>>,
    #[serde(default)]
    verification_tier: Option<Tier>,
}

/// A parsed task file.
#[derive(Debug, Clone)]
pub struct TaskFile {
    pub path: PathBuf,
    pub raw: String,
    /// First `#` heading, or the file stem when the body has none.
    pub title: String,
    /// Markdown body with the frontmatter block stripped.
    pub body: String,
    pub meta: TaskMeta,
}

/// Sidecar metadata written next to the task copy in `artifacts/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMetaFile {
    pub schema_version: u32,
    pub source_path: String,
    pub task_hash: String,
    pub meta: TaskMeta,
}

impl TaskFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read task file: {}", path.display()))?;
        Self::parse(path, raw)
    }

    fn parse(path: &Path, raw: String) -> Result<Self> {
        let (frontmatter, body) = split_frontmatter(&raw);

        let fm: RawFrontmatter = match frontmatter {
            Some(yaml) => serde_yaml::from_str(yaml)
                .with_context(|| format!("Invalid task frontmatter: {}", path.display()))?,
            None => RawFrontmatter::default(),
        };

        let body_meta = parse_body_directives(body);

        // Frontmatter overrides body per key, not per entry.
        let meta = TaskMeta {
            allowlist_add: fm.allowlist_add.unwrap_or(body_meta.allowlist_add),
            verification_tier: fm.verification_tier.or(body_meta.verification_tier),
        };

        let title = body
            .lines()
            .find_map(|line| line.strip_prefix("# ").map(|t| t.trim().to_string()))
            .unwrap_or_else(|| {
                path.file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "task".to_string())
            });
        let body = body.to_string();

        Ok(Self {
            path: path.to_path_buf(),
            raw,
            title,
            body,
            meta,
        })
    }

    /// SHA-256 of the raw content; the ledger uses this to decide whether
    /// a completed task has changed since.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.raw.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Reserialize with the effective metadata as frontmatter. Parsing
    /// the result yields the same `TaskMeta` (round-trip stable).
    pub fn to_markdown(&self) -> String {
        let meta_yaml = serde_yaml::to_string(&self.meta).unwrap_or_default();
        format!("---\n{}---\n{}", meta_yaml, self.body)
    }

    pub fn meta_file(&self) -> TaskMetaFile {
        TaskMetaFile {
            schema_version: 1,
            source_path: self.path.display().to_string(),
            task_hash: self.content_hash(),
            meta: self.meta.clone(),
        }
    }
}

/// Split `---\n...\n---\n` off the head of the document.
fn split_frontmatter(raw: &str) -> (Option<&str>, &str) {
    let rest = match raw.strip_prefix("---\n") {
        Some(rest) => rest,
        None => return (None, raw),
    };
    match rest.find("\n---") {
        Some(end) => {
            let yaml = &rest[..end + 1];
            let mut body = &rest[end + 4..];
            if let Some(stripped) = body.strip_prefix('\n') {
                body = stripped;
            }
            (Some(yaml), body)
        }
        None => (None, raw),
    }
}

/// Scan the body for directive lines. Unknown tiers are ignored rather
/// than failing the whole task.
fn parse_body_directives(body: &str) -> TaskMeta {
    let mut meta = TaskMeta::default();
    for line in body.lines() {
        let line = line.trim();
        if let Some(glob) = line.strip_prefix("Allowlist-Add:") {
            let glob = glob.trim();
            if !glob.is_empty() {
                meta.allowlist_add.push(glob.to_string());
            }
        } else if let Some(tier) = line.strip_prefix("Verification-Tier:") {
            if let Ok(parsed) = tier.trim().parse::<Tier>() {
                meta.verification_tier = Some(parsed);
            }
        }
    }
    meta
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn parse_str(content: &str) -> TaskFile {
        let dir = tempdir().unwrap();
        let path = dir.path().join("task.md");
        fs::write(&path, content).unwrap();
        TaskFile::load(&path).unwrap()
    }

    #[test]
    fn test_frontmatter_only() {
        let task = parse_str(
            "---\nallowlist_add:\n  - src/auth/**\nverification_tier: tier1\n---\n# Add auth\n\nBody.\n",
        );
        assert_eq!(task.title, "Add auth");
        assert_eq!(task.meta.allowlist_add, vec!["src/auth/**"]);
        assert_eq!(task.meta.verification_tier, Some(Tier::Tier1));
        assert!(!task.body.contains("---"));
    }

    #[test]
    fn test_body_only() {
        let task = parse_str(
            "# Tighten parser\n\nAllowlist-Add: src/parser/**\nVerification-Tier: tier2\n",
        );
        assert_eq!(task.meta.allowlist_add, vec!["src/parser/**"]);
        assert_eq!(task.meta.verification_tier, Some(Tier::Tier2));
    }

    #[test]
    fn test_frontmatter_overrides_body() {
        let task = parse_str(
            "---\nallowlist_add:\n  - src/a/**\nverification_tier: tier0\n---\n# T\n\nAllowlist-Add: src/b/**\nVerification-Tier: tier2\n",
        );
        // Frontmatter wins wholesale for each present key.
        assert_eq!(task.meta.allowlist_add, vec!["src/a/**"]);
        assert_eq!(task.meta.verification_tier, Some(Tier::Tier0));
    }

    #[test]
    fn test_reserialize_round_trip() {
        for content in [
            "---\nallowlist_add:\n  - src/a/**\n---\n# A\n\nbody\n",
            "# B\n\nAllowlist-Add: src/b/**\nVerification-Tier: tier1\n",
            "---\nverification_tier: tier2\n---\n# C\n\nAllowlist-Add: src/c/**\n",
        ] {
            let task = parse_str(content);
            let reparsed = parse_str(&task.to_markdown());
            assert_eq!(task.meta, reparsed.meta, "round trip diverged for {content:?}");
        }
    }

    #[test]
    fn test_title_falls_back_to_file_stem() {
        let task = parse_str("No heading here.\n");
        assert_eq!(task.title, "task");
    }

    #[test]
    fn test_content_hash_changes_with_content() {
        let a = parse_str("# A\n");
        let b = parse_str("# B\n");
        assert_ne!(a.content_hash(), b.content_hash());
        assert_eq!(a.content_hash().len(), 64);
    }

    #[test]
    fn test_unterminated_frontmatter_treated_as_body() {
        let task = parse_str("---\nallowlist_add: [x]\n# Heading\n");
        assert!(task.meta.allowlist_add.is_empty());
    }

    #[test]
    fn test_meta_file_carries_hash() {
        let task = parse_str("# T\n\nAllowlist-Add: src/x/**\n");
        let meta_file = task.meta_file();
        assert_eq!(meta_file.schema_version, 1);
        assert_eq!(meta_file.task_hash, task.content_hash());
        assert_eq!(meta_file.meta, task.meta);
    }
}
