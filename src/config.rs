//! Unified configuration for runr.
//!
//! Configuration is layered: `runr.config.json` next to the runs root,
//! then environment overrides, then CLI flags. Millisecond env overrides
//! (`AGENT_STALL_TIMEOUT_MS`, `AGENT_WORKER_CALL_TIMEOUT_MS`) take
//! precedence over minute-based variants.
//!
//! # Configuration File Format
//!
//! ```json
//! {
//!   "agent": { "name": "claude", "model": "sonnet" },
//!   "scope": {
//!     "allowlist": ["src/**"],
//!     "denylist": [".env*"],
//!     "lockfiles": ["Cargo.lock"],
//!     "presets": ["rust"]
//!   },
//!   "verification": {
//!     "tier0": ["cargo check"],
//!     "tier1": ["cargo test"],
//!     "tier2": ["cargo test --release"],
//!     "risk_triggers": ["src/store/**"],
//!     "max_verify_time_per_milestone": 600
//!   },
//!   "workflow": {
//!     "mode": "flow",
//!     "integration_branch": "main",
//!     "require_verification": true,
//!     "require_clean_tree": true,
//!     "submit_strategy": "cherry-pick"
//!   },
//!   "workers": {
//!     "claude": { "bin": "claude", "args": ["-p"], "output": "json" }
//!   }
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::util::env_timeout;

/// Default per-call worker timeout when neither config nor env says
/// otherwise. Within the 60-300s band the facade contract allows.
const DEFAULT_WORKER_TIMEOUT: Duration = Duration::from_secs(120);
/// Default stall window in production. Tests shrink this via
/// `AGENT_STALL_TIMEOUT_MS`.
const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(600);

/// Agent identity, passed through to worker prompts and receipts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// Scope lock inputs shared by every run in this repo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScopeConfig {
    #[serde(default)]
    pub allowlist: Vec<String>,
    #[serde(default)]
    pub denylist: Vec<String>,
    /// Lockfiles may never be edited by a worker, allowlisted or not.
    #[serde(default)]
    pub lockfiles: Vec<String>,
    /// Named preset globs expanded into the allowlist at load time.
    #[serde(default)]
    pub presets: Vec<String>,
}

/// Verification tiers as ordered shell command lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationConfig {
    #[serde(default)]
    pub tier0: Vec<String>,
    #[serde(default)]
    pub tier1: Vec<String>,
    #[serde(default)]
    pub tier2: Vec<String>,
    /// Globs that escalate a milestone to tier1 when a changed file matches.
    #[serde(default)]
    pub risk_triggers: Vec<String>,
    /// Wall-clock budget per milestone, in seconds.
    #[serde(default = "default_verify_budget_secs")]
    pub max_verify_time_per_milestone: u64,
}

fn default_verify_budget_secs() -> u64 {
    600
}

/// Workflow discipline. Ledger mode tightens the amend guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowMode {
    #[default]
    Flow,
    Ledger,
}

/// How `submit` lands a checkpoint on the target branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SubmitStrategy {
    #[default]
    #[serde(rename = "cherry-pick")]
    CherryPick,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default)]
    pub mode: WorkflowMode,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default = "default_integration_branch")]
    pub integration_branch: String,
    #[serde(default)]
    pub release_branch: Option<String>,
    #[serde(default = "default_true")]
    pub require_verification: bool,
    #[serde(default = "default_true")]
    pub require_clean_tree: bool,
    #[serde(default)]
    pub submit_strategy: SubmitStrategy,
}

fn default_integration_branch() -> String {
    "main".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            mode: WorkflowMode::default(),
            profile: None,
            integration_branch: default_integration_branch(),
            release_branch: None,
            require_verification: true,
            require_clean_tree: true,
            submit_strategy: SubmitStrategy::default(),
        }
    }
}

/// Output shape a worker binary produces on stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerOutput {
    /// One JSON object with a result/content/message field.
    #[default]
    Json,
    /// Newline-delimited events (item.completed / agent_message).
    Jsonl,
}

/// One worker definition from the `workers` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub bin: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub output: WorkerOutput,
    /// Per-call timeout override in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// The parsed `runr.config.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunrConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub scope: ScopeConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub workers: BTreeMap<String, WorkerConfig>,
}

/// Scope presets: name → conventional source globs for that toolchain.
/// Immutable data; presets are additive to the configured allowlist.
pub const SCOPE_PRESETS: &[(&str, &[&str])] = &[
    ("rust", &["src/**", "tests/**", "benches/**", "Cargo.toml"]),
    ("node", &["src/**", "test/**", "package.json", "tsconfig.json"]),
    ("python", &["src/**", "tests/**", "pyproject.toml"]),
    ("go", &["**/*.go", "go.mod"]),
    ("docs", &["docs/**", "*.md"]),
];

impl RunrConfig {
    /// Load from a file; a missing file yields defaults so a bare repo
    /// still runs.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config JSON: {}", path.display()))?;
        Ok(config)
    }

    /// The allowlist with presets expanded. Unknown preset names are
    /// ignored with a warning so a stale config does not brick the repo.
    pub fn effective_allowlist(&self) -> Vec<String> {
        let mut allow = self.scope.allowlist.clone();
        for preset in &self.scope.presets {
            match SCOPE_PRESETS.iter().find(|(name, _)| name == preset) {
                Some((_, globs)) => allow.extend(globs.iter().map(|g| (*g).to_string())),
                None => tracing::warn!(preset = %preset, "unknown scope preset, skipping"),
            }
        }
        allow.sort();
        allow.dedup();
        allow
    }

    /// Resolve the worker definition for a phase, falling back to the
    /// first configured worker, then to a bare `claude -p` invocation.
    pub fn worker(&self, name: Option<&str>) -> WorkerConfig {
        if let Some(name) = name {
            if let Some(w) = self.workers.get(name) {
                return w.clone();
            }
        }
        if let Some(name) = self.agent.name.as_deref() {
            if let Some(w) = self.workers.get(name) {
                return w.clone();
            }
        }
        if let Some(w) = self.workers.values().next() {
            return w.clone();
        }
        WorkerConfig {
            bin: "claude".to_string(),
            args: vec!["-p".to_string()],
            output: WorkerOutput::Json,
            timeout_ms: None,
        }
    }

    /// Per-call worker timeout: env ms > env minutes > worker timeout_ms >
    /// default.
    pub fn worker_call_timeout(&self, worker: &WorkerConfig) -> Duration {
        let base = worker
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_WORKER_TIMEOUT);
        env_timeout(
            "AGENT_WORKER_CALL_TIMEOUT_MS",
            "AGENT_WORKER_CALL_TIMEOUT_MINUTES",
            base,
        )
    }

    /// Run-level stall window.
    pub fn stall_timeout(&self) -> Duration {
        env_timeout(
            "AGENT_STALL_TIMEOUT_MS",
            "AGENT_STALL_TIMEOUT_MINUTES",
            DEFAULT_STALL_TIMEOUT,
        )
    }

    /// Verification wall-clock budget per milestone.
    pub fn verify_budget(&self) -> Duration {
        Duration::from_secs(self.verification.max_verify_time_per_milestone)
    }
}

/// Well-known paths under one repository.
#[derive(Debug, Clone)]
pub struct RunrPaths {
    pub repo: PathBuf,
    pub runs_root: PathBuf,
}

impl RunrPaths {
    pub fn new(repo: PathBuf) -> Self {
        let runs_root = repo.join(".runr").join("runs");
        Self { repo, runs_root }
    }

    /// `<runs-root>/../runr.config.json`
    pub fn config_file(&self) -> PathBuf {
        self.runs_root
            .parent()
            .map(|p| p.join("runr.config.json"))
            .unwrap_or_else(|| self.repo.join("runr.config.json"))
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.runs_root.join(run_id)
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.runs_root.join("checkpoints")
    }

    pub fn ledger_file(&self) -> PathBuf {
        self.runs_root.join("task-status.json")
    }

    /// Run ids sort lexicographically because they are zero-padded UTC
    /// timestamps; the latest run is the max directory name.
    pub fn latest_run_id(&self) -> Option<String> {
        let entries = std::fs::read_dir(&self.runs_root).ok()?;
        entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| name.len() == 14 && name.chars().all(|c| c.is_ascii_digit()))
            .max()
    }
}
