//! Multi-run orchestration across one repository.
//!
//! A Track is an ordered sequence of task steps; the scheduler decides,
//! one tick at a time, whether to launch a track's next step, wait, or
//! stop the whole orchestration. The scheduler holds no durable state of
//! its own: everything it needs is the per-run stores plus the task
//! ledger, so a killed orchestration can be rebuilt from disk.

pub mod scheduler;

pub use scheduler::{Decision, Scheduler};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::scope::normalize_pattern;
use crate::stop::StopReason;

/// How aggressively tracks share the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionPolicy {
    /// Ownership sets are the only constraint.
    #[default]
    Parallel,
    /// At most one track runs at a time regardless of ownership.
    Serialize,
}

/// One step of a track as configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Task file path, repo-relative.
    pub task: String,
    /// Task paths that must be `completed` in the ledger first.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Globs this step may touch.
    #[serde(default)]
    pub owns: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub steps: Vec<StepConfig>,
}

/// The orchestration config (`orchestrate run --config <yaml>`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    #[serde(default)]
    pub collision_policy: CollisionPolicy,
    #[serde(default = "default_max_ticks")]
    pub max_ticks: u64,
    #[serde(default = "default_time_budget_minutes")]
    pub time_budget_minutes: u64,
    #[serde(default = "default_max_auto_resume")]
    pub max_auto_resume: u32,
    pub tracks: Vec<TrackConfig>,
}

fn default_max_ticks() -> u64 {
    500
}

fn default_time_budget_minutes() -> u64 {
    240
}

fn default_max_auto_resume() -> u32 {
    3
}

impl OrchestrationConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read orchestration config: {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse orchestration YAML: {}", path.display()))?;
        if config.tracks.is_empty() {
            anyhow::bail!("orchestration config declares no tracks");
        }
        for (i, track) in config.tracks.iter().enumerate() {
            if track.steps.is_empty() {
                anyhow::bail!("track {} declares no steps", i + 1);
            }
        }
        Ok(config)
    }
}

/// Track lifecycle as the scheduler sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackStatus {
    Pending,
    Running,
    Complete,
    Stopped,
    Failed,
    Blocked,
}

impl TrackStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Stopped | Self::Failed | Self::Blocked)
    }
}

/// One step at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub task: String,
    pub depends_on: Vec<String>,
    /// Normalized at construction so collision checks compare canonical
    /// forms.
    pub owns_normalized: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<StopReason>,
}

/// One track at runtime. Ids are `track-N` in insertion order, which is
/// also the launch tie-break.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub status: TrackStatus,
    pub steps: Vec<Step>,
    pub current_step: usize,
    pub auto_resume_count: u32,
}

impl Track {
    pub fn from_config(index: usize, config: &TrackConfig) -> Self {
        Self {
            id: format!("track-{}", index + 1),
            name: config.name.clone(),
            status: TrackStatus::Pending,
            steps: config
                .steps
                .iter()
                .map(|s| Step {
                    task: s.task.clone(),
                    depends_on: s.depends_on.clone(),
                    owns_normalized: s.owns.iter().map(|g| normalize_pattern(g)).collect(),
                    run_id: None,
                    result: None,
                })
                .collect(),
            current_step: 0,
            auto_resume_count: 0,
        }
    }

    pub fn current(&self) -> Option<&Step> {
        self.steps.get(self.current_step)
    }

    pub fn current_mut(&mut self) -> Option<&mut Step> {
        self.steps.get_mut(self.current_step)
    }

    /// The union of every step's ownership set. Conservative: a track
    /// reserves everything it will ever touch for its whole lifetime.
    pub fn owns(&self) -> Vec<String> {
        let mut owns: Vec<String> = self
            .steps
            .iter()
            .flat_map(|s| s.owns_normalized.iter().cloned())
            .collect();
        owns.sort();
        owns.dedup();
        owns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_yaml_config() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
collision_policy: serialize
max_ticks: 42
tracks:
  - name: auth
    steps:
      - task: tasks/auth.md
        owns: ["./src/auth/**"]
  - steps:
      - task: tasks/api.md
        depends_on: [tasks/auth.md]
        owns: ["src/api/**"]
"#
        )
        .unwrap();

        let config = OrchestrationConfig::load(file.path()).unwrap();
        assert_eq!(config.collision_policy, CollisionPolicy::Serialize);
        assert_eq!(config.max_ticks, 42);
        assert_eq!(config.time_budget_minutes, 240);
        assert_eq!(config.tracks.len(), 2);

        let track = Track::from_config(0, &config.tracks[0]);
        assert_eq!(track.id, "track-1");
        assert_eq!(track.name.as_deref(), Some("auth"));
        // normalization strips the ./ prefix
        assert_eq!(track.steps[0].owns_normalized, vec!["src/auth/**"]);
    }

    #[test]
    fn test_load_rejects_empty_tracks() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "tracks: []\n").unwrap();
        assert!(OrchestrationConfig::load(file.path()).is_err());

        let mut file = NamedTempFile::new().unwrap();
        write!(file, "tracks:\n  - steps: []\n").unwrap();
        assert!(OrchestrationConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_track_owns_is_union_of_steps() {
        let config = TrackConfig {
            name: None,
            steps: vec![
                StepConfig {
                    task: "a.md".into(),
                    depends_on: vec![],
                    owns: vec!["src/a/**".into()],
                },
                StepConfig {
                    task: "b.md".into(),
                    depends_on: vec![],
                    owns: vec!["src/b/**".into(), "src/a/**".into()],
                },
            ],
        };
        let track = Track::from_config(0, &config);
        assert_eq!(track.owns(), vec!["src/a/**", "src/b/**"]);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TrackStatus::Complete.is_terminal());
        assert!(TrackStatus::Blocked.is_terminal());
        assert!(!TrackStatus::Pending.is_terminal());
        assert!(!TrackStatus::Running.is_terminal());
    }
}
