//! Tiered verification.
//!
//! Config declares three tiers as ordered lists of shell commands.
//! Selection per milestone: tier0 always; tier1 when the milestone ends
//! a unit of work, carries high risk, or a risk-trigger glob matches a
//! changed file; tier2 only at run end. Commands run serially in the
//! repo root, output captured to `artifacts/tests_<tier>.log`, first
//! non-zero exit stops everything.

use anyhow::{Context, Result};
use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::config::VerificationConfig;
use crate::supervisor::state::RiskLevel;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Tier0,
    Tier1,
    Tier2,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tier0 => "tier0",
            Self::Tier1 => "tier1",
            Self::Tier2 => "tier2",
        }
    }

    pub fn commands(self, cfg: &VerificationConfig) -> &[String] {
        match self {
            Self::Tier0 => &cfg.tier0,
            Self::Tier1 => &cfg.tier1,
            Self::Tier2 => &cfg.tier2,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tier0" | "0" => Ok(Self::Tier0),
            "tier1" | "1" => Ok(Self::Tier1),
            "tier2" | "2" => Ok(Self::Tier2),
            other => anyhow::bail!("unknown verification tier '{other}'"),
        }
    }
}

/// Everything tier selection looks at for one milestone.
#[derive(Debug, Clone, Default)]
pub struct TierContext<'a> {
    pub end_of_milestone: bool,
    pub end_of_run: bool,
    pub risk: RiskLevel,
    pub changed_files: &'a [String],
    /// Task-forced floor: that tier and everything below it always runs.
    pub forced_tier: Option<Tier>,
}

fn risk_trigger_hit(cfg: &VerificationConfig, changed: &[String]) -> bool {
    cfg.risk_triggers.iter().any(|trigger| {
        Pattern::new(trigger)
            .map(|p| changed.iter().any(|f| p.matches_with(f, MATCH_OPTIONS)))
            .unwrap_or(false)
    })
}

/// Which tiers run for this milestone, in order.
pub fn select_tiers(cfg: &VerificationConfig, ctx: &TierContext<'_>) -> Vec<Tier> {
    let forced = ctx.forced_tier.unwrap_or(Tier::Tier0);
    let mut tiers = vec![Tier::Tier0];

    if ctx.end_of_milestone
        || ctx.risk == RiskLevel::High
        || forced >= Tier::Tier1
        || risk_trigger_hit(cfg, ctx.changed_files)
    {
        tiers.push(Tier::Tier1);
    }
    if ctx.end_of_run || forced == Tier::Tier2 {
        if !tiers.contains(&Tier::Tier1) {
            tiers.push(Tier::Tier1);
        }
        tiers.push(Tier::Tier2);
    }
    tiers
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierResult {
    pub tier: Tier,
    pub passed: bool,
    pub commands_run: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub log_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyOutcome {
    pub passed: bool,
    pub timed_out: bool,
    pub tiers: Vec<TierResult>,
}

impl VerifyOutcome {
    /// Commands of every tier that ran, for the checkpoint sidecar.
    pub fn commands(&self) -> Vec<String> {
        self.tiers
            .iter()
            .flat_map(|t| t.commands_run.iter().cloned())
            .collect()
    }

    pub fn highest_tier(&self) -> Option<Tier> {
        self.tiers.iter().map(|t| t.tier).max()
    }
}

/// Run the selected tiers serially under one wall-clock budget.
pub async fn run_tiers(
    repo: &Path,
    artifacts_dir: &Path,
    cfg: &VerificationConfig,
    tiers: &[Tier],
    budget: Duration,
) -> Result<VerifyOutcome> {
    use std::io::Write;

    let started = Instant::now();
    let mut outcome = VerifyOutcome {
        passed: true,
        timed_out: false,
        tiers: Vec::new(),
    };

    'tiers: for &tier in tiers {
        let log_path = artifacts_dir.join(format!("tests_{tier}.log"));
        let mut log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("Failed to open {}", log_path.display()))?;

        let mut result = TierResult {
            tier,
            passed: true,
            commands_run: Vec::new(),
            failed_command: None,
            exit_code: None,
            log_path: log_path.clone(),
        };

        for command in tier.commands(cfg) {
            let remaining = budget.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                outcome.timed_out = true;
                outcome.passed = false;
                result.passed = false;
                writeln!(log, "-- budget exhausted before: {command}")?;
                outcome.tiers.push(result);
                break 'tiers;
            }

            writeln!(log, "$ {command}")?;
            result.commands_run.push(command.clone());

            let run = tokio::time::timeout(
                remaining,
                tokio::process::Command::new("sh")
                    .arg("-c")
                    .arg(command)
                    .current_dir(repo)
                    .output(),
            )
            .await;

            match run {
                Err(_elapsed) => {
                    outcome.timed_out = true;
                    outcome.passed = false;
                    result.passed = false;
                    result.failed_command = Some(command.clone());
                    writeln!(log, "-- killed: verification budget exceeded")?;
                    outcome.tiers.push(result);
                    break 'tiers;
                }
                Ok(spawned) => {
                    let output = spawned
                        .with_context(|| format!("Failed to run verification command: {command}"))?;
                    log.write_all(&output.stdout)?;
                    log.write_all(&output.stderr)?;
                    let code = output.status.code().unwrap_or(-1);
                    writeln!(log, "-- exit: {code}")?;

                    if !output.status.success() {
                        result.passed = false;
                        result.failed_command = Some(command.clone());
                        result.exit_code = Some(code);
                        outcome.passed = false;
                        outcome.tiers.push(result);
                        break 'tiers;
                    }
                }
            }
        }

        if outcome.passed {
            outcome.tiers.push(result);
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cfg(tier0: &[&str], tier1: &[&str], tier2: &[&str]) -> VerificationConfig {
        VerificationConfig {
            tier0: tier0.iter().map(|s| s.to_string()).collect(),
            tier1: tier1.iter().map(|s| s.to_string()).collect(),
            tier2: tier2.iter().map(|s| s.to_string()).collect(),
            risk_triggers: vec![],
            max_verify_time_per_milestone: 600,
        }
    }

    // ── selection ─────────────────────────────────────────────────────

    #[test]
    fn test_tier0_always_selected() {
        let cfg = cfg(&["true"], &[], &[]);
        let tiers = select_tiers(&cfg, &TierContext::default());
        assert_eq!(tiers, vec![Tier::Tier0]);
    }

    #[test]
    fn test_tier1_on_end_of_milestone_or_high_risk() {
        let cfg = cfg(&["true"], &["true"], &[]);
        let tiers = select_tiers(
            &cfg,
            &TierContext { end_of_milestone: true, ..Default::default() },
        );
        assert_eq!(tiers, vec![Tier::Tier0, Tier::Tier1]);

        let tiers = select_tiers(
            &cfg,
            &TierContext { risk: RiskLevel::High, ..Default::default() },
        );
        assert_eq!(tiers, vec![Tier::Tier0, Tier::Tier1]);
    }

    #[test]
    fn test_tier1_on_risk_trigger_match() {
        let mut cfg = cfg(&["true"], &["true"], &[]);
        cfg.risk_triggers = vec!["src/store/**".to_string()];
        let changed = vec!["src/store/ledger.rs".to_string()];
        let tiers = select_tiers(
            &cfg,
            &TierContext { changed_files: &changed, ..Default::default() },
        );
        assert!(tiers.contains(&Tier::Tier1));

        let unrelated = vec!["docs/notes.md".to_string()];
        let tiers = select_tiers(
            &cfg,
            &TierContext { changed_files: &unrelated, ..Default::default() },
        );
        assert!(!tiers.contains(&Tier::Tier1));
    }

    #[test]
    fn test_tier2_only_at_run_end() {
        let cfg = cfg(&["true"], &["true"], &["true"]);
        let tiers = select_tiers(
            &cfg,
            &TierContext { end_of_run: true, ..Default::default() },
        );
        assert_eq!(tiers, vec![Tier::Tier0, Tier::Tier1, Tier::Tier2]);

        let tiers = select_tiers(
            &cfg,
            &TierContext { end_of_milestone: true, ..Default::default() },
        );
        assert!(!tiers.contains(&Tier::Tier2));
    }

    #[test]
    fn test_forced_tier_is_a_floor() {
        let cfg = cfg(&["true"], &["true"], &["true"]);
        let tiers = select_tiers(
            &cfg,
            &TierContext { forced_tier: Some(Tier::Tier2), ..Default::default() },
        );
        assert_eq!(tiers, vec![Tier::Tier0, Tier::Tier1, Tier::Tier2]);
    }

    #[test]
    fn test_tier_parse() {
        assert_eq!("tier1".parse::<Tier>().unwrap(), Tier::Tier1);
        assert_eq!("2".parse::<Tier>().unwrap(), Tier::Tier2);
        assert!("tier9".parse::<Tier>().is_err());
    }

    // ── execution ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_passing_tiers_capture_logs() {
        let dir = tempdir().unwrap();
        let artifacts = dir.path().join("artifacts");
        std::fs::create_dir_all(&artifacts).unwrap();
        let cfg = cfg(&["echo tier-zero-ran"], &["echo tier-one-ran"], &[]);

        let outcome = run_tiers(
            dir.path(),
            &artifacts,
            &cfg,
            &[Tier::Tier0, Tier::Tier1],
            Duration::from_secs(30),
        )
        .await
        .unwrap();

        assert!(outcome.passed);
        assert!(!outcome.timed_out);
        assert_eq!(outcome.tiers.len(), 2);
        let log0 = std::fs::read_to_string(artifacts.join("tests_tier0.log")).unwrap();
        assert!(log0.contains("$ echo tier-zero-ran"));
        assert!(log0.contains("tier-zero-ran"));
        assert!(log0.contains("-- exit: 0"));
        assert_eq!(outcome.highest_tier(), Some(Tier::Tier1));
    }

    #[tokio::test]
    async fn test_first_failure_stops_everything() {
        let dir = tempdir().unwrap();
        let artifacts = dir.path().join("artifacts");
        std::fs::create_dir_all(&artifacts).unwrap();
        let cfg = cfg(
            &["echo before", "exit 3", "echo never-runs"],
            &["echo tier1-never-runs"],
            &[],
        );

        let outcome = run_tiers(
            dir.path(),
            &artifacts,
            &cfg,
            &[Tier::Tier0, Tier::Tier1],
            Duration::from_secs(30),
        )
        .await
        .unwrap();

        assert!(!outcome.passed);
        assert_eq!(outcome.tiers.len(), 1);
        let t0 = &outcome.tiers[0];
        assert_eq!(t0.exit_code, Some(3));
        assert_eq!(t0.failed_command.as_deref(), Some("exit 3"));
        assert_eq!(t0.commands_run.len(), 2);
        assert!(!artifacts.join("tests_tier1.log").exists());
    }

    #[tokio::test]
    async fn test_budget_breach_flags_timeout() {
        let dir = tempdir().unwrap();
        let artifacts = dir.path().join("artifacts");
        std::fs::create_dir_all(&artifacts).unwrap();
        let cfg = cfg(&["sleep 5"], &[], &[]);

        let outcome = run_tiers(
            dir.path(),
            &artifacts,
            &cfg,
            &[Tier::Tier0],
            Duration::from_millis(200),
        )
        .await
        .unwrap();

        assert!(!outcome.passed);
        assert!(outcome.timed_out);
    }

    #[tokio::test]
    async fn test_empty_tier_passes_vacuously() {
        let dir = tempdir().unwrap();
        let artifacts = dir.path().join("artifacts");
        std::fs::create_dir_all(&artifacts).unwrap();
        let cfg = cfg(&[], &[], &[]);

        let outcome = run_tiers(
            dir.path(),
            &artifacts,
            &cfg,
            &[Tier::Tier0],
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert!(outcome.passed);
        assert!(outcome.commands().is_empty());
    }
}
