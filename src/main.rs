use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use runr::cmd;
use runr::intervene::InterventionRequest;
use runr::orchestrate::CollisionPolicy;
use runr::stop::StopReason;

#[derive(Parser)]
#[command(name = "runr")]
#[command(version, about = "Supervisor for long-running AI coding agents")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Repository to operate on (defaults to the current directory)
    #[arg(long, global = true)]
    pub repo: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute one task under supervision
    Run {
        #[arg(long)]
        task: PathBuf,
        /// Isolate the run in a detached git worktree
        #[arg(long)]
        worktree: bool,
    },
    /// Resume a stopped run from its last verified checkpoint
    Resume {
        /// Run id, or "latest"
        run_id: String,
        /// Stash a dirty tree explicitly instead of refusing
        #[arg(long)]
        auto_stash: bool,
        /// Invoked by the orchestrator's auto-resume policy
        #[arg(long, hide = true)]
        auto: bool,
    },
    /// Show a run's state, milestones, and recent events
    Report {
        run_id: String,
        #[arg(long)]
        json: bool,
    },
    /// Cherry-pick a run's latest checkpoint onto a branch
    Submit {
        run_id: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        dry_run: bool,
    },
    /// Record work a human performed outside the supervisor
    Intervene {
        run_id: String,
        /// Stop reason code or free-form label explaining why
        #[arg(long)]
        reason: String,
        #[arg(long)]
        note: String,
        /// Commands to execute and capture (repeatable)
        #[arg(long = "cmd")]
        commands: Vec<String>,
        /// Base sha for the commit range (must be an ancestor of HEAD)
        #[arg(long)]
        since: Option<String>,
        /// Commit the working tree with this message plus trailers
        #[arg(long, conflicts_with = "amend_last")]
        commit: Option<String>,
        /// Amend the last commit instead of creating one
        #[arg(long)]
        amend_last: bool,
        /// Override the checkpoint amend guard
        #[arg(long)]
        force: bool,
        /// Additional override required by ledger mode
        #[arg(long)]
        override_ledger: bool,
    },
    /// Classify commits in a range as checkpoints, interventions, or
    /// unattributed work
    Audit {
        #[arg(long)]
        range: String,
    },
    /// Environment and repository health checks
    Doctor,
    /// Prune old terminal runs and dangling sidecars
    Gc {
        #[arg(long)]
        apply: bool,
        #[arg(long, default_value_t = cmd::gc::DEFAULT_RETENTION_DAYS)]
        retention_days: i64,
    },
    /// Multi-track orchestration
    Orchestrate {
        #[command(subcommand)]
        command: OrchestrateCommands,
    },
}

#[derive(Subcommand)]
pub enum OrchestrateCommands {
    /// Drive a track configuration until all tracks settle
    Run {
        #[arg(long)]
        config: PathBuf,
        #[arg(long, value_enum)]
        collision_policy: Option<CollisionPolicyArg>,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
pub enum CollisionPolicyArg {
    Serialize,
    Parallel,
}

impl From<CollisionPolicyArg> for CollisionPolicy {
    fn from(arg: CollisionPolicyArg) -> Self {
        match arg {
            CollisionPolicyArg::Serialize => CollisionPolicy::Serialize,
            CollisionPolicyArg::Parallel => CollisionPolicy::Parallel,
        }
    }
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;
    let default = if verbose { "runr=debug" } else { "runr=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let repo = match cli.repo.clone() {
        Some(repo) => repo,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match cli.command {
        Commands::Run { task, worktree } => {
            let reason = cmd::run::cmd_run(&repo, &task, worktree).await?;
            exit_with(reason);
        }
        Commands::Resume { run_id, auto_stash, auto } => {
            let reason = cmd::resume::cmd_resume(&repo, &run_id, auto_stash, auto).await?;
            exit_with(reason);
        }
        Commands::Report { run_id, json } => {
            cmd::report::cmd_report(&repo, &run_id, json)?;
        }
        Commands::Submit { run_id, to, dry_run } => {
            let ok = cmd::submit::cmd_submit(&repo, &run_id, &to, dry_run)?;
            if !ok {
                std::process::exit(1);
            }
        }
        Commands::Intervene {
            run_id,
            reason,
            note,
            commands,
            since,
            commit,
            amend_last,
            force,
            override_ledger,
        } => {
            let request = InterventionRequest {
                run_id,
                reason,
                note,
                commands,
                since_sha: since,
                commit_message: commit,
                amend_last,
                force,
                override_ledger,
            };
            cmd::intervene::cmd_intervene(&repo, &request)?;
        }
        Commands::Audit { range } => {
            cmd::audit::cmd_audit(&repo, &range)?;
        }
        Commands::Doctor => {
            let healthy = cmd::doctor::cmd_doctor(&repo)?;
            if !healthy {
                std::process::exit(1);
            }
        }
        Commands::Gc { apply, retention_days } => {
            cmd::gc::cmd_gc(&repo, apply, retention_days)?;
        }
        Commands::Orchestrate { command } => match command {
            OrchestrateCommands::Run {
                config,
                collision_policy,
            } => {
                let reason = cmd::orchestrate::cmd_orchestrate(
                    &repo,
                    &config,
                    collision_policy.map(Into::into),
                )
                .await?;
                exit_with(reason);
            }
        },
    }
    Ok(())
}

/// Exit codes come from the stop reason registry and nowhere else.
fn exit_with(reason: StopReason) -> ! {
    std::process::exit(reason.exit_code());
}
