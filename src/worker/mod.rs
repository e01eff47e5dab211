//! Worker subprocess facade.
//!
//! A worker is an opaque subprocess: prompt on stdin, structured text on
//! stdout. The facade enforces two independent clocks around every call:
//! a wall-clock timeout for the whole call and a stall watchdog that
//! trips when the worker goes silent for longer than the stall window.
//! Either trip kills the process; the caller gets a classified failure,
//! never a half-read stream.

pub mod output;

pub use output::{
    parse_implement, parse_plan, parse_review, ImplementReport, ImplementStatus, ReviewDecision,
    WorkerParseError,
};

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::config::{WorkerConfig, WorkerOutput};

/// Watchdog cadence cap: never check less often than this.
const WATCHDOG_MAX_INTERVAL: Duration = Duration::from_secs(10);

/// The two worker families, distinguished by output parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    /// Single JSON object carrying a result/content/message field.
    ClaudeLike,
    /// Newline-delimited item.completed / agent_message events.
    CodexLike,
}

impl WorkerKind {
    pub fn from_output(output: WorkerOutput) -> Self {
        match output {
            WorkerOutput::Json => Self::ClaudeLike,
            WorkerOutput::Jsonl => Self::CodexLike,
        }
    }
}

/// Why a worker call failed, before promotion to a stop reason.
#[derive(Debug, Error)]
pub enum WorkerFailure {
    #[error("worker_call_timeout: call exceeded {0:?}")]
    Timeout(Duration),
    #[error("stalled_timeout: no output for {0:?}")]
    Stalled(Duration),
    #[error("worker exited with status {code}: {observation}")]
    NonZeroExit { code: i32, observation: String },
    #[error("failed to spawn worker '{bin}': {message}")]
    Spawn { bin: String, message: String },
    #[error("worker io error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerFailure {
    /// Is this a timeout-class failure (vs. a worker error)?
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    pub fn is_stall(&self) -> bool {
        matches!(self, Self::Stalled(_))
    }
}

/// Raw result of one call: the worker's stdout text, already known to
/// have exited zero within its clocks.
#[derive(Debug, Clone)]
pub struct WorkerResponse {
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

/// One configured worker plus its clocks.
#[derive(Debug, Clone)]
pub struct Worker {
    pub config: WorkerConfig,
    pub kind: WorkerKind,
    pub call_timeout: Duration,
    pub stall_timeout: Duration,
}

impl Worker {
    pub fn new(config: WorkerConfig, call_timeout: Duration, stall_timeout: Duration) -> Self {
        let kind = WorkerKind::from_output(config.output);
        Self {
            config,
            kind,
            call_timeout,
            stall_timeout,
        }
    }

    /// Run one call: write the prompt, stream output under the watchdog,
    /// enforce the call timeout, and return captured streams.
    pub async fn call(&self, repo: &std::path::Path, prompt: &str) -> Result<WorkerResponse, WorkerFailure> {
        let started = Instant::now();

        let mut child = tokio::process::Command::new(&self.config.bin)
            .args(&self.config.args)
            .current_dir(repo)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| WorkerFailure::Spawn {
                bin: self.config.bin.clone(),
                message: err.to_string(),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(prompt.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        // Readers own the pipes and bump last_activity on every chunk so
        // the watchdog can measure the silent window.
        let last_activity = Arc::new(Mutex::new(Instant::now()));
        let stdout_buf = Arc::new(Mutex::new(Vec::new()));
        let stderr_buf = Arc::new(Mutex::new(Vec::new()));

        let stdout_task = spawn_reader(child.stdout.take(), stdout_buf.clone(), last_activity.clone());
        let stderr_task = spawn_reader(child.stderr.take(), stderr_buf.clone(), last_activity.clone());

        let verdict = tokio::select! {
            status = child.wait() => {
                WaitVerdict::Exited(status?)
            }
            () = tokio::time::sleep(self.call_timeout) => {
                WaitVerdict::TimedOut
            }
            () = watch_for_stall(last_activity.clone(), self.stall_timeout) => {
                WaitVerdict::Stalled
            }
        };

        if !matches!(verdict, WaitVerdict::Exited(_)) {
            child.start_kill().ok();
            let _ = child.wait().await;
        }

        // Readers finish once the pipes close.
        if let Some(task) = stdout_task {
            let _ = task.await;
        }
        if let Some(task) = stderr_task {
            let _ = task.await;
        }

        let stdout = String::from_utf8_lossy(&stdout_buf.lock().await).into_owned();
        let stderr = String::from_utf8_lossy(&stderr_buf.lock().await).into_owned();
        let duration = started.elapsed();

        match verdict {
            WaitVerdict::TimedOut => Err(WorkerFailure::Timeout(self.call_timeout)),
            WaitVerdict::Stalled => Err(WorkerFailure::Stalled(self.stall_timeout)),
            WaitVerdict::Exited(status) if status.success() => Ok(WorkerResponse {
                stdout,
                stderr,
                duration,
            }),
            WaitVerdict::Exited(status) => {
                let observation = if !stderr.trim().is_empty() {
                    stderr.trim().to_string()
                } else {
                    stdout.trim().to_string()
                };
                Err(WorkerFailure::NonZeroExit {
                    code: status.code().unwrap_or(-1),
                    observation,
                })
            }
        }
    }
}

enum WaitVerdict {
    Exited(std::process::ExitStatus),
    TimedOut,
    Stalled,
}

fn spawn_reader<R>(
    pipe: Option<R>,
    buf: Arc<Mutex<Vec<u8>>>,
    last_activity: Arc<Mutex<Instant>>,
) -> Option<tokio::task::JoinHandle<()>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    let mut pipe = pipe?;
    Some(tokio::spawn(async move {
        let mut chunk = [0u8; 4096];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    buf.lock().await.extend_from_slice(&chunk[..n]);
                    *last_activity.lock().await = Instant::now();
                }
            }
        }
    }))
}

/// Resolves when the silent window exceeds `stall`. Checks at half the
/// stall window, capped at ten seconds.
async fn watch_for_stall(last_activity: Arc<Mutex<Instant>>, stall: Duration) {
    let cadence = (stall / 2).min(WATCHDOG_MAX_INTERVAL).max(Duration::from_millis(10));
    loop {
        tokio::time::sleep(cadence).await;
        let silent = last_activity.lock().await.elapsed();
        if silent > stall {
            return;
        }
    }
}
