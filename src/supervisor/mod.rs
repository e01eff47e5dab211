//! The per-run supervisor.
//!
//! This module owns the single-run execution path: one phase at a time,
//! `INIT → PLAN → (IMPLEMENT → VERIFY → REVIEW → CHECKPOINT)* →
//! FINALIZE`, with `STOPPED` as the sole terminal state. Cross-run
//! scheduling lives in [`crate::orchestrate`] instead.
//!
//! ## Persistence ownership
//!
//! | Layer            | What it persists                                |
//! |------------------|-------------------------------------------------|
//! | `state.rs`       | The run snapshot (`state.json`)                 |
//! | `machine.rs`     | Timeline events, via the journal                |
//! | `handoff.rs`     | Terminal `handoffs/stop.{json,md}`              |
//!
//! The snapshot is the canonical source for resume; the journal is an
//! append-only observation layer that never drives control flow.

pub mod handoff;
pub mod machine;
pub mod phase;
pub mod state;

pub use handoff::StopHandoff;
pub use machine::{Supervisor, SupervisorOptions};
pub use phase::Phase;
pub use state::{Milestone, RiskLevel, RunState};
