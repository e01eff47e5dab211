//! The supervisor's phase enum and canonical ordering.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Phases of one run. `INIT → PLAN → IMPLEMENT → VERIFY → REVIEW →
/// CHECKPOINT`, looping `IMPLEMENT..CHECKPOINT` once per milestone, then
/// `FINALIZE`. `STOPPED` is the sole terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    Plan,
    Implement,
    Verify,
    Review,
    Checkpoint,
    Finalize,
    Stopped,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Plan => "plan",
            Self::Implement => "implement",
            Self::Verify => "verify",
            Self::Review => "review",
            Self::Checkpoint => "checkpoint",
            Self::Finalize => "finalize",
            Self::Stopped => "stopped",
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Stopped
    }

    /// The phase a resumed run re-enters after `last_successful_phase`.
    /// `Checkpoint` loops back into the next milestone's `Implement`;
    /// the machine promotes that to `Finalize` when no milestones
    /// remain. No recorded progress resumes from `Init`.
    pub fn resume_target(last_successful: Option<Phase>) -> Phase {
        match last_successful {
            None => Self::Init,
            Some(Self::Init) => Self::Plan,
            Some(Self::Plan) => Self::Implement,
            Some(Self::Implement) => Self::Verify,
            Some(Self::Verify) => Self::Review,
            Some(Self::Review) => Self::Checkpoint,
            Some(Self::Checkpoint) => Self::Implement,
            Some(Self::Finalize) | Some(Self::Stopped) => Self::Finalize,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names() {
        assert_eq!(Phase::Implement.as_str(), "implement");
        let json = serde_json::to_string(&Phase::Checkpoint).unwrap();
        assert_eq!(json, "\"checkpoint\"");
        let parsed: Phase = serde_json::from_str("\"verify\"").unwrap();
        assert_eq!(parsed, Phase::Verify);
    }

    #[test]
    fn test_only_stopped_is_terminal() {
        assert!(Phase::Stopped.is_terminal());
        assert!(!Phase::Finalize.is_terminal());
        assert!(!Phase::Init.is_terminal());
    }

    #[test]
    fn test_resume_targets() {
        assert_eq!(Phase::resume_target(None), Phase::Init);
        assert_eq!(Phase::resume_target(Some(Phase::Init)), Phase::Plan);
        assert_eq!(Phase::resume_target(Some(Phase::Plan)), Phase::Implement);
        assert_eq!(Phase::resume_target(Some(Phase::Verify)), Phase::Review);
        // a completed checkpoint loops into the next milestone
        assert_eq!(Phase::resume_target(Some(Phase::Checkpoint)), Phase::Implement);
    }
}
