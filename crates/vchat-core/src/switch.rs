use std::fmt;

use serde::{Deserialize, Serialize};

/// How a model switch ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SwitchOutcome {
    /// The requested profile was already serving; nothing was polled
    AlreadyActive { profile: String },
    Switched { profile: String, polls: u32 },
    /// The backend refused the switch command
    Rejected { message: String },
    /// The backend reported an `error` status
    Failed { message: String },
    /// No terminal status within the deadline. The backend may still be switching.
    TimedOut { polls: u32 },
    /// Too many consecutive status queries failed
    Unreachable { attempts: u32, last_error: String },
    /// A newer switch request cancelled this one
    Superseded,
}

impl SwitchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            SwitchOutcome::AlreadyActive { .. } | SwitchOutcome::Switched { .. }
        )
    }
}

impl fmt::Display for SwitchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwitchOutcome::AlreadyActive { profile } => write!(f, "'{}' is already running", profile),
            SwitchOutcome::Switched { profile, polls } => {
                write!(f, "switched to '{}' after {} status checks", profile, polls)
            }
            SwitchOutcome::Rejected { message } => write!(f, "switch rejected: {}", message),
            SwitchOutcome::Failed { message } => write!(f, "switch failed: {}", message),
            SwitchOutcome::TimedOut { polls } => write!(
                f,
                "gave up waiting after {} status checks; the backend may still be switching",
                polls
            ),
            SwitchOutcome::Unreachable { attempts, last_error } => write!(
                f,
                "status endpoint unreachable after {} attempts: {}",
                attempts, last_error
            ),
            SwitchOutcome::Superseded => write!(f, "superseded by a newer switch request"),
        }
    }
}
