//! Outcome of a requested state change

use std::fmt;

use serde::{Deserialize, Serialize};

/// Typed outcome of `change_state`. Rejections are values, not faults, so an
/// administrative caller can render a precise message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateChangeResult {
    /// A new history record was appended
    Success,
    /// No machine with that id
    FailureNotFound,
    /// The machine is already at the requested state
    FailureAlreadyAtState,
    /// The transition table does not allow it
    FailureIllegalTransition,
}

impl StateChangeResult {
    pub fn is_success(&self) -> bool {
        matches!(self, StateChangeResult::Success)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StateChangeResult::Success => "SUCCESS",
            StateChangeResult::FailureNotFound => "FAILURE_NOT_FOUND",
            StateChangeResult::FailureAlreadyAtState => "FAILURE_ALREADY_AT_STATE",
            StateChangeResult::FailureIllegalTransition => "FAILURE_ILLEGAL_TRANSITION",
        }
    }
}

impl fmt::Display for StateChangeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
