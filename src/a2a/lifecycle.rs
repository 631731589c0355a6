//! Task lifecycle state machine.
//!
//! ```text
//! SUBMITTED      -> WORKING, CANCELED, REJECTED
//! WORKING        -> COMPLETED, FAILED, TIMEOUT, CANCELED, INPUT_REQUIRED
//! INPUT_REQUIRED -> WORKING, CANCELED
//! terminal       -> (none)
//! ```
//!
//! The table is closed: any pair not listed is rejected.

use crate::a2a::error::{A2aError, Result};
use crate::a2a::types::TaskState;

impl TaskState {
    /// States reachable in one step from `self`.
    pub fn allowed_transitions(&self) -> &'static [TaskState] {
        use TaskState::*;
        match self {
            Submitted => &[Working, Canceled, Rejected],
            Working => &[Completed, Failed, Timeout, Canceled, InputRequired],
            InputRequired => &[Working, Canceled],
            Completed | Failed | Canceled | Rejected | Timeout => &[],
        }
    }

    pub fn can_transition_to(&self, next: TaskState) -> bool {
        self.allowed_transitions().contains(&next)
    }

    /// Terminal states have no outgoing edges.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed
                | TaskState::Failed
                | TaskState::Canceled
                | TaskState::Rejected
                | TaskState::Timeout
        )
    }
}

/// Check `from -> to` against the adjacency table.
pub fn validate_transition(from: TaskState, to: TaskState) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(A2aError::InvalidTransition { from, to })
    }
}
