//! Execution state machine.

use std::fmt;

use serde::Serialize;

/// Lifecycle state of one command execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Process or session is running; output is still being captured.
    #[default]
    Running,
    /// Process exited on its own (any exit status).
    Completed,
    /// Deadline reached; the process was force-terminated.
    TimedOut,
    /// Cancellation was requested; the process was force-terminated.
    Cancelled,
    /// The process could not be started, or the transport lost the session.
    Failed,
}

impl ExecutionState {
    /// Check if transition to target state is valid.
    ///
    /// Only `Running` has outgoing transitions; all other states are terminal.
    pub fn can_transition_to(&self, target: ExecutionState) -> bool {
        use ExecutionState::*;
        matches!(
            (*self, target),
            (Running, Completed) | (Running, TimedOut) | (Running, Cancelled) | (Running, Failed)
        )
    }

    /// Attempt to transition to a new state.
    pub fn transition_to(&mut self, target: ExecutionState) -> crate::Result<()> {
        if self.can_transition_to(target) {
            *self = target;
            Ok(())
        } else {
            Err(crate::error::CmdStreamError::InvalidStateTransition {
                from: *self,
                to: target,
            })
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionState::Running)
    }

    /// States reached by force-terminating the process.
    pub fn was_terminated(&self) -> bool {
        matches!(self, ExecutionState::TimedOut | ExecutionState::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Running => "running",
            ExecutionState::Completed => "completed",
            ExecutionState::TimedOut => "timed_out",
            ExecutionState::Cancelled => "cancelled",
            ExecutionState::Failed => "failed",
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
