//! Error types for cmdstream.

use thiserror::Error;

use crate::execution::ExecutionState;

/// Main error type for cmdstream operations.
#[derive(Error, Debug)]
pub enum CmdStreamError {
    /// The command cannot be executed as given (empty argv, blank shell string).
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// The local process could not be spawned.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The remote transport could not open a session.
    #[error("transport error for host {host}: {message}")]
    Transport { host: String, message: String },

    /// PTY-related error.
    #[error("PTY error: {0}")]
    Pty(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid execution state transition attempted.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        from: ExecutionState,
        to: ExecutionState,
    },

    /// Internal lock was poisoned.
    #[error("internal lock poisoned")]
    LockPoisoned,

    /// Output was appended after the sink was finalized.
    #[error("output sink already finalized")]
    SinkFinalized,

    /// The command completed with a non-zero exit status.
    #[error("command '{command}' exited with {code:?}")]
    NonZeroExit { command: String, code: Option<i32> },

    /// The command never completed (timed out, cancelled or failed to start).
    #[error("command '{command}' did not complete: {state}")]
    NotCompleted {
        command: String,
        state: ExecutionState,
    },
}

impl CmdStreamError {
    /// Whether this error means the command never started.
    ///
    /// [`CommandRunner::run`](crate::CommandRunner::run) turns these into a
    /// `Failed` result instead of returning them.
    pub fn is_start_failure(&self) -> bool {
        matches!(
            self,
            CmdStreamError::Spawn { .. } | CmdStreamError::Transport { .. } | CmdStreamError::Pty(_)
        )
    }
}

/// Convenience Result type for cmdstream operations.
pub type Result<T> = std::result::Result<T, CmdStreamError>;
