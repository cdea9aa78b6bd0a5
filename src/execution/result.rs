//! Execution result types.

use std::time::Duration;

use serde::Serialize;

use super::pump::StreamFault;
use super::sink::{Origin, OutputLine};
use super::state::ExecutionState;
use crate::backend::ExitStatus;
use crate::error::CmdStreamError;

/// Immutable record of one finished execution.
///
/// Output captured before a timeout, cancellation or disconnect is kept;
/// only a command that never started has no output.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    /// Command line as displayed (alias if one was set).
    pub command: String,
    /// Terminal state of the execution.
    pub state: ExecutionState,
    /// Exit code; present only for `Completed` commands that exited normally.
    pub exit_code: Option<i32>,
    /// Exit code or terminating signal; present only for `Completed`.
    pub exit_status: Option<ExitStatus>,
    /// Both streams merged in arrival order.
    pub output: Vec<OutputLine>,
    /// Time from spawn until exit was observed (or the deadline/cancel hit).
    pub duration: Duration,
    /// Why the command failed to start or lost its session.
    pub failure: Option<String>,
    /// Read errors that ended a stream early.
    pub stream_faults: Vec<StreamFault>,
    /// Lines the live logger failed to accept.
    pub log_failures: u64,
}

impl ExecutionResult {
    /// Create a result with no output and no exit status.
    pub fn new(command: impl Into<String>, state: ExecutionState, duration: Duration) -> Self {
        Self {
            command: command.into(),
            state,
            exit_code: None,
            exit_status: None,
            output: Vec::new(),
            duration,
            failure: None,
            stream_faults: Vec::new(),
            log_failures: 0,
        }
    }

    /// Result for a command that could not be started.
    pub fn failed(command: impl Into<String>, reason: impl Into<String>, duration: Duration) -> Self {
        Self::new(command, ExecutionState::Failed, duration).with_failure(reason)
    }

    /// Set the exit status. Ignored unless the state is `Completed`.
    pub fn with_exit_status(mut self, status: ExitStatus) -> Self {
        if self.state == ExecutionState::Completed {
            self.exit_status = Some(status);
            self.exit_code = status.code();
        }
        self
    }

    pub fn with_output(mut self, output: Vec<OutputLine>) -> Self {
        self.output = output;
        self
    }

    pub fn with_failure(mut self, reason: impl Into<String>) -> Self {
        self.failure = Some(reason.into());
        self
    }

    pub fn with_stream_faults(mut self, faults: Vec<StreamFault>) -> Self {
        self.stream_faults = faults;
        self
    }

    pub fn with_log_failures(mut self, count: u64) -> Self {
        self.log_failures = count;
        self
    }

    /// Completed with exit code 0.
    pub fn success(&self) -> bool {
        self.state == ExecutionState::Completed && self.exit_code == Some(0)
    }

    /// Anything other than a zero exit.
    pub fn failed_any(&self) -> bool {
        !self.success()
    }

    pub fn timed_out(&self) -> bool {
        self.state == ExecutionState::TimedOut
    }

    pub fn cancelled(&self) -> bool {
        self.state == ExecutionState::Cancelled
    }

    /// Both streams, ordered by sequence number.
    pub fn combined_output(&self) -> &[OutputLine] {
        &self.output
    }

    /// Lines of one stream, in stream order.
    pub fn lines(&self, origin: Origin) -> impl Iterator<Item = &OutputLine> {
        self.output.iter().filter(move |line| line.origin == origin)
    }

    /// Stdout reassembled from the raw bytes, so carriage returns and
    /// terminal sequences (PTY runs) survive. Use [`Self::stdout_lines`] for
    /// cleaned text.
    pub fn stdout(&self) -> String {
        self.stream_text(Some(Origin::Stdout))
    }

    /// Stderr reassembled as text.
    pub fn stderr(&self) -> String {
        self.stream_text(Some(Origin::Stderr))
    }

    /// Both streams reassembled in arrival order.
    pub fn combined_text(&self) -> String {
        self.stream_text(None)
    }

    pub fn stdout_lines(&self) -> Vec<&str> {
        self.lines(Origin::Stdout).map(|l| l.text.as_str()).collect()
    }

    pub fn stderr_lines(&self) -> Vec<&str> {
        self.lines(Origin::Stderr).map(|l| l.text.as_str()).collect()
    }

    fn stream_text(&self, origin: Option<Origin>) -> String {
        let mut text = String::new();
        for line in &self.output {
            if origin.map_or(true, |o| o == line.origin) {
                text.push_str(&String::from_utf8_lossy(&line.raw));
                if line.terminated {
                    text.push('\n');
                }
            }
        }
        text
    }

    /// Fail unless the command completed with exit code 0.
    pub fn check(&self) -> crate::Result<&Self> {
        match self.state {
            ExecutionState::Completed if self.success() => Ok(self),
            ExecutionState::Completed => Err(CmdStreamError::NonZeroExit {
                command: self.command.clone(),
                code: self.exit_code,
            }),
            state => Err(CmdStreamError::NotCompleted {
                command: self.command.clone(),
                state,
            }),
        }
    }
}
