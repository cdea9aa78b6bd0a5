//! Real-time output loggers.
//!
//! An [`OutputLogger`] receives every captured line as soon as it is
//! appended to an execution's sink, plus the prompt line announcing each
//! command. Loggers are fire-and-forget: an error is counted on the result
//! and never interrupts the command.

use std::fmt;

use tokio::sync::mpsc;
use tracing::info;

use crate::execution::{Origin, OutputLine};

/// Error returned by a logger that could not accept a line.
#[derive(Debug, Clone, thiserror::Error)]
#[error("logger rejected output: {0}")]
pub struct LogError(String);

impl LogError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Destination for live output.
///
/// Called from pump threads; implementations must be cheap and must not
/// block for long, since the calling pump stops reading while it waits.
pub trait OutputLogger: Send + Sync {
    /// Receive one captured line (origin, text and timestamp are on the line).
    fn log_line(&self, line: &OutputLine) -> Result<(), LogError>;

    /// Receive the prompt announcing a command, e.g. `$ make test`.
    fn log_prompt(&self, _prompt: &str) -> Result<(), LogError> {
        Ok(())
    }
}

impl<F> OutputLogger for F
where
    F: Fn(&OutputLine) -> Result<(), LogError> + Send + Sync,
{
    fn log_line(&self, line: &OutputLine) -> Result<(), LogError> {
        self(line)
    }
}

/// Mirrors output as `tracing` events on the `cmdstream::output` target.
#[derive(Debug, Clone, Default)]
pub struct TracingLogger;

impl OutputLogger for TracingLogger {
    fn log_line(&self, line: &OutputLine) -> Result<(), LogError> {
        match line.origin {
            Origin::Stdout => {
                info!(target: "cmdstream::output", origin = "stdout", seq = line.seq, "{}", line.text)
            }
            Origin::Stderr => {
                info!(target: "cmdstream::output", origin = "stderr", seq = line.seq, "{}", line.text)
            }
        }
        Ok(())
    }

    fn log_prompt(&self, prompt: &str) -> Result<(), LogError> {
        info!(target: "cmdstream::output", origin = "prompt", "{}", prompt);
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Clone, Default)]
pub struct NullLogger;

impl OutputLogger for NullLogger {
    fn log_line(&self, _line: &OutputLine) -> Result<(), LogError> {
        Ok(())
    }
}

/// Event delivered by [`ChannelLogger`].
#[derive(Debug, Clone)]
pub enum LogEvent {
    Prompt(String),
    Line(OutputLine),
}

/// Forwards output into a tokio channel for async consumers.
///
/// Fails (and is counted as a log failure) once the receiver is dropped.
#[derive(Clone)]
pub struct ChannelLogger {
    tx: mpsc::UnboundedSender<LogEvent>,
}

impl ChannelLogger {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LogEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl fmt::Debug for ChannelLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelLogger")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl OutputLogger for ChannelLogger {
    fn log_line(&self, line: &OutputLine) -> Result<(), LogError> {
        self.tx
            .send(LogEvent::Line(line.clone()))
            .map_err(|_| LogError::new("channel closed"))
    }

    fn log_prompt(&self, prompt: &str) -> Result<(), LogError> {
        self.tx
            .send(LogEvent::Prompt(prompt.to_string()))
            .map_err(|_| LogError::new("channel closed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn line(seq: u64, origin: Origin, text: &str) -> OutputLine {
        OutputLine {
            seq,
            origin,
            raw: text.as_bytes().to_vec(),
            text: text.to_string(),
            terminated: true,
            at: SystemTime::now(),
        }
    }

    #[test]
    fn test_channel_logger_delivers_in_order() {
        let (logger, mut rx) = ChannelLogger::new();
        logger.log_prompt("$ make").unwrap();
        logger.log_line(&line(0, Origin::Stdout, "building")).unwrap();
        logger.log_line(&line(1, Origin::Stderr, "warning")).unwrap();

        tokio_test::block_on(async {
            assert!(matches!(rx.recv().await, Some(LogEvent::Prompt(p)) if p == "$ make"));
            assert!(matches!(rx.recv().await, Some(LogEvent::Line(l)) if l.seq == 0));
            assert!(
                matches!(rx.recv().await, Some(LogEvent::Line(l)) if l.origin == Origin::Stderr)
            );
        });
    }

    #[test]
    fn test_channel_logger_fails_after_receiver_dropped() {
        let (logger, rx) = ChannelLogger::new();
        drop(rx);
        assert!(logger.log_line(&line(0, Origin::Stdout, "lost")).is_err());
    }

    #[test]
    fn test_tracing_logger_never_fails() {
        let _ = crate::logging::try_init();
        let logger = TracingLogger;
        assert!(logger.log_prompt("$ true").is_ok());
        assert!(logger.log_line(&line(0, Origin::Stdout, "ok")).is_ok());
        assert!(logger.log_line(&line(1, Origin::Stderr, "err")).is_ok());
    }

    #[test]
    fn test_closure_logger() {
        let logger = |l: &OutputLine| {
            if l.text.is_empty() {
                Err(LogError::new("empty"))
            } else {
                Ok(())
            }
        };
        assert!(logger.log_line(&line(0, Origin::Stdout, "x")).is_ok());
        assert!(logger.log_line(&line(1, Origin::Stdout, "")).is_err());
        assert!(logger.log_prompt("$ x").is_ok());
    }
}
