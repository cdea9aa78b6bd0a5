//! Command runner: the top-level entry point.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::cancel::CancelToken;
use super::command::Command;
use super::handle::{ExecutionHandle, HandleOptions};
use super::result::ExecutionResult;
use super::target::ExecutionTarget;
use crate::backend::{Backend, SshTransport, Transport};
use crate::config::Config;
use crate::error::CmdStreamError;
use crate::logger::{OutputLogger, TracingLogger};
use crate::Result;

/// Runner behaviour shared by every execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerOptions {
    /// Grace between SIGTERM and SIGKILL on timeout or cancellation.
    pub kill_grace: Duration,
    /// Time allowed for output streams to close after the process ends.
    pub drain_timeout: Duration,
    /// How often a waiting execution checks for exit, cancel and deadline.
    pub poll_interval: Duration,
    /// Timeout applied when a run call passes none.
    pub default_timeout: Option<Duration>,
    /// Send a `$ command` prompt to the logger before each run.
    pub echo: bool,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        let handle = HandleOptions::default();
        Self {
            kill_grace: handle.kill_grace,
            drain_timeout: handle.drain_timeout,
            poll_interval: handle.poll_interval,
            default_timeout: None,
            echo: true,
        }
    }
}

impl RunnerOptions {
    pub fn handle_options(&self) -> HandleOptions {
        HandleOptions {
            kill_grace: self.kill_grace,
            drain_timeout: self.drain_timeout,
            poll_interval: self.poll_interval,
        }
    }
}

/// Runs commands locally or remotely and returns their results.
///
/// A runner holds no per-execution state: every call builds its own
/// [`ExecutionHandle`], so one runner can serve many threads.
///
/// ```no_run
/// use std::time::Duration;
/// use cmdstream::{Command, CommandRunner, ExecutionState, ExecutionTarget};
///
/// let runner = CommandRunner::new();
/// let result = runner
///     .run(&Command::new(["make", "test"]), &ExecutionTarget::Local, Some(Duration::from_secs(600)))
///     .unwrap();
/// if result.state != ExecutionState::Completed {
///     eprintln!("{}: {}", result.command, result.state);
/// }
/// ```
#[derive(Clone)]
pub struct CommandRunner {
    transport: Arc<dyn Transport>,
    logger: Arc<dyn OutputLogger>,
    options: RunnerOptions,
}

impl CommandRunner {
    /// Runner with the system `ssh` client and the tracing logger.
    pub fn new() -> Self {
        Self {
            transport: Arc::new(SshTransport::new()),
            logger: Arc::new(TracingLogger),
            options: RunnerOptions::default(),
        }
    }

    /// Runner configured from a loaded [`Config`].
    pub fn from_config(config: &Config) -> Self {
        Self::new()
            .with_transport(Arc::new(config.ssh_transport()))
            .with_options(config.runner_options())
    }

    pub fn with_logger(mut self, logger: Arc<dyn OutputLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }

    /// Start `command` and return its handle without waiting.
    pub fn start(&self, command: &Command, target: &ExecutionTarget) -> Result<ExecutionHandle> {
        self.start_with_cancel(command, target, CancelToken::new())
    }

    /// Like [`start`](Self::start), observing an existing cancellation token.
    pub fn start_with_cancel(
        &self,
        command: &Command,
        target: &ExecutionTarget,
        cancel: CancelToken,
    ) -> Result<ExecutionHandle> {
        let backend = Backend::for_target(target, Arc::clone(&self.transport));
        ExecutionHandle::start(
            &backend,
            command,
            Arc::clone(&self.logger),
            cancel,
            self.options.handle_options(),
        )
    }

    /// Run `command` on `target` and wait for it.
    ///
    /// `timeout` falls back to [`RunnerOptions::default_timeout`]. Failing
    /// to start (missing executable, unreachable host) yields a `Failed`
    /// result; only invalid input and internal errors are returned as `Err`.
    pub fn run(
        &self,
        command: &Command,
        target: &ExecutionTarget,
        timeout: Option<Duration>,
    ) -> Result<ExecutionResult> {
        self.run_with_cancel(command, target, timeout, CancelToken::new())
    }

    /// Like [`run`](Self::run); cancelling `cancel` from another thread
    /// stops the command and yields a `Cancelled` result.
    pub fn run_with_cancel(
        &self,
        command: &Command,
        target: &ExecutionTarget,
        timeout: Option<Duration>,
        cancel: CancelToken,
    ) -> Result<ExecutionResult> {
        command.validate()?;
        let timeout = timeout.or(self.options.default_timeout);
        if self.options.echo {
            self.echo(command, target, timeout);
        }

        let started = Instant::now();
        match self.start_with_cancel(command, target, cancel) {
            Ok(mut handle) => {
                handle.wait(timeout);
                Ok(handle.into_result())
            }
            Err(e) if e.is_start_failure() => {
                warn!(command = %command.display(), %target, error = %e, "command failed to start");
                Ok(ExecutionResult::failed(command.display(), e.to_string(), started.elapsed()))
            }
            Err(e) => Err(e),
        }
    }

    /// Run on tokio's blocking pool.
    pub async fn run_async(
        &self,
        command: Command,
        target: ExecutionTarget,
        timeout: Option<Duration>,
        cancel: CancelToken,
    ) -> Result<ExecutionResult> {
        let runner = self.clone();
        tokio::task::spawn_blocking(move || runner.run_with_cancel(&command, &target, timeout, cancel))
            .await
            .map_err(|e| CmdStreamError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
    }

    fn echo(&self, command: &Command, target: &ExecutionTarget, timeout: Option<Duration>) {
        let prompt = prompt_line(command, target, timeout);
        if let Err(e) = self.logger.log_prompt(&prompt) {
            debug!(error = %e, "logger rejected prompt");
        }
    }
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CommandRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRunner")
            .field("transport", &self.transport.name())
            .field("options", &self.options)
            .finish()
    }
}

/// Run `command` with a default runner.
pub fn run(command: &Command, target: &ExecutionTarget, timeout: Option<Duration>) -> Result<ExecutionResult> {
    CommandRunner::new().run(command, target, timeout)
}

/// `$ make test # timeout=30`, prefixed by the host for remote targets.
fn prompt_line(command: &Command, target: &ExecutionTarget, timeout: Option<Duration>) -> String {
    let mut prompt = match target {
        ExecutionTarget::Local => String::from("$ "),
        ExecutionTarget::Remote(remote) => format!("{} $ ", remote),
    };
    prompt.push_str(&command.display());
    if let Some(timeout) = timeout {
        prompt.push_str(&format!(" # timeout={}", format_secs(timeout)));
    }
    prompt
}

fn format_secs(duration: Duration) -> String {
    if duration.subsec_nanos() == 0 {
        duration.as_secs().to_string()
    } else {
        let secs = format!("{:.3}", duration.as_secs_f64());
        secs.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}
