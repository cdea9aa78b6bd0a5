//! A running execution.

use std::io::{self, Write};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::cancel::CancelToken;
use super::command::Command;
use super::id::ExecutionId;
use super::pump::{PumpHandle, StreamFault, StreamPump};
use super::result::ExecutionResult;
use super::sink::{Origin, OutputLine, OutputSink};
use super::state::ExecutionState;
use crate::backend::{Backend, ExitStatus, ProcessControl, ProcessExit, Spawned, Termination};
use crate::logger::OutputLogger;
use crate::Result;

/// Timing knobs for waiting on and tearing down an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleOptions {
    /// SIGTERM-to-SIGKILL grace on timeout/cancel. Zero kills at once.
    pub kill_grace: Duration,
    /// How long to wait for pumps to see end-of-stream after exit.
    pub drain_timeout: Duration,
    /// Exit/cancel/deadline check interval.
    pub poll_interval: Duration,
}

impl Default for HandleOptions {
    fn default() -> Self {
        Self {
            kill_grace: Duration::ZERO,
            drain_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(10),
        }
    }
}

/// One started command: its process, its two stream pumps and its sink.
///
/// Created by [`ExecutionHandle::start`], driven to a terminal state by
/// [`wait`](Self::wait) and consumed by [`into_result`](Self::into_result).
/// Dropping a handle that is still running kills the process.
pub struct ExecutionHandle {
    id: ExecutionId,
    shown: String,
    process: Box<dyn ProcessControl>,
    pumps: Vec<PumpHandle>,
    stdin_writer: Option<JoinHandle<io::Result<()>>>,
    sink: Arc<OutputSink>,
    cancel: CancelToken,
    options: HandleOptions,
    state: ExecutionState,
    exit: Option<ExitStatus>,
    failure: Option<String>,
    faults: Vec<StreamFault>,
    started: Instant,
    elapsed: Option<Duration>,
}

impl ExecutionHandle {
    /// Launch `command` through `backend` and start capturing its output.
    ///
    /// Fails without leaving anything running if the command cannot be
    /// started.
    pub fn start(
        backend: &Backend,
        command: &Command,
        logger: Arc<dyn OutputLogger>,
        cancel: CancelToken,
        options: HandleOptions,
    ) -> Result<Self> {
        command.validate()?;
        let id = ExecutionId::next();
        let shown = command.display();

        let Spawned {
            mut process,
            stdout,
            stderr,
            stdin,
        } = backend.start(command)?;
        let started = Instant::now();
        let sink = Arc::new(OutputSink::new(logger));
        let sanitize = command.pty.is_some();

        let mut pumps = Vec::with_capacity(2);
        for (reader, origin) in [(stdout, Origin::Stdout), (stderr, Origin::Stderr)] {
            let spawned = StreamPump::new(reader, origin, Arc::clone(&sink))
                .sanitize(sanitize)
                .spawn(id.thread_name(origin.as_str()));
            match spawned {
                Ok(pump) => pumps.push(pump),
                Err(e) => {
                    abort_start(process.as_mut(), pumps, &sink);
                    return Err(e.into());
                }
            }
        }

        let stdin_writer = match (stdin, &command.input) {
            (Some(writer), Some(data)) => {
                match spawn_stdin_writer(id.thread_name("stdin"), writer, data.clone()) {
                    Ok(thread) => Some(thread),
                    Err(e) => {
                        abort_start(process.as_mut(), pumps, &sink);
                        return Err(e.into());
                    }
                }
            }
            // Dropping an unused writer closes the child's stdin.
            _ => None,
        };

        info!(%id, pid = ?process.id(), backend = backend.name(), command = %shown, "execution started");

        Ok(Self {
            id,
            shown,
            process,
            pumps,
            stdin_writer,
            sink,
            cancel,
            options,
            state: ExecutionState::Running,
            exit: None,
            failure: None,
            faults: Vec::new(),
            started,
            elapsed: None,
        })
    }

    pub fn id(&self) -> ExecutionId {
        self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.id()
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == ExecutionState::Running
    }

    /// Time since start, frozen once the execution reaches a terminal state.
    pub fn elapsed(&self) -> Duration {
        self.elapsed.unwrap_or_else(|| self.started.elapsed())
    }

    /// Token that cancels this execution; clone it to cancel from another
    /// thread while [`wait`](Self::wait) is blocking.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Request cancellation. Takes effect in the next wait cycle; a no-op
    /// once the execution has finished.
    pub fn cancel(&self) {
        if self.is_running() && self.cancel.cancel() {
            info!(id = %self.id, "cancellation requested");
        }
    }

    /// Lines captured so far, in arrival order.
    pub fn snapshot(&self) -> Vec<OutputLine> {
        self.sink.snapshot()
    }

    /// Block until the command exits, `timeout` elapses (measured from this
    /// call), or cancellation is requested. Returns the terminal state.
    ///
    /// Calling `wait` again after a terminal state returns that state.
    pub fn wait(&mut self, timeout: Option<Duration>) -> ExecutionState {
        if self.state.is_terminal() {
            return self.state;
        }
        // A timeout too large for `Instant` is no deadline at all.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));

        loop {
            match self.process.try_wait() {
                Ok(Some(ProcessExit::Exited(status))) => {
                    debug!(id = %self.id, %status, "process exited");
                    self.exit = Some(status);
                    self.finish(ExecutionState::Completed);
                    break;
                }
                Ok(Some(ProcessExit::Disconnected(reason))) => {
                    warn!(id = %self.id, %reason, "remote session lost");
                    self.failure = Some(reason);
                    self.finish(ExecutionState::Failed);
                    break;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(id = %self.id, error = %e, "exit check failed");
                    self.failure = Some(format!("exit check failed: {}", e));
                    self.finish(ExecutionState::Failed);
                    self.terminate_process();
                    break;
                }
            }

            if self.cancel.is_cancelled() {
                self.finish(ExecutionState::Cancelled);
                self.terminate_process();
                break;
            }

            let mut pause = self.options.poll_interval;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    info!(id = %self.id, timeout_ms = timeout.map(|t| t.as_millis() as u64), "deadline reached");
                    self.finish(ExecutionState::TimedOut);
                    self.terminate_process();
                    break;
                }
                pause = pause.min(deadline - now);
            }
            thread::sleep(pause);
        }

        self.drain();
        self.state
    }

    /// Wait (without deadline) if still running, then assemble the result.
    pub fn into_result(mut self) -> ExecutionResult {
        if !self.state.is_terminal() {
            self.wait(None);
        }

        let mut result = ExecutionResult::new(std::mem::take(&mut self.shown), self.state, self.elapsed())
            .with_output(self.sink.take_lines())
            .with_stream_faults(std::mem::take(&mut self.faults))
            .with_log_failures(self.sink.log_failures());
        if let Some(status) = self.exit {
            result = result.with_exit_status(status);
        }
        if let Some(failure) = self.failure.take() {
            result = result.with_failure(failure);
        }
        result
    }

    fn finish(&mut self, target: ExecutionState) {
        self.elapsed = Some(self.started.elapsed());
        if let Err(e) = self.state.transition_to(target) {
            warn!(id = %self.id, error = %e, "ignoring state change");
            return;
        }
        info!(
            id = %self.id,
            state = %self.state,
            elapsed_ms = self.elapsed().as_millis() as u64,
            "execution finished"
        );
    }

    fn terminate_process(&mut self) {
        match self.process.terminate(self.options.kill_grace) {
            Ok(Termination::Killed) => debug!(id = %self.id, "process terminated"),
            Ok(Termination::Detached) => {
                warn!(id = %self.id, "transport cannot kill the command; it may keep running remotely")
            }
            Err(e) => warn!(id = %self.id, error = %e, "terminate failed"),
        }
    }

    /// Let the pumps reach end-of-stream, then close the sink.
    ///
    /// Descendants of the command can keep the pipes open after it exits;
    /// those are killed after `drain_timeout`. Pumps still blocked after a
    /// second `drain_timeout` are abandoned.
    fn drain(&mut self) {
        if !self.wait_for_pumps() {
            debug!(id = %self.id, "streams still open after exit; killing stragglers");
            if let Err(e) = self.process.terminate(Duration::ZERO) {
                warn!(id = %self.id, error = %e, "straggler cleanup failed");
            }
            if !self.wait_for_pumps() {
                warn!(id = %self.id, "streams did not close; abandoning capture");
            }
        }

        for pump in std::mem::take(&mut self.pumps) {
            if pump.is_finished() {
                let report = pump.join();
                debug!(
                    id = %self.id,
                    origin = %report.origin,
                    lines = report.lines,
                    bytes = report.bytes,
                    "stream closed"
                );
                if let Some(fault) = report.fault {
                    self.faults.push(fault);
                }
            } else {
                self.faults.push(StreamFault {
                    origin: pump.origin(),
                    message: "stream did not close; capture abandoned".into(),
                });
                pump.detach();
            }
        }

        if let Some(writer) = self.stdin_writer.take() {
            if writer.is_finished() {
                match writer.join() {
                    Ok(Err(e)) => warn!(id = %self.id, error = %e, "writing stdin failed"),
                    Err(_) => warn!(id = %self.id, "stdin writer panicked"),
                    Ok(Ok(())) => {}
                }
            }
        }

        self.sink.finalize();
    }

    fn wait_for_pumps(&self) -> bool {
        let deadline = Instant::now().checked_add(self.options.drain_timeout);
        loop {
            if self.pumps.iter().all(PumpHandle::is_finished) {
                return true;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return false;
            }
            thread::sleep(self.options.poll_interval);
        }
    }
}

impl Drop for ExecutionHandle {
    fn drop(&mut self) {
        if self.is_running() {
            debug!(id = %self.id, "handle dropped while running; killing process");
            if let Err(e) = self.process.terminate(Duration::ZERO) {
                warn!(id = %self.id, error = %e, "failed to kill abandoned process");
            }
            for pump in self.pumps.drain(..) {
                pump.detach();
            }
            self.sink.finalize();
        }
    }
}

impl std::fmt::Debug for ExecutionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionHandle")
            .field("id", &self.id)
            .field("command", &self.shown)
            .field("state", &self.state)
            .field("lines", &self.sink.len())
            .finish()
    }
}

fn spawn_stdin_writer(
    name: String,
    mut writer: Box<dyn Write + Send>,
    data: Vec<u8>,
) -> io::Result<JoinHandle<io::Result<()>>> {
    thread::Builder::new().name(name).spawn(move || {
        let written = writer.write_all(&data).and_then(|()| writer.flush());
        drop(writer);
        match written {
            // The command exited (or closed stdin) without reading everything.
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
            other => other,
        }
    })
}

fn abort_start(process: &mut dyn ProcessControl, pumps: Vec<PumpHandle>, sink: &OutputSink) {
    if let Err(e) = process.terminate(Duration::ZERO) {
        warn!(error = %e, "failed to kill process after aborted start");
    }
    for pump in pumps {
        pump.detach();
    }
    sink.finalize();
}
