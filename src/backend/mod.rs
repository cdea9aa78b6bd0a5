//! Execution backends.
//!
//! A backend turns a [`Command`] into a running process or remote session
//! and hands back its parts as a [`Spawned`]: a control handle plus the
//! stdout, stderr and (optional) stdin streams. The execution engine only
//! sees this contract, so local and remote commands behave identically.
//!
//! There are exactly two backends, selected from the [`ExecutionTarget`]:
//! - [`LocalBackend`]: child processes of this program
//! - [`RemoteBackend`]: sessions opened through a [`Transport`]

mod local;
mod remote;
mod ssh;

pub use local::{LocalBackend, LocalProcess};
pub use remote::{remote_command_line, RemoteBackend, Transport};
pub use ssh::{SshTransport, DEFAULT_CONNECT_TIMEOUT};

use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::execution::{Command, ExecutionTarget};
use crate::Result;

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ExitStatus {
    /// Exited with this code.
    Code(i32),
    /// Killed by this signal (Unix).
    Signal(i32),
    /// The platform reported neither.
    Unknown,
}

impl ExitStatus {
    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Code(code) => Some(*code),
            _ => None,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Code(0))
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ExitStatus::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitStatus::Signal(signal);
            }
        }
        ExitStatus::Unknown
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Code(code) => write!(f, "exit code {}", code),
            ExitStatus::Signal(signal) => write!(f, "signal {}", signal),
            ExitStatus::Unknown => f.write_str("unknown status"),
        }
    }
}

/// Outcome reported by [`ProcessControl::try_wait`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessExit {
    /// The process (local or remote) exited.
    Exited(ExitStatus),
    /// The transport lost the session before an exit status arrived.
    Disconnected(String),
}

/// What [`ProcessControl::terminate`] was able to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process (tree) was signalled and reaped.
    Killed,
    /// No kill primitive exists; the caller merely stops waiting. The
    /// remote process may keep running.
    Detached,
}

/// Control surface of a running process or session.
pub trait ProcessControl: Send {
    /// OS process id, when there is a local process.
    fn id(&self) -> Option<u32>;

    /// Non-blocking exit check.
    fn try_wait(&mut self) -> std::io::Result<Option<ProcessExit>>;

    /// Best-effort forced termination.
    ///
    /// With a non-zero `grace`, ask politely first and force after `grace`.
    /// Must be safe to call repeatedly and after the process has exited
    /// (to clean up stragglers still holding the output pipes).
    fn terminate(&mut self, grace: Duration) -> std::io::Result<Termination>;
}

/// A started command, split into its parts.
pub struct Spawned {
    pub process: Box<dyn ProcessControl>,
    pub stdout: Box<dyn Read + Send>,
    pub stderr: Box<dyn Read + Send>,
    pub stdin: Option<Box<dyn Write + Send>>,
}

impl fmt::Debug for Spawned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spawned")
            .field("pid", &self.process.id())
            .field("stdin", &self.stdin.is_some())
            .finish()
    }
}

/// The backend for one target.
#[derive(Clone)]
pub enum Backend {
    Local(LocalBackend),
    Remote(RemoteBackend),
}

impl Backend {
    /// Select the backend for `target`. `transport` is used for remote targets.
    pub fn for_target(target: &ExecutionTarget, transport: Arc<dyn Transport>) -> Self {
        match target {
            ExecutionTarget::Local => Backend::Local(LocalBackend::new()),
            ExecutionTarget::Remote(remote) => {
                Backend::Remote(RemoteBackend::new(remote.clone(), transport))
            }
        }
    }

    /// Launch `command`.
    pub fn start(&self, command: &Command) -> Result<Spawned> {
        match self {
            Backend::Local(local) => local.start(command),
            Backend::Remote(remote) => remote.start(command),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Backend::Local(_) => "local",
            Backend::Remote(remote) => remote.transport_name(),
        }
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Local(_) => f.write_str("Backend::Local"),
            Backend::Remote(remote) => write!(f, "Backend::Remote({})", remote.target()),
        }
    }
}
