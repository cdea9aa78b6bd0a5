//! Remote execution through a pluggable transport.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::Spawned;
use crate::error::CmdStreamError;
use crate::execution::{is_env_name, Command, RemoteTarget};
use crate::Result;

/// Opens a command session on a remote host.
///
/// A transport receives the full [`Command`] (program, working directory,
/// environment, input and PTY request) and returns the same contract as a
/// local spawn. Exit codes travel back through
/// [`ProcessControl::try_wait`](super::ProcessControl::try_wait); a lost
/// session is reported as [`ProcessExit::Disconnected`](super::ProcessExit::Disconnected).
///
/// [`ProcessControl::terminate`](super::ProcessControl::terminate) should
/// kill the remote command where the transport can, and return
/// [`Termination::Detached`](super::Termination::Detached) where it cannot.
pub trait Transport: Send + Sync {
    /// Short name used in logs (`"ssh"`).
    fn name(&self) -> &str;

    /// Start `command` on `target`.
    fn open(&self, target: &RemoteTarget, command: &Command) -> Result<Spawned>;
}

/// Backend that runs every command on one remote host.
#[derive(Clone)]
pub struct RemoteBackend {
    target: RemoteTarget,
    transport: Arc<dyn Transport>,
}

impl RemoteBackend {
    pub fn new(target: RemoteTarget, transport: Arc<dyn Transport>) -> Self {
        Self { target, transport }
    }

    pub fn target(&self) -> &RemoteTarget {
        &self.target
    }

    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    /// Open a session for `command`.
    ///
    /// Any failure other than invalid input is reported as a transport
    /// failure for this host.
    pub fn start(&self, command: &Command) -> Result<Spawned> {
        command.validate()?;
        debug!(host = %self.target, transport = self.transport.name(), "opening remote session");

        self.transport
            .open(&self.target, command)
            .map_err(|e| match e {
                e @ (CmdStreamError::InvalidCommand(_) | CmdStreamError::Transport { .. }) => e,
                other => CmdStreamError::Transport {
                    host: self.target.to_string(),
                    message: other.to_string(),
                },
            })
    }
}

impl fmt::Debug for RemoteBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteBackend")
            .field("target", &self.target)
            .field("transport", &self.transport.name())
            .finish()
    }
}

/// Render `command` as one POSIX shell line for a remote login shell.
///
/// The working directory and environment are applied in the remote shell:
/// `cd '/srv/app' && export MODE=fast && make test`. Every substituted
/// value is quoted, and an assignment whose name is not a valid variable
/// name is quoted whole so it cannot run as code. A shell-form program is
/// passed through verbatim. A requested user is switched to with `sudo`.
pub fn remote_command_line(command: &Command) -> String {
    let command = command.resolve_user(None);
    let mut parts = Vec::new();

    if let Some(dir) = &command.working_dir {
        parts.push(format!("cd {}", shell_words::quote(&dir.to_string_lossy())));
    }
    if !command.env.is_empty() {
        let assignments: Vec<String> = command
            .env
            .iter()
            .map(|(key, value)| shell_assignment(key, value))
            .collect();
        parts.push(format!("export {}", assignments.join(" ")));
    }
    parts.push(command.shell_line());

    parts.join(" && ")
}

fn shell_assignment(key: &str, value: &str) -> String {
    if is_env_name(key) {
        format!("{}={}", key, shell_words::quote(value))
    } else {
        shell_words::quote(&format!("{}={}", key, value)).into_owned()
    }
}
