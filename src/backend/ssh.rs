//! SSH transport built on the system `ssh` client.

use std::io;
use std::time::Duration;

use tracing::debug;

use super::remote::remote_command_line;
use super::{LocalBackend, ProcessControl, ProcessExit, Spawned, Termination, Transport};
use crate::execution::{current_user, Command, RemoteTarget};
use crate::Result;

/// Exit status the OpenSSH client reserves for its own errors.
const SSH_ERROR_STATUS: i32 = 255;

/// Default connect timeout passed as `-o ConnectTimeout`.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs remote commands by spawning `ssh [options] destination 'line'`.
///
/// Authentication is whatever the local client is configured for (agent,
/// keys, `~/.ssh/config`). Batch mode is on by default so a missing key
/// fails instead of prompting.
///
/// Exit status 255 is read as a lost or failed connection. A remote command
/// that itself exits with 255 is indistinguishable from that.
///
/// The remote login name is the target's user, else the local user the
/// client runs as. A command's [`user`](Command::user) is switched to with
/// `sudo` on the remote side unless it equals that login name.
#[derive(Clone)]
pub struct SshTransport {
    program: String,
    extra_args: Vec<String>,
    connect_timeout: Option<Duration>,
    batch_mode: bool,
    local_user: Option<String>,
    password: Option<String>,
}

impl SshTransport {
    pub fn new() -> Self {
        Self {
            program: "ssh".to_string(),
            extra_args: Vec::new(),
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            batch_mode: true,
            local_user: None,
            password: None,
        }
    }

    /// Use a different client binary.
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Extra client arguments, placed before the destination.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn batch_mode(mut self, enabled: bool) -> Self {
        self.batch_mode = enabled;
        self
    }

    /// Run the client as this local user (through `sudo` when it is not
    /// the invoking user). Its keys and `~/.ssh/config` are then used.
    pub fn local_user(mut self, user: impl Into<String>) -> Self {
        self.local_user = Some(user.into());
        self
    }

    /// Authenticate with a password through `sshpass -p`. Batch mode is not
    /// applied, since it disables password authentication.
    ///
    /// The password is visible in the local process list while the client
    /// runs.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Local user the client runs as.
    fn client_user(&self) -> Option<String> {
        self.local_user.clone().or_else(current_user)
    }

    /// User the session logs in as on `target`.
    pub fn login_user(&self, target: &RemoteTarget) -> Option<String> {
        target.user.clone().or_else(|| self.client_user())
    }

    /// `host`, or `user@host` when the login differs from the client user.
    fn destination(&self, target: &RemoteTarget) -> String {
        match &target.user {
            Some(user) if Some(user) != self.client_user().as_ref() => target.destination(),
            _ => target.host.clone(),
        }
    }

    /// Client argument vector for running `command` on `target`.
    pub fn argv(&self, target: &RemoteTarget, command: &Command) -> Vec<String> {
        let mut argv = Vec::new();
        if let Some(password) = &self.password {
            argv.extend(["sshpass".to_string(), "-p".to_string(), password.clone()]);
        }
        argv.push(self.program.clone());
        if self.batch_mode && self.password.is_none() {
            argv.extend(["-o".to_string(), "BatchMode=yes".to_string()]);
        }
        if let Some(timeout) = self.connect_timeout {
            // ssh takes whole seconds; zero would mean "no timeout".
            let secs = timeout.as_secs().max(1);
            argv.extend(["-o".to_string(), format!("ConnectTimeout={}", secs)]);
        }
        if let Some(port) = target.port {
            argv.extend(["-p".to_string(), port.to_string()]);
        }
        argv.extend(target.options.iter().cloned());
        argv.extend(self.extra_args.iter().cloned());
        argv.push(if command.pty.is_some() { "-tt" } else { "-T" }.to_string());
        argv.push(self.destination(target));
        let login = self.login_user(target);
        argv.push(remote_command_line(&command.resolve_user(login.as_deref())));
        argv
    }
}

impl std::fmt::Debug for SshTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshTransport")
            .field("program", &self.program)
            .field("extra_args", &self.extra_args)
            .field("connect_timeout", &self.connect_timeout)
            .field("batch_mode", &self.batch_mode)
            .field("local_user", &self.local_user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

impl Default for SshTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SshTransport {
    fn name(&self) -> &str {
        "ssh"
    }

    fn open(&self, target: &RemoteTarget, command: &Command) -> Result<Spawned> {
        // The client runs on plain pipes; with a PTY request `-tt` makes the
        // remote side allocate the terminal.
        let mut client = Command::new(self.argv(target, command));
        client.input = command.input.clone();
        client.user = self.local_user.clone();

        debug!(host = %target, program = %self.program, "starting ssh client");
        let spawned = LocalBackend::new().start(&client)?;

        Ok(Spawned {
            process: Box::new(SshProcess {
                client: spawned.process,
                remote_tty: command.pty.is_some(),
            }),
            ..spawned
        })
    }
}

/// The local `ssh` client process standing in for the remote command.
struct SshProcess {
    client: Box<dyn ProcessControl>,
    remote_tty: bool,
}

impl ProcessControl for SshProcess {
    fn id(&self) -> Option<u32> {
        self.client.id()
    }

    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>> {
        Ok(self.client.try_wait()?.map(|exit| match exit {
            ProcessExit::Exited(status) if status.code() == Some(SSH_ERROR_STATUS) => {
                ProcessExit::Disconnected(format!(
                    "ssh exited with status {} (connection failed or lost)",
                    SSH_ERROR_STATUS
                ))
            }
            other => other,
        }))
    }

    /// Kills the local client. A remote command with a terminal receives
    /// SIGHUP when the session closes; one without may keep running.
    fn terminate(&mut self, grace: Duration) -> io::Result<Termination> {
        self.client.terminate(grace)?;
        Ok(if self.remote_tty {
            Termination::Killed
        } else {
            Termination::Detached
        })
    }
}
