//! Local child processes.

use std::io;
use std::process::{Child, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::{ExitStatus, ProcessControl, ProcessExit, Spawned, Termination};
use crate::error::CmdStreamError;
use crate::execution::{current_user, Command, Program};
use crate::pty::NativePty;
use crate::Result;

/// Poll interval while waiting out a termination grace period.
const GRACE_POLL: Duration = Duration::from_millis(10);

/// Spawns commands as child processes of this program.
///
/// On Unix every child leads its own process group, so forced termination
/// reaches the whole tree the command started.
#[derive(Debug, Clone, Default)]
pub struct LocalBackend;

impl LocalBackend {
    pub fn new() -> Self {
        Self
    }

    /// Spawn `command` with piped stdout/stderr.
    ///
    /// Stdin is piped only when the command carries an input payload and
    /// is `/dev/null` otherwise. Commands with a PTY size go through
    /// [`NativePty`] instead. A user switch runs through `sudo`.
    pub fn start(&self, command: &Command) -> Result<Spawned> {
        command.validate()?;
        let command = &command.resolve_user(current_user().as_deref());

        if let Some(size) = command.pty {
            return NativePty::new().spawn_command(command, size);
        }

        let mut cmd = std_command(command);
        cmd.stdin(if command.input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(|source| CmdStreamError::Spawn {
            program: command.program_name().to_string(),
            source,
        })?;

        let stdin = child.stdin.take();
        let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CmdStreamError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    "child output pipes unavailable",
                )));
            }
        };

        debug!(pid = child.id(), program = command.program_name(), "spawned local process");

        Ok(Spawned {
            process: Box::new(LocalProcess::new(child)),
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            stdin: stdin.map(|w| Box::new(w) as Box<dyn io::Write + Send>),
        })
    }
}

fn std_command(command: &Command) -> std::process::Command {
    let mut cmd = match &command.program {
        Program::Argv(argv) => {
            let mut c = std::process::Command::new(&argv[0]);
            c.args(&argv[1..]);
            c
        }
        #[cfg(windows)]
        Program::Shell(line) => {
            let mut c = std::process::Command::new("cmd.exe");
            c.arg("/C").arg(line);
            c
        }
        #[cfg(not(windows))]
        Program::Shell(line) => {
            let mut c = std::process::Command::new("/bin/sh");
            c.arg("-c").arg(line);
            c
        }
    };

    if let Some(dir) = &command.working_dir {
        cmd.current_dir(dir);
    }
    cmd.envs(&command.env);
    cmd
}

/// A spawned child process.
pub struct LocalProcess {
    child: Child,
    exited: Option<ExitStatus>,
}

impl LocalProcess {
    pub fn new(child: Child) -> Self {
        Self {
            child,
            exited: None,
        }
    }

    /// Send `signal` to the child's process group. A group that no longer
    /// exists is not an error.
    #[cfg(unix)]
    fn signal_group(&self, signal: libc::c_int) -> io::Result<()> {
        let pgid = self.child.id() as libc::pid_t;
        // SAFETY: kill(2) only takes integer arguments; a negative pid
        // addresses the process group led by our child.
        let rc = unsafe { libc::kill(-pgid, signal) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            Ok(())
        } else {
            Err(err)
        }
    }

    fn reap(&mut self) -> io::Result<()> {
        if self.exited.is_none() {
            let status = self.child.wait()?;
            self.exited = Some(status.into());
        }
        Ok(())
    }
}

impl ProcessControl for LocalProcess {
    fn id(&self) -> Option<u32> {
        Some(self.child.id())
    }

    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>> {
        if let Some(status) = self.exited {
            return Ok(Some(ProcessExit::Exited(status)));
        }
        Ok(self.child.try_wait()?.map(|status| {
            let status = ExitStatus::from(status);
            self.exited = Some(status);
            ProcessExit::Exited(status)
        }))
    }

    #[cfg(unix)]
    fn terminate(&mut self, grace: Duration) -> io::Result<Termination> {
        if !grace.is_zero() && self.exited.is_none() {
            self.signal_group(libc::SIGTERM)?;
            // An unrepresentable grace waits for the exit indefinitely.
            let deadline = Instant::now().checked_add(grace);
            while deadline.map_or(true, |d| Instant::now() < d) {
                if self.try_wait()?.is_some() {
                    break;
                }
                std::thread::sleep(GRACE_POLL);
            }
        }
        // Even after the leader exits, other group members may still hold
        // the output pipes open.
        self.signal_group(libc::SIGKILL)?;
        self.reap()?;
        Ok(Termination::Killed)
    }

    #[cfg(not(unix))]
    fn terminate(&mut self, grace: Duration) -> io::Result<Termination> {
        if self.exited.is_none() {
            let deadline = Instant::now().checked_add(grace);
            while deadline.map_or(true, |d| Instant::now() < d) {
                if self.try_wait()?.is_some() {
                    return Ok(Termination::Killed);
                }
                std::thread::sleep(GRACE_POLL);
            }
            if let Err(e) = self.child.kill() {
                if e.kind() != io::ErrorKind::InvalidInput {
                    return Err(e);
                }
            }
        }
        self.reap()?;
        Ok(Termination::Killed)
    }
}

impl Drop for LocalProcess {
    fn drop(&mut self) {
        if self.exited.is_none() {
            if let Err(e) = self.terminate(Duration::ZERO) {
                warn!(pid = self.child.id(), error = %e, "failed to kill abandoned process");
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::Read;

    fn wait_exit(process: &mut dyn ProcessControl) -> ProcessExit {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            if let Some(exit) = process.try_wait().unwrap() {
                return exit;
            }
            assert!(Instant::now() < deadline, "process did not exit");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_spawn_and_read_stdout() {
        let mut spawned = LocalBackend::new()
            .start(&Command::new(["echo", "hello"]))
            .unwrap();
        assert!(spawned.stdin.is_none());

        let mut out = String::new();
        spawned.stdout.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello\n");
        assert_eq!(
            wait_exit(spawned.process.as_mut()),
            ProcessExit::Exited(ExitStatus::Code(0))
        );
    }

    #[test]
    fn test_same_user_runs_without_sudo() {
        let Some(me) = current_user() else { return };
        let mut spawned = LocalBackend::new()
            .start(&Command::new(["echo", "as-me"]).user(me))
            .unwrap();

        let mut out = String::new();
        spawned.stdout.read_to_string(&mut out).unwrap();
        assert_eq!(out, "as-me\n");
    }

    #[test]
    fn test_missing_executable_is_spawn_error() {
        let err = LocalBackend::new()
            .start(&Command::new(["/definitely/not/a/binary"]))
            .unwrap_err();
        assert!(matches!(err, CmdStreamError::Spawn { .. }));
    }

    #[test]
    fn test_env_and_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut spawned = LocalBackend::new()
            .start(
                &Command::shell("printf '%s %s' \"$GREETING\" \"$(pwd -P)\"")
                    .env("GREETING", "hi")
                    .working_dir(dir.path()),
            )
            .unwrap();

        let mut out = String::new();
        spawned.stdout.read_to_string(&mut out).unwrap();
        let canonical = dir.path().canonicalize().unwrap();
        assert_eq!(out, format!("hi {}", canonical.display()));
    }

    #[test]
    fn test_stdin_piped_only_with_input() {
        let spawned = LocalBackend::new()
            .start(&Command::new(["cat"]).input("data"))
            .unwrap();
        assert!(spawned.stdin.is_some());
    }

    #[test]
    fn test_terminate_kills_process_group() {
        let mut spawned = LocalBackend::new()
            .start(&Command::shell("sleep 30 & sleep 30; echo unreachable"))
            .unwrap();

        let started = Instant::now();
        assert_eq!(
            spawned.process.terminate(Duration::ZERO).unwrap(),
            Termination::Killed
        );

        // The background sleep held stdout too; EOF proves it died.
        let mut out = String::new();
        spawned.stdout.read_to_string(&mut out).unwrap();
        assert!(out.is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(
            wait_exit(spawned.process.as_mut()),
            ProcessExit::Exited(ExitStatus::Signal(libc::SIGKILL))
        );
    }

    #[test]
    fn test_graceful_terminate_lets_trap_run() {
        let mut spawned = LocalBackend::new()
            .start(&Command::shell(
                "trap 'echo stopping; exit 3' TERM; echo ready; while :; do sleep 0.05; done",
            ))
            .unwrap();

        let mut first = [0u8; 6];
        spawned.stdout.read_exact(&mut first).unwrap();
        assert_eq!(&first, b"ready\n");

        spawned.process.terminate(Duration::from_secs(5)).unwrap();
        let mut rest = String::new();
        spawned.stdout.read_to_string(&mut rest).unwrap();
        assert!(rest.contains("stopping"));
        assert_eq!(
            wait_exit(spawned.process.as_mut()),
            ProcessExit::Exited(ExitStatus::Code(3))
        );
    }

    #[test]
    fn test_terminate_after_exit_is_harmless() {
        let mut spawned = LocalBackend::new().start(&Command::new(["true"])).unwrap();
        wait_exit(spawned.process.as_mut());
        assert_eq!(
            spawned.process.terminate(Duration::ZERO).unwrap(),
            Termination::Killed
        );
        assert_eq!(
            wait_exit(spawned.process.as_mut()),
            ProcessExit::Exited(ExitStatus::Code(0))
        );
    }
}
