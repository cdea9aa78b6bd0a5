//! Native PTY spawning using portable-pty.

use std::io::{self, Write};

use portable_pty::{native_pty_system, CommandBuilder, MasterPty};
use tracing::debug;

use super::PtySize;
use crate::backend::{ExitStatus, ProcessControl, ProcessExit, Spawned, Termination};
use crate::error::CmdStreamError;
use crate::execution::{Command, Program};
use crate::Result;

/// Wrapper around the native PTY system.
pub struct NativePty {
    pty_system: Box<dyn portable_pty::PtySystem + Send>,
}

impl NativePty {
    /// Create a new NativePty instance.
    pub fn new() -> Self {
        Self {
            pty_system: native_pty_system(),
        }
    }

    /// Spawn `command` attached to a new PTY.
    ///
    /// The returned stderr stream is always empty; the terminal merges both
    /// outputs into stdout. Stdin is exposed only when the command carries
    /// an input payload; otherwise the writer stays open inside the process
    /// handle so the terminal does not see end-of-input.
    pub fn spawn_command(&self, command: &Command, size: PtySize) -> Result<Spawned> {
        let pair = self
            .pty_system
            .openpty(size.into())
            .map_err(|e| CmdStreamError::Pty(e.to_string()))?;

        let child = pair
            .slave
            .spawn_command(pty_command(command))
            .map_err(|e| CmdStreamError::Pty(format!("{}: {}", command.program_name(), e)))?;

        // Only the child may keep the slave open, so that reads on the
        // master end once it exits.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| CmdStreamError::Pty(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| CmdStreamError::Pty(e.to_string()))?;

        debug!(pid = ?child.process_id(), program = command.program_name(), "spawned PTY process");

        let (stdin, held_writer) = if command.input.is_some() {
            (Some(writer), None)
        } else {
            (None, Some(writer))
        };

        Ok(Spawned {
            process: Box::new(PtyProcess {
                child,
                _master: pair.master,
                _writer: held_writer,
                exited: None,
            }),
            stdout: reader,
            stderr: Box::new(io::empty()),
            stdin,
        })
    }
}

impl Default for NativePty {
    fn default() -> Self {
        Self::new()
    }
}

fn pty_command(command: &Command) -> CommandBuilder {
    let mut cmd = match &command.program {
        Program::Argv(argv) => {
            let mut c = CommandBuilder::new(&argv[0]);
            c.args(&argv[1..]);
            c
        }
        #[cfg(windows)]
        Program::Shell(line) => {
            let mut c = CommandBuilder::new("cmd.exe");
            c.arg("/c");
            c.arg(line);
            c
        }
        #[cfg(not(windows))]
        Program::Shell(line) => {
            let mut c = CommandBuilder::new("/bin/sh");
            c.arg("-c");
            c.arg(line);
            c
        }
    };

    if let Some(dir) = &command.working_dir {
        cmd.cwd(dir);
    }
    for (key, value) in &command.env {
        cmd.env(key, value);
    }
    cmd
}

/// A process running under a PTY.
struct PtyProcess {
    child: Box<dyn portable_pty::Child + Send + Sync>,
    _master: Box<dyn MasterPty + Send>,
    _writer: Option<Box<dyn Write + Send>>,
    exited: Option<ExitStatus>,
}

impl ProcessControl for PtyProcess {
    fn id(&self) -> Option<u32> {
        self.child.process_id()
    }

    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>> {
        if let Some(status) = self.exited {
            return Ok(Some(ProcessExit::Exited(status)));
        }
        Ok(self.child.try_wait()?.map(|status| {
            let status = pty_exit_status(&status);
            self.exited = Some(status);
            ProcessExit::Exited(status)
        }))
    }

    fn terminate(&mut self, _grace: std::time::Duration) -> io::Result<Termination> {
        if self.exited.is_none() {
            // The child may exit between the check and the kill.
            if let Err(e) = self.child.kill() {
                debug!(error = %e, "PTY child kill failed");
            }
            let status = self.child.wait()?;
            self.exited = Some(pty_exit_status(&status));
        }
        Ok(Termination::Killed)
    }
}

/// Convert portable-pty's status. A signal is reported by its description
/// (`strsignal`), so only the common ones map back to a number.
fn pty_exit_status(status: &portable_pty::ExitStatus) -> ExitStatus {
    let Some(signal) = status.signal() else {
        return ExitStatus::Code(status.exit_code() as i32);
    };
    let numeric = signal.trim();
    let numeric = numeric.strip_prefix("Signal ").unwrap_or(numeric);
    if let Ok(number) = numeric.parse::<i32>() {
        return ExitStatus::Signal(number);
    }
    let number = match signal.trim().to_ascii_lowercase().as_str() {
        "hangup" => 1,
        "interrupt" => 2,
        "quit" => 3,
        "aborted" | "abort trap" => 6,
        "killed" => 9,
        "segmentation fault" => 11,
        "broken pipe" => 13,
        "terminated" => 15,
        _ => return ExitStatus::Unknown,
    };
    ExitStatus::Signal(number)
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        if self.exited.is_none() {
            let _ = self.terminate(std::time::Duration::ZERO);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::Read;
    use std::time::{Duration, Instant};

    fn read_all(mut reader: Box<dyn io::Read + Send>) -> String {
        let mut out = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => out.extend_from_slice(&buf[..n]),
                // EIO once the slave side is closed.
                Err(_) => break,
            }
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    #[test]
    fn test_pty_exit_status_mapping() {
        assert_eq!(
            pty_exit_status(&portable_pty::ExitStatus::with_exit_code(3)),
            ExitStatus::Code(3)
        );
        assert_eq!(
            pty_exit_status(&portable_pty::ExitStatus::with_signal("Killed")),
            ExitStatus::Signal(9)
        );
        assert_eq!(
            pty_exit_status(&portable_pty::ExitStatus::with_signal("Terminated")),
            ExitStatus::Signal(15)
        );
        assert_eq!(
            pty_exit_status(&portable_pty::ExitStatus::with_signal("Signal 10")),
            ExitStatus::Signal(10)
        );
        assert_eq!(
            pty_exit_status(&portable_pty::ExitStatus::with_signal("Real-time signal 3")),
            ExitStatus::Unknown
        );
    }

    // PTY tests can hang on some CI hosts without a usable /dev/ptmx.
    // Run with: cargo test -- --ignored
    #[test]
    #[ignore]
    fn test_spawn_echo_under_pty() {
        let spawned = NativePty::new()
            .spawn_command(&Command::new(["echo", "from-pty"]), PtySize::default())
            .unwrap();
        assert!(spawned.stdin.is_none());

        let output = read_all(spawned.stdout);
        assert!(output.contains("from-pty"));
    }

    #[test]
    #[ignore]
    fn test_terminate_pty_process() {
        let mut spawned = NativePty::new()
            .spawn_command(&Command::new(["sleep", "30"]), PtySize::default())
            .unwrap();

        let started = Instant::now();
        assert_eq!(
            spawned.process.terminate(Duration::ZERO).unwrap(),
            Termination::Killed
        );
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(spawned.process.try_wait().unwrap().is_some());
    }

    #[test]
    fn test_spawn_missing_program_fails() {
        let result = NativePty::new()
            .spawn_command(&Command::new(["/no/such/program"]), PtySize::default());
        assert!(matches!(result, Err(CmdStreamError::Pty(_))));
    }
}
