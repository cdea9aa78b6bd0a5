//! Command-line interface for cmdstream.
//!
//! Uses lexopt for minimal binary size overhead (~34KB).

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use crate::execution::{Command, CommandBuilder, ExecutionResult, ExecutionState, ExecutionTarget};
use crate::pty::PtySize;

/// Exit code for a command that hit its timeout (as in coreutils `timeout`).
pub const EXIT_TIMED_OUT: i32 = 124;
/// Exit code for a command that could not be started or lost its session.
pub const EXIT_FAILED: i32 = 127;
/// Exit code for a command cancelled by Ctrl-C.
pub const EXIT_CANCELLED: i32 = 130;

/// Command-line arguments.
#[derive(Debug, Clone, Default)]
pub struct Args {
    /// Remote target `[user@]host[:port]`; local when absent.
    pub host: Option<String>,
    /// Timeout for the command.
    pub timeout: Option<Duration>,
    /// Working directory for the command.
    pub cwd: Option<PathBuf>,
    /// Environment overrides, in the order given.
    pub env: Vec<(String, String)>,
    /// Join the command tokens into one shell string.
    pub shell: bool,
    /// Run under a pseudo-terminal.
    pub pty: bool,
    /// Run the command as this user (through sudo).
    pub user: Option<String>,
    /// Print the result as JSON instead of streaming output.
    pub json: bool,
    /// Do not stream output.
    pub quiet: bool,
    /// Path to configuration file.
    pub config: Option<PathBuf>,
    /// Log level (error, warn, info, debug, trace).
    pub log_level: Option<String>,
    /// Show version and exit.
    pub version: bool,
    /// Show help and exit.
    pub help: bool,
    /// Program and arguments (or shell words with `--shell`).
    pub command: Vec<String>,
}

impl Args {
    /// Build the command described by these arguments.
    pub fn to_command(&self) -> Result<Command, ArgsError> {
        if self.command.is_empty() {
            return Err(ArgsError::MissingCommand);
        }

        let mut builder = if self.shell {
            CommandBuilder::new().shell(self.command.join(" "))
        } else {
            CommandBuilder::new().argv(self.command.iter().cloned())
        };
        if let Some(dir) = &self.cwd {
            builder = builder.working_dir(dir);
        }
        for (key, value) in &self.env {
            builder = builder.env(key, value);
        }
        builder
            .pty(self.pty.then(PtySize::default))
            .user(self.user.clone())
            .build()
            .map_err(|e| ArgsError::InvalidValue("command", e.to_string()))
    }

    /// Where the command runs.
    pub fn target(&self) -> Result<ExecutionTarget, ArgsError> {
        ExecutionTarget::for_host(self.host.as_deref()).map_err(|_| {
            ArgsError::InvalidValue("host", self.host.clone().unwrap_or_default())
        })
    }
}

/// Parse command-line arguments.
pub fn parse_args() -> Result<Args, ArgsError> {
    parse_args_from(std::env::args_os())
}

/// Parse arguments from an iterator (for testing).
///
/// Option parsing stops at the first positional argument (or `--`); it and
/// everything after it form the command.
pub fn parse_args_from<I>(args: I) -> Result<Args, ArgsError>
where
    I: IntoIterator<Item = OsString>,
{
    use lexopt::prelude::*;

    let mut result = Args::default();
    let mut parser = lexopt::Parser::from_iter(args);

    while let Some(arg) = parser.next()? {
        match arg {
            Short('h') | Long("help") => {
                result.help = true;
            }
            Short('V') | Long("version") => {
                result.version = true;
            }
            Short('H') | Long("host") => {
                result.host = Some(parser.value()?.parse()?);
            }
            Short('t') | Long("timeout") => {
                let value: String = parser.value()?.parse()?;
                result.timeout = Some(parse_timeout(&value)?);
            }
            Short('C') | Long("cwd") => {
                result.cwd = Some(parser.value()?.parse()?);
            }
            Short('e') | Long("env") => {
                let value: String = parser.value()?.parse()?;
                let (key, val) = value
                    .split_once('=')
                    .filter(|(key, _)| !key.is_empty())
                    .ok_or_else(|| ArgsError::InvalidValue("env", value.clone()))?;
                result.env.push((key.to_string(), val.to_string()));
            }
            Short('s') | Long("shell") => {
                result.shell = true;
            }
            Long("pty") => {
                result.pty = true;
            }
            Short('u') | Long("user") => {
                result.user = Some(parser.value()?.parse()?);
            }
            Long("json") => {
                result.json = true;
            }
            Short('q') | Long("quiet") => {
                result.quiet = true;
            }
            Short('c') | Long("config") => {
                result.config = Some(parser.value()?.parse()?);
            }
            Short('l') | Long("log-level") => {
                result.log_level = Some(parser.value()?.parse()?);
            }
            Value(program) => {
                result.command.push(program.string()?);
                for arg in parser.raw_args()? {
                    result.command.push(
                        arg.into_string()
                            .map_err(|arg| ArgsError::InvalidValue("command", arg.to_string_lossy().into()))?,
                    );
                }
            }
            _ => return Err(arg.unexpected().into()),
        }
    }

    Ok(result)
}

/// Seconds, fractional allowed; must be a finite non-negative number that
/// fits a [`Duration`].
pub fn parse_timeout(value: &str) -> Result<Duration, ArgsError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| ArgsError::InvalidValue("timeout", value.to_string()))
}

/// Process exit code that reports `result` to the shell.
pub fn exit_code(result: &ExecutionResult) -> i32 {
    match result.state {
        ExecutionState::Completed => match result.exit_status {
            Some(crate::backend::ExitStatus::Code(code)) => code,
            Some(crate::backend::ExitStatus::Signal(signal)) => 128 + signal,
            _ => 1,
        },
        ExecutionState::TimedOut => EXIT_TIMED_OUT,
        ExecutionState::Cancelled => EXIT_CANCELLED,
        ExecutionState::Failed | ExecutionState::Running => EXIT_FAILED,
    }
}

/// Print help message.
pub fn print_help() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        r#"cmdstream {version}
Run a command locally or over SSH, streaming and capturing its output

USAGE:
    cmdstream [OPTIONS] [--] <COMMAND> [ARGS...]

OPTIONS:
    -H, --host <TARGET>     Run on [user@]host[:port] via ssh (localhost runs locally)
    -t, --timeout <SECS>    Kill the command after SECS seconds (fractions allowed)
    -C, --cwd <DIR>         Working directory for the command
    -e, --env <K=V>         Set an environment variable (repeatable)
    -s, --shell             Run the command words through the shell
        --pty               Run under a pseudo-terminal
    -u, --user <USER>       Run the command as USER through sudo
        --json              Print the result as JSON when done
    -q, --quiet             Do not stream output
    -c, --config <FILE>     Path to configuration file (JSON)
    -l, --log-level <LVL>   Log level (error, warn, info, debug, trace)
    -h, --help              Print help
    -V, --version           Print version

ENVIRONMENT VARIABLES:
    CMDSTREAM_TIMEOUT       Default timeout in seconds (overrides config)
    CMDSTREAM_SSH_PROGRAM   ssh client binary (overrides config)
    CMDSTREAM_LOG_LEVEL     Log level (overrides config)
    RUST_LOG                Alternative log level setting

EXIT STATUS:
    The command's exit code; 124 on timeout, 130 when cancelled,
    127 when the command could not be started or the session was lost.

EXAMPLES:
    # Run locally with a timeout
    cmdstream -t 30 make test

    # Run on a remote host in a directory
    cmdstream -H deploy@web-01 -C /srv/app -- git pull --ff-only

    # Shell pipeline, result as JSON
    cmdstream --json -s 'dmesg | tail -n 5'
"#
    );
}

/// Print version.
pub fn print_version() {
    println!("cmdstream {}", env!("CARGO_PKG_VERSION"));
}

/// Argument parsing errors.
#[derive(Debug)]
pub enum ArgsError {
    /// Lexopt parsing error.
    Lexopt(lexopt::Error),
    /// Invalid argument value.
    InvalidValue(&'static str, String),
    /// No command given.
    MissingCommand,
}

impl std::fmt::Display for ArgsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lexopt(e) => write!(f, "{}", e),
            Self::InvalidValue(name, value) => {
                write!(f, "invalid value for --{}: '{}'", name, value)
            }
            Self::MissingCommand => write!(f, "no command given"),
        }
    }
}

impl std::error::Error for ArgsError {}

impl From<lexopt::Error> for ArgsError {
    fn from(e: lexopt::Error) -> Self {
        Self::Lexopt(e)
    }
}
