//! # cmdstream
//!
//! Run commands locally or on remote hosts and capture their output as it
//! happens.
//!
//! Every execution reads stdout and stderr concurrently, numbers each line
//! in arrival order, mirrors it to a live [`OutputLogger`], and ends in one
//! of four states: completed, timed out, cancelled or failed. Output
//! captured before a timeout or cancellation is kept.
//!
//! ## Features
//!
//! - **Local and remote**: the same call runs a child process or an SSH session
//! - **Timeouts and cancellation**: kills the whole process group, from any thread
//! - **Live logging**: per-line callbacks through [`OutputLogger`]
//! - **Uniform failures**: a missing program or unreachable host is a `Failed` result
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use cmdstream::{Command, CommandRunner, ExecutionState, ExecutionTarget};
//!
//! fn main() -> cmdstream::Result<()> {
//!     cmdstream::logging::try_init().ok();
//!
//!     let runner = CommandRunner::new();
//!     let result = runner.run(
//!         &Command::new(["cargo", "test"]).working_dir("/srv/project"),
//!         &ExecutionTarget::Local,
//!         Some(Duration::from_secs(300)),
//!     )?;
//!
//!     match result.state {
//!         ExecutionState::Completed => println!("exit code {:?}", result.exit_code),
//!         state => println!("{}: {} lines captured", state, result.output.len()),
//!     }
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod execution;
pub mod logger;
pub mod logging;
pub mod output;
pub mod pty;

// Re-export commonly used types
pub use backend::{ExitStatus, SshTransport, Transport};
pub use error::{CmdStreamError, Result};
pub use execution::{
    run, CancelToken, Command, CommandBuilder, CommandRunner, ExecutionHandle, ExecutionResult,
    ExecutionState, ExecutionTarget, Origin, OutputLine, RemoteTarget, RunnerOptions,
};
pub use logger::{ChannelLogger, LogError, LogEvent, NullLogger, OutputLogger, TracingLogger};
pub use output::OutputSanitizer;
pub use pty::PtySize;
