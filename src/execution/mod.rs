//! Command execution engine.
//!
//! This module provides:
//! - [`Command`] and [`ExecutionTarget`]: what runs, and where
//! - [`CommandRunner`]: run to completion, timeout or cancellation
//! - [`ExecutionHandle`]: a started command, for callers that drive it themselves
//! - [`ExecutionResult`]: exit status plus the captured, ordered output
//!
//! Each execution reads stdout and stderr on two dedicated threads into one
//! [`OutputSink`], which numbers every line as it arrives.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use cmdstream::execution::{Command, CommandRunner, ExecutionTarget};
//!
//! let runner = CommandRunner::new();
//! let cmd = Command::shell("cargo build 2>&1 | tail -n 20").working_dir("/srv/app");
//! let result = runner
//!     .run(&cmd, &ExecutionTarget::remote("ci@build-01").unwrap(), Some(Duration::from_secs(60)))
//!     .unwrap();
//!
//! for line in result.combined_output() {
//!     println!("[{}] {}", line.origin, line.text);
//! }
//! ```

mod cancel;
mod command;
mod handle;
mod id;
mod pump;
mod result;
mod runner;
mod sink;
mod state;
mod target;

pub use cancel::CancelToken;
pub use command::{current_user, Command, CommandBuilder, Program};
pub(crate) use command::is_env_name;
pub use handle::{ExecutionHandle, HandleOptions};
pub use id::ExecutionId;
pub use pump::{PumpHandle, PumpReport, StreamFault, StreamPump};
pub use result::ExecutionResult;
pub use runner::{run, CommandRunner, RunnerOptions};
pub use sink::{Origin, OutputLine, OutputSink};
pub use state::ExecutionState;
pub use target::{is_localhost, ExecutionTarget, RemoteTarget};
