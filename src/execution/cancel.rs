//! Cancellation token shared between an execution and its callers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Requests cancellation of a running execution.
///
/// Clones share one flag, so a token can be handed to another thread (or a
/// Ctrl-C handler) before the command starts. Cancelling is idempotent and
/// has no effect once the execution has reached a terminal state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Returns `true` only for the first request.
    pub fn cancel(&self) -> bool {
        !self.flag.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
