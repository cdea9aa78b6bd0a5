//! PTY (pseudo-terminal) execution.
//!
//! Some programs only produce their usual output, or only accept
//! line-by-line input, when attached to a terminal. Commands built with
//! [`Command::pty`](crate::Command::pty) are spawned under a PTY. A
//! terminal has a single output channel, so stdout and stderr arrive
//! merged and are captured as stdout.

mod native;

pub use native::NativePty;

/// Size of a PTY in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtySize {
    /// Number of rows (height).
    pub rows: u16,
    /// Number of columns (width).
    pub cols: u16,
}

impl PtySize {
    /// Create a new PtySize with the given dimensions.
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }
}

impl Default for PtySize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

impl From<PtySize> for portable_pty::PtySize {
    fn from(size: PtySize) -> Self {
        portable_pty::PtySize {
            rows: size.rows,
            cols: size.cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}
