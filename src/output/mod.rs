//! Output post-processing.
//!
//! PTY output carries terminal control sequences (colors, cursor movement,
//! window titles). Captured lines keep the raw bytes and expose text with
//! those sequences removed.
//!
//! ```
//! use cmdstream::output::OutputSanitizer;
//!
//! let clean = OutputSanitizer::sanitize_line(b"\x1b[32mok\x1b[0m\r");
//! assert_eq!(clean, "ok");
//! ```

mod sanitizer;

pub use sanitizer::OutputSanitizer;
