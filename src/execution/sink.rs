//! Ordered, synchronized collector for captured output.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use serde::Serialize;
use tracing::trace;

use crate::error::CmdStreamError;
use crate::logger::OutputLogger;
use crate::Result;

/// Stream a line was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Stdout,
    Stderr,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Stdout => "stdout",
            Origin::Stderr => "stderr",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One captured unit of output.
#[derive(Debug, Clone, Serialize)]
pub struct OutputLine {
    /// Arrival order across both streams of one execution, starting at 0.
    pub seq: u64,
    pub origin: Origin,
    /// Bytes as read, without the line terminator.
    #[serde(skip)]
    pub raw: Vec<u8>,
    /// Decoded text (lossy UTF-8, ANSI-stripped for PTY output).
    pub text: String,
    /// Whether the unit ended with a newline. Only the last unit of a
    /// stream can be unterminated.
    pub terminated: bool,
    #[serde(skip)]
    pub at: SystemTime,
}

/// Append-only log shared by the pumps of one execution.
///
/// Sequence numbers are assigned under the lock, so the stored order and the
/// numbering always agree. Every accepted line is mirrored to the logger
/// after the lock is released; logger failures are counted, never raised.
pub struct OutputSink {
    lines: Mutex<Vec<OutputLine>>,
    next_seq: AtomicU64,
    finalized: AtomicBool,
    log_failures: AtomicU64,
    logger: Arc<dyn OutputLogger>,
}

impl OutputSink {
    pub fn new(logger: Arc<dyn OutputLogger>) -> Self {
        Self {
            lines: Mutex::new(Vec::new()),
            next_seq: AtomicU64::new(0),
            finalized: AtomicBool::new(false),
            log_failures: AtomicU64::new(0),
            logger,
        }
    }

    /// Store one unit and return its sequence number.
    pub fn append(&self, origin: Origin, raw: Vec<u8>, text: String, terminated: bool) -> Result<u64> {
        let line = {
            let mut lines = self.lines.lock().map_err(|_| CmdStreamError::LockPoisoned)?;
            if self.finalized.load(Ordering::SeqCst) {
                return Err(CmdStreamError::SinkFinalized);
            }
            let line = OutputLine {
                seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
                origin,
                raw,
                text,
                terminated,
                at: SystemTime::now(),
            };
            lines.push(line.clone());
            line
        };

        if let Err(e) = self.logger.log_line(&line) {
            self.log_failures.fetch_add(1, Ordering::Relaxed);
            trace!(seq = line.seq, error = %e, "logger rejected output line");
        }

        Ok(line.seq)
    }

    /// Copy of everything captured so far.
    pub fn snapshot(&self) -> Vec<OutputLine> {
        match self.lines.lock() {
            Ok(lines) => lines.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Number of lines appended so far.
    pub fn len(&self) -> usize {
        self.next_seq.load(Ordering::SeqCst) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reject all further appends.
    ///
    /// Called by the owning handle once its pumps have stopped (or been
    /// detached). Idempotent.
    pub fn finalize(&self) {
        // Taking the lock orders this after any append in progress.
        let _guard = self.lines.lock();
        self.finalized.store(true, Ordering::SeqCst);
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::SeqCst)
    }

    pub fn log_failures(&self) -> u64 {
        self.log_failures.load(Ordering::Relaxed)
    }

    /// Move the captured lines out. Only meaningful after [`finalize`](Self::finalize).
    pub(crate) fn take_lines(&self) -> Vec<OutputLine> {
        match self.lines.lock() {
            Ok(mut lines) => std::mem::take(&mut *lines),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSink")
            .field("len", &self.len())
            .field("finalized", &self.is_finalized())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::{LogError, NullLogger};
    use std::sync::atomic::AtomicUsize;

    fn sink() -> OutputSink {
        OutputSink::new(Arc::new(NullLogger))
    }

    fn push(sink: &OutputSink, origin: Origin, text: &str) -> Result<u64> {
        sink.append(origin, text.as_bytes().to_vec(), text.to_string(), true)
    }

    #[test]
    fn test_sequence_numbers_start_at_zero() {
        let sink = sink();
        assert_eq!(push(&sink, Origin::Stdout, "a").unwrap(), 0);
        assert_eq!(push(&sink, Origin::Stderr, "b").unwrap(), 1);
        assert_eq!(push(&sink, Origin::Stdout, "c").unwrap(), 2);
        assert_eq!(sink.len(), 3);

        let lines = sink.snapshot();
        let texts: Vec<_> = lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_concurrent_appends_have_no_gaps_or_duplicates() {
        let sink = Arc::new(sink());
        let writers: Vec<_> = [Origin::Stdout, Origin::Stderr]
            .into_iter()
            .map(|origin| {
                let sink = Arc::clone(&sink);
                std::thread::spawn(move || {
                    for i in 0..500 {
                        push(&sink, origin, &i.to_string()).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let lines = sink.snapshot();
        assert_eq!(lines.len(), 1000);
        for (expected, line) in lines.iter().enumerate() {
            assert_eq!(line.seq, expected as u64);
        }
        for origin in [Origin::Stdout, Origin::Stderr] {
            let values: Vec<u32> = lines
                .iter()
                .filter(|l| l.origin == origin)
                .map(|l| l.text.parse().unwrap())
                .collect();
            assert_eq!(values, (0..500).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_finalize_rejects_appends() {
        let sink = sink();
        push(&sink, Origin::Stdout, "before").unwrap();
        sink.finalize();
        sink.finalize();
        assert!(sink.is_finalized());
        assert!(matches!(
            push(&sink, Origin::Stdout, "after"),
            Err(CmdStreamError::SinkFinalized)
        ));
        assert_eq!(sink.snapshot().len(), 1);
    }

    #[test]
    fn test_logger_failure_does_not_abort_append() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let logger = move |_: &OutputLine| -> std::result::Result<(), LogError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(LogError::new("disk full"))
        };
        let sink = OutputSink::new(Arc::new(logger));

        push(&sink, Origin::Stdout, "one").unwrap();
        push(&sink, Origin::Stderr, "two").unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(sink.log_failures(), 2);
        assert_eq!(sink.snapshot().len(), 2);
    }

    #[test]
    fn test_take_lines_empties_buffer() {
        let sink = sink();
        push(&sink, Origin::Stdout, "x").unwrap();
        sink.finalize();
        assert_eq!(sink.take_lines().len(), 1);
        assert!(sink.snapshot().is_empty());
    }

    #[test]
    fn test_origin_display() {
        assert_eq!(Origin::Stdout.to_string(), "stdout");
        assert_eq!(serde_json::to_string(&Origin::Stderr).unwrap(), "\"stderr\"");
    }
}
