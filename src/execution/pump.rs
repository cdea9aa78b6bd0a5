//! Stream pumps: one thread per output stream.

use std::io::{self, BufRead, BufReader, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use serde::Serialize;
use tracing::{debug, trace, warn};

use super::sink::{Origin, OutputSink};
use crate::error::CmdStreamError;
use crate::output::OutputSanitizer;

/// Read buffer size.
const READ_BUFFER_SIZE: usize = 8192;

/// A read failure that ended a pump early.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamFault {
    pub origin: Origin,
    pub message: String,
}

/// What a pump did before it stopped.
#[derive(Debug, Clone)]
pub struct PumpReport {
    pub origin: Origin,
    pub lines: u64,
    pub bytes: u64,
    pub fault: Option<StreamFault>,
}

/// Copies one stream into an [`OutputSink`], line by line.
///
/// A unit is a line ending in `\n`, or whatever is left when the stream
/// closes. The loop ends on end-of-file, on a read error (recorded as a
/// [`StreamFault`]), or at the next line boundary after the stop flag is
/// raised. A pump never blocks on anything but its own read.
pub struct StreamPump<R: Read + Send + 'static> {
    reader: R,
    origin: Origin,
    sink: Arc<OutputSink>,
    stop: Arc<AtomicBool>,
    sanitize: bool,
}

impl<R: Read + Send + 'static> StreamPump<R> {
    pub fn new(reader: R, origin: Origin, sink: Arc<OutputSink>) -> Self {
        Self {
            reader,
            origin,
            sink,
            stop: Arc::new(AtomicBool::new(false)),
            sanitize: false,
        }
    }

    /// Strip terminal control sequences from line text (PTY output).
    pub fn sanitize(mut self, enabled: bool) -> Self {
        self.sanitize = enabled;
        self
    }

    /// Run the pump on a new named thread.
    pub fn spawn(self, thread_name: String) -> io::Result<PumpHandle> {
        let origin = self.origin;
        let stop = Arc::clone(&self.stop);
        let thread = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || self.run())?;
        Ok(PumpHandle {
            origin,
            stop,
            thread: Some(thread),
        })
    }

    /// Run the pump on the current thread until the stream ends.
    pub fn run(self) -> PumpReport {
        let Self {
            reader,
            origin,
            sink,
            stop,
            sanitize,
        } = self;
        let emitter = Emitter {
            sink,
            origin,
            sanitize,
        };
        let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, reader);
        let mut report = PumpReport {
            origin,
            lines: 0,
            bytes: 0,
            fault: None,
        };
        let mut buf = Vec::new();

        loop {
            if stop.load(Ordering::SeqCst) {
                debug!(%origin, "pump: stop requested");
                break;
            }

            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => {
                    debug!(%origin, lines = report.lines, "pump: EOF");
                    break;
                }
                Ok(n) => {
                    trace!(%origin, bytes = n, "pump: read unit");
                    report.bytes += n as u64;
                    if !emitter.emit(&mut buf, &mut report) {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // Bytes read before the error are still output.
                    if !buf.is_empty() {
                        report.bytes += buf.len() as u64;
                        emitter.emit(&mut buf, &mut report);
                    }
                    // EIO on Unix means the PTY slave side was closed.
                    #[cfg(unix)]
                    if e.raw_os_error() == Some(libc::EIO) {
                        debug!(%origin, "pump: PTY closed (EIO)");
                        break;
                    }
                    warn!(%origin, error = %e, "pump: read failed");
                    report.fault = Some(StreamFault {
                        origin,
                        message: e.to_string(),
                    });
                    break;
                }
            }
        }

        report
    }
}

/// Turns read units into sink lines for one stream.
struct Emitter {
    sink: Arc<OutputSink>,
    origin: Origin,
    sanitize: bool,
}

impl Emitter {
    /// Append one unit. Returns `false` when the sink no longer accepts output.
    fn emit(&self, buf: &mut Vec<u8>, report: &mut PumpReport) -> bool {
        let terminated = buf.last() == Some(&b'\n');
        if terminated {
            buf.pop();
        }
        let raw = std::mem::take(buf);
        let text = if self.sanitize {
            OutputSanitizer::sanitize_line(&raw)
        } else {
            let text = String::from_utf8_lossy(&raw);
            text.strip_suffix('\r').unwrap_or(&text).to_string()
        };

        match self.sink.append(self.origin, raw, text, terminated) {
            Ok(_) => {
                report.lines += 1;
                true
            }
            Err(CmdStreamError::SinkFinalized) => {
                debug!(origin = %self.origin, "pump: sink finalized, dropping output");
                false
            }
            Err(e) => {
                warn!(origin = %self.origin, error = %e, "pump: append failed");
                report.fault = Some(StreamFault {
                    origin: self.origin,
                    message: e.to_string(),
                });
                false
            }
        }
    }
}

/// Handle to a running pump thread.
pub struct PumpHandle {
    origin: Origin,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<PumpReport>>,
}

impl PumpHandle {
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Ask the pump to stop at the next line boundary. A pump blocked in a
    /// read only notices once the read returns.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the pump thread and collect its report.
    pub fn join(mut self) -> PumpReport {
        let origin = self.origin;
        let thread = match self.thread.take() {
            Some(thread) => thread,
            None => {
                return PumpReport {
                    origin,
                    lines: 0,
                    bytes: 0,
                    fault: None,
                }
            }
        };
        thread.join().unwrap_or_else(|_| PumpReport {
            origin,
            lines: 0,
            bytes: 0,
            fault: Some(StreamFault {
                origin,
                message: "pump thread panicked".into(),
            }),
        })
    }

    /// Give up on the pump: raise its stop flag and let the thread run
    /// until its blocked read returns.
    pub fn detach(mut self) {
        self.stop();
        self.thread.take();
    }
}
