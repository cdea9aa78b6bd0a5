//! ANSI escape stripping for terminal output.

use vte::{Params, Parser, Perform};

/// Removes terminal control sequences from captured bytes.
pub struct OutputSanitizer;

impl OutputSanitizer {
    /// Strip ANSI escape codes, keeping newlines, carriage returns and tabs.
    pub fn strip_ansi(input: &[u8]) -> String {
        let mut extractor = PlainText::default();
        let mut parser = Parser::new();
        parser.advance(&mut extractor, input);
        extractor.into_string()
    }

    /// Clean one captured line (terminator already removed).
    ///
    /// Besides escape codes, drops carriage returns: a PTY turns every `\n`
    /// into `\r\n`, and progress output rewrites the line with bare `\r`.
    /// Only the text after the last `\r` is what a terminal would show.
    pub fn sanitize_line(input: &[u8]) -> String {
        let text = Self::strip_ansi(input);
        let trimmed = text.trim_end_matches('\r');
        match trimmed.rfind('\r') {
            Some(pos) => trimmed[pos + 1..].to_string(),
            None => trimmed.to_string(),
        }
    }
}

/// VTE performer collecting printable text.
#[derive(Default)]
struct PlainText {
    output: Vec<u8>,
}

impl PlainText {
    fn into_string(self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

impl Perform for PlainText {
    fn print(&mut self, c: char) {
        let mut buf = [0u8; 4];
        self.output
            .extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
    }

    fn execute(&mut self, byte: u8) {
        if matches!(byte, b'\n' | b'\r' | b'\t') {
            self.output.push(byte);
        }
    }

    fn hook(&mut self, _params: &Params, _intermediates: &[u8], _ignore: bool, _action: char) {}

    fn put(&mut self, _byte: u8) {}

    fn unhook(&mut self) {}

    fn osc_dispatch(&mut self, _params: &[&[u8]], _bell_terminated: bool) {}

    fn csi_dispatch(
        &mut self,
        _params: &Params,
        _intermediates: &[u8],
        _ignore: bool,
        _action: char,
    ) {
    }

    fn esc_dispatch(&mut self, _intermediates: &[u8], _ignore: bool, _byte: u8) {}
}
