//! Output buffer that strips ANSI escapes as bytes arrive.
//!
//! Markers are compared against the cleaned text only. The vte parser is
//! kept across calls, so an escape sequence split between two chunks is
//! still removed.

use std::fmt;

use memchr::memmem;
use regex::bytes::Regex;

/// Accumulates ANSI-stripped output and searches it for markers.
pub struct OutputBuffer {
    /// Stateful escape-sequence parser.
    parser: vte::Parser,

    /// Cleaned output.
    text: Vec<u8>,
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self {
            parser: vte::Parser::new(),
            text: Vec::with_capacity(4096),
        }
    }
}

impl OutputBuffer {
    /// Extend the buffer with new data, stripping ANSI escape codes.
    pub fn extend(&mut self, data: &[u8]) {
        let mut sink = Printable {
            out: &mut self.text,
        };
        self.parser.advance(&mut sink, data);
    }

    /// Find `needle` at or after byte offset `from`.
    pub fn find(&self, needle: &[u8], from: usize) -> Option<usize> {
        if from > self.text.len() {
            return None;
        }
        memmem::find(&self.text[from..], needle).map(|p| from + p)
    }

    /// Find the first line feed at or after `from`.
    pub fn find_line_end(&self, from: usize) -> Option<usize> {
        if from > self.text.len() {
            return None;
        }
        memchr::memchr(b'\n', &self.text[from..]).map(|p| from + p)
    }

    /// Offset just past the last line feed before `at`, or 0.
    pub fn line_start(&self, at: usize) -> usize {
        let at = at.min(self.text.len());
        memchr::memrchr(b'\n', &self.text[..at]).map_or(0, |p| p + 1)
    }

    /// Whether `bytes` occurs exactly at offset `at`.
    pub fn has_at(&self, at: usize, bytes: &[u8]) -> bool {
        self.text.get(at..at + bytes.len()) == Some(bytes)
    }

    /// Search the buffer for a pattern starting at byte offset `from`.
    pub fn search_from(&self, pattern: &Regex, from: usize) -> Option<regex::bytes::Match<'_>> {
        if from > self.text.len() {
            return None;
        }
        pattern.find_at(&self.text, from)
    }

    /// Lossy UTF-8 view of a byte range.
    pub fn slice_lossy(&self, start: usize, end: usize) -> String {
        String::from_utf8_lossy(&self.text[start..end]).into_owned()
    }

    /// Get the cleaned contents as a string (lossy UTF-8 conversion).
    pub fn as_str_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.text)
    }
}

impl fmt::Debug for OutputBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputBuffer")
            .field("text", &self.as_str_lossy())
            .finish()
    }
}

/// vte performer keeping printable text and line structure.
struct Printable<'a> {
    out: &'a mut Vec<u8>,
}

impl vte::Perform for Printable<'_> {
    fn print(&mut self, c: char) {
        let mut utf8 = [0u8; 4];
        self.out.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
    }

    fn execute(&mut self, byte: u8) {
        if matches!(byte, b'\n' | b'\r' | b'\t') {
            self.out.push(byte);
        }
    }
}
