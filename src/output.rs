//! Processing of raw PTY output.
//!
//! - [`strip_ansi`] removes escape sequences so output can be scanned as text
//! - [`PlainLines`] does the same for a stream, yielding completed lines
//! - [`Utf8Carry`] decodes a chunked byte stream without splitting characters
//! - [`looks_like_cd`] spots echoed directory-changing commands

use vte::{Parser, Perform};

/// Strip ANSI/VT escape sequences from raw bytes.
///
/// Printable characters, newlines, carriage returns and tabs survive;
/// CSI, OSC, DCS and other control sequences are dropped.
pub fn strip_ansi(input: &[u8]) -> String {
    let mut text = PlainText::default();
    let mut parser = Parser::new();
    parser.advance(&mut text, input);
    text.0
}

#[derive(Default)]
struct PlainText(String);

impl Perform for PlainText {
    fn print(&mut self, c: char) {
        self.0.push(c);
    }

    fn execute(&mut self, byte: u8) {
        if matches!(byte, b'\n' | b'\r' | b'\t') {
            self.0.push(byte as char);
        }
    }
}

/// Longest partial line kept by [`PlainLines`].
const MAX_LINE: usize = 4096;

/// Escape-stripped line splitter for a chunked stream.
///
/// Parser state survives between chunks, so sequences split across reads
/// are still removed.
pub struct PlainLines {
    parser: Parser,
    text: PlainText,
}

impl PlainLines {
    pub fn new() -> Self {
        Self {
            parser: Parser::new(),
            text: PlainText::default(),
        }
    }

    /// Feed raw bytes, returning every line completed by them.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.parser.advance(&mut self.text, bytes);

        let buffered = &mut self.text.0;
        let mut lines = Vec::new();
        while let Some(end) = buffered.find(['\n', '\r']) {
            let line = buffered[..end].to_string();
            buffered.drain(..=end);
            if !line.is_empty() {
                lines.push(line);
            }
        }
        if buffered.len() > MAX_LINE {
            buffered.clear();
        }
        lines
    }
}

impl Default for PlainLines {
    fn default() -> Self {
        Self::new()
    }
}

/// Incremental UTF-8 decoder for PTY output.
///
/// A read from the PTY may end in the middle of a multi-byte character.
/// The incomplete tail is held back and prefixed to the next chunk.
#[derive(Debug, Default)]
pub struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `chunk`, returning everything that forms complete characters.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        let keep = incomplete_tail(&bytes);
        self.pending = bytes.split_off(bytes.len() - keep);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Flush whatever is held back (lossily) at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Number of trailing bytes that start a character not yet complete.
fn incomplete_tail(bytes: &[u8]) -> usize {
    // A UTF-8 sequence is at most 4 bytes; look back at most 3.
    for back in 1..=bytes.len().min(3) {
        let b = bytes[bytes.len() - back];
        if b & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let width = match b {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => return 0,
        };
        return if width > back { back } else { 0 };
    }
    0
}

/// Heuristic: does any line of (stripped) output look like an echoed `cd`?
///
/// This is only a cache-invalidation hint. Aliases, scripts and custom
/// prompts can fool it in both directions.
pub fn looks_like_cd(text: &str) -> bool {
    text.lines().any(|line| {
        line.split(|c: char| c.is_whitespace() || matches!(c, ';' | '&' | '|' | '(' | ')'))
            .any(|word| matches!(word, "cd" | "pushd" | "popd"))
    })
}
