//! Append-only output buffer with terminal control sequence stripping.
//!
//! Raw channel bytes are fed through a `vte` parser, so escape sequences
//! split across chunk boundaries are still removed. Only printable text
//! and line-structure controls (`\n`, `\r`, `\t`) reach the buffer.

use memchr::memmem;
use vte::{Parser, Perform};

/// Accumulated, cleaned session output.
///
/// The text only ever grows between [`clear`](Self::clear) or
/// [`take`](Self::take) calls, which keeps offsets handed out by
/// [`len`](Self::len) valid for later searches.
pub struct SessionBuffer {
    parser: Parser,
    sink: TextSink,
}

/// `vte` performer that keeps printable text and line controls.
#[derive(Default)]
struct TextSink {
    text: String,
}

impl Perform for TextSink {
    fn print(&mut self, c: char) {
        self.text.push(c);
    }

    fn execute(&mut self, byte: u8) {
        if matches!(byte, b'\n' | b'\r' | b'\t') {
            self.text.push(byte as char);
        }
    }
}

impl SessionBuffer {
    /// Create an empty buffer with room for `capacity` bytes of text.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            parser: Parser::new(),
            sink: TextSink {
                text: String::with_capacity(capacity),
            },
        }
    }

    /// Feed raw bytes. Undecodable bytes become U+FFFD instead of failing.
    pub fn extend(&mut self, data: &[u8]) {
        self.parser.advance(&mut self.sink, data);
    }

    /// Find `needle` in text appended at or after `offset`.
    ///
    /// Returns the absolute byte offset of the match.
    pub fn find_since(&self, offset: usize, needle: &str) -> Option<usize> {
        let haystack = self.sink.text.as_bytes().get(offset..)?;
        memmem::find(haystack, needle.as_bytes()).map(|pos| offset + pos)
    }

    /// Check if `needle` appeared at or after `offset`.
    pub fn contains_since(&self, offset: usize, needle: &str) -> bool {
        self.find_since(offset, needle).is_some()
    }

    /// Text appended at or after `offset`.
    pub fn text_since(&self, offset: usize) -> &str {
        self.sink.text.get(offset..).unwrap_or("")
    }

    /// Get the buffer contents.
    pub fn as_str(&self) -> &str {
        &self.sink.text
    }

    /// Take ownership of the buffer contents and reset.
    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.sink.text)
    }

    /// Clear the text. Parser state is kept so a sequence in flight is
    /// still recognised.
    pub fn clear(&mut self) {
        self.sink.text.clear();
    }

    /// Current text length in bytes.
    pub fn len(&self) -> usize {
        self.sink.text.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.sink.text.is_empty()
    }
}

impl Default for SessionBuffer {
    fn default() -> Self {
        Self::with_capacity(64 * 1024)
    }
}

impl std::fmt::Debug for SessionBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBuffer")
            .field("len", &self.len())
            .finish()
    }
}
