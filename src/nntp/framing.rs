//! Line framing for the NNTP wire: CRLF lines, dot-terminated blocks and
//! dot-stuffing.
//!
//! [`LineReader`] owns the byte buffer. Network reads never line up with
//! protocol frames, so bytes are accumulated until the delimiter shows up and
//! anything past it stays buffered for the next frame.

use std::borrow::Cow;
use std::io::{self, Read};

pub const CRLF: &[u8] = b"\r\n";
const READ_CHUNK: usize = 8192;
/// Upper bound on a single line; packets are one JSON line, so this is generous.
const MAX_FRAME: usize = 64 * 1024 * 1024;

pub struct LineReader<S> {
    inner: S,
    buf: Vec<u8>,
}

impl<S> LineReader<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(READ_CHUNK),
        }
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Bytes received but not yet handed out as a frame.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

impl<S: Read> LineReader<S> {
    /// Reads until `delim` is seen and returns everything before it.
    ///
    /// The delimiter is consumed. EOF before the delimiter is an
    /// `UnexpectedEof` error; a partial frame is never returned.
    pub fn read_until_delimiter(&mut self, delim: &[u8]) -> io::Result<Vec<u8>> {
        debug_assert!(!delim.is_empty());
        let mut scanned = 0;

        loop {
            if let Some(pos) = find(&self.buf[scanned..], delim) {
                let end = scanned + pos;
                let frame = self.buf[..end].to_vec();
                self.buf.drain(..end + delim.len());
                return Ok(frame);
            }

            if self.buf.len() > MAX_FRAME {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "frame exceeds maximum length",
                ));
            }

            // the delimiter may straddle the previous chunk boundary
            scanned = self.buf.len().saturating_sub(delim.len() - 1);

            let mut chunk = [0u8; READ_CHUNK];
            let n = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed before end of frame",
                ));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Reads one CRLF-terminated line, without its terminator.
    pub fn read_line(&mut self) -> io::Result<String> {
        let bytes = self.read_until_delimiter(CRLF)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Reads a multi-line block up to its lone `.` line, undoing dot-stuffing.
    pub fn read_block(&mut self) -> io::Result<Vec<String>> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_line()?;
            if line == "." {
                return Ok(lines);
            }
            lines.push(unstuff_line(line));
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Doubles a leading `.` so the line cannot be mistaken for the terminator.
#[must_use]
pub fn stuff_line(line: &str) -> Cow<'_, str> {
    if line.starts_with('.') {
        Cow::Owned(format!(".{line}"))
    } else {
        Cow::Borrowed(line)
    }
}

#[must_use]
pub fn unstuff_line(line: String) -> String {
    match line.strip_prefix('.') {
        Some(rest) => rest.to_string(),
        None => line,
    }
}

/// Encodes body text for transmission: CRLF line endings, dot-stuffed, and
/// closed by the `.` terminator line.
#[must_use]
pub fn encode_block(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    if !text.is_empty() {
        let text = text.strip_suffix('\n').unwrap_or(text);
        for line in text.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            out.push_str(&stuff_line(line));
            out.push_str("\r\n");
        }
    }
    out.push_str(".\r\n");
    out
}
