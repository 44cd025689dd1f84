//! Byte-boundary framing for upstream provider streams.
//!
//! Network chunks arrive at arbitrary offsets. The types here hold partial
//! bytes back until a complete unit (line, SSE event, UTF-8 sequence) is
//! available, so nothing downstream ever sees a broken code point.

use tracing::{debug, trace};

/// Frame boundary convention of an upstream wire format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameDelimiter {
    /// Server-sent events: fields on separate lines, a blank line ends the event.
    Sse,
    /// One frame per non-blank line (newline-delimited JSON).
    Lines,
}

/// One decoded provider frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    /// SSE `event:` field, when present.
    pub event: Option<String>,
    /// SSE `data:` lines joined with `\n`, or the whole line for `Lines` framing.
    pub data: String,
}

impl Frame {
    /// Creates a frame without an event name.
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }

    /// Creates a frame with an SSE event name.
    pub fn with_event(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
        }
    }

    /// Returns the event name or an empty string.
    pub fn event_name(&self) -> &str {
        self.event.as_deref().unwrap_or("")
    }
}

/// Accumulates bytes and yields complete `\n`-terminated lines.
///
/// A single trailing `\r` is stripped from each line. Splitting happens on the
/// raw byte, which never occurs inside a multi-byte UTF-8 sequence.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
    /// Prefix of `buf` already known to hold no `\n`.
    scanned: usize,
}

impl LineBuffer {
    /// Appends a chunk and returns every line completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(offset) = self.buf[from..].iter().position(|b| *b == b'\n') {
            let end = from + offset;
            let line = &self.buf[start..end];
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            lines.push(line.to_vec());
            start = end + 1;
            from = start;
        }
        self.buf.drain(..start);
        self.scanned = self.buf.len();
        lines
    }

    /// Takes the unterminated remainder, if any.
    pub fn take_remainder(&mut self) -> Option<Vec<u8>> {
        if self.buf.is_empty() {
            return None;
        }
        let mut rest = std::mem::take(&mut self.buf);
        self.scanned = 0;
        if rest.last() == Some(&b'\r') {
            rest.pop();
        }
        Some(rest)
    }

    /// Returns true when no partial line is buffered.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Incremental UTF-8 decoder for untagged text streams.
///
/// Incomplete trailing sequences wait for the next chunk. Bytes that can never
/// form valid UTF-8 become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Buffer {
    pending: Vec<u8>,
}

impl Utf8Buffer {
    /// Appends a chunk and returns all text that is now complete.
    pub fn push(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                    }
                }
            }
        }
    }

    /// Drops an incomplete trailing sequence and returns how many bytes were lost.
    pub fn finish(&mut self) -> usize {
        let dropped = self.pending.len();
        if dropped > 0 {
            debug!(bytes = dropped, "discarding incomplete UTF-8 tail");
            self.pending.clear();
        }
        dropped
    }
}

/// Turns raw upstream bytes into provider frames.
#[derive(Debug)]
pub struct FrameReader {
    delimiter: FrameDelimiter,
    lines: LineBuffer,
    event: Option<String>,
    data: Vec<String>,
}

impl FrameReader {
    /// Creates a reader for the given framing convention.
    pub fn new(delimiter: FrameDelimiter) -> Self {
        Self {
            delimiter,
            lines: LineBuffer::default(),
            event: None,
            data: Vec::new(),
        }
    }

    /// Returns the framing convention of this reader.
    pub fn delimiter(&self) -> FrameDelimiter {
        self.delimiter
    }

    /// Feeds one network chunk and returns every frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        for line in self.lines.push(chunk) {
            if let Some(frame) = self.accept_line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flushes buffered input at end of stream.
    ///
    /// A remainder that forms a complete unit becomes a final frame; anything
    /// else is dropped.
    pub fn finish(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        if let Some(rest) = self.lines.take_remainder()
            && let Some(frame) = self.accept_line(&rest)
        {
            frames.push(frame);
        }
        if self.delimiter == FrameDelimiter::Sse
            && let Some(frame) = self.dispatch()
        {
            frames.push(frame);
        }
        frames
    }

    fn accept_line(&mut self, raw: &[u8]) -> Option<Frame> {
        let Ok(line) = std::str::from_utf8(raw) else {
            debug!(bytes = raw.len(), "discarding frame line with invalid UTF-8");
            return None;
        };
        match self.delimiter {
            FrameDelimiter::Lines => {
                if line.trim().is_empty() {
                    None
                } else {
                    Some(Frame::data(line))
                }
            }
            FrameDelimiter::Sse => self.accept_sse_line(line),
        }
    }

    fn accept_sse_line(&mut self, line: &str) -> Option<Frame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            trace!("ignoring SSE comment line");
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<Frame> {
        let event = self.event.take();
        if event.is_none() && self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(Frame { event, data })
    }
}
