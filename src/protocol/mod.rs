//! Usage: Incremental SSE line decoder (byte chunks -> logical frame signals).
//!
//! Partial lines are carried across pushes and only classified once a line
//! terminator (LF, CRLF or lone CR) is seen, so any chunking of the same bytes
//! yields the same ordered signals.

mod error_shape;

pub use error_shape::{detect_stream_error, is_terminal_error_frame, ERROR_FINISH_REASON};

use serde_json::Value;

pub const DONE_SENTINEL: &str = "[DONE]";
pub const DEFAULT_MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

const COMMENT_MARKER: u8 = b':';
const DATA_PREFIX: &[u8] = b"data:";
const IGNORED_FIELD_PREFIXES: [&[u8]; 3] = [b"event:", b"id:", b"retry:"];

#[derive(Debug, Clone, PartialEq)]
pub enum FrameSignal {
    /// `: ...` heartbeat/comment line, passed through.
    Comment(String),
    /// JSON payload; `terminal_error` marks frames carrying a known error shape
    /// (the StreamError event itself is produced by the mapper).
    Json { payload: Value, terminal_error: bool },
    /// `data: [DONE]`. Decoding stops after this.
    Done,
    /// One undecodable line; decoding continues.
    Malformed { line: String, error: String },
}

#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    pending_cr: bool,
    overflowed: bool,
    done: bool,
    max_line_bytes: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_line_bytes(DEFAULT_MAX_LINE_BYTES)
    }

    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            pending_cr: false,
            overflowed: false,
            done: false,
            max_line_bytes: max_line_bytes.max(1),
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Bytes buffered for the current (incomplete) line.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<FrameSignal> {
        let mut out = Vec::new();
        if self.done || chunk.is_empty() {
            return out;
        }

        let mut pos = 0usize;
        if self.pending_cr {
            self.pending_cr = false;
            if chunk[0] == b'\n' {
                pos = 1;
            }
        }

        while pos < chunk.len() {
            if self.done {
                break;
            }
            let byte = chunk[pos];
            pos += 1;
            match byte {
                b'\n' => self.end_line(&mut out),
                b'\r' => {
                    self.end_line(&mut out);
                    if pos < chunk.len() {
                        if chunk[pos] == b'\n' {
                            pos += 1;
                        }
                    } else {
                        self.pending_cr = true;
                    }
                }
                _ => self.push_byte(byte, &mut out),
            }
        }

        out
    }

    /// Flushes a trailing line that never received a terminator (end of stream).
    pub fn finish(&mut self) -> Vec<FrameSignal> {
        let mut out = Vec::new();
        self.pending_cr = false;
        if !self.done && (!self.buffer.is_empty() || self.overflowed) {
            self.end_line(&mut out);
        }
        self.buffer.clear();
        out
    }

    fn push_byte(&mut self, byte: u8, out: &mut Vec<FrameSignal>) {
        if self.overflowed {
            return;
        }
        if self.buffer.len() >= self.max_line_bytes {
            self.overflowed = true;
            self.buffer.clear();
            out.push(FrameSignal::Malformed {
                line: String::new(),
                error: format!("line exceeds {} bytes", self.max_line_bytes),
            });
            return;
        }
        self.buffer.push(byte);
    }

    fn end_line(&mut self, out: &mut Vec<FrameSignal>) {
        if self.overflowed {
            self.overflowed = false;
            self.buffer.clear();
            return;
        }
        let line = std::mem::take(&mut self.buffer);
        if let Some(signal) = classify_line(&line) {
            if signal == FrameSignal::Done {
                self.done = true;
            }
            out.push(signal);
        }
    }
}

fn classify_line(line: &[u8]) -> Option<FrameSignal> {
    if line.is_empty() {
        return None;
    }

    if line[0] == COMMENT_MARKER {
        let rest = &line[1..];
        let rest = rest.strip_prefix(b" ").unwrap_or(rest);
        return Some(FrameSignal::Comment(
            String::from_utf8_lossy(rest).into_owned(),
        ));
    }

    if let Some(rest) = line.strip_prefix(DATA_PREFIX) {
        let payload = rest.strip_prefix(b" ").unwrap_or(rest);
        return Some(classify_payload(payload));
    }

    if IGNORED_FIELD_PREFIXES
        .iter()
        .any(|prefix| line.starts_with(prefix))
    {
        return None;
    }

    tracing::trace!(
        line_len = line.len(),
        "sse line without known field ignored"
    );
    None
}

fn classify_payload(payload: &[u8]) -> FrameSignal {
    let text = match std::str::from_utf8(payload) {
        Ok(text) => text,
        Err(err) => {
            return FrameSignal::Malformed {
                line: String::from_utf8_lossy(payload).into_owned(),
                error: format!("invalid utf-8: {err}"),
            }
        }
    };

    let trimmed = text.trim();
    if trimmed == DONE_SENTINEL {
        return FrameSignal::Done;
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(payload) if payload.is_object() => {
            let terminal_error = is_terminal_error_frame(&payload);
            FrameSignal::Json {
                payload,
                terminal_error,
            }
        }
        Ok(_) => FrameSignal::Malformed {
            line: text.to_string(),
            error: "payload is not a JSON object".to_string(),
        },
        Err(err) => FrameSignal::Malformed {
            line: text.to_string(),
            error: err.to_string(),
        },
    }
}

#[cfg(test)]
mod tests;
