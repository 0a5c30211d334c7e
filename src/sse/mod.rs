//! Server-sent event framing used between the proxy and its callers.
//!
//! The wire format is deliberately small: every record is one `data: ` line
//! followed by a blank line. Content records carry `{"text": "..."}`, and the
//! stream ends with the literal `data: [DONE]` record.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DATA_PREFIX: &str = "data:";
pub const DONE_SENTINEL: &str = "[DONE]";
pub const RECORD_SEPARATOR: &[u8] = b"\n\n";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Fragment(Fragment),
    Done,
}

#[derive(Debug, Error)]
pub enum SseError {
    #[error("invalid fragment payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("event record exceeds {limit} bytes")]
    RecordTooLarge { limit: usize },
}

impl StreamEvent {
    pub fn fragment(text: impl Into<String>) -> Self {
        StreamEvent::Fragment(Fragment { text: text.into() })
    }
}

/// Encodes one event as a complete wire record.
pub fn encode(event: &StreamEvent) -> Bytes {
    match event {
        StreamEvent::Done => Bytes::from_static(b"data: [DONE]\n\n"),
        StreamEvent::Fragment(fragment) => {
            // A struct with a single String field cannot fail to serialize.
            let payload = serde_json::to_string(fragment).unwrap_or_default();
            Bytes::from(format!("data: {payload}\n\n"))
        }
    }
}

/// Joins the `data:` lines of one record. Returns `None` for records without
/// any data line (comments, `event:`-only records, keep-alives).
pub fn record_data(record: &str) -> Option<String> {
    let mut data: Option<String> = None;
    for line in record.lines() {
        let Some(rest) = line.strip_prefix(DATA_PREFIX) else {
            continue;
        };
        let rest = rest.strip_prefix(' ').unwrap_or(rest);
        match data.as_mut() {
            Some(buf) => {
                buf.push('\n');
                buf.push_str(rest);
            }
            None => data = Some(rest.to_string()),
        }
    }
    data
}

/// Decodes one record produced by [`encode`].
pub fn decode_record(record: &str) -> Result<Option<StreamEvent>, SseError> {
    let Some(data) = record_data(record) else {
        return Ok(None);
    };
    if data == DONE_SENTINEL {
        return Ok(Some(StreamEvent::Done));
    }
    let fragment: Fragment = serde_json::from_str(&data)?;
    Ok(Some(StreamEvent::Fragment(fragment)))
}

/// Largest record the decoder buffers before giving up on the stream.
pub const DEFAULT_MAX_RECORD_BYTES: usize = 4 * 1024 * 1024;

/// Incremental splitter turning arbitrary byte chunks into whole records.
///
/// Network reads do not line up with record boundaries, so a partial record
/// (including a multi-byte character cut in half) stays buffered until the
/// separator arrives. A record longer than the configured limit is an error.
#[derive(Debug)]
pub struct SseDecoder {
    buf: Vec<u8>,
    scanned: usize,
    max_record_bytes: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_max_record_bytes(DEFAULT_MAX_RECORD_BYTES)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_record_bytes(max_record_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            max_record_bytes,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend(chunk.iter().copied().filter(|b| *b != b'\r'));
    }

    /// Next complete record, or `None` until more bytes arrive.
    pub fn next_record(&mut self) -> Result<Option<String>, SseError> {
        loop {
            // Bytes before `scanned` hold no separator; a separator may
            // still straddle the boundary.
            let from = self.scanned.saturating_sub(RECORD_SEPARATOR.len() - 1);
            let found = self.buf[from..]
                .windows(RECORD_SEPARATOR.len())
                .position(|w| w == RECORD_SEPARATOR);

            let Some(offset) = found else {
                self.scanned = self.buf.len();
                if self.buf.len() > self.max_record_bytes {
                    return Err(SseError::RecordTooLarge {
                        limit: self.max_record_bytes,
                    });
                }
                return Ok(None);
            };

            let pos = from + offset;
            if pos > self.max_record_bytes {
                return Err(SseError::RecordTooLarge {
                    limit: self.max_record_bytes,
                });
            }

            let record: Vec<u8> = self.buf.drain(..pos + RECORD_SEPARATOR.len()).collect();
            self.scanned = 0;
            let record = String::from_utf8_lossy(&record[..pos]).into_owned();
            if !record.is_empty() {
                return Ok(Some(record));
            }
        }
    }

    /// Whatever is left once the byte stream ended, if it is not blank.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buf);
        self.scanned = 0;
        let rest = String::from_utf8_lossy(&rest);
        let rest = rest.trim_end_matches('\n');
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
