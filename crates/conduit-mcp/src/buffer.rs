//! Message Buffer
//!
//! Reassembles newline-delimited JSON frames from arbitrary byte chunks.
//! Blank lines are skipped; lines that decode to anything other than a JSON
//! object are counted as parse errors and dropped. The retained tail (bytes
//! after the last newline) is bounded to keep a misbehaving peer from growing
//! the buffer without limit.

use serde_json::Value;
use tracing::warn;

use crate::protocol::error::{McpError, McpResult};

/// Default cap on the retained tail: a frame larger than this can never
/// complete, so it also bounds frame size.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Observability counters for a [`MessageBuffer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// Total bytes appended
    pub bytes_in: u64,
    /// Complete frames emitted
    pub frames_out: u64,
    /// Lines that failed to decode to a JSON object
    pub parse_errors: u64,
}

/// Accumulates bytes and yields complete JSON object frames.
#[derive(Debug)]
pub struct MessageBuffer {
    buf: Vec<u8>,
    max_frame_bytes: usize,
    stats: BufferStats,
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBuffer {
    /// Create a buffer with the default frame cap.
    pub fn new() -> Self {
        Self::with_max_frame_bytes(DEFAULT_MAX_FRAME_BYTES)
    }

    /// Create a buffer with an explicit frame cap.
    pub fn with_max_frame_bytes(max_frame_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_frame_bytes,
            stats: BufferStats::default(),
        }
    }

    /// Append a chunk and return the complete frames it unlocked.
    ///
    /// Every `\n`-terminated line except the unterminated tail is a frame
    /// candidate. Returns an error only when the retained tail exceeds the
    /// frame cap; the caller should treat that as fatal for the connection.
    pub fn append(&mut self, chunk: &[u8]) -> McpResult<Vec<Value>> {
        self.stats.bytes_in += chunk.len() as u64;
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(frame) = self.parse_line(&line[..line.len() - 1]) {
                frames.push(frame);
            }
        }

        if self.buf.len() > self.max_frame_bytes {
            return Err(McpError::transport(format!(
                "frame exceeds {} byte limit ({} bytes buffered without a newline)",
                self.max_frame_bytes,
                self.buf.len()
            )));
        }

        Ok(frames)
    }

    /// Attempt one last parse of any retained bytes, then clear the buffer.
    ///
    /// Recovers a final frame whose terminating newline never arrived (e.g.
    /// the peer exited right after writing it).
    pub fn reset(&mut self) -> Option<Value> {
        let tail = std::mem::take(&mut self.buf);
        self.parse_line(&tail)
    }

    /// Number of bytes currently retained past the last newline.
    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> BufferStats {
        self.stats
    }

    fn parse_line(&mut self, line: &[u8]) -> Option<Value> {
        let trimmed = trim_ascii(line);
        if trimmed.is_empty() {
            return None;
        }

        match serde_json::from_slice::<Value>(trimmed) {
            Ok(value @ Value::Object(_)) => {
                self.stats.frames_out += 1;
                Some(value)
            }
            Ok(other) => {
                self.stats.parse_errors += 1;
                warn!(
                    kind = %json_kind(&other),
                    "discarding non-object JSON frame"
                );
                None
            }
            Err(e) => {
                self.stats.parse_errors += 1;
                warn!(error = %e, "discarding undecodable frame");
                None
            }
        }
    }
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |p| p + 1);
    &bytes[start..end]
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_chunk() {
        let mut buf = MessageBuffer::new();
        let frames = buf.append(b"{\"id\":1}\n{\"id\":2}\n").unwrap();
        assert_eq!(frames, vec![json!({"id": 1}), json!({"id": 2})]);
        assert_eq!(buf.pending_bytes(), 0);
    }

    #[test]
    fn test_split_frame_reassembly() {
        // Per-chunk emission must be [], [{"id":1}], [{"id":2}].
        let mut buf = MessageBuffer::new();

        let frames = buf.append(b"{\"id\":1}").unwrap();
        assert!(frames.is_empty());

        let frames = buf.append(b"\n{\"id\":").unwrap();
        assert_eq!(frames, vec![json!({"id": 1})]);

        let frames = buf.append(b"2}\n").unwrap();
        assert_eq!(frames, vec![json!({"id": 2})]);
        assert_eq!(buf.pending_bytes(), 0);
    }

    #[test]
    fn test_chunk_boundary_invariance() {
        let input = b"{\"a\":1}\n\n  \n{\"b\": [1,2,3]}\nnot json\n{\"c\":{\"d\":true}}\ntail";

        let mut whole = MessageBuffer::new();
        let expected = whole.append(input).unwrap();

        // Re-feed the same bytes one at a time.
        for chunk_size in [1usize, 2, 3, 7] {
            let mut buf = MessageBuffer::new();
            let mut frames = Vec::new();
            for chunk in input.chunks(chunk_size) {
                frames.extend(buf.append(chunk).unwrap());
            }
            assert_eq!(frames, expected, "chunk size {}", chunk_size);
            assert_eq!(buf.pending_bytes(), whole.pending_bytes());
        }
    }

    #[test]
    fn test_blank_lines_skipped() {
        let mut buf = MessageBuffer::new();
        let frames = buf.append(b"\n   \n\t\n{\"ok\":true}\n\n").unwrap();
        assert_eq!(frames, vec![json!({"ok": true})]);
        assert_eq!(buf.stats().parse_errors, 0);
    }

    #[test]
    fn test_non_object_counts_as_parse_error() {
        let mut buf = MessageBuffer::new();
        let frames = buf.append(b"[1,2]\n42\n\"str\"\n{\"ok\":1}\n").unwrap();
        assert_eq!(frames, vec![json!({"ok": 1})]);
        assert_eq!(buf.stats().parse_errors, 3);
        assert_eq!(buf.stats().frames_out, 1);
    }

    #[test]
    fn test_undecodable_counts_as_parse_error() {
        let mut buf = MessageBuffer::new();
        let frames = buf.append(b"{broken\n{\"ok\":1}\n").unwrap();
        assert_eq!(frames, vec![json!({"ok": 1})]);
        assert_eq!(buf.stats().parse_errors, 1);
    }

    #[test]
    fn test_reset_recovers_unterminated_frame() {
        let mut buf = MessageBuffer::new();
        buf.append(b"{\"last\":true}").unwrap();
        assert_eq!(buf.reset(), Some(json!({"last": true})));
        assert_eq!(buf.pending_bytes(), 0);
        // A second reset has nothing to recover.
        assert_eq!(buf.reset(), None);
    }

    #[test]
    fn test_reset_ignores_garbage_tail() {
        let mut buf = MessageBuffer::new();
        buf.append(b"{\"a\":1}\n{incompl").unwrap();
        assert_eq!(buf.reset(), None);
        assert_eq!(buf.stats().parse_errors, 1);
    }

    #[test]
    fn test_frame_cap_overflow() {
        let mut buf = MessageBuffer::with_max_frame_bytes(16);
        let err = buf.append(b"{\"way\":\"too long for the cap\"").unwrap_err();
        assert!(matches!(err, McpError::Transport(_)));
    }

    #[test]
    fn test_frame_cap_allows_completed_frames() {
        let mut buf = MessageBuffer::with_max_frame_bytes(16);
        // Longer than the cap in total, but each line completes within it.
        let frames = buf.append(b"{\"a\":1}\n{\"b\":2}\n{\"c\":3}\n").unwrap();
        assert_eq!(frames.len(), 3);
    }

    #[test]
    fn test_stats_bytes_in() {
        let mut buf = MessageBuffer::new();
        buf.append(b"{\"a\":1}\n").unwrap();
        buf.append(b"{\"b\":").unwrap();
        let stats = buf.stats();
        assert_eq!(stats.bytes_in, 13);
        assert_eq!(stats.frames_out, 1);
    }
}
