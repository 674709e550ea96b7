//! Incremental SSE frame decoding
//!
//! The streaming endpoint (`alt=sse`) emits `data: <json>` lines. Network
//! chunks split frames at arbitrary byte offsets, so the buffer accumulates
//! bytes and drains only complete lines. Non-data lines (comments, blank
//! separators) are skipped.

/// Byte accumulator that yields complete `data:` payloads.
#[derive(Debug, Default)]
pub struct SseBuffer {
    buf: Vec<u8>,
}

impl SseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a network chunk and drain any complete payload lines.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        let mut consumed = 0;
        while let Some(offset) = self.buf[consumed..].iter().position(|&b| b == b'\n') {
            let end = consumed + offset;
            let mut line = &self.buf[consumed..end];
            if line.ends_with(b"\r") {
                line = &line[..line.len() - 1];
            }
            consumed = end + 1;

            if let Some(payload) = line.strip_prefix(b"data: ") {
                payloads.push(String::from_utf8_lossy(payload).into_owned());
            }
        }
        if consumed > 0 {
            self.buf.drain(..consumed);
        }
        payloads
    }
}
