//! Edit-rate throttling for streamed output
//!
//! Transports rate-limit message edits, so incremental output is batched:
//! chunks accumulate in a buffer and a flush is due at most once per
//! interval. Each flush returns the entire accumulated text because an
//! edit replaces the whole message, not appends to it.

use std::time::{Duration, Instant};

/// Accumulates streamed text and paces flushes.
#[derive(Debug)]
pub struct StreamThrottler {
    text: String,
    interval: Duration,
    last_flush: Instant,
}

impl StreamThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            text: String::new(),
            interval,
            last_flush: Instant::now(),
        }
    }

    /// Append one streamed chunk.
    pub fn feed(&mut self, chunk: &str) {
        self.text.push_str(chunk);
    }

    /// Whether a flush is due: the interval elapsed and there is text.
    pub fn should_flush(&self) -> bool {
        !self.text.is_empty() && self.last_flush.elapsed() >= self.interval
    }

    /// Full accumulated text so far; restarts the interval.
    pub fn flush(&mut self) -> String {
        self.last_flush = Instant::now();
        self.text.clone()
    }

    /// True when nothing but whitespace accumulated.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Consume the throttler: the full reply, or the sentinel when the
    /// stream produced nothing visible.
    pub fn finalize(self, empty_sentinel: &str) -> String {
        if self.is_empty() {
            empty_sentinel.to_owned()
        } else {
            self.text
        }
    }
}
