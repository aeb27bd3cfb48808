//! Bounded line framing for inbound link bytes
//!
//! Bytes accumulate until a `\n` arrives. Complete lines are trimmed and
//! empty ones dropped. If a device streams more than the limit without a
//! terminator, the oldest unterminated bytes are discarded so memory stays
//! bounded under line noise or a runaway producer.

/// Maximum number of unterminated bytes kept per link
pub const MAX_BUFFER_SIZE: usize = 4096;

/// Accumulates link bytes and yields complete lines
#[derive(Debug, Clone)]
pub struct ReadBuffer {
    data: Vec<u8>,
    limit: usize,
    overflows: u64,
}

impl Default for ReadBuffer {
    fn default() -> Self {
        Self::new(MAX_BUFFER_SIZE)
    }
}

impl ReadBuffer {
    /// Create a buffer holding at most `limit` unterminated bytes
    pub fn new(limit: usize) -> Self {
        Self {
            data: Vec::with_capacity(limit.min(MAX_BUFFER_SIZE)),
            limit: limit.max(1),
            overflows: 0,
        }
    }

    /// Append newly read bytes and return every line they complete
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.data.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.data.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.data.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&raw);
            let line = text.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }

        if self.data.len() > self.limit {
            let excess = self.data.len() - self.limit;
            tracing::warn!(
                "Read buffer overflow - discarding {} of {} unterminated bytes",
                excess,
                self.data.len()
            );
            self.data.drain(..excess);
            self.overflows += 1;
        }

        lines
    }

    /// Number of buffered unterminated bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// How many times old bytes had to be discarded
    pub fn overflow_count(&self) -> u64 {
        self.overflows
    }

    /// Drop any partial line
    pub fn clear(&mut self) {
        self.data.clear();
    }
}
