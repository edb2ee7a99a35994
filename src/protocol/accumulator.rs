// src/protocol/accumulator.rs
//
// Receive buffer for decoded text chunks.

/// Text received since the last consumed block or log line.
///
/// Chunk boundaries carry no meaning: the matcher and the log splitter always
/// look at the whole buffer, so a block split across any number of chunks is
/// seen exactly as if it had arrived in one piece.
#[derive(Debug, Default)]
pub struct ChunkAccumulator {
    buffer: String,
}

impl ChunkAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk to the end of the buffer
    pub fn append(&mut self, chunk: &str) {
        self.buffer.push_str(chunk);
    }

    /// Current buffer contents
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Drop the processed prefix `[0, index)`.
    ///
    /// `index` is clamped to the buffer length. Indices produced by the
    /// matcher and the splitter always fall on ASCII delimiters, so they are
    /// valid char boundaries.
    pub fn consume_through(&mut self, index: usize) {
        let end = index.min(self.buffer.len());
        debug_assert!(self.buffer.is_char_boundary(end));
        self.buffer.drain(..end);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Take whatever is left, leaving the buffer empty
    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_concatenates() {
        let mut acc = ChunkAccumulator::new();
        acc.append("RESP");
        acc.append("ONSE:");
        assert_eq!(acc.buffer(), "RESPONSE:");
        assert_eq!(acc.len(), 9);
    }

    #[test]
    fn test_consume_through_removes_prefix() {
        let mut acc = ChunkAccumulator::new();
        acc.append("boot ok\r\nRESPONSE:");
        acc.consume_through(9);
        assert_eq!(acc.buffer(), "RESPONSE:");
    }

    #[test]
    fn test_consume_through_clamps() {
        let mut acc = ChunkAccumulator::new();
        acc.append("abc");
        acc.consume_through(10);
        assert!(acc.is_empty());
    }

    #[test]
    fn test_take_empties_buffer() {
        let mut acc = ChunkAccumulator::new();
        acc.append("ERROR:trunc");
        assert_eq!(acc.take(), "ERROR:trunc");
        assert!(acc.is_empty());
    }
}
