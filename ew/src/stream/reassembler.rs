//! Chunk Reassembler - turns arbitrary transport chunks into protocol lines
//!
//! The transport gives no boundary guarantees: one logical line may span
//! several chunks and one chunk may carry several lines. The reassembler keeps
//! a single pending buffer and only ever yields lines that were terminated by
//! `\n`. Buffering is done on bytes so a multi-byte UTF-8 character split
//! across two chunks is rebuilt before it is decoded.

use tracing::debug;

/// Line-break byte that terminates a protocol line
const LINE_BREAK: u8 = b'\n';

/// Incremental line splitter with a carry-over buffer
#[derive(Debug, Default)]
pub struct ChunkReassembler {
    pending: Vec<u8>,
}

impl ChunkReassembler {
    /// Create an empty reassembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw chunk and return every line it completed
    ///
    /// The trailing fragment (complete or not) stays in the pending buffer.
    /// Empty lines are returned as empty strings; classifying them is the
    /// decoder's job.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        debug!(chunk_len = chunk.len(), pending_len = self.pending.len(), "feed: called");
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|b| *b == LINE_BREAK) {
            let end = start + offset;
            lines.push(Self::line_from(&self.pending[start..end]));
            start = end + 1;
        }

        if start > 0 {
            self.pending.drain(..start);
        }

        debug!(lines = lines.len(), pending_len = self.pending.len(), "feed: done");
        lines
    }

    /// Convenience wrapper for text chunks
    pub fn feed_str(&mut self, chunk: &str) -> Vec<String> {
        self.feed(chunk.as_bytes())
    }

    /// Take the unterminated remainder when the stream closes
    ///
    /// Returns `None` when nothing (or only whitespace) is pending. The
    /// buffer is cleared either way, so a second call always yields `None`.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let line = Self::line_from(&rest);
        if line.trim().is_empty() {
            debug!("finish: nothing pending");
            None
        } else {
            debug!(len = line.len(), "finish: returning unterminated fragment");
            Some(line)
        }
    }

    /// Bytes currently waiting for a line break
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn line_from(bytes: &[u8]) -> String {
        let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
        String::from_utf8_lossy(bytes).into_owned()
    }
}
