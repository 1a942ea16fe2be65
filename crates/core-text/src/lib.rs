//! Rope-based document storage for the browser.
//!
//! The document is an append-only sequence of text blocks (lines). Blocks are
//! addressed either by a 0-based block number or by the absolute byte offset
//! of their first character. Both conversions are O(log n) through the rope's
//! line index. The text itself is immutable except for bulk truncation, which
//! bumps a generation counter so that dependent caches can invalidate.

use ropey::Rope;
use tracing::debug;

pub mod jump;

pub use jump::{JumpPos, JumpStack, JumpWalk};

/// A single text document, shared read-only by all scan engines.
pub struct Document {
    rope: Rope,
    generation: u64,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self {
            rope: Rope::new(),
            generation: 0,
        }
    }

    pub fn from_str(content: &str) -> Self {
        Self {
            rope: Rope::from_str(content),
            generation: 0,
        }
    }

    /// Counter incremented on every truncation or replacement. Cache entries
    /// stamped with an older generation must be discarded.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Append a chunk of text at the end of the document. Chunks may end in
    /// the middle of a line; the partial line is completed by the next append.
    pub fn append(&mut self, text: &str) {
        let end = self.rope.len_chars();
        self.rope.insert(end, text);
    }

    /// Total number of blocks. Note a document whose text ends in a newline
    /// contains a final empty block, like any line-indexed text store.
    pub fn block_count(&self) -> usize {
        self.rope.len_lines()
    }

    pub fn is_empty(&self) -> bool {
        self.rope.len_bytes() == 0
    }

    pub fn total_bytes(&self) -> usize {
        self.rope.len_bytes()
    }

    /// The text of a block without its trailing newline.
    pub fn line(&self, block: usize) -> Option<String> {
        if block >= self.rope.len_lines() {
            return None;
        }
        let mut s = self.rope.line(block).to_string();
        if s.ends_with('\n') {
            s.pop();
        }
        Some(s)
    }

    /// Copy a block's text (without newline) into a caller-owned buffer.
    /// Scan loops use this to avoid one allocation per visited block.
    /// Returns false when the block does not exist.
    pub fn line_into(&self, block: usize, buf: &mut String) -> bool {
        buf.clear();
        if block >= self.rope.len_lines() {
            return false;
        }
        for chunk in self.rope.line(block).chunks() {
            buf.push_str(chunk);
        }
        if buf.ends_with('\n') {
            buf.pop();
        }
        true
    }

    /// Byte length of a block's text, excluding the newline.
    pub fn line_len(&self, block: usize) -> usize {
        match self.line(block) {
            Some(s) => s.len(),
            None => 0,
        }
    }

    /// Absolute byte position of the first character of a block.
    pub fn block_pos(&self, block: usize) -> usize {
        let block = block.min(self.rope.len_lines());
        self.rope.char_to_byte(self.rope.line_to_char(block))
    }

    /// Block number containing the given absolute byte position. Positions at
    /// or past the end map to the last block.
    pub fn block_at(&self, pos: usize) -> usize {
        let pos = pos.min(self.rope.len_bytes());
        self.rope.byte_to_line(pos)
    }

    /// Position one past the last character of the document.
    pub fn end_pos(&self) -> usize {
        self.rope.len_bytes()
    }

    /// Discard the whole content.
    pub fn clear(&mut self) {
        self.rope = Rope::new();
        self.generation += 1;
        debug!(target: "text.doc", generation = self.generation, "document_cleared");
    }

    /// Keep only the blocks in `[top, bottom)`; `bottom == None` keeps through
    /// the end. All retained blocks shift to `n - top`. Callers must remap
    /// every block-number-bearing structure with the same bounds.
    pub fn truncate(&mut self, top: usize, bottom: Option<usize>) {
        let count = self.rope.len_lines();
        let top = top.min(count);
        if let Some(bottom) = bottom {
            let bottom = bottom.min(count);
            if bottom < count {
                // also drop the newline terminating the last kept block so
                // the remaining text does not end in an empty block
                let from = self.rope.line_to_char(bottom).saturating_sub(1);
                self.rope.remove(from..self.rope.len_chars());
            }
        }
        if top > 0 {
            let to = self.rope.line_to_char(top);
            self.rope.remove(0..to);
        }
        self.generation += 1;
        debug!(
            target: "text.doc",
            top,
            bottom = bottom.unwrap_or(0),
            blocks = self.rope.len_lines(),
            generation = self.generation,
            "document_truncated"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_addressing_round_trip() {
        let d = Document::from_str("alpha\nbeta\nalphabet");
        assert_eq!(d.block_count(), 3);
        assert_eq!(d.line(0).unwrap(), "alpha");
        assert_eq!(d.line(2).unwrap(), "alphabet");
        assert_eq!(d.block_pos(0), 0);
        assert_eq!(d.block_pos(1), 6);
        assert_eq!(d.block_pos(2), 11);
        assert_eq!(d.block_at(0), 0);
        assert_eq!(d.block_at(5), 0); // the newline still belongs to block 0
        assert_eq!(d.block_at(6), 1);
        assert_eq!(d.block_at(d.end_pos()), 2);
    }

    #[test]
    fn append_completes_partial_lines() {
        let mut d = Document::new();
        d.append("first li");
        assert_eq!(d.block_count(), 1);
        d.append("ne\nsecond\n");
        assert_eq!(d.line(0).unwrap(), "first line");
        assert_eq!(d.line(1).unwrap(), "second");
    }

    #[test]
    fn truncate_keep_tail() {
        let mut d = Document::from_str("a\nb\nc\nd");
        let gen0 = d.generation();
        d.truncate(2, None);
        assert_eq!(d.generation(), gen0 + 1);
        assert_eq!(d.block_count(), 2);
        assert_eq!(d.line(0).unwrap(), "c");
        assert_eq!(d.line(1).unwrap(), "d");
    }

    #[test]
    fn truncate_keep_head() {
        let mut d = Document::from_str("a\nb\nc\nd");
        d.truncate(0, Some(2));
        assert_eq!(d.line(0).unwrap(), "a");
        assert_eq!(d.line(1).unwrap(), "b");
        // the kept range ends before "c", so "b" is the final block and
        // keeps its newline-less form
        assert_eq!(d.block_count(), 2);
    }

    #[test]
    fn line_out_of_range_is_none() {
        let d = Document::from_str("only");
        assert!(d.line(1).is_none());
        assert_eq!(d.line_len(7), 0);
    }
}
