//! Resumable block-by-block search over the document.
//!
//! The finder scans one block at a time in either direction and caps the
//! number of blocks visited per call, so a pathological no-match scan over a
//! huge document cannot stall the UI loop. The cursor state lives inside the
//! finder; after a yield the next call simply continues where the previous
//! one left off.

use core_text::Document;
use regex::Regex;

use crate::SearchPar;

/// Upper bound of blocks visited per `find_next` call.
pub const MAX_BLOCKS_PER_STEP: usize = 50_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinderMatch {
    /// Absolute byte position of the match start.
    pub pos: usize,
    /// Match length in bytes; zero-length matches are reported as 1.
    pub len: usize,
    /// Block containing the match.
    pub block: usize,
}

/// Outcome of one finder step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindStep {
    Match(FinderMatch),
    /// Step budget exhausted without a match; scanning resumes at `resume`.
    Yield { resume: usize },
    /// The document is exhausted in the scan direction.
    Done,
}

pub struct TextFinder {
    re: Option<Regex>,
    is_fwd: bool,
    /// Next block to scan; `None` once exhausted (or invalid from birth).
    block: Option<usize>,
    line_buf: String,
}

impl TextFinder {
    /// A finder built from an empty pattern or invalid regex is born done.
    pub fn new(doc: &Document, par: &SearchPar, is_fwd: bool, start_pos: usize) -> Self {
        let re = crate::compile(par);
        let block = if re.is_some() && !doc.is_empty() {
            Some(doc.block_at(start_pos))
        } else {
            None
        };
        Self {
            re,
            is_fwd,
            block,
            line_buf: String::new(),
        }
    }

    /// Start scanning at a block number instead of a byte position.
    pub fn from_block(doc: &Document, par: &SearchPar, is_fwd: bool, start_block: usize) -> Self {
        let re = crate::compile(par);
        let count = doc.block_count();
        let block = match re {
            Some(_) if !doc.is_empty() && start_block < count => Some(start_block),
            _ => None,
        };
        Self {
            re,
            is_fwd,
            block,
            line_buf: String::new(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.block.is_none()
    }

    /// Block where the next call continues; `None` when done.
    pub fn next_start_block(&self) -> Option<usize> {
        self.block
    }

    /// Scan up to [`MAX_BLOCKS_PER_STEP`] blocks for the next match. Within a
    /// block, forward search reports the first match and backward search the
    /// last. After a match the cursor moves past the match's block, so each
    /// block yields at most one result.
    pub fn find_next(&mut self, doc: &Document) -> FindStep {
        if self.re.is_none() {
            return FindStep::Done;
        }
        let count = doc.block_count();

        for _ in 0..MAX_BLOCKS_PER_STEP {
            let Some(cur) = self.block else {
                return FindStep::Done;
            };
            if cur >= count {
                self.block = None;
                return FindStep::Done;
            }
            doc.line_into(cur, &mut self.line_buf);

            let re = self.re.as_ref().expect("checked above");
            let found = if self.is_fwd {
                re.find(&self.line_buf)
            } else {
                re.find_iter(&self.line_buf).last()
            }
            .map(|m| (m.start(), m.len()));

            self.advance(cur, count);

            if let Some((start, len)) = found {
                return FindStep::Match(FinderMatch {
                    pos: doc.block_pos(cur) + start,
                    len: len.max(1),
                    block: cur,
                });
            }
        }

        match self.block {
            Some(resume) => FindStep::Yield { resume },
            None => FindStep::Done,
        }
    }

    fn advance(&mut self, cur: usize, count: usize) {
        self.block = if self.is_fwd {
            let next = cur + 1;
            (next < count).then_some(next)
        } else {
            cur.checked_sub(1)
        };
    }
}

/// Position-exact search for atomic cursor movement. Unlike [`TextFinder`]
/// this honors the column of `start_pos`: forward search returns the first
/// match starting at or after it, backward search the last match ending
/// strictly before it, so repeated searches never re-match overlapping text
/// around the cursor.
pub fn find_in_doc(
    doc: &Document,
    par: &SearchPar,
    is_fwd: bool,
    start_pos: usize,
) -> Option<FinderMatch> {
    let re = crate::compile(par)?;
    if doc.is_empty() {
        return None;
    }
    let count = doc.block_count();
    let start_block = doc.block_at(start_pos);
    let start_col = start_pos - doc.block_pos(start_block);
    let mut buf = String::new();

    if is_fwd {
        let mut block = start_block;
        while block < count {
            doc.line_into(block, &mut buf);
            let from = if block == start_block { start_col } else { 0 };
            if from <= buf.len()
                && let Some(m) = re.find_at(&buf, from)
            {
                return Some(FinderMatch {
                    pos: doc.block_pos(block) + m.start(),
                    len: m.len().max(1),
                    block,
                });
            }
            block += 1;
        }
        None
    } else {
        let mut block = start_block;
        loop {
            doc.line_into(block, &mut buf);
            let limit = if block == start_block {
                start_col
            } else {
                buf.len() + 1
            };
            // last match lying entirely left of the limit column; find_iter
            // yields matches in ascending order so take_while is exact here
            let m = re.find_iter(&buf).take_while(|m| m.end() < limit).last();
            if let Some(m) = m {
                return Some(FinderMatch {
                    pos: doc.block_pos(block) + m.start(),
                    len: m.len().max(1),
                    block,
                });
            }
            block = match block.checked_sub(1) {
                Some(b) => b,
                None => return None,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc3() -> Document {
        Document::from_str("alpha\nbeta\nalphabet")
    }

    #[test]
    fn forward_scan_finds_each_matching_block_once() {
        let doc = doc3();
        let par = SearchPar::new("alp", false, true);
        let mut f = TextFinder::new(&doc, &par, true, 0);

        match f.find_next(&doc) {
            FindStep::Match(m) => {
                assert_eq!((m.block, m.pos, m.len), (0, 0, 3));
            }
            other => panic!("expected match, got {other:?}"),
        }
        match f.find_next(&doc) {
            FindStep::Match(m) => assert_eq!(m.block, 2),
            other => panic!("expected match, got {other:?}"),
        }
        assert!(matches!(f.find_next(&doc), FindStep::Done));
        assert!(f.is_done());
    }

    #[test]
    fn backward_scan_reports_last_match_in_block() {
        let doc = Document::from_str("ab ab ab\nnothing");
        let par = SearchPar::new("ab", false, true);
        let mut f = TextFinder::new(&doc, &par, false, doc.end_pos());
        match f.find_next(&doc) {
            FindStep::Match(m) => {
                assert_eq!(m.block, 0);
                assert_eq!(m.pos, 6);
            }
            other => panic!("expected match, got {other:?}"),
        }
        assert!(matches!(f.find_next(&doc), FindStep::Done));
    }

    #[test]
    fn zero_length_match_has_length_one() {
        let doc = Document::from_str("\nx");
        let par = SearchPar::new("^", true, true);
        let mut f = TextFinder::new(&doc, &par, true, 0);
        match f.find_next(&doc) {
            FindStep::Match(m) => {
                assert_eq!(m.len, 1);
                assert_eq!(m.block, 0);
            }
            other => panic!("expected match, got {other:?}"),
        }
        // progress is guaranteed: next call moves to the next block
        match f.find_next(&doc) {
            FindStep::Match(m) => assert_eq!(m.block, 1),
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn invalid_regex_is_born_done() {
        let doc = doc3();
        let par = SearchPar::new("(bad", true, true);
        let mut f = TextFinder::new(&doc, &par, true, 0);
        assert!(f.is_done());
        assert!(matches!(f.find_next(&doc), FindStep::Done));
    }

    #[test]
    fn empty_pattern_is_born_done() {
        let doc = doc3();
        let f = TextFinder::new(&doc, &SearchPar::default(), true, 0);
        assert!(f.is_done());
    }

    #[test]
    fn find_in_doc_forward_respects_start_column() {
        let doc = Document::from_str("ab ab\ncd");
        let par = SearchPar::new("ab", false, true);
        // cursor sits inside the first match; forward search must land on the
        // second occurrence
        let m = find_in_doc(&doc, &par, true, 1).unwrap();
        assert_eq!(m.pos, 3);
    }

    #[test]
    fn find_in_doc_backward_never_overlaps_cursor() {
        let doc = Document::from_str("ab ab\ncd");
        let par = SearchPar::new("ab", false, true);
        // cursor at column 4 (inside second "ab"): its end (5) is not < 4
        let m = find_in_doc(&doc, &par, false, 4).unwrap();
        assert_eq!(m.pos, 0);
        // cursor at column 2: only the first match ends at 2, not before it
        assert!(find_in_doc(&doc, &par, false, 2).is_none());
    }

    #[test]
    fn find_in_doc_backward_crosses_blocks() {
        let doc = Document::from_str("needle\nplain\nplain");
        let par = SearchPar::new("needle", false, true);
        let m = find_in_doc(&doc, &par, false, doc.end_pos()).unwrap();
        assert_eq!(m.block, 0);
    }
}
