//! Undo/redo stacks over filter-list mutations.
//!
//! Each record holds the kind of change (addition or removal) plus the block
//! numbers it affected. Background scans feed an *open* record: the slot is
//! reserved before the first chunk, every chunk appends to it, and the record
//! is sealed when the scan finishes or is aborted. Undo and redo themselves
//! run chunked; while one is in flight the popped lines accumulate in a
//! mirror record on the opposite stack.
//!
//! Replay invariant, verified in debug builds after every sealed mutation:
//! applying the undo stack oldest-to-newest to an empty list reproduces the
//! current list, and applying the redo stack newest-to-oldest on top of that
//! stays consistent.

use std::collections::BTreeSet;

use tracing::trace;

/// Lines popped per background undo/redo step.
pub const UNDO_CHUNK: usize = 1_000;

#[derive(Debug, Clone)]
pub struct UndoRedoItem {
    pub is_added: bool,
    pub lines: Vec<u32>,
}

#[derive(Debug, Default)]
pub struct UndoList {
    undo: Vec<UndoRedoItem>,
    redo: Vec<UndoRedoItem>,
    /// Index reserved in the destination stack while a background operation
    /// is open; `None` otherwise.
    bg_dst_idx: Option<usize>,
    bg_for_undo: bool,
    bg_do_add: bool,
}

impl UndoList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_open_record(&self) -> bool {
        self.bg_dst_idx.is_some()
    }

    /// Top-of-stack description: kind and line count. `None` when empty.
    pub fn peek_undo(&self) -> Option<(bool, usize)> {
        self.undo.last().map(|op| (op.is_added, op.lines.len()))
    }

    pub fn peek_redo(&self) -> Option<(bool, usize)> {
        self.redo.last().map(|op| (op.is_added, op.lines.len()))
    }

    /// Record a discrete (non-chunked) change. Any new change invalidates
    /// the redo stack.
    pub fn append_change(&mut self, do_add: bool, lines: Vec<u32>) {
        debug_assert!(self.bg_dst_idx.is_none());
        trace!(target: "filter.undo", do_add, count = lines.len(), "append_change");
        self.undo.push(UndoRedoItem {
            is_added: do_add,
            lines,
        });
        self.redo.clear();
    }

    /// Reserve the slot for an upcoming chunked change. The redo stack is
    /// cleared here already, so a chunked scan behaves like any other new
    /// change even before its first chunk lands.
    pub fn prepare_bg_change(&mut self, for_undo: bool, do_add: bool) {
        debug_assert!(self.bg_dst_idx.is_none());
        let dst = if for_undo { &self.undo } else { &self.redo };
        self.bg_dst_idx = Some(dst.len());
        self.bg_for_undo = for_undo;
        self.bg_do_add = do_add;
        self.redo.clear();
    }

    /// Append one chunk's lines to the open record, creating it on first use.
    pub fn append_bg_change(&mut self, for_undo: bool, do_add: bool, lines: &[u32]) {
        let dst_idx = self.bg_dst_idx.expect("no open background record");
        debug_assert_eq!(self.bg_for_undo, for_undo);
        debug_assert_eq!(self.bg_do_add, do_add);
        let dst = if for_undo {
            &mut self.undo
        } else {
            &mut self.redo
        };
        debug_assert!(dst_idx <= dst.len());

        if dst_idx == dst.len() {
            dst.push(UndoRedoItem {
                is_added: do_add,
                lines: lines.to_vec(),
            });
        } else {
            dst.last_mut()
                .expect("open record missing")
                .lines
                .extend_from_slice(lines);
        }
    }

    /// Seal the open record. It is legal that no chunk ever appended (a scan
    /// without matches); then no record exists at all.
    pub fn finalize_bg_change(&mut self, for_undo: bool, do_add: bool) {
        debug_assert!(self.bg_dst_idx.is_some());
        debug_assert_eq!(self.bg_for_undo, for_undo);
        debug_assert_eq!(self.bg_do_add, do_add);
        self.bg_dst_idx = None;
    }

    /// Begin a chunked undo (`is_redo == false`) or redo. The mirror record
    /// on the opposite stack is reserved; chunks are taken with
    /// [`Self::pop_undo_redo`].
    pub fn prepare_undo_redo(&mut self, is_redo: bool) {
        debug_assert!(self.bg_dst_idx.is_none());
        let (src, dst) = if is_redo {
            (&self.redo, &self.undo)
        } else {
            (&self.undo, &self.redo)
        };
        debug_assert!(!src.is_empty());
        if !src.is_empty() {
            self.bg_dst_idx = Some(dst.len());
            self.bg_do_add = src.last().unwrap().is_added;
            self.bg_for_undo = !is_redo;
        }
    }

    /// Move up to `max_count` lines from the top source record into the
    /// mirror record and return them together with the record kind. Returns
    /// `(done, is_added, lines)`; `done` is set when the source record was
    /// fully consumed and discarded.
    pub fn pop_undo_redo(&mut self, is_redo: bool, max_count: usize) -> (bool, bool, Vec<u32>) {
        let dst_idx = self.bg_dst_idx.expect("undo/redo not prepared");
        debug_assert_eq!(self.bg_for_undo, !is_redo);
        let (src, dst) = if is_redo {
            (&mut self.redo, &mut self.undo)
        } else {
            (&mut self.undo, &mut self.redo)
        };
        debug_assert!(dst_idx <= dst.len());

        let src_op = src.last_mut().expect("source record vanished");
        let is_added = src_op.is_added;

        if dst_idx == dst.len() {
            dst.push(UndoRedoItem {
                is_added,
                lines: Vec::with_capacity(src_op.lines.len().min(max_count)),
            });
        }
        let dst_op = dst.last_mut().unwrap();

        if src_op.lines.len() > max_count {
            let chunk: Vec<u32> = src_op.lines.drain(..max_count).collect();
            dst_op.lines.extend_from_slice(&chunk);
            (false, is_added, chunk)
        } else {
            let lines = std::mem::take(&mut src_op.lines);
            dst_op.lines.extend_from_slice(&lines);
            src.pop();
            (true, is_added, lines)
        }
    }

    pub fn finalize_undo_redo(&mut self, is_redo: bool) {
        debug_assert_eq!(self.bg_for_undo, !is_redo);
        debug_assert!(self.bg_dst_idx.is_some());
        self.bg_dst_idx = None;
    }

    /// Remaining line count of the top record on the source stack, for
    /// progress display during chunked undo/redo.
    pub fn rest_count(&self, is_redo: bool) -> usize {
        let src = if is_redo { &self.redo } else { &self.undo };
        src.last().map_or(0, |op| op.lines.len())
    }

    /// Remap block numbers in the undo stack after truncation; entries
    /// falling outside the kept window are dropped, emptied records
    /// discarded, and the redo stack cleared.
    pub fn adjust_line_nums(&mut self, top: u32, bottom: u32) {
        let old = std::mem::take(&mut self.undo);
        for mut op in old {
            op.lines
                .retain(|&l| l >= top && (l < bottom || bottom == 0));
            for l in &mut op.lines {
                *l -= top;
            }
            if !op.lines.is_empty() {
                self.undo.push(op);
            }
        }
        self.redo.clear();
        self.bg_dst_idx = None;
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
        self.bg_dst_idx = None;
    }

    /// Debug replay check; see the module comment. Records that are still
    /// open participate with whatever chunks have landed, which is exactly
    /// what the list contains at that moment.
    pub fn replay_matches(&self, current: &[u32]) -> bool {
        let mut set: BTreeSet<u32> = BTreeSet::new();
        for op in &self.undo {
            for &line in &op.lines {
                if op.is_added {
                    if !set.insert(line) {
                        return false;
                    }
                } else if !set.remove(&line) {
                    return false;
                }
            }
            if op.lines.is_empty() {
                return false;
            }
        }
        if set.len() != current.len() || !set.iter().copied().eq(current.iter().copied()) {
            return false;
        }
        for op in self.redo.iter().rev() {
            for &line in &op.lines {
                if op.is_added {
                    if !set.insert(line) {
                        return false;
                    }
                } else if !set.remove(&line) {
                    return false;
                }
            }
            if op.lines.is_empty() {
                return false;
            }
        }
        true
    }
}
