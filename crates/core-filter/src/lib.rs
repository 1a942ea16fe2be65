//! Filter list: a user-curated sorted set of interesting lines.
//!
//! Lines enter and leave the list through pattern scans over the whole
//! document, through copy/remove of the main-window selection, or through
//! imports. Scans run in background slices; every mutation is recorded on a
//! multi-level undo stack, with in-flight scans extending an open record
//! chunk by chunk so that even a partially consumed scan undoes as one unit.

use std::time::{Duration, Instant};

use core_search::{FindStep, SearchPar, TextFinder};
use core_text::Document;
use tracing::{debug, trace};

pub mod io;
mod model;
mod undo;

pub use model::LineList;
pub use undo::{UNDO_CHUNK, UndoList, UndoRedoItem};

/// Wall-clock budget of one scan slice.
pub const SCAN_SLICE: Duration = Duration::from_millis(100);
const SCAN_BREATHER: Duration = Duration::from_millis(10);
const SCAN_LOOPS_PER_BREATHER: u32 = 10;
/// Hard cap of collected lines per scan slice, in addition to the wall-clock
/// budget; bounds the memory of a single bulk mutation.
pub const SCAN_CHUNK_LINES: usize = 40_000;

/// Scan coverage relative to the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    All,
    Forward,
    Backward,
}

/// Outcome of one background slice (scan or undo/redo).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    Continue { delay: Duration, progress: u8 },
    Done,
}

struct SearchScan {
    pats: Vec<SearchPar>,
    do_add: bool,
    direction: Direction,
    cursor_block: usize,
    pat_idx: usize,
    finder: TextFinder,
    loop_cnt: u32,
}

struct UndoRun {
    is_redo: bool,
    orig_count: usize,
}

/// Error texts surfaced on the status line.
pub const ERR_NO_UNDO: &str = "Already at oldest change in search list";
pub const ERR_NO_REDO: &str = "Already at newest change in search list";

#[derive(Default)]
pub struct FilterList {
    model: LineList,
    undo: UndoList,
    scan: Option<SearchScan>,
    undo_run: Option<UndoRun>,
}

/// Result of a synchronous bulk change, for selection/scroll restore.
pub struct CopyOutcome {
    pub lines: Vec<u32>,
    /// Final indices of the affected rows (insert positions after an add).
    pub indices: Vec<usize>,
}

impl FilterList {
    pub fn new() -> Self {
        Self::default()
    }

    // -- queries ------------------------------------------------------------

    pub fn lines(&self) -> &[u32] {
        self.model.lines()
    }

    pub fn len(&self) -> usize {
        self.model.len()
    }

    pub fn is_empty(&self) -> bool {
        self.model.is_empty()
    }

    pub fn line_of_idx(&self, idx: usize) -> Option<u32> {
        self.model.line_of_idx(idx)
    }

    pub fn find(&self, line: u32) -> (bool, usize) {
        self.model.find(line)
    }

    pub fn contains(&self, line: u32) -> bool {
        self.model.contains(line)
    }

    pub fn idx_of(&self, line: u32) -> usize {
        self.model.idx_of(line)
    }

    pub fn root_line(&self) -> Option<u32> {
        self.model.root_line()
    }

    pub fn set_root_line(&mut self, line: Option<u32>) {
        self.model.set_root_line(line);
    }

    pub fn peek_undo(&self) -> Option<(bool, usize)> {
        self.undo.peek_undo()
    }

    pub fn peek_redo(&self) -> Option<(bool, usize)> {
        self.undo.peek_redo()
    }

    fn check_invariant(&self) {
        debug_assert!(
            self.undo.replay_matches(self.model.lines()),
            "undo replay does not reproduce the list"
        );
    }

    // -- background pattern scan --------------------------------------------

    /// Begin a background scan adding or removing all lines matching the
    /// given patterns. Any running scan or undo must be aborted first.
    pub fn start_search(
        &mut self,
        doc: &Document,
        pats: Vec<SearchPar>,
        do_add: bool,
        direction: Direction,
        cursor_block: usize,
    ) {
        assert!(
            self.scan.is_none() && self.undo_run.is_none(),
            "scan started while another background operation is active"
        );
        if pats.is_empty() {
            return;
        }
        let finder = make_finder(doc, &pats[0], direction, cursor_block);
        self.undo.prepare_bg_change(true, do_add);
        self.scan = Some(SearchScan {
            pats,
            do_add,
            direction,
            cursor_block,
            pat_idx: 0,
            finder,
            loop_cnt: 0,
        });
        debug!(target: "filter.scan", do_add, ?direction, "search_started");
    }

    pub fn is_search_active(&self) -> bool {
        self.scan.is_some()
    }

    /// Run one slice of the scan.
    pub fn search_step(&mut self, doc: &Document) -> ScanOutcome {
        self.search_step_with_budget(doc, SCAN_SLICE)
    }

    pub fn search_step_with_budget(&mut self, doc: &Document, budget: Duration) -> ScanOutcome {
        let Some(mut scan) = self.scan.take() else {
            return ScanOutcome::Done;
        };
        if scan.loop_cnt >= SCAN_LOOPS_PER_BREATHER {
            scan.loop_cnt = 0;
            let progress = scan_progress(&scan, doc);
            self.scan = Some(scan);
            return ScanOutcome::Continue {
                delay: SCAN_BREATHER,
                progress,
            };
        }
        scan.loop_cnt += 1;

        let started = Instant::now();
        let mut line_list: Vec<u32> = Vec::new();
        let mut idx_list: Vec<usize> = Vec::new();
        let mut pattern_done = false;

        loop {
            match scan.finder.find_next(doc) {
                FindStep::Match(m) => {
                    let line = m.block as u32;
                    let (found, idx) = self.model.find(line);
                    if scan.do_add != found {
                        line_list.push(line);
                        idx_list.push(idx);
                    }
                }
                FindStep::Yield { .. } => {}
                FindStep::Done => {
                    pattern_done = true;
                    break;
                }
            }
            if started.elapsed() >= budget || line_list.len() >= SCAN_CHUNK_LINES {
                break;
            }
        }

        if !line_list.is_empty() {
            let backward = scan.direction == Direction::Backward;
            if scan.do_add {
                if backward {
                    line_list.reverse();
                    idx_list.reverse();
                }
                self.model.insert_presorted(&line_list, &mut idx_list);
            } else {
                if !backward {
                    idx_list.reverse();
                }
                self.model.remove_presorted(&idx_list);
            }
            self.undo.append_bg_change(true, scan.do_add, &line_list);
            self.check_invariant();
        }

        if !pattern_done {
            let progress = scan_progress(&scan, doc);
            self.scan = Some(scan);
            return ScanOutcome::Continue {
                delay: Duration::ZERO,
                progress,
            };
        }

        // current pattern exhausted: seal its record, move to the next one
        self.undo.finalize_bg_change(true, scan.do_add);
        self.check_invariant();
        scan.pat_idx += 1;
        if scan.pat_idx < scan.pats.len() {
            self.undo.prepare_bg_change(true, scan.do_add);
            scan.finder = make_finder(
                doc,
                &scan.pats[scan.pat_idx],
                scan.direction,
                scan.cursor_block,
            );
            let progress = scan_progress(&scan, doc);
            self.scan = Some(scan);
            ScanOutcome::Continue {
                delay: Duration::ZERO,
                progress,
            }
        } else {
            debug!(target: "filter.scan", "search_done");
            ScanOutcome::Done
        }
    }

    /// Cancel a running scan or chunked undo/redo. The open undo record is
    /// sealed in place, retaining whatever changes were already applied, so
    /// the undo stacks stay consistent with the list.
    pub fn search_abort(&mut self) {
        if let Some(scan) = self.scan.take() {
            self.undo.finalize_bg_change(true, scan.do_add);
            self.check_invariant();
            debug!(target: "filter.scan", "search_aborted");
        }
        if let Some(run) = self.undo_run.take() {
            self.undo.finalize_undo_redo(run.is_redo);
            self.check_invariant();
            debug!(target: "filter.undo", "undo_aborted");
        }
    }

    pub fn is_busy(&self) -> bool {
        self.scan.is_some() || self.undo_run.is_some()
    }

    // -- synchronous bulk changes -------------------------------------------

    /// Add or remove the block range `[first, last]` spanning the user's
    /// selection in the main text. Lines already in (or absent from) the
    /// list are skipped and not recorded for undo.
    pub fn copy_selection(
        &mut self,
        doc: &Document,
        do_add: bool,
        first: usize,
        last: usize,
    ) -> CopyOutcome {
        assert!(!self.is_busy(), "copy during active background operation");
        let last = last.min(doc.block_count().saturating_sub(1));
        let mut line_list: Vec<u32> = Vec::new();
        let mut idx_list: Vec<usize> = Vec::new();

        for block in first..=last {
            let line = block as u32;
            let (found, idx) = self.model.find(line);
            if do_add != found {
                line_list.push(line);
                idx_list.push(idx);
            }
        }

        if !line_list.is_empty() {
            if do_add {
                self.model.insert_presorted(&line_list, &mut idx_list);
            } else {
                idx_list.reverse();
                self.model.remove_presorted(&idx_list);
                idx_list.reverse();
            }
            self.undo.append_change(do_add, line_list.clone());
            self.check_invariant();
        }
        CopyOutcome {
            lines: line_list,
            indices: idx_list,
        }
    }

    /// Remove rows by their list index (context-menu removal of the current
    /// selection in the filter window).
    pub fn remove_by_indices(&mut self, indices: &[usize]) {
        assert!(!self.is_busy(), "removal during active background operation");
        if indices.is_empty() {
            return;
        }
        let mut idx_list: Vec<usize> = indices.to_vec();
        idx_list.sort_unstable_by(|a, b| b.cmp(a));
        idx_list.dedup();
        let line_list: Vec<u32> = idx_list
            .iter()
            .filter_map(|&i| self.model.line_of_idx(i))
            .collect();
        self.model.remove_presorted(&idx_list);
        self.undo.append_change(false, line_list);
        self.check_invariant();
    }

    pub fn clear_all(&mut self) {
        assert!(!self.is_busy(), "clear during active background operation");
        if !self.model.is_empty() {
            let lines = self.model.remove_all();
            self.undo.append_change(false, lines);
            self.check_invariant();
        }
    }

    /// Insert an imported, de-duplicated ascending line set as one undoable
    /// change; lines already present are skipped. Returns how many were
    /// inserted.
    pub fn import_lines(&mut self, lines: &[u32]) -> usize {
        assert!(!self.is_busy(), "import during active background operation");
        let mut line_list: Vec<u32> = Vec::new();
        let mut idx_list: Vec<usize> = Vec::new();
        for &line in lines {
            let (found, idx) = self.model.find(line);
            if !found {
                line_list.push(line);
                idx_list.push(idx);
            }
        }
        if !line_list.is_empty() {
            self.model.insert_presorted(&line_list, &mut idx_list);
            self.undo.append_change(true, line_list.clone());
            self.check_invariant();
        }
        line_list.len()
    }

    // -- chunked undo / redo ------------------------------------------------

    /// Begin undoing the newest record. Fails when the undo stack is empty;
    /// a running scan must be aborted beforehand.
    pub fn start_undo(&mut self) -> Result<usize, &'static str> {
        assert!(!self.is_busy(), "undo during active background operation");
        let Some((_, count)) = self.undo.peek_undo() else {
            return Err(ERR_NO_UNDO);
        };
        self.undo.prepare_undo_redo(false);
        self.undo_run = Some(UndoRun {
            is_redo: false,
            orig_count: count,
        });
        Ok(count)
    }

    pub fn start_redo(&mut self) -> Result<usize, &'static str> {
        assert!(!self.is_busy(), "redo during active background operation");
        let Some((_, count)) = self.undo.peek_redo() else {
            return Err(ERR_NO_REDO);
        };
        self.undo.prepare_undo_redo(true);
        self.undo_run = Some(UndoRun {
            is_redo: true,
            orig_count: count,
        });
        Ok(count)
    }

    pub fn is_undo_active(&self) -> bool {
        self.undo_run.is_some()
    }

    /// Apply up to [`UNDO_CHUNK`] lines of the running undo/redo.
    pub fn undo_step(&mut self) -> ScanOutcome {
        let Some(run) = self.undo_run.take() else {
            return ScanOutcome::Done;
        };
        let (done, is_added, lines) = self.undo.pop_undo_redo(run.is_redo, UNDO_CHUNK);

        if is_added != run.is_redo {
            // undo an insertion or redo a removal
            self.model.remove_lines(&lines);
        } else {
            self.model.insert_lines(&lines);
        }
        trace!(
            target: "filter.undo",
            is_redo = run.is_redo,
            count = lines.len(),
            done,
            "undo_chunk"
        );

        if done {
            self.undo.finalize_undo_redo(run.is_redo);
            self.check_invariant();
            ScanOutcome::Done
        } else {
            let rest = self.undo.rest_count(run.is_redo);
            let progress = if run.orig_count > 0 {
                (100 * (run.orig_count - rest.min(run.orig_count)) / run.orig_count) as u8
            } else {
                100
            };
            self.undo_run = Some(run);
            ScanOutcome::Continue {
                delay: Duration::ZERO,
                progress,
            }
        }
    }

    // -- atomic in-list search ----------------------------------------------

    /// Find the nearest list entry in the given direction (starting at, and
    /// excluding, `from_block`) whose text matches the pattern. Returns the
    /// list index and line.
    pub fn next_match(
        &self,
        doc: &Document,
        par: &SearchPar,
        is_fwd: bool,
        from_block: usize,
    ) -> Option<(usize, u32)> {
        let re = core_search::compile(par)?;
        let mut buf = String::new();
        let start = self.model.idx_of(from_block as u32);
        if is_fwd {
            for idx in start..self.model.len() {
                let line = self.model.line_of_idx(idx)?;
                if line as usize == from_block {
                    continue;
                }
                if doc.line_into(line as usize, &mut buf) && re.is_match(&buf) {
                    return Some((idx, line));
                }
            }
        } else {
            for idx in (0..start.min(self.model.len())).rev() {
                let line = self.model.line_of_idx(idx)?;
                if line as usize == from_block {
                    continue;
                }
                if doc.line_into(line as usize, &mut buf) && re.is_match(&buf) {
                    return Some((idx, line));
                }
            }
        }
        None
    }

    // -- document lifecycle -------------------------------------------------

    /// Remap after truncation keeping `[top, bottom)`; `bottom == 0` means
    /// unbounded. Background operations must have been aborted already.
    pub fn adjust_line_nums(&mut self, top: u32, bottom: u32) {
        assert!(!self.is_busy(), "adjust during active background operation");
        self.model.adjust_line_nums(top, bottom);
        self.undo.adjust_line_nums(top, bottom);
        self.check_invariant();
    }

    pub fn clear_session(&mut self) {
        self.scan = None;
        self.undo_run = None;
        self.model.remove_all();
        self.model.set_root_line(None);
        self.undo.clear();
    }
}

fn make_finder(
    doc: &Document,
    par: &SearchPar,
    direction: Direction,
    cursor_block: usize,
) -> TextFinder {
    match direction {
        Direction::All => TextFinder::from_block(doc, par, true, 0),
        Direction::Forward => TextFinder::from_block(doc, par, true, cursor_block),
        Direction::Backward => TextFinder::from_block(doc, par, false, cursor_block),
    }
}

fn scan_progress(scan: &SearchScan, doc: &Document) -> u8 {
    let count = doc.block_count().max(1);
    let resume = scan.finder.next_start_block().unwrap_or(count);
    let ratio = match scan.direction {
        Direction::All => resume as f64 / count as f64,
        Direction::Forward => {
            let span = count.saturating_sub(scan.cursor_block).max(1);
            resume.saturating_sub(scan.cursor_block) as f64 / span as f64
        }
        Direction::Backward => 1.0 - resume as f64 / scan.cursor_block.max(1) as f64,
    };
    let total = scan.pats.len().max(1);
    (100.0 * (ratio.clamp(0.0, 1.0) + scan.pat_idx as f64) / total as f64) as u8
}
