//! Application state and command handling.
//!
//! Owns the document and all engines, translates key input into engine
//! calls, and steps the background scans when the scheduler dispatches one
//! of the registered tasks. Task re-arming goes through a small outbox that
//! the main loop drains back into the scheduler after every dispatch.

use std::cell::RefCell;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use core_bookmarks::Bookmarks;
use core_config::{ConfigWriter, RcFile, SearchListCfg, WriteDebounce};
use core_filter::{Direction, FilterList, ScanOutcome};
use core_highlight::{Highlighter, ScanStep};
use core_load::{LoadMode, PipeLoader};
use core_parse::{FrameParser, ParseSpec};
use core_search::{
    Baseline, FindStep, IncSearch, SearchHistory, SearchPar, TextFinder, find_in_doc, incsearch,
};
use core_text::{Document, JumpPos, JumpStack, JumpWalk};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tracing::{debug, info};

use crate::status::StatusLine;
use crate::view::View;

/// Background tasks of the application; one scheduler slot each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    FilterScan,
    FilterUndo,
    IncSearch,
    HallScan,
    HighInit,
}

/// Scheduler instructions emitted by command handlers; the main loop owns
/// the scheduler and applies these after each round.
#[derive(Debug)]
pub enum SchedCmd {
    Start { kind: TaskKind, delay: Duration },
    Stop(TaskKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Main,
    SearchEntry,
    Filter,
}

#[derive(Debug, Clone, Copy)]
pub struct SearchOpts {
    pub regexp: bool,
    pub match_case: bool,
    pub hall: bool,
}

struct IncScan {
    finder: TextFinder,
    par: SearchPar,
    /// Set when the pattern changed since the last result; a failed changed
    /// search restores the baseline view.
    is_changed: bool,
}

pub struct App {
    pub doc: Document,
    pub doc_name: String,
    pub doc_path: Option<PathBuf>,
    pub higl: Highlighter,
    pub filter: FilterList,
    pub bookmarks: Bookmarks,
    pub history: SearchHistory,
    pub inc: IncSearch,
    pub jumps: JumpStack,
    pub view: View,
    pub status: StatusLine,
    pub entry: String,
    pub search_opts: SearchOpts,
    pub focus: Focus,
    pub filter_progress: Option<u8>,
    pub loader: Option<PipeLoader>,
    pub parse_spec: Option<ParseSpec>,
    parser: RefCell<Option<FrameParser>>,
    pub search_list_cfg: SearchListCfg,
    pub rc_writer: ConfigWriter,
    pub rc_debounce: WriteDebounce,
    pub load_buf_size: u64,
    pub sched_out: Vec<SchedCmd>,
    pub dirty: bool,
    pub quit: bool,
    inc_scan: Option<IncScan>,
    last_key: Option<char>,
}

impl App {
    pub fn new(cols: u16, rows: u16, rc: RcFile, rc_writer: ConfigWriter) -> Self {
        let mut history = SearchHistory::new();
        history.set_entries(rc.main_search.tlb_history.clone());
        let mut higl = Highlighter::new();
        higl.load_rules(&rc.highlight);
        let parse_spec = rc.search_list.parser.clone();
        let parser = RefCell::new(parse_spec.as_ref().and_then(FrameParser::create));

        Self {
            doc: Document::new(),
            doc_name: String::new(),
            doc_path: None,
            higl,
            filter: FilterList::new(),
            bookmarks: Bookmarks::new(),
            history,
            inc: IncSearch::new(),
            jumps: JumpStack::new(),
            view: View::new(cols, rows),
            status: StatusLine::new(),
            entry: String::new(),
            search_opts: SearchOpts {
                regexp: rc.main_search.tlb_regexp,
                match_case: rc.main_search.tlb_case,
                hall: rc.main_search.tlb_hall,
            },
            focus: Focus::Main,
            filter_progress: None,
            loader: None,
            parse_spec,
            parser,
            search_list_cfg: rc.search_list.clone(),
            rc_writer,
            rc_debounce: WriteDebounce::new(),
            load_buf_size: rc.load_buf_size().unwrap_or(core_config::DEFAULT_BUF_SIZE),
            sched_out: Vec::new(),
            dirty: true,
            quit: false,
            inc_scan: None,
            last_key: None,
        }
    }

    fn schedule(&mut self, kind: TaskKind, delay: Duration) {
        self.sched_out.push(SchedCmd::Start { kind, delay });
    }

    fn stop_task(&mut self, kind: TaskKind) {
        self.sched_out.push(SchedCmd::Stop(kind));
    }

    fn cur_par(&self) -> SearchPar {
        SearchPar::new(
            self.entry.clone(),
            self.search_opts.regexp,
            self.search_opts.match_case,
        )
    }

    /// Active parameters: the entry text, or the newest history entry when
    /// the entry is empty.
    fn effective_par(&self) -> Option<SearchPar> {
        if !self.entry.is_empty() {
            Some(self.cur_par())
        } else {
            self.history.front().cloned()
        }
    }

    fn rc_dirty(&mut self) {
        self.rc_debounce.request();
    }

    pub fn collect_rc(&self) -> RcFile {
        let mut rc = RcFile::default();
        rc.main_search.tlb_history = self.history.entries().to_vec();
        rc.main_search.tlb_regexp = self.search_opts.regexp;
        rc.main_search.tlb_case = self.search_opts.match_case;
        rc.main_search.tlb_hall = self.search_opts.hall;
        rc.highlight = self.higl.rules_cfg();
        rc.search_list = SearchListCfg {
            parser: self.parse_spec.clone(),
            ..self.search_list_cfg.clone()
        };
        rc.set_load_buf_size(self.load_buf_size);
        rc
    }

    /// Periodic housekeeping: status expiry and the debounced config write.
    pub fn tick(&mut self, now: Instant) {
        if self.status.tick(now) {
            self.dirty = true;
        }
        if self.rc_debounce.is_due(now) {
            let rc = self.collect_rc();
            match self.rc_writer.write(&rc) {
                Ok(_) => {}
                Err(e) => self.status.show_error("config", e.to_string()),
            }
            self.rc_debounce.mark_written_at(now);
        }
    }

    /// Earliest wakeup needed besides scheduler deadlines.
    pub fn next_deadline(&self) -> Option<Instant> {
        [self.status.deadline(), self.rc_debounce.deadline()]
            .into_iter()
            .flatten()
            .min()
    }

    // -- document loading ---------------------------------------------------

    pub fn load_text(&mut self, name: String, path: Option<PathBuf>, text: &str) {
        self.doc = Document::from_str(text);
        self.doc_name = name;
        self.doc_path = path;
        self.view.clamp_cursor(&self.doc);
        self.higl.start_init_scan();
        self.schedule(TaskKind::HighInit, Duration::from_millis(50));
        self.auto_load_bookmarks();
        self.dirty = true;
        info!(target: "app", blocks = self.doc.block_count(), name = %self.doc_name, "document_loaded");
    }

    fn auto_load_bookmarks(&mut self) {
        let Some(path) = self.doc_path.clone() else {
            return;
        };
        let Some((bok, is_older)) = core_bookmarks::default_file_name(&path) else {
            return;
        };
        if is_older {
            self.status.show_warning(
                "bookmarks",
                format!(
                    "Bookmark file {} is older than content - not loaded",
                    bok.display()
                ),
            );
            return;
        }
        match core_bookmarks::Bookmarks::parse_file(&bok, self.doc.block_count()) {
            Ok(outcome) => {
                if outcome.skipped > 0 || outcome.synerr > 0 {
                    self.status.show_warning(
                        "bookmarks",
                        format!(
                            "Bookmark file: {} out-of-range and {} malformed lines ignored",
                            outcome.skipped, outcome.synerr
                        ),
                    );
                }
                let entries = outcome.entries;
                self.bookmarks.apply_parsed(&self.doc, entries);
                self.bookmarks.set_loaded_file(bok);
                for block in self.bookmarks.line_list() {
                    self.higl.bookmark_highlight(block, true);
                }
            }
            Err(e) => self.status.show_error("bookmarks", e.to_string()),
        }
    }

    /// Drain pipe loader events; returns true when loading just finished.
    pub fn poll_loader(&mut self) -> bool {
        let Some(loader) = self.loader.as_mut() else {
            return false;
        };
        let mut finished = false;
        while let Ok(ev) = loader.events().try_recv() {
            finished |= loader.handle_event(ev);
        }
        if loader.is_ready() || (finished && loader.is_eof()) {
            if let Some(err) = loader.error() {
                self.status
                    .show_error("load", format!("Error while reading input stream: {err}"));
            }
            let mut loader = self.loader.take().unwrap();
            loader.pause();
            let data = loader.take_data();
            let text = String::from_utf8_lossy(&data).into_owned();
            self.load_text("(stdin)".into(), None, &text);
            return true;
        }
        self.status.show_plain(
            "load",
            format!(
                "Loading from STDIN... {} read, {} buffered",
                loader.read_total(),
                loader.buffered_bytes()
            ),
        );
        self.dirty = true;
        false
    }

    // -- background task dispatch -------------------------------------------

    pub fn run_task(&mut self, kind: TaskKind) {
        match kind {
            TaskKind::HighInit => self.step_high_init(),
            TaskKind::HallScan => self.step_hall_scan(),
            TaskKind::FilterScan => self.step_filter_scan(),
            TaskKind::FilterUndo => self.step_filter_undo(),
            TaskKind::IncSearch => self.step_inc_search(),
        }
    }

    fn step_high_init(&mut self) {
        match self.higl.init_step(&self.doc) {
            ScanStep::Continue { delay, .. } => self.schedule(TaskKind::HighInit, delay),
            ScanStep::Done => {}
        }
        self.dirty = true;
    }

    fn step_hall_scan(&mut self) {
        match self.higl.hall_step(&self.doc) {
            ScanStep::Continue { delay, .. } => self.schedule(TaskKind::HallScan, delay),
            ScanStep::Done => {}
        }
        self.dirty = true;
    }

    fn filter_anchor(&self) -> Option<u32> {
        self.view
            .filter_sel
            .and_then(|idx| self.filter.line_of_idx(idx))
            .or_else(|| self.filter.line_of_idx(self.view.filter_top))
    }

    fn restore_filter_anchor(&mut self, anchor: Option<u32>) {
        if let Some(line) = anchor {
            let idx = self.filter.idx_of(line);
            if self.view.filter_sel.is_some() {
                self.view.filter_sel = Some(idx.min(self.filter.len().saturating_sub(1)));
            }
            let rows = self.view.filter_rows().saturating_sub(1).max(1);
            if idx < self.view.filter_top || idx >= self.view.filter_top + rows {
                self.view.filter_top = idx.saturating_sub(rows / 2);
            }
        }
    }

    fn step_filter_scan(&mut self) {
        let anchor = self.filter_anchor();
        match self.filter.search_step(&self.doc) {
            ScanOutcome::Continue { delay, progress } => {
                self.filter_progress = Some(progress);
                self.schedule(TaskKind::FilterScan, delay);
            }
            ScanOutcome::Done => {
                self.filter_progress = None;
            }
        }
        self.restore_filter_anchor(anchor);
        self.dirty = true;
    }

    fn step_filter_undo(&mut self) {
        let anchor = self.filter_anchor();
        match self.filter.undo_step() {
            ScanOutcome::Continue { delay, progress } => {
                self.filter_progress = Some(progress);
                self.schedule(TaskKind::FilterUndo, delay);
            }
            ScanOutcome::Done => {
                self.filter_progress = None;
            }
        }
        self.restore_filter_anchor(anchor);
        self.dirty = true;
    }

    // -- incremental search -------------------------------------------------

    fn baseline_snapshot(&self) -> Baseline {
        Baseline {
            pos: self.view.cursor_pos(&self.doc),
            view_top: self.view.top,
            view_left: self.view.left,
        }
    }

    fn restore_baseline(&mut self, b: Baseline) {
        self.view.top = b.view_top.min(self.doc.block_count().saturating_sub(1));
        self.view.left = b.view_left;
        self.view.cursor = self.doc.block_at(b.pos);
        self.view.cursor_col = b.pos - self.doc.block_pos(self.view.cursor);
        self.view.clamp_cursor(&self.doc);
    }

    /// Debounced entry change or a pending scan step.
    fn step_inc_search(&mut self) {
        if self.inc_scan.is_some() {
            self.step_inc_scan();
            return;
        }
        let par = self.cur_par();
        if par.is_empty() {
            self.search_reset();
            return;
        }
        if let Err(e) = core_search::check_pattern(&par) {
            self.status
                .show_error("search", format!("Incomplete or invalid reg.exp.: {e}"));
            return;
        }
        let first_capture = self.inc.baseline().is_none();
        let baseline = self.inc.capture_baseline(self.baseline_snapshot());
        if first_capture {
            self.jumps.push(JumpPos {
                pos: baseline.pos,
                block: self.doc.block_at(baseline.pos),
            });
        }
        // the pattern changed: obsolete highlights go away before scanning
        self.higl.hall_clear();
        self.higl.remove_inc();
        let finder = TextFinder::new(&self.doc, &par, self.inc.last_dir_fwd, baseline.pos);
        self.inc_scan = Some(IncScan {
            finder,
            par,
            is_changed: true,
        });
        self.inc.mark_running();
        self.step_inc_scan();
    }

    fn step_inc_scan(&mut self) {
        let Some(mut scan) = self.inc_scan.take() else {
            return;
        };
        match scan.finder.find_next(&self.doc) {
            FindStep::Match(m) => {
                let col = m.pos - self.doc.block_pos(m.block);
                self.handle_search_match(&scan.par, m.block, col, m.len);
                self.inc.mark_result(true);
                self.status.clear("search");
                let entry = self.entry.clone();
                self.inc.track_history(&self.history, &entry);
            }
            FindStep::Yield { .. } => {
                self.inc_scan = Some(scan);
                self.schedule(TaskKind::IncSearch, Duration::ZERO);
                return;
            }
            FindStep::Done => {
                if scan.is_changed && let Some(b) = self.inc.baseline() {
                    self.restore_baseline(b);
                }
                self.status.show_warning(
                    "search",
                    if self.inc.last_dir_fwd {
                        "No match until end of file"
                    } else {
                        "No match until start of file"
                    },
                );
                self.inc.mark_result(false);
                if self.search_opts.hall {
                    self.hall_update(&scan.par);
                }
            }
        }
        self.dirty = true;
    }

    /// Common post-match handling: mark the match, move the cursor there,
    /// refresh the global highlight.
    fn handle_search_match(&mut self, par: &SearchPar, block: usize, col: usize, len: usize) {
        self.higl.remove_inc();
        self.higl.apply_match_highlight(block, col, len);
        self.view.goto_block(&self.doc, block);
        self.view.cursor_col = col;
        if self.search_opts.hall {
            self.hall_update(par);
        }
        self.dirty = true;
    }

    fn hall_update(&mut self, par: &SearchPar) {
        if self.higl.hall_set(par) {
            let (first, last) = self.view.visible_range(&self.doc);
            self.higl.highlight_visible_hall(&self.doc, first, last);
            self.schedule(TaskKind::HallScan, Duration::from_millis(100));
        }
    }

    fn search_reset(&mut self) {
        self.stop_task(TaskKind::HallScan);
        self.higl.hall_clear();
        self.inc_scan = None;
        if let Some(b) = self.inc.leave() {
            self.restore_baseline(b);
        }
        if self.focus == Focus::SearchEntry {
            // still in the entry: an emptied pattern returns to the entered
            // state with cleared highlights, not to idle
            self.inc.enter();
        }
        self.status.clear("search");
        self.dirty = true;
    }

    /// Atomic search relative to the current cursor.
    fn search_next(&mut self, is_fwd: bool) -> bool {
        self.status.clear("search");
        let Some(par) = self.effective_par() else {
            self.status
                .show_error("search", "No pattern defined for search repeat");
            return false;
        };
        if let Err(e) = core_search::check_pattern(&par) {
            self.status
                .show_error("search", format!("Syntax error in search expression: {e}"));
            return false;
        }
        self.jumps.push(JumpPos {
            pos: self.view.cursor_pos(&self.doc),
            block: self.view.cursor,
        });
        self.inc.last_dir_fwd = is_fwd;
        let cur = self.view.cursor_pos(&self.doc);
        let base = if is_fwd { cur + 1 } else { cur };
        match find_in_doc(&self.doc, &par, is_fwd, base) {
            Some(m) => {
                let col = m.pos - self.doc.block_pos(m.block);
                self.handle_search_match(&par, m.block, col, m.len);
                true
            }
            None => {
                self.status.show_warning(
                    "search",
                    format!(
                        "No match until {} of file: {}",
                        if is_fwd { "end" } else { "start" },
                        par.pat
                    ),
                );
                false
            }
        }
    }

    fn search_word(&mut self, is_fwd: bool) {
        let Some(line) = self.doc.line(self.view.cursor) else {
            return;
        };
        let Some(word) = incsearch::word_at(&line, self.view.cursor_col) else {
            return;
        };
        let pat = incsearch::word_search_pattern(&word, &self.cur_par());
        self.entry = pat.clone();
        let par = SearchPar::new(pat, self.search_opts.regexp, self.search_opts.match_case);
        if self.history.add_entry(&par) {
            self.rc_dirty();
        }
        self.status.clear("search");
        self.inc.last_dir_fwd = is_fwd;
        let base = self.view.cursor_pos(&self.doc);
        self.jumps.push(JumpPos {
            pos: base,
            block: self.view.cursor,
        });
        match find_in_doc(&self.doc, &par, is_fwd, if is_fwd { base + 1 } else { base }) {
            Some(m) => {
                let col = m.pos - self.doc.block_pos(m.block);
                self.handle_search_match(&par, m.block, col, m.len);
            }
            None => self.status.show_warning(
                "search",
                format!(
                    "No match until {} of file: {}",
                    if is_fwd { "end" } else { "start" },
                    par.pat
                ),
            ),
        }
    }

    fn search_enter(&mut self, is_fwd: bool) {
        self.focus = Focus::SearchEntry;
        self.inc.last_dir_fwd = is_fwd;
        self.inc.enter();
        self.entry.clear();
        self.stop_task(TaskKind::HallScan);
        self.higl.hall_clear();
        self.dirty = true;
    }

    fn search_return(&mut self) {
        let scan_pending = self.inc_scan.is_some();
        self.inc_scan = None;
        self.stop_task(TaskKind::IncSearch);

        if self.entry.is_empty() {
            match self.history.front().cloned() {
                Some(par) => self.entry = par.pat,
                None => {
                    self.status
                        .show_error("search", "No pattern defined for search repeat");
                    return;
                }
            }
        }
        let par = self.cur_par();
        if let Err(e) = core_search::check_pattern(&par) {
            self.status
                .show_error("search", format!("Syntax error in search expression: {e}"));
            return;
        }
        if self.history.add_entry(&par) {
            self.rc_dirty();
        }
        if scan_pending {
            // the debounced scan never finished; run it to completion now
            let fwd = self.inc.last_dir_fwd;
            if !self.search_next(fwd)
                && let Some(b) = self.inc.baseline()
            {
                self.restore_baseline(b);
            }
        }
        self.inc.leave();
        self.focus = Focus::Main;
        self.dirty = true;
    }

    fn search_escape(&mut self) {
        let par = self.cur_par();
        if !par.is_empty()
            && core_search::check_pattern(&par).is_ok()
            && self.history.add_entry(&par)
        {
            self.rc_dirty();
        }
        self.entry.clear();
        self.inc_scan = None;
        self.stop_task(TaskKind::IncSearch);
        self.search_reset();
        self.focus = Focus::Main;
    }

    // -- filter list --------------------------------------------------------

    fn filter_search_matches(&mut self, do_add: bool, direction: Direction) {
        let Some(par) = self.effective_par() else {
            self.status
                .show_error("filter", "No pattern defined for search");
            return;
        };
        if par.is_empty() || core_search::check_pattern(&par).is_err() {
            self.status.show_error("filter", "Invalid search pattern");
            return;
        }
        if self.history.add_entry(&par) {
            self.rc_dirty();
        }
        self.abort_filter_tasks();
        self.filter
            .start_search(&self.doc, vec![par], do_add, direction, self.view.cursor);
        self.schedule(TaskKind::FilterScan, Duration::from_millis(10));
        self.view.filter_open = true;
        self.dirty = true;
    }

    fn abort_filter_tasks(&mut self) {
        self.stop_task(TaskKind::FilterScan);
        self.stop_task(TaskKind::FilterUndo);
        self.filter.search_abort();
        self.filter_progress = None;
    }

    fn filter_copy_line(&mut self, do_add: bool) {
        self.abort_filter_tasks();
        let cursor = self.view.cursor;
        let outcome = self.filter.copy_selection(&self.doc, do_add, cursor, cursor);
        if do_add && !outcome.indices.is_empty() {
            self.view.filter_open = true;
            self.view.filter_sel = Some(outcome.indices[0]);
        }
        self.dirty = true;
    }

    fn filter_undo(&mut self, redo: bool) {
        self.abort_filter_tasks();
        let result = if redo {
            self.filter.start_redo()
        } else {
            self.filter.start_undo()
        };
        match result {
            Ok(_) => self.schedule(TaskKind::FilterUndo, Duration::from_millis(10)),
            Err(msg) => self.status.show_error("filter", msg),
        }
    }

    pub fn parser_columns(&self, block: usize) -> String {
        let Some(spec) = self.parse_spec.as_ref() else {
            return String::new();
        };
        let mut parser = self.parser.borrow_mut();
        let Some(p) = parser.as_mut() else {
            return String::new();
        };
        p.sync_generation(&self.doc);
        let (val, frm) = p.parse(&self.doc, block);
        let cols = spec.columns();
        let mut out = String::new();
        if cols.val {
            out.push_str(&format!("{val:>8}"));
        }
        if cols.frm {
            out.push_str(&format!(" {frm:>6}"));
        }
        out
    }

    // -- bookmarks & jumps --------------------------------------------------

    fn toggle_bookmark(&mut self, block: usize) {
        let set = self.bookmarks.toggle(&self.doc, block);
        self.higl.bookmark_highlight(block, set);
        self.dirty = true;
    }

    fn jump_next_bookmark(&mut self, is_fwd: bool) {
        match self.bookmarks.next_line(self.view.cursor, is_fwd) {
            Some(line) => {
                self.jumps.push(JumpPos {
                    pos: self.view.cursor_pos(&self.doc),
                    block: self.view.cursor,
                });
                self.view.goto_block(&self.doc, line);
            }
            None => {
                let msg = if self.bookmarks.count() == 0 {
                    "No bookmarks have been defined yet"
                } else if is_fwd {
                    "No more bookmarks until end of file"
                } else {
                    "No more bookmarks until start of file"
                };
                self.status.show_warning("keycmd", msg);
            }
        }
        self.dirty = true;
    }

    fn jump_toggle(&mut self) {
        self.status.clear("keycmd");
        let cur = JumpPos {
            pos: self.view.cursor_pos(&self.doc),
            block: self.view.cursor,
        };
        match self.jumps.toggle(cur) {
            Some(p) => self.view.goto_block(&self.doc, p.block),
            None if self.jumps.is_empty() => {
                self.status.show_error("keycmd", "Jump stack is empty.")
            }
            None => self.status.show_warning("keycmd", "Already on the mark."),
        }
        self.dirty = true;
    }

    fn jump_walk(&mut self, rel: isize) {
        self.status.clear("keycmd");
        let cur = JumpPos {
            pos: self.view.cursor_pos(&self.doc),
            block: self.view.cursor,
        };
        match self.jumps.walk(cur, rel) {
            JumpWalk::Moved(p) => self.view.goto_block(&self.doc, p.block),
            JumpWalk::WrappedToNewest(p) => {
                self.status
                    .show_warning("keycmd", "Jump stack wrapped from oldest to newest.");
                self.view.goto_block(&self.doc, p.block);
            }
            JumpWalk::WrappedToOldest(p) => {
                self.status
                    .show_warning("keycmd", "Jump stack wrapped from newest to oldest.");
                self.view.goto_block(&self.doc, p.block);
            }
            JumpWalk::Empty => self.status.show_error("keycmd", "Jump stack is empty."),
        }
        self.dirty = true;
    }

    // -- document truncation ------------------------------------------------

    /// Discard everything above or below the cursor line. Scans are stopped
    /// first, then every block-number-bearing structure is remapped and
    /// highlighting starts over.
    fn discard(&mut self, below: bool) {
        let cursor = self.view.cursor;
        let count = self.doc.block_count();
        let del_count = if below {
            count.saturating_sub(cursor + 1)
        } else {
            cursor
        };
        if del_count == 0 {
            self.status.show_warning(
                "keycmd",
                if below {
                    "Already at the bottom"
                } else {
                    "Already at the top"
                },
            );
            return;
        }

        self.stop_task(TaskKind::HighInit);
        self.stop_task(TaskKind::HallScan);
        self.stop_task(TaskKind::IncSearch);
        self.abort_filter_tasks();
        self.higl.abort_init_scan();
        self.inc_scan = None;

        let (top, bottom) = if below { (0, cursor + 1) } else { (cursor, 0) };
        self.doc
            .truncate(top, (bottom != 0).then_some(bottom));
        self.higl.adjust_line_nums(top, bottom);
        self.filter.adjust_line_nums(top as u32, bottom as u32);
        self.bookmarks.adjust_line_nums(top, bottom);
        self.jumps.clear();
        self.view.clamp_cursor(&self.doc);
        self.view.top = self.view.top.min(self.doc.block_count().saturating_sub(1));

        self.higl.start_init_scan();
        self.schedule(TaskKind::HighInit, Duration::from_millis(50));
        self.status.show_plain(
            "keycmd",
            format!(
                "Discarded {del_count} lines {}",
                if below { "below" } else { "above" }
            ),
        );
        debug!(target: "app", top, bottom, "content_discarded");
        self.dirty = true;
    }

    /// Re-read the current file from disk, dropping all derived state.
    fn reload(&mut self) {
        let Some(path) = self.doc_path.clone() else {
            self.status
                .show_error("keycmd", "No file to reload (input came from a pipe)");
            return;
        };
        self.stop_task(TaskKind::HighInit);
        self.stop_task(TaskKind::HallScan);
        self.stop_task(TaskKind::IncSearch);
        self.abort_filter_tasks();
        self.inc_scan = None;

        match std::fs::read(&path) {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                self.doc.clear();
                self.higl.clear();
                self.filter.clear_session();
                self.bookmarks.remove_all();
                self.jumps.clear();
                let name = self.doc_name.clone();
                self.load_text(name, Some(path), &text);
                self.status.show_plain("keycmd", "File reloaded");
            }
            Err(e) => self
                .status
                .show_error("keycmd", format!("Error reading {}: {e}", path.display())),
        }
    }

    fn save_bookmarks(&mut self) {
        if self.bookmarks.count() == 0 {
            self.status
                .show_error("bookmarks", "Your bookmark list is empty.");
            return;
        }
        let path = self
            .bookmarks
            .loaded_file()
            .map(PathBuf::from)
            .or_else(|| {
                self.doc_path
                    .as_ref()
                    .map(|p| PathBuf::from(format!("{}.bok", p.display())))
            });
        let Some(path) = path else {
            self.status
                .show_error("bookmarks", "No file name to derive the bookmark file from");
            return;
        };
        match self.bookmarks.save_file(&path) {
            Ok(()) => self.status.show_plain(
                "bookmarks",
                format!("Bookmarks saved to {}", path.display()),
            ),
            Err(e) => self.status.show_error("bookmarks", e.to_string()),
        }
    }

    fn export_filter_list(&mut self, lnum_only: bool) {
        if self.filter.is_empty() {
            self.status
                .show_warning("filter", "Nothing to save: Search list is empty");
            return;
        }
        let base = self
            .doc_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "loupe".into());
        let path = PathBuf::from(format!("{base}.lines"));
        let result = std::fs::File::create(&path)
            .map_err(core_filter::io::ListIoError::from)
            .and_then(|f| {
                core_filter::io::write_list(
                    std::io::BufWriter::new(f),
                    self.filter.lines(),
                    &self.doc,
                    lnum_only,
                )
            });
        match result {
            Ok(()) => self
                .status
                .show_plain("filter", format!("List saved to {}", path.display())),
            Err(e) => self.status.show_error("filter", e.to_string()),
        }
    }

    fn import_filter_list(&mut self) {
        let base = self
            .doc_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "loupe".into());
        let path = PathBuf::from(format!("{base}.lines"));
        let outcome = std::fs::File::open(&path)
            .map_err(core_filter::io::ListIoError::from)
            .and_then(|f| {
                core_filter::io::parse_line_list(std::io::BufReader::new(f), self.doc.block_count())
            });
        match outcome {
            Ok(outcome) => {
                if outcome.skipped > 0 || outcome.synerr > 0 {
                    self.status.show_warning(
                        "filter",
                        format!(
                            "Found {} out-of-range and {} malformed lines",
                            outcome.skipped, outcome.synerr
                        ),
                    );
                }
                self.abort_filter_tasks();
                let inserted = self.filter.import_lines(&outcome.lines);
                if inserted == 0 {
                    self.status
                        .show_warning("filter", "All read lines were already in the list");
                } else {
                    self.status
                        .show_plain("filter", format!("Inserted {inserted} lines."));
                }
                self.view.filter_open = true;
            }
            Err(e) => self.status.show_error("filter", e.to_string()),
        }
        self.dirty = true;
    }

    // -- key dispatch -------------------------------------------------------

    pub fn on_key(&mut self, key: KeyEvent) {
        if self.loader.is_some() {
            self.on_key_loading(key);
            return;
        }
        match self.focus {
            Focus::SearchEntry => self.on_key_search(key),
            Focus::Filter => self.on_key_filter(key),
            Focus::Main => self.on_key_main(key),
        }
    }

    fn on_key_loading(&mut self, key: KeyEvent) {
        let Some(loader) = self.loader.as_mut() else {
            return;
        };
        match key.code {
            KeyCode::Char('t') => loader.reconfigure(LoadMode::Tail, self.load_buf_size),
            KeyCode::Char('h') => loader.reconfigure(LoadMode::Head, self.load_buf_size),
            KeyCode::Esc | KeyCode::Enter => {
                // stop buffering and use what arrived so far
                loader.pause();
                let mut loader = self.loader.take().unwrap();
                let data = loader.take_data();
                let text = String::from_utf8_lossy(&data).into_owned();
                self.load_text("(stdin)".into(), None, &text);
            }
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.quit = true;
            }
            _ => {}
        }
    }

    fn on_key_search(&mut self, key: KeyEvent) {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Enter => self.search_return(),
            KeyCode::Esc => self.search_escape(),
            KeyCode::Backspace => {
                self.entry.pop();
                self.on_entry_changed();
            }
            KeyCode::Up => self.browse_history(true),
            KeyCode::Down => self.browse_history(false),
            KeyCode::Char('d') if ctrl => self.complete_entry(),
            KeyCode::Char('D') if ctrl => self.complete_entry_left(),
            KeyCode::Char('x') if ctrl => {
                if let Some(text) = self.inc.remove_browsed(&mut self.history) {
                    self.entry = text;
                    self.rc_dirty();
                    self.on_entry_changed();
                }
            }
            KeyCode::Char('r') if key.modifiers.contains(KeyModifiers::ALT) => {
                self.search_opts.regexp = !self.search_opts.regexp;
                self.rc_dirty();
                self.on_entry_changed();
            }
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::ALT) => {
                self.search_opts.match_case = !self.search_opts.match_case;
                self.rc_dirty();
                self.on_entry_changed();
            }
            KeyCode::Char('h') if key.modifiers.contains(KeyModifiers::ALT) => {
                self.search_opts.hall = !self.search_opts.hall;
                self.rc_dirty();
                self.on_entry_changed();
            }
            KeyCode::Char(c) if !ctrl => {
                self.entry.push(c);
                self.on_entry_changed();
            }
            _ => {}
        }
        self.dirty = true;
    }

    fn on_entry_changed(&mut self) {
        self.inc_scan = None;
        let entry = self.entry.clone();
        self.inc.track_history(&self.history, &entry);
        self.schedule(TaskKind::IncSearch, Duration::from_millis(100));
    }

    fn browse_history(&mut self, is_up: bool) {
        let text = self.inc.browse_history(&self.history, &self.entry, is_up);
        self.entry = text;
        self.on_entry_changed();
    }

    fn complete_entry(&mut self) {
        let Some(line) = self.doc.line(self.view.cursor) else {
            return;
        };
        let par = self.cur_par();
        if let Some(add) = incsearch::complete_right(&line, self.view.cursor_col, &par) {
            self.entry.push_str(&add);
            self.on_entry_changed();
        }
    }

    fn complete_entry_left(&mut self) {
        let Some(line) = self.doc.line(self.view.cursor) else {
            return;
        };
        if let Some(add) =
            incsearch::complete_left(&line, self.view.cursor_col, self.search_opts.regexp)
        {
            self.entry.insert_str(0, &add);
            self.on_entry_changed();
        }
    }

    fn on_key_filter(&mut self, key: KeyEvent) {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let len = self.filter.len();
        match key.code {
            KeyCode::Esc | KeyCode::Tab => self.focus = Focus::Main,
            KeyCode::Char('j') | KeyCode::Down => {
                let sel = self.view.filter_sel.map_or(0, |s| s + 1);
                if sel < len {
                    self.view.filter_sel = Some(sel);
                }
            }
            KeyCode::Char('k') | KeyCode::Up => {
                self.view.filter_sel = self.view.filter_sel.map(|s| s.saturating_sub(1));
            }
            KeyCode::Enter => {
                if let Some(line) = self
                    .view
                    .filter_sel
                    .and_then(|idx| self.filter.line_of_idx(idx))
                {
                    self.jumps.push(JumpPos {
                        pos: self.view.cursor_pos(&self.doc),
                        block: self.view.cursor,
                    });
                    self.view.goto_block(&self.doc, line as usize);
                }
            }
            KeyCode::Delete | KeyCode::Char('d') if !ctrl => {
                if let Some(idx) = self.view.filter_sel {
                    self.abort_filter_tasks();
                    self.filter.remove_by_indices(&[idx]);
                    if self.filter.is_empty() {
                        self.view.filter_sel = None;
                    }
                }
            }
            KeyCode::Char('u') => self.filter_undo(false),
            KeyCode::Char('r') if ctrl => self.filter_undo(true),
            KeyCode::Char('C') => {
                self.abort_filter_tasks();
                self.filter.clear_all();
                self.view.filter_sel = None;
                self.view.filter_top = 0;
            }
            KeyCode::Char('m') => {
                if let Some(line) = self
                    .view
                    .filter_sel
                    .and_then(|idx| self.filter.line_of_idx(idx))
                {
                    self.toggle_bookmark(line as usize);
                }
            }
            KeyCode::Char('o') => {
                let line = self
                    .view
                    .filter_sel
                    .and_then(|idx| self.filter.line_of_idx(idx));
                self.filter.set_root_line(line);
            }
            KeyCode::Char('n') => {
                if let Some(par) = self.effective_par()
                    && let Some((idx, line)) =
                        self.filter.next_match(&self.doc, &par, true, self.view.cursor)
                {
                    self.view.filter_sel = Some(idx);
                    self.view.goto_block(&self.doc, line as usize);
                }
            }
            KeyCode::Char('N') => {
                if let Some(par) = self.effective_par()
                    && let Some((idx, line)) =
                        self.filter.next_match(&self.doc, &par, false, self.view.cursor)
                {
                    self.view.filter_sel = Some(idx);
                    self.view.goto_block(&self.doc, line as usize);
                }
            }
            _ => {}
        }
        // keep the selection visible
        if let Some(sel) = self.view.filter_sel {
            let rows = self.view.filter_rows().saturating_sub(1).max(1);
            if sel < self.view.filter_top {
                self.view.filter_top = sel;
            } else if sel >= self.view.filter_top + rows {
                self.view.filter_top = sel + 1 - rows;
            }
        }
        self.dirty = true;
    }

    fn on_key_main(&mut self, key: KeyEvent) {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let alt = key.modifiers.contains(KeyModifiers::ALT);
        let last = self.last_key.take();
        match key.code {
            KeyCode::Char('q') => self.quit = true,
            KeyCode::Char('c') if ctrl => self.quit = true,

            KeyCode::Char('/') => self.search_enter(true),
            KeyCode::Char('?') => self.search_enter(false),
            KeyCode::Char('n') if alt => self.filter_search_matches(true, Direction::Forward),
            KeyCode::Char('p') if alt => self.filter_search_matches(true, Direction::Backward),
            KeyCode::Char('n') => {
                self.search_next(true);
            }
            KeyCode::Char('N') => {
                self.search_next(false);
            }
            KeyCode::Char('*') => self.search_word(true),
            KeyCode::Char('#') => self.search_word(false),
            KeyCode::Char('&') => {
                self.stop_task(TaskKind::HallScan);
                self.higl.hall_clear();
                self.dirty = true;
            }

            KeyCode::Char('j') | KeyCode::Down => self.view.move_cursor_line(&self.doc, 1),
            KeyCode::Char('k') | KeyCode::Up => self.view.move_cursor_line(&self.doc, -1),
            KeyCode::Char('h') | KeyCode::Left => {
                self.view.cursor_col = self.view.cursor_col.saturating_sub(1);
            }
            KeyCode::Char('l') | KeyCode::Right => {
                self.view.cursor_col =
                    (self.view.cursor_col + 1).min(self.doc.line_len(self.view.cursor));
            }
            KeyCode::Char('0') | KeyCode::Home => self.view.cursor_col = 0,
            KeyCode::Char('$') | KeyCode::End => {
                self.view.cursor_col = self.doc.line_len(self.view.cursor);
            }
            KeyCode::Char('f') if ctrl => self.view.page(&self.doc, 1),
            KeyCode::Char('b') if ctrl => self.view.page(&self.doc, -1),
            KeyCode::PageDown | KeyCode::Char(' ') => self.view.page(&self.doc, 1),
            KeyCode::PageUp => self.view.page(&self.doc, -1),
            KeyCode::Char('e') if ctrl => self.view.scroll_lines(&self.doc, 1),
            KeyCode::Char('y') if ctrl => self.view.scroll_lines(&self.doc, -1),
            KeyCode::Char('g') => {
                if last == Some('g') {
                    self.jumps.push(JumpPos {
                        pos: self.view.cursor_pos(&self.doc),
                        block: self.view.cursor,
                    });
                    self.view.goto_block(&self.doc, 0);
                } else {
                    self.last_key = Some('g');
                }
            }
            KeyCode::Char('G') => {
                self.jumps.push(JumpPos {
                    pos: self.view.cursor_pos(&self.doc),
                    block: self.view.cursor,
                });
                self.view
                    .goto_block(&self.doc, self.doc.block_count().saturating_sub(1));
            }

            KeyCode::Char('m') => self.toggle_bookmark(self.view.cursor),
            KeyCode::Char('+') => self.jump_next_bookmark(true),
            KeyCode::Char('-') => self.jump_next_bookmark(false),
            KeyCode::Char('\'') => {
                if last == Some('\'') {
                    self.jump_toggle();
                } else {
                    self.last_key = Some('\'');
                }
            }
            KeyCode::Char('o') if ctrl => self.jump_walk(-1),
            KeyCode::Char('i') if ctrl => self.jump_walk(1),

            KeyCode::Char('i') => self.filter_copy_line(true),
            KeyCode::Delete => self.filter_copy_line(false),
            KeyCode::Char('a') => self.filter_search_matches(true, Direction::All),
            KeyCode::Char('A') => self.filter_search_matches(false, Direction::All),
            KeyCode::Char('u') => self.filter_undo(false),
            KeyCode::Char('r') if ctrl => self.filter_undo(true),
            KeyCode::Char('f') => {
                self.view.filter_open = !self.view.filter_open;
            }
            KeyCode::Tab if self.view.filter_open => {
                self.focus = Focus::Filter;
                if self.view.filter_sel.is_none() && !self.filter.is_empty() {
                    self.view.filter_sel = Some(0);
                }
            }

            KeyCode::Char('D') => self.discard(true),
            KeyCode::Char('U') => self.discard(false),
            KeyCode::Char('R') => self.reload(),
            KeyCode::Char('B') => self.save_bookmarks(),
            KeyCode::Char('w') => self.export_filter_list(true),
            KeyCode::Char('W') => self.export_filter_list(false),
            KeyCode::Char('L') => self.import_filter_list(),

            KeyCode::Esc => {
                self.status.clear("search");
                self.status.clear("keycmd");
            }
            _ => {}
        }
        // scrolling repaints highlights of the visible area while the
        // initial scan is still out
        if self.higl.is_init_active() {
            let (first, last) = self.view.visible_range(&self.doc);
            self.higl.highlight_visible_rules(&self.doc, first, last);
        }
        self.dirty = true;
    }
}
