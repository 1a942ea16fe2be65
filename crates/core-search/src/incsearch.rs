//! State machine behind the interactive search entry.
//!
//! The entry field drives searches while the user is typing. The first
//! keystroke captures a baseline (cursor position plus scroll offsets);
//! every incremental search restarts from that baseline so that deleting
//! characters from the pattern cannot skip over earlier matches. Abandoning
//! the search restores the baseline. Atomic repeats (n / N and friends)
//! bypass the baseline and advance from the current cursor instead.
//!
//! This module holds the pure state and the text helpers; scheduling of the
//! background scan and all widget handling live with the caller.

use regex::Regex;
use std::sync::OnceLock;

use crate::{HistoryIter, SearchHistory, SearchPar};

/// Cursor and scroll snapshot taken when the search entry gains focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Baseline {
    pub pos: usize,
    pub view_top: usize,
    pub view_left: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchState {
    /// No search in progress, no temporary highlights.
    #[default]
    Idle,
    /// Entry focused, baseline captured.
    Entered,
    /// Background scan from the baseline is in flight.
    Running,
    /// Scan landed on a match; cursor moved there.
    DoneMatch,
    /// Scan exhausted the document; cursor restored to the baseline.
    DoneNoMatch,
}

#[derive(Debug, Default)]
pub struct IncSearch {
    state: SearchState,
    baseline: Option<Baseline>,
    /// Direction of the last search command; repeats reuse it.
    pub last_dir_fwd: bool,
    hist_iter: HistoryIter,
}

impl IncSearch {
    pub fn new() -> Self {
        Self {
            last_dir_fwd: true,
            ..Self::default()
        }
    }

    pub fn state(&self) -> SearchState {
        self.state
    }

    pub fn baseline(&self) -> Option<Baseline> {
        self.baseline
    }

    /// Entry field gained focus: reset history browsing, keep any baseline.
    pub fn enter(&mut self) {
        if self.state == SearchState::Idle {
            self.state = SearchState::Entered;
            self.hist_iter.reset();
        }
    }

    /// Capture the baseline on the first incremental search after entering.
    /// Later calls keep the original snapshot.
    pub fn capture_baseline(&mut self, snapshot: Baseline) -> Baseline {
        *self.baseline.get_or_insert(snapshot)
    }

    pub fn mark_running(&mut self) {
        self.state = SearchState::Running;
    }

    pub fn mark_result(&mut self, matched: bool) {
        self.state = if matched {
            SearchState::DoneMatch
        } else {
            SearchState::DoneNoMatch
        };
    }

    /// Leaving the entry (focus loss or commit): browsing and baseline end.
    /// Returns the baseline so the caller can decide whether to restore it.
    pub fn leave(&mut self) -> Option<Baseline> {
        self.state = SearchState::Idle;
        self.hist_iter.reset();
        self.baseline.take()
    }

    /// Browse the history filtered by the current entry text as prefix.
    /// Returns the text to put into the entry field.
    pub fn browse_history(
        &mut self,
        history: &SearchHistory,
        current_text: &str,
        is_up: bool,
    ) -> String {
        history.iter_next(&mut self.hist_iter, current_text, is_up)
    }

    /// Drop the currently browsed entry from the history (Ctrl-X). Returns
    /// the replacement entry text when browsing was active.
    pub fn remove_browsed(&mut self, history: &mut SearchHistory) -> Option<String> {
        if self.hist_iter.is_browsing() {
            Some(history.remove_entry(&mut self.hist_iter))
        } else {
            None
        }
    }

    /// Reset history browsing when the entry text no longer matches the
    /// browsed entry (called after each incremental result).
    pub fn track_history(&mut self, history: &SearchHistory, text: &str) {
        history.track_iter(&mut self.hist_iter, text);
    }
}

fn word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\w\-]+").unwrap())
}

fn run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:\W+|\w+)").unwrap())
}

/// Extract the word under the cursor column: the `[\w-]+` run covering the
/// column, completed to the left and right.
pub fn word_at(line: &str, col: usize) -> Option<String> {
    let col = col.min(line.len());
    word_re()
        .find_iter(line)
        .find(|m| m.start() <= col && col < m.end())
        .map(|m| m.as_str().to_string())
}

/// Escape regex metacharacters when composing a pattern from document text.
pub fn escape_special_chars(word: &str, is_re: bool) -> String {
    if is_re {
        regex::escape(word)
    } else {
        word.to_string()
    }
}

/// Build the search parameters for a word-under-cursor search (`*` / `#`):
/// escaped when in regex mode and wrapped in word boundaries.
pub fn word_search_pattern(word: &str, par: &SearchPar) -> String {
    let escaped = escape_special_chars(word, par.regexp);
    if par.regexp {
        format!(r"\b{escaped}\b")
    } else {
        escaped
    }
}

/// Pattern completion towards the right (Ctrl-D): the word-or-separator run
/// following the text matched by the current pattern at the cursor column.
/// Returns the escaped text to append.
pub fn complete_right(line: &str, col: usize, par: &SearchPar) -> Option<String> {
    let col = col.min(line.len());
    let off = if par.regexp && !par.pat.is_empty() {
        let re = crate::compile(par)?;
        match re.find_at(line, col) {
            Some(m) if m.start() == col => m.len(),
            _ => 0,
        }
    } else {
        par.pat.len()
    };
    let rest = line.get(col + off..)?;
    run_re()
        .find(rest)
        .map(|m| escape_special_chars(m.as_str(), par.regexp))
}

/// Pattern completion towards the left (Ctrl-Shift-D): the run immediately
/// preceding the cursor column. Returns the escaped text to prepend.
pub fn complete_left(line: &str, col: usize, is_re: bool) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(?:\W+|\w+)$").unwrap());
    let head = line.get(..col.min(line.len()))?;
    re.find(head)
        .map(|m| escape_special_chars(m.as_str(), is_re))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_is_captured_once() {
        let mut fsm = IncSearch::new();
        fsm.enter();
        let b1 = Baseline {
            pos: 10,
            view_top: 2,
            view_left: 0,
        };
        assert_eq!(fsm.capture_baseline(b1), b1);
        let b2 = Baseline {
            pos: 99,
            view_top: 9,
            view_left: 9,
        };
        // a later snapshot does not replace the original
        assert_eq!(fsm.capture_baseline(b2), b1);
        assert_eq!(fsm.leave(), Some(b1));
        assert_eq!(fsm.baseline(), None);
    }

    #[test]
    fn state_transitions() {
        let mut fsm = IncSearch::new();
        assert_eq!(fsm.state(), SearchState::Idle);
        fsm.enter();
        assert_eq!(fsm.state(), SearchState::Entered);
        fsm.mark_running();
        fsm.mark_result(true);
        assert_eq!(fsm.state(), SearchState::DoneMatch);
        fsm.mark_result(false);
        assert_eq!(fsm.state(), SearchState::DoneNoMatch);
        fsm.leave();
        assert_eq!(fsm.state(), SearchState::Idle);
    }

    #[test]
    fn word_extraction_covers_cursor() {
        let line = "err: frame-counter=42";
        assert_eq!(word_at(line, 5).as_deref(), Some("frame-counter"));
        assert_eq!(word_at(line, 0).as_deref(), Some("err"));
        assert_eq!(word_at(line, 3), None); // on the colon
    }

    #[test]
    fn word_pattern_escapes_and_bounds() {
        let par = SearchPar::new("", true, false);
        assert_eq!(word_search_pattern("a-b", &par), r"\ba\-b\b");
        let plain = SearchPar::new("", false, false);
        assert_eq!(word_search_pattern("a-b", &plain), "a-b");
    }

    #[test]
    fn completion_right_extends_by_following_run() {
        let par = SearchPar::new("foo", false, true);
        // cursor at the match start; pattern length skips "foo"
        assert_eq!(complete_right("foobar baz", 0, &par).as_deref(), Some("bar"));
        // next run after "bar" is the separator
        let par2 = SearchPar::new("foobar", false, true);
        assert_eq!(complete_right("foobar baz", 0, &par2).as_deref(), Some(" "));
    }

    #[test]
    fn completion_left_prepends_preceding_run() {
        assert_eq!(complete_left("foo bar", 4, false).as_deref(), Some(" "));
        assert_eq!(complete_left("foo bar", 3, false).as_deref(), Some("foo"));
        assert_eq!(complete_left("a.", 2, true).as_deref(), Some(r"\."));
    }
}
