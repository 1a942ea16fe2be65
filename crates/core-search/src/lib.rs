//! Search primitives: parameter set, resumable block finder, history stack
//! and the incremental-search state machine.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

pub mod finder;
pub mod history;
pub mod incsearch;

pub use finder::{FindStep, FinderMatch, TextFinder, find_in_doc};
pub use history::{HistoryIter, SearchHistory, TLB_HIST_MAXLEN};
pub use incsearch::{Baseline, IncSearch, SearchState};

/// Parameters of a text search: the pattern plus the two option flags. Used
/// as the active search key, as history entry and all over the scan engines.
///
/// Persisted as the 3-element array `[pattern, regexp, match_case]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, bool, bool)", into = "(String, bool, bool)")]
pub struct SearchPar {
    pub pat: String,
    pub regexp: bool,
    pub match_case: bool,
}

impl SearchPar {
    pub fn new(pat: impl Into<String>, regexp: bool, match_case: bool) -> Self {
        Self {
            pat: pat.into(),
            regexp,
            match_case,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pat.is_empty()
    }

    pub fn reset(&mut self) {
        self.pat.clear();
        self.regexp = false;
        self.match_case = false;
    }
}

impl From<(String, bool, bool)> for SearchPar {
    fn from((pat, regexp, match_case): (String, bool, bool)) -> Self {
        Self {
            pat,
            regexp,
            match_case,
        }
    }
}

impl From<SearchPar> for (String, bool, bool) {
    fn from(par: SearchPar) -> Self {
        (par.pat, par.regexp, par.match_case)
    }
}

/// Compile the parameter set into a matcher. Sub-string searches are escaped
/// so both modes share the same matcher type. Returns `None` for an empty
/// pattern or a regex that fails to compile; callers that need the error text
/// use [`check_pattern`].
pub fn compile(par: &SearchPar) -> Option<Regex> {
    if par.pat.is_empty() {
        return None;
    }
    let pattern = if par.regexp {
        par.pat.clone()
    } else {
        regex::escape(&par.pat)
    };
    RegexBuilder::new(&pattern)
        .case_insensitive(!par.match_case)
        .build()
        .ok()
}

/// Validate the pattern syntax; `Err` carries the engine's error message for
/// the status line.
pub fn check_pattern(par: &SearchPar) -> Result<(), String> {
    if !par.regexp || par.pat.is_empty() {
        return Ok(());
    }
    match Regex::new(&par.pat) {
        Ok(_) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}
