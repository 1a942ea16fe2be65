//! Pattern highlighting over the whole document.
//!
//! A list of user-configured rules is applied to every line; matching lines
//! carry the rule id in a per-line tag multimap. Scanning the full document
//! can take seconds on big traces, so the initial scan runs in background
//! slices of roughly 100 ms and the visible area is painted synchronously on
//! scroll while the background scan is still out. Rendering composes the
//! formats of all ids tagged on a line in rule-list order, with the ephemeral
//! search highlight merged last, so the visual result is deterministic no
//! matter in which order scans completed.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use core_search::SearchPar;
use core_text::Document;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

mod fmt;

pub use fmt::{Color, FormatSpec};

pub type HiglId = u32;

/// Ephemeral "highlight all search matches" rule.
pub const HALL_ID: HiglId = 0;
/// Exact match region of the running incremental search.
pub const INC_ID: HiglId = 1;
/// Bookmarked lines.
pub const BOOKMARK_ID: HiglId = 2;
const FIRST_USER_ID: HiglId = 3;

/// Wall-clock budget of one background scan slice.
pub const SCAN_SLICE: Duration = Duration::from_millis(100);
/// Pause inserted after [`SCAN_LOOPS_PER_BREATHER`] consecutive slices so
/// interactive idle work gets a chance to run.
pub const SCAN_BREATHER: Duration = Duration::from_millis(10);
const SCAN_LOOPS_PER_BREATHER: u32 = 10;

#[derive(Debug, Clone)]
pub struct HighlightRule {
    pub id: HiglId,
    pub search: SearchPar,
    pub fmt: FormatSpec,
    compiled: Option<Regex>,
}

impl HighlightRule {
    fn new(id: HiglId, search: SearchPar, fmt: FormatSpec) -> Self {
        let compiled = core_search::compile(&search);
        Self {
            id,
            search,
            fmt,
            compiled,
        }
    }
}

/// Persisted form of one rule in the `highlight` config section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCfg {
    pub search_pattern: String,
    #[serde(default)]
    pub search_reg_exp: bool,
    #[serde(default)]
    pub search_match_case: bool,
    #[serde(flatten)]
    pub fmt: FormatSpec,
}

// ---------------------------------------------------------------------------

/// Multimap block number -> rule ids tagged on that block. Every (block, id)
/// pair is unique.
#[derive(Debug, Default)]
pub struct TagMap {
    map: BTreeMap<usize, Vec<HiglId>>,
}

impl TagMap {
    pub fn add(&mut self, block: usize, id: HiglId) -> bool {
        let ids = self.map.entry(block).or_default();
        if ids.contains(&id) {
            false
        } else {
            ids.push(id);
            true
        }
    }

    pub fn remove(&mut self, block: usize, id: HiglId) -> bool {
        let Some(ids) = self.map.get_mut(&block) else {
            return false;
        };
        let Some(idx) = ids.iter().position(|&i| i == id) else {
            return false;
        };
        ids.remove(idx);
        if ids.is_empty() {
            self.map.remove(&block);
        }
        true
    }

    pub fn contains(&self, block: usize, id: HiglId) -> bool {
        self.map.get(&block).is_some_and(|ids| ids.contains(&id))
    }

    pub fn ids_at(&self, block: usize) -> &[HiglId] {
        self.map.get(&block).map_or(&[], |v| v.as_slice())
    }

    /// Drop every tag carrying `id`; returns the touched blocks so the
    /// caller can repaint them.
    pub fn remove_id(&mut self, id: HiglId) -> Vec<usize> {
        let mut touched = Vec::new();
        self.map.retain(|&block, ids| {
            if let Some(idx) = ids.iter().position(|&i| i == id) {
                ids.remove(idx);
                touched.push(block);
            }
            !ids.is_empty()
        });
        touched
    }

    pub fn blocks_with(&self, id: HiglId) -> Vec<usize> {
        self.map
            .iter()
            .filter(|(_, ids)| ids.contains(&id))
            .map(|(&b, _)| b)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Remap block numbers after truncation keeping `[top, bottom)`;
    /// `bottom == 0` means unbounded.
    pub fn adjust_line_nums(&mut self, top: usize, bottom: usize) {
        let old = std::mem::take(&mut self.map);
        for (block, ids) in old {
            if block >= top && (block < bottom || bottom == 0) {
                self.map.insert(block - top, ids);
            }
        }
    }
}

// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct IncMark {
    pub block: usize,
    pub col: usize,
    pub len: usize,
}

/// Outcome of one background scan slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStep {
    /// Re-arm the task after `delay`; `progress` is a 0..=100 percentage.
    Continue { delay: Duration, progress: u8 },
    Done,
}

#[derive(Debug, Clone, Copy)]
struct ScanPos {
    rule_idx: usize,
    block: usize,
    loop_cnt: u32,
}

pub struct Highlighter {
    rules: Vec<HighlightRule>,
    hall: HighlightRule,
    hall_complete: bool,
    inc_mark: Option<IncMark>,
    bookmark_fmt: FormatSpec,
    tags: TagMap,
    last_id: HiglId,
    init_scan: Option<ScanPos>,
    hall_scan: Option<ScanPos>,
}

impl Default for Highlighter {
    fn default() -> Self {
        Self::new()
    }
}

impl Highlighter {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            hall: HighlightRule::new(HALL_ID, SearchPar::default(), FormatSpec::with_bg(0xfaee0a)),
            hall_complete: false,
            inc_mark: None,
            bookmark_fmt: FormatSpec {
                bg_col: Some(0xe7e7ff),
                bold: true,
                ..FormatSpec::default()
            },
            tags: TagMap::default(),
            last_id: FIRST_USER_ID - 1,
            init_scan: None,
            hall_scan: None,
        }
    }

    pub fn rules(&self) -> &[HighlightRule] {
        &self.rules
    }

    pub fn tags(&self) -> &TagMap {
        &self.tags
    }

    pub fn inc_mark(&self) -> Option<IncMark> {
        self.inc_mark
    }

    pub fn inc_fmt(&self) -> FormatSpec {
        FormatSpec::with_bg(0xc8ff00)
    }

    /// Append a rule; `id` is assigned when not given (rule edits keep their
    /// id for the lifetime of the session).
    pub fn add_pattern(&mut self, search: SearchPar, fmt: FormatSpec, id: Option<HiglId>) -> HiglId {
        let id = id.unwrap_or_else(|| {
            self.last_id += 1;
            self.last_id
        });
        self.last_id = self.last_id.max(id);
        self.rules.push(HighlightRule::new(id, search, fmt));
        id
    }

    /// Replace the rule list. All tags of the old rules are dropped; the
    /// caller restarts the initial scan afterwards.
    pub fn set_rules(&mut self, list: Vec<(Option<HiglId>, SearchPar, FormatSpec)>) {
        let old: Vec<HiglId> = self.rules.iter().map(|r| r.id).collect();
        for id in old {
            self.tags.remove_id(id);
        }
        self.rules.clear();
        self.init_scan = None;
        for (id, search, fmt) in list {
            self.add_pattern(search, fmt, id);
        }
    }

    /// Drop one rule and all its tags; returns the blocks needing repaint.
    pub fn remove_rule(&mut self, id: HiglId) -> Vec<usize> {
        self.rules.retain(|r| r.id != id);
        self.tags.remove_id(id)
    }

    pub fn load_rules(&mut self, cfg: &[RuleCfg]) {
        for rule in cfg {
            let search = SearchPar::new(
                rule.search_pattern.clone(),
                rule.search_reg_exp,
                rule.search_match_case,
            );
            self.add_pattern(search, rule.fmt.clone(), None);
        }
    }

    pub fn rules_cfg(&self) -> Vec<RuleCfg> {
        self.rules
            .iter()
            .map(|r| RuleCfg {
                search_pattern: r.search.pat.clone(),
                search_reg_exp: r.search.regexp,
                search_match_case: r.search.match_case,
                fmt: r.fmt.clone(),
            })
            .collect()
    }

    // -- initial scan -------------------------------------------------------

    /// Begin the background scan applying all rules from block 0.
    pub fn start_init_scan(&mut self) {
        if self.rules.is_empty() {
            self.init_scan = None;
            return;
        }
        self.init_scan = Some(ScanPos {
            rule_idx: 0,
            block: 0,
            loop_cnt: 0,
        });
        debug!(target: "highlight", rules = self.rules.len(), "init_scan_started");
    }

    pub fn is_init_active(&self) -> bool {
        self.init_scan.is_some()
    }

    pub fn abort_init_scan(&mut self) {
        self.init_scan = None;
    }

    /// Run one slice of the initial scan.
    pub fn init_step(&mut self, doc: &Document) -> ScanStep {
        self.init_step_with_budget(doc, SCAN_SLICE)
    }

    pub fn init_step_with_budget(&mut self, doc: &Document, budget: Duration) -> ScanStep {
        let Some(mut scan) = self.init_scan else {
            return ScanStep::Done;
        };
        let total = self.rules.len();
        if scan.rule_idx >= total {
            self.init_scan = None;
            return ScanStep::Done;
        }
        if scan.loop_cnt >= SCAN_LOOPS_PER_BREATHER {
            scan.loop_cnt = 0;
            self.init_scan = Some(scan);
            return ScanStep::Continue {
                delay: SCAN_BREATHER,
                progress: (100 * scan.rule_idx / total) as u8,
            };
        }
        scan.loop_cnt += 1;

        let rule = &self.rules[scan.rule_idx];
        match scan_lines(doc, rule, &mut self.tags, scan.block, budget) {
            Some(resume) => {
                scan.block = resume;
            }
            None => {
                scan.rule_idx += 1;
                scan.block = 0;
                if scan.rule_idx >= total {
                    self.init_scan = None;
                    debug!(target: "highlight", "init_scan_done");
                    return ScanStep::Done;
                }
            }
        }
        let progress = (100 * scan.rule_idx / total) as u8;
        self.init_scan = Some(scan);
        ScanStep::Continue {
            delay: Duration::ZERO,
            progress,
        }
    }

    /// Synchronously tag the currently visible blocks with every rule, so
    /// scrolling shows highlights before the background scan catches up.
    pub fn highlight_visible_rules(&mut self, doc: &Document, first: usize, last: usize) {
        let last = last.min(doc.block_count().saturating_sub(1));
        for rule_idx in 0..self.rules.len() {
            let rule = &self.rules[rule_idx];
            scan_range(doc, rule, &mut self.tags, first, last);
        }
    }

    // -- search highlight (rule id 0) ---------------------------------------

    /// Adopt a new hall pattern. Returns true when a background scan must be
    /// (re)started because the pattern changed or the old scan never
    /// finished.
    pub fn hall_set(&mut self, par: &SearchPar) -> bool {
        if self.hall.search == *par && self.hall_complete {
            return false;
        }
        self.hall.search = par.clone();
        self.hall.compiled = core_search::compile(par);
        self.hall_complete = false;
        self.hall_scan = Some(ScanPos {
            rule_idx: 0,
            block: 0,
            loop_cnt: 0,
        });
        trace!(target: "highlight.hall", pat = %par.pat, "hall_restarted");
        true
    }

    pub fn is_hall_active(&self) -> bool {
        self.hall_scan.is_some()
    }

    pub fn hall_step(&mut self, doc: &Document) -> ScanStep {
        self.hall_step_with_budget(doc, SCAN_SLICE)
    }

    pub fn hall_step_with_budget(&mut self, doc: &Document, budget: Duration) -> ScanStep {
        let Some(mut scan) = self.hall_scan else {
            return ScanStep::Done;
        };
        if scan.loop_cnt >= SCAN_LOOPS_PER_BREATHER {
            scan.loop_cnt = 0;
            self.hall_scan = Some(scan);
            return ScanStep::Continue {
                delay: SCAN_BREATHER,
                progress: 0,
            };
        }
        scan.loop_cnt += 1;
        match scan_lines(doc, &self.hall, &mut self.tags, scan.block, budget) {
            Some(resume) => {
                scan.block = resume;
                self.hall_scan = Some(scan);
                ScanStep::Continue {
                    delay: Duration::ZERO,
                    progress: 0,
                }
            }
            None => {
                self.hall_scan = None;
                self.hall_complete = true;
                ScanStep::Done
            }
        }
    }

    pub fn highlight_visible_hall(&mut self, doc: &Document, first: usize, last: usize) {
        let last = last.min(doc.block_count().saturating_sub(1));
        scan_range(doc, &self.hall, &mut self.tags, first, last);
    }

    /// Clear the search highlight without touching the search entry: stops
    /// the hall scan, removes all hall tags and the incremental mark.
    /// Returns the blocks needing repaint.
    pub fn hall_clear(&mut self) -> Vec<usize> {
        self.hall_scan = None;
        self.hall_complete = false;
        self.hall.search.reset();
        self.hall.compiled = None;
        self.inc_mark = None;
        self.tags.remove_id(HALL_ID)
    }

    /// Tag the line containing a search match and mark the exact match
    /// region (only one line carries the incremental mark at a time).
    pub fn apply_match_highlight(&mut self, block: usize, col: usize, len: usize) {
        self.tags.add(block, HALL_ID);
        self.inc_mark = Some(IncMark { block, col, len });
    }

    /// Remove the incremental mark; returns the block to repaint.
    pub fn remove_inc(&mut self) -> Option<usize> {
        self.inc_mark.take().map(|m| m.block)
    }

    // -- bookmarks (rule id 2) ----------------------------------------------

    pub fn bookmark_highlight(&mut self, block: usize, set: bool) {
        if set {
            self.tags.add(block, BOOKMARK_ID);
        } else {
            self.tags.remove(block, BOOKMARK_ID);
        }
    }

    // -- composition --------------------------------------------------------

    /// Compose the effective format of a block: user rules in list order,
    /// then the bookmark markup, then the search highlight last.
    pub fn compose(&self, block: usize) -> FormatSpec {
        let ids = self.tags.ids_at(block);
        let mut out = FormatSpec::default();
        if ids.is_empty() {
            return out;
        }
        for rule in &self.rules {
            if ids.contains(&rule.id) {
                out.merge(&rule.fmt);
            }
        }
        if ids.contains(&BOOKMARK_ID) {
            out.merge(&self.bookmark_fmt);
        }
        if ids.contains(&HALL_ID) {
            out.merge(&self.hall.fmt);
        }
        out
    }

    // -- document lifecycle -------------------------------------------------

    /// Remap all tags after truncation; running scans are forgotten.
    pub fn adjust_line_nums(&mut self, top: usize, bottom: usize) {
        self.init_scan = None;
        self.hall_scan = None;
        self.hall_complete = false;
        self.tags.adjust_line_nums(top, bottom);
        self.inc_mark = match self.inc_mark {
            Some(m) if m.block >= top && (m.block < bottom || bottom == 0) => Some(IncMark {
                block: m.block - top,
                ..m
            }),
            _ => None,
        };
    }

    pub fn clear(&mut self) {
        self.init_scan = None;
        self.hall_scan = None;
        self.hall_complete = false;
        self.inc_mark = None;
        self.tags.clear();
    }
}

/// Tag every block matching the rule, starting at `from`, for at most
/// `budget` wall time. Returns the resume block, or `None` when the end of
/// the document was reached. Elapsed time is checked after every block.
fn scan_lines(
    doc: &Document,
    rule: &HighlightRule,
    tags: &mut TagMap,
    from: usize,
    budget: Duration,
) -> Option<usize> {
    let Some(re) = rule.compiled.as_ref() else {
        return None;
    };
    let start = Instant::now();
    let count = doc.block_count();
    let mut buf = String::new();
    let mut block = from;
    while block < count {
        doc.line_into(block, &mut buf);
        if re.is_match(&buf) {
            tags.add(block, rule.id);
        }
        block += 1;
        if start.elapsed() >= budget {
            return (block < count).then_some(block);
        }
    }
    None
}

fn scan_range(doc: &Document, rule: &HighlightRule, tags: &mut TagMap, first: usize, last: usize) {
    let Some(re) = rule.compiled.as_ref() else {
        return;
    };
    let mut buf = String::new();
    for block in first..=last.min(doc.block_count().saturating_sub(1)) {
        doc.line_into(block, &mut buf);
        if re.is_match(&buf) {
            tags.add(block, rule.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_init_to_completion(h: &mut Highlighter, doc: &Document) {
        h.start_init_scan();
        for _ in 0..1000 {
            match h.init_step(doc) {
                ScanStep::Done => return,
                ScanStep::Continue { .. } => {}
            }
        }
        panic!("init scan did not terminate");
    }

    #[test]
    fn initial_scan_tags_matching_lines() {
        // three lines; rule matches lines 0 and 2 only
        let doc = Document::from_str("alpha\nbeta\nalphabet");
        let mut h = Highlighter::new();
        let id = h.add_pattern(
            SearchPar::new("alp", false, true),
            FormatSpec::with_bg(0x112233),
            None,
        );
        run_init_to_completion(&mut h, &doc);

        assert!(h.tags().contains(0, id));
        assert!(!h.tags().contains(1, id));
        assert!(h.tags().contains(2, id));
        assert_eq!(h.tags().blocks_with(id), vec![0, 2]);
    }

    #[test]
    fn scan_yields_and_resumes_on_tiny_budget() {
        let doc = Document::from_str("m\nm\nm\nm\nm");
        let mut h = Highlighter::new();
        let id = h.add_pattern(SearchPar::new("m", false, true), FormatSpec::default(), None);
        h.start_init_scan();

        let mut steps = 0;
        loop {
            match h.init_step_with_budget(&doc, Duration::ZERO) {
                ScanStep::Done => break,
                ScanStep::Continue { .. } => steps += 1,
            }
            assert!(steps < 100, "scan must terminate");
        }
        assert!(steps > 1, "zero budget must force multiple slices");
        assert_eq!(h.tags().blocks_with(id).len(), 5);
    }

    #[test]
    fn breather_inserted_after_consecutive_slices() {
        let doc = Document::from_str(&"x\n".repeat(50));
        let mut h = Highlighter::new();
        h.add_pattern(SearchPar::new("x", false, true), FormatSpec::default(), None);
        h.start_init_scan();

        let mut saw_breather = false;
        for _ in 0..200 {
            match h.init_step_with_budget(&doc, Duration::ZERO) {
                ScanStep::Done => break,
                ScanStep::Continue { delay, .. } => {
                    if delay == SCAN_BREATHER {
                        saw_breather = true;
                    }
                }
            }
        }
        assert!(saw_breather);
    }

    #[test]
    fn compose_merges_in_rule_list_order() {
        let doc = Document::from_str("both match here");
        let mut h = Highlighter::new();
        let a = h.add_pattern(
            SearchPar::new("both", false, true),
            FormatSpec {
                bg_col: Some(0x111111),
                fg_col: Some(0xaaaaaa),
                ..FormatSpec::default()
            },
            None,
        );
        let b = h.add_pattern(
            SearchPar::new("match", false, true),
            FormatSpec::with_bg(0x222222),
            None,
        );
        run_init_to_completion(&mut h, &doc);
        assert!(h.tags().contains(0, a));
        assert!(h.tags().contains(0, b));

        let fmt = h.compose(0);
        // the later rule overrides the background but not the foreground
        assert_eq!(fmt.bg_col, Some(0x222222));
        assert_eq!(fmt.fg_col, Some(0xaaaaaa));
    }

    #[test]
    fn hall_fmt_merges_last() {
        let doc = Document::from_str("line");
        let mut h = Highlighter::new();
        h.add_pattern(
            SearchPar::new("line", false, true),
            FormatSpec::with_bg(0x333333),
            None,
        );
        run_init_to_completion(&mut h, &doc);

        h.hall_set(&SearchPar::new("line", false, true));
        while h.hall_step(&doc) != ScanStep::Done {}
        let fmt = h.compose(0);
        assert_eq!(fmt.bg_col, Some(0xfaee0a));
    }

    #[test]
    fn remove_rule_keeps_tagmap_consistent() {
        let doc = Document::from_str("aa\nbb\naa");
        let mut h = Highlighter::new();
        let a = h.add_pattern(SearchPar::new("aa", false, true), FormatSpec::default(), None);
        let b = h.add_pattern(SearchPar::new("bb", false, true), FormatSpec::default(), None);
        run_init_to_completion(&mut h, &doc);

        let touched = h.remove_rule(a);
        assert_eq!(touched, vec![0, 2]);
        assert!(!h.tags().contains(0, a));
        assert!(h.tags().contains(1, b));
        assert!(h.rules().iter().all(|r| r.id != a));
    }

    #[test]
    fn hall_restart_required_only_on_change_or_incomplete() {
        let doc = Document::from_str("x");
        let mut h = Highlighter::new();
        let par = SearchPar::new("x", false, true);
        assert!(h.hall_set(&par));
        while h.hall_step(&doc) != ScanStep::Done {}
        // same pattern, scan complete: no restart needed
        assert!(!h.hall_set(&par));
        assert!(h.hall_set(&SearchPar::new("y", false, true)));
    }

    #[test]
    fn hall_clear_removes_tags_and_inc_mark() {
        let doc = Document::from_str("x\nx");
        let mut h = Highlighter::new();
        h.hall_set(&SearchPar::new("x", false, true));
        while h.hall_step(&doc) != ScanStep::Done {}
        h.apply_match_highlight(1, 0, 1);
        assert!(h.inc_mark().is_some());

        let repaint = h.hall_clear();
        assert_eq!(repaint, vec![0, 1]);
        assert!(h.inc_mark().is_none());
        assert!(h.tags().is_empty());
    }

    #[test]
    fn visible_scan_paints_range_without_background_progress() {
        let doc = Document::from_str("v\nv\nv\nv");
        let mut h = Highlighter::new();
        let id = h.add_pattern(SearchPar::new("v", false, true), FormatSpec::default(), None);
        h.start_init_scan();
        h.highlight_visible_rules(&doc, 2, 3);
        assert!(h.tags().contains(2, id));
        assert!(h.tags().contains(3, id));
        assert!(!h.tags().contains(0, id));
        assert!(h.is_init_active());
    }

    #[test]
    fn adjust_line_nums_shifts_tags_and_aborts_scans() {
        let doc = Document::from_str("k\nk\nk\nk");
        let mut h = Highlighter::new();
        let id = h.add_pattern(SearchPar::new("k", false, true), FormatSpec::default(), None);
        run_init_to_completion(&mut h, &doc);
        h.start_init_scan();

        h.adjust_line_nums(2, 0);
        assert!(!h.is_init_active());
        assert_eq!(h.tags().blocks_with(id), vec![0, 1]);
    }

    #[test]
    fn rule_cfg_round_trip() {
        let mut h = Highlighter::new();
        h.add_pattern(
            SearchPar::new("warn", true, false),
            FormatSpec {
                bg_col: Some(0xffcc00),
                underline: true,
                ..FormatSpec::default()
            },
            None,
        );
        let cfg = h.rules_cfg();
        let js = serde_json::to_string(&cfg).unwrap();
        let back: Vec<RuleCfg> = serde_json::from_str(&js).unwrap();

        let mut h2 = Highlighter::new();
        h2.load_rules(&back);
        assert_eq!(h2.rules().len(), 1);
        assert_eq!(h2.rules()[0].search.pat, "warn");
        assert!(h2.rules()[0].fmt.underline);
    }
}
