//! Extraction of per-line side-column values via pattern matching.
//!
//! Trace files often interleave a payload with periodic marker lines, e.g. a
//! timestamp or frame counter printed every few hundred lines. The parser
//! answers "which value / frame does block N belong to" by scanning a window
//! of nearby lines with two configured regexes. Results are cached per frame
//! interval so that rendering a column for thousands of visible lines stays
//! cheap.

use std::collections::BTreeMap;

use core_text::Document;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Configuration of the two extraction columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseSpec {
    #[serde(rename = "val_pattern", default)]
    pub val_pat: String,
    #[serde(rename = "val_col_header", default)]
    pub val_header: String,
    #[serde(rename = "val_enable_delta", default)]
    pub val_delta: bool,

    #[serde(rename = "frame_pattern", default)]
    pub frm_pat: String,
    #[serde(rename = "frame_col_header", default)]
    pub frm_header: String,
    /// Search forward for the end of the enclosing frame (range algorithm).
    #[serde(rename = "frame_search_forward", default)]
    pub frm_fwd: bool,
    /// Extract frame text from capture group 1 of the frame pattern.
    #[serde(rename = "frame_capture_val", default)]
    pub frm_capture: bool,
    #[serde(rename = "frame_enable_delta", default)]
    pub frm_delta: bool,

    /// Maximum number of blocks scanned per direction, target included.
    #[serde(rename = "limit_range", default = "default_range")]
    pub range: u32,
}

fn default_range() -> u32 {
    200
}

impl Default for ParseSpec {
    fn default() -> Self {
        Self {
            val_pat: String::new(),
            val_header: String::new(),
            val_delta: false,
            frm_pat: String::new(),
            frm_header: String::new(),
            frm_fwd: false,
            frm_capture: false,
            frm_delta: false,
            range: default_range(),
        }
    }
}

/// Which side columns the current spec produces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseColumns {
    pub val: bool,
    pub val_delta: bool,
    pub frm: bool,
    pub frm_delta: bool,
}

impl ParseSpec {
    pub fn columns(&self) -> ParseColumns {
        let frm = !self.frm_pat.is_empty() && self.frm_capture;
        ParseColumns {
            val: !self.val_pat.is_empty(),
            val_delta: self.val_delta,
            frm,
            frm_delta: frm && self.frm_delta,
        }
    }
}

/// Lines of the last parse, for diagnostics and delta-root selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchInfo {
    pub frm_start: Option<usize>,
    pub val_match: Option<usize>,
    pub frm_end: Option<usize>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    start_line: usize,
    last_line: usize,
    val: String,
    frm: String,
}

/// Parsed result for one block: the value column and the frame column text.
pub type ParsedPair = (String, String);

/// Frame parser; variant selection follows the spec: a frame pattern with
/// forward search uses the range algorithm, everything else the linear one.
pub enum FrameParser {
    Linear(Linear),
    Range(RangeParser),
}

impl FrameParser {
    /// Returns `None` when the value pattern is empty or any configured
    /// pattern fails to compile.
    pub fn create(spec: &ParseSpec) -> Option<FrameParser> {
        if !spec.frm_pat.is_empty() && spec.frm_fwd {
            RangeParser::new(spec).map(FrameParser::Range)
        } else if !spec.val_pat.is_empty() {
            Linear::new(spec).map(FrameParser::Linear)
        } else {
            None
        }
    }

    /// Extract `(value, frame)` for the given block. Results are a pure
    /// function of document content and parse configuration; the cache only
    /// short-cuts repeated queries.
    pub fn parse(&mut self, doc: &Document, line: usize) -> ParsedPair {
        match self {
            FrameParser::Linear(p) => p.parse(doc, line),
            FrameParser::Range(p) => p.parse(doc, line),
        }
    }

    pub fn clear_cache(&mut self) {
        match self {
            FrameParser::Linear(p) => p.cache.clear(),
            FrameParser::Range(p) => p.cache.clear(),
        }
    }

    pub fn match_info(&self) -> MatchInfo {
        match self {
            FrameParser::Linear(p) => p.info,
            FrameParser::Range(p) => p.info,
        }
    }

    fn generation(&mut self) -> &mut u64 {
        match self {
            FrameParser::Linear(p) => &mut p.generation,
            FrameParser::Range(p) => &mut p.generation,
        }
    }

    /// Drop the cache when the document changed underneath.
    pub fn sync_generation(&mut self, doc: &Document) {
        let doc_gen = doc.generation();
        if *self.generation() != doc_gen {
            self.clear_cache();
            *self.generation() = doc_gen;
        }
    }
}

fn captured_1(re: &Regex, text: &str) -> Option<Option<String>> {
    re.captures(text)
        .map(|caps| caps.get(1).map(|g| g.as_str().to_string()))
}

/// Backward-only scan: the nearest preceding value match anchors the result.
pub struct Linear {
    val_re: Regex,
    frm_re: Option<Regex>,
    frm_capture: bool,
    range: u32,
    cache: BTreeMap<usize, CacheEntry>,
    info: MatchInfo,
    generation: u64,
}

impl Linear {
    fn new(spec: &ParseSpec) -> Option<Self> {
        let val_re = Regex::new(&spec.val_pat).ok()?;
        let frm_re = if spec.frm_pat.is_empty() {
            None
        } else {
            Some(Regex::new(&spec.frm_pat).ok()?)
        };
        Some(Self {
            val_re,
            frm_re,
            frm_capture: spec.frm_capture,
            range: spec.range,
            cache: BTreeMap::new(),
            info: MatchInfo::default(),
            generation: 0,
        })
    }

    fn parse(&mut self, doc: &Document, line: usize) -> ParsedPair {
        // nearest cache entry at or before the requested line; a hit covers
        // the line, a miss below leaves a candidate whose interval may be
        // extended when the backward walk reaches it
        let mut candidate: Option<usize> = None;
        if let Some((&key, e)) = self.cache.range(..=line).next_back() {
            if line >= e.start_line && line <= e.last_line {
                return (e.val.clone(), e.frm.clone());
            }
            if e.last_line < line {
                candidate = Some(key);
            }
        }

        let mut val_str = String::new();
        let mut buf = String::new();
        let mut blk = line;
        for _ in 0..self.range {
            if let Some(key) = candidate {
                let e = self.cache.get_mut(&key).expect("candidate vanished");
                if e.last_line == blk {
                    e.last_line = line;
                    return (e.val.clone(), e.frm.clone());
                }
                debug_assert!(e.last_line < blk);
            }
            if !doc.line_into(blk, &mut buf) {
                break;
            }
            if let Some(cap) = captured_1(&self.val_re, &buf) {
                self.info.val_match = Some(blk);
                self.info.frm_start = None;
                if let Some(text) = cap {
                    val_str = text;
                }
                if !self.frm_capture {
                    self.cache.insert(
                        blk,
                        CacheEntry {
                            start_line: blk,
                            last_line: line,
                            val: val_str.clone(),
                            frm: String::new(),
                        },
                    );
                    return (val_str, String::new());
                }
            }
            if let Some(frm_re) = self.frm_re.as_ref()
                && let Some(cap) = captured_1(frm_re, &buf)
            {
                self.info.frm_start = Some(blk);
                let frm = if self.frm_capture {
                    cap.unwrap_or_default()
                } else {
                    String::new()
                };
                self.cache.insert(
                    blk,
                    CacheEntry {
                        start_line: blk,
                        last_line: line,
                        val: val_str.clone(),
                        frm: frm.clone(),
                    },
                );
                return (val_str, frm);
            }
            match blk.checked_sub(1) {
                Some(prev) => blk = prev,
                None => break,
            }
        }
        // nothing found within range; deliberately not cached
        (String::new(), String::new())
    }
}

/// Frame-bounded scan: backward to the enclosing frame start, forward to the
/// next frame boundary; the result covers the whole interval.
pub struct RangeParser {
    val_re: Regex,
    frm_re: Regex,
    frm_capture: bool,
    range: u32,
    cache: BTreeMap<usize, CacheEntry>,
    info: MatchInfo,
    generation: u64,
}

impl RangeParser {
    fn new(spec: &ParseSpec) -> Option<Self> {
        Some(Self {
            val_re: Regex::new(&spec.val_pat).ok()?,
            frm_re: Regex::new(&spec.frm_pat).ok()?,
            frm_capture: spec.frm_capture,
            range: spec.range,
            cache: BTreeMap::new(),
            info: MatchInfo::default(),
            generation: 0,
        })
    }

    fn parse(&mut self, doc: &Document, line: usize) -> ParsedPair {
        if let Some((_, e)) = self.cache.range(..=line).next_back() {
            // interval end is exclusive here, unlike the linear variant
            if line >= e.start_line && (line < e.last_line || line == e.start_line) {
                return (e.val.clone(), e.frm.clone());
            }
        }

        let mut frm_str = String::new();
        let mut val_str = String::new();
        let mut frame_start: Option<usize> = None;
        let mut frame_end: Option<usize> = None;
        let mut val_match: Option<usize> = None;
        let mut buf = String::new();

        // backward for the frame start, collecting a value on the way
        let mut blk = line;
        let mut hit_top = false;
        for _ in 0..self.range {
            if !doc.line_into(blk, &mut buf) {
                break;
            }
            if let Some(cap) = captured_1(&self.frm_re, &buf) {
                if let Some(text) = cap {
                    frm_str = text;
                }
                frame_start = Some(blk);
                break;
            }
            if val_match.is_none()
                && let Some(cap) = captured_1(&self.val_re, &buf)
            {
                if let Some(text) = cap {
                    val_str = text;
                }
                val_match = Some(blk);
            }
            match blk.checked_sub(1) {
                Some(prev) => blk = prev,
                None => {
                    hit_top = true;
                    break;
                }
            }
        }
        if hit_top && frame_start.is_none() {
            frame_start = Some(0);
        }

        // forward for the frame end; keep looking for a value if none yet
        let mut blk = line + 1;
        for _ in 0..self.range {
            if !doc.line_into(blk, &mut buf) {
                break;
            }
            if self.frm_re.is_match(&buf) {
                frame_end = Some(blk);
                break;
            }
            if val_match.is_none()
                && let Some(cap) = captured_1(&self.val_re, &buf)
            {
                if let Some(text) = cap {
                    val_str = text;
                }
                val_match = Some(blk);
            }
            blk += 1;
        }
        let frame_end = frame_end.unwrap_or_else(|| blk.min(doc.block_count()));

        if val_match.is_some() || frame_start.is_some() {
            let start = frame_start.or(val_match).unwrap();
            let frm_out = if self.frm_capture {
                frm_str.clone()
            } else {
                String::new()
            };
            self.cache.insert(
                start,
                CacheEntry {
                    start_line: start,
                    last_line: frame_end,
                    val: val_str.clone(),
                    frm: frm_out.clone(),
                },
            );
            self.info = MatchInfo {
                frm_start: Some(start),
                val_match,
                frm_end: Some(frame_end),
            };
            return (val_str, frm_out);
        }
        (String::new(), String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_with_ts() -> Document {
        // line 10 carries the value; 11..=14 do not match
        let mut lines: Vec<String> = (0..10).map(|i| format!("noise {i}")).collect();
        lines.push("ts=42 foo".into());
        for i in 11..=14 {
            lines.push(format!("noise {i}"));
        }
        Document::from_str(&lines.join("\n"))
    }

    fn linear_spec() -> ParseSpec {
        ParseSpec {
            val_pat: r"ts=(\d+)".into(),
            range: 5,
            ..ParseSpec::default()
        }
    }

    #[test]
    fn linear_scan_finds_value_within_range() {
        let doc = doc_with_ts();
        let mut p = FrameParser::create(&linear_spec()).unwrap();
        let (val, frm) = p.parse(&doc, 14);
        assert_eq!(val, "42");
        assert_eq!(frm, "");
        assert_eq!(p.match_info().val_match, Some(10));
    }

    #[test]
    fn linear_caches_interval_and_serves_enclosed_query() {
        let doc = doc_with_ts();
        let mut p = match FrameParser::create(&linear_spec()).unwrap() {
            FrameParser::Linear(p) => p,
            _ => unreachable!(),
        };
        assert_eq!(p.parse(&doc, 14).0, "42");
        assert_eq!(p.cache.len(), 1);
        let e = p.cache.values().next().unwrap();
        assert_eq!((e.start_line, e.last_line), (10, 14));

        // enclosed query is a cache hit, no new entry
        assert_eq!(p.parse(&doc, 12).0, "42");
        assert_eq!(p.cache.len(), 1);
    }

    #[test]
    fn linear_out_of_range_yields_empty() {
        let doc = doc_with_ts();
        let mut spec = linear_spec();
        spec.range = 3; // line 10 is 5 blocks away from 14
        let mut p = FrameParser::create(&spec).unwrap();
        assert_eq!(p.parse(&doc, 14), (String::new(), String::new()));
    }

    #[test]
    fn linear_extends_cached_interval_downward() {
        let doc = doc_with_ts();
        let mut spec = linear_spec();
        spec.range = 10;
        let mut p = match FrameParser::create(&spec).unwrap() {
            FrameParser::Linear(p) => p,
            _ => unreachable!(),
        };
        assert_eq!(p.parse(&doc, 11).0, "42"); // entry [10, 11]
        assert_eq!(p.parse(&doc, 14).0, "42"); // walk back meets last_line 11
        let e = p.cache.values().next().unwrap();
        assert_eq!((e.start_line, e.last_line), (10, 14));
        assert_eq!(p.cache.len(), 1);
    }

    #[test]
    fn parse_is_pure_in_document_and_spec() {
        let doc = doc_with_ts();
        let mut p = FrameParser::create(&linear_spec()).unwrap();
        let first = p.parse(&doc, 14);
        let second = p.parse(&doc, 14);
        assert_eq!(first, second);

        p.clear_cache();
        assert_eq!(p.parse(&doc, 14), first);
    }

    #[test]
    fn generation_change_clears_cache() {
        let mut doc = doc_with_ts();
        let mut p = FrameParser::create(&linear_spec()).unwrap();
        p.sync_generation(&doc);
        assert_eq!(p.parse(&doc, 14).0, "42");

        doc.truncate(11, None);
        p.sync_generation(&doc);
        // line 3 of the truncated document is old line 14; the value line
        // is gone entirely
        assert_eq!(p.parse(&doc, 3), (String::new(), String::new()));
    }

    fn framed_doc() -> Document {
        // frames start at 0, 6, 12; values inside
        let mut lines = Vec::new();
        for frame in 0..3 {
            lines.push(format!("=== frame {frame} ==="));
            for i in 0..5 {
                if i == 2 {
                    lines.push(format!("tick={}", frame * 100));
                } else {
                    lines.push(format!("payload {i}"));
                }
            }
        }
        Document::from_str(&lines.join("\n"))
    }

    fn range_spec() -> ParseSpec {
        ParseSpec {
            val_pat: r"tick=(\d+)".into(),
            frm_pat: r"=== frame (\d+) ===".into(),
            frm_fwd: true,
            frm_capture: true,
            range: 50,
            ..ParseSpec::default()
        }
    }

    #[test]
    fn range_mode_resolves_enclosing_frame() {
        let doc = framed_doc();
        let mut p = FrameParser::create(&range_spec()).unwrap();
        // line 8 sits in the second frame (starts at 6, ends before 12)
        let (val, frm) = p.parse(&doc, 8);
        assert_eq!(val, "100");
        assert_eq!(frm, "1");
        let info = p.match_info();
        assert_eq!(info.frm_start, Some(6));
        assert_eq!(info.frm_end, Some(12));
    }

    #[test]
    fn range_mode_caches_whole_interval() {
        let doc = framed_doc();
        let mut p = match FrameParser::create(&range_spec()).unwrap() {
            FrameParser::Range(p) => p,
            _ => unreachable!(),
        };
        p.parse(&doc, 8);
        assert_eq!(p.cache.len(), 1);
        // every line of the frame hits the same entry
        for line in 6..12 {
            assert_eq!(p.parse(&doc, line).0, "100");
        }
        assert_eq!(p.cache.len(), 1);
        // the first line of the next frame misses and creates a new entry
        assert_eq!(p.parse(&doc, 12).0, "200");
        assert_eq!(p.cache.len(), 2);
    }

    #[test]
    fn range_mode_frame_end_clamped_at_document_end() {
        let doc = framed_doc();
        let mut p = FrameParser::create(&range_spec()).unwrap();
        let (val, frm) = p.parse(&doc, 16);
        assert_eq!(val, "200");
        assert_eq!(frm, "2");
        assert_eq!(p.match_info().frm_end, Some(doc.block_count()));
    }

    #[test]
    fn create_rejects_empty_or_invalid_patterns() {
        assert!(FrameParser::create(&ParseSpec::default()).is_none());
        let bad = ParseSpec {
            val_pat: "(oops".into(),
            ..ParseSpec::default()
        };
        assert!(FrameParser::create(&bad).is_none());
    }

    #[test]
    fn columns_follow_spec_flags() {
        let spec = range_spec();
        let cols = spec.columns();
        assert!(cols.val && cols.frm);
        assert!(!cols.val_delta && !cols.frm_delta);

        let linear = linear_spec();
        assert!(!linear.columns().frm);
    }

    #[test]
    fn spec_serde_uses_config_keys() {
        let spec = range_spec();
        let js = serde_json::to_value(&spec).unwrap();
        assert!(js.get("val_pattern").is_some());
        assert!(js.get("frame_search_forward").is_some());
        assert_eq!(js["limit_range"], 50);
    }
}
