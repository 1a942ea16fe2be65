//! Bookmarks: a sparse map from block number to a short label.
//!
//! Toggled from the main window or the filter list, navigated with
//! next/previous commands, and persisted in a simple one-entry-per-line
//! text format next to the trace file.

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::SystemTime;

use core_text::Document;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum BookmarkIoError {
    #[error("error accessing bookmark file: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Default)]
pub struct Bookmarks {
    marks: BTreeMap<usize, String>,
    modified: bool,
    loaded_file: Option<PathBuf>,
}

impl Bookmarks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.marks.len()
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn contains(&self, block: usize) -> bool {
        self.marks.contains_key(&block)
    }

    pub fn text(&self, block: usize) -> Option<&str> {
        self.marks.get(&block).map(String::as_str)
    }

    pub fn set_text(&mut self, block: usize, text: impl Into<String>) {
        if let Some(entry) = self.marks.get_mut(&block) {
            *entry = text.into();
            self.modified = true;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.marks.iter().map(|(&b, t)| (b, t.as_str()))
    }

    pub fn line_list(&self) -> Vec<usize> {
        self.marks.keys().copied().collect()
    }

    /// Add or remove the bookmark on the given block; the label defaults to
    /// the line's text. Returns true when the bookmark was added.
    pub fn toggle(&mut self, doc: &Document, block: usize) -> bool {
        self.modified = true;
        if self.marks.remove(&block).is_some() {
            false
        } else {
            let mut text = doc.line(block).unwrap_or_default();
            if text.is_empty() {
                text = format!("Bookmark in empty line {block}");
            }
            self.marks.insert(block, text);
            true
        }
    }

    pub fn remove_lines(&mut self, blocks: &[usize]) {
        for block in blocks {
            if self.marks.remove(block).is_some() {
                self.modified = true;
            }
        }
    }

    pub fn remove_all(&mut self) {
        self.marks.clear();
        self.modified = false;
        self.loaded_file = None;
    }

    /// Nearest bookmarked block after (or before) `block`; never returns
    /// `block` itself.
    pub fn next_line(&self, block: usize, is_fwd: bool) -> Option<usize> {
        if is_fwd {
            self.marks.range(block + 1..).next().map(|(&b, _)| b)
        } else {
            self.marks.range(..block).next_back().map(|(&b, _)| b)
        }
    }

    /// Remap after truncation keeping `[top, bottom)`; `bottom == 0` means
    /// unbounded.
    pub fn adjust_line_nums(&mut self, top: usize, bottom: usize) {
        let old = std::mem::take(&mut self.marks);
        for (block, text) in old {
            if block >= top && (block < bottom || bottom == 0) {
                self.marks.insert(block - top, text);
            }
        }
    }

    // -- file I/O -----------------------------------------------------------

    /// Read a bookmark file and merge its entries (existing bookmarks are
    /// kept). The caller inspects the outcome's tallies before applying.
    pub fn parse_file(path: &Path, max_line: usize) -> Result<ParseOutcome, BookmarkIoError> {
        let fh = fs::File::open(path)?;
        parse_reader(BufReader::new(fh), max_line)
    }

    /// Apply parsed entries; labels default to the line text.
    pub fn apply_parsed(&mut self, doc: &Document, entries: Vec<(usize, String)>) {
        if !self.marks.is_empty() {
            self.modified = true;
        }
        for (block, mut text) in entries {
            if text.is_empty() {
                text = doc.line(block).unwrap_or_default();
                if text.is_empty() {
                    text = format!("Bookmark in empty line {block}");
                }
            }
            self.marks.insert(block, text);
        }
    }

    /// Write all bookmarks as `<1-based-line> <label>` lines.
    pub fn save_file(&mut self, path: &Path) -> Result<(), BookmarkIoError> {
        let mut fh = fs::File::create(path)?;
        for (block, text) in &self.marks {
            writeln!(fh, "{} {}", block + 1, text)?;
        }
        fh.flush()?;
        self.modified = false;
        self.loaded_file = Some(path.to_path_buf());
        debug!(target: "bookmarks", count = self.marks.len(), path = %path.display(), "bookmarks_saved");
        Ok(())
    }

    pub fn loaded_file(&self) -> Option<&Path> {
        self.loaded_file.as_deref()
    }

    pub fn set_loaded_file(&mut self, path: PathBuf) {
        self.loaded_file = Some(path);
    }
}

/// Result of parsing a bookmark file: accepted `(0-based block, label)`
/// entries plus tallies of out-of-range numbers and syntax errors.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub entries: Vec<(usize, String)>,
    pub skipped: usize,
    pub synerr: usize,
}

fn parse_reader<R: BufRead>(input: R, max_line: usize) -> Result<ParseOutcome, BookmarkIoError> {
    static ENTRY_RE: OnceLock<Regex> = OnceLock::new();
    static SKIP_RE: OnceLock<Regex> = OnceLock::new();
    let entry_re = ENTRY_RE.get_or_init(|| Regex::new(r"^(\d+)(?:[ \t:.,;='/](.*))?$").unwrap());
    let skip_re = SKIP_RE.get_or_init(|| Regex::new(r"^\s*(?:#.*)?$").unwrap());

    let mut out = ParseOutcome::default();
    for line_str in input.lines() {
        let line_str = line_str?;
        if let Some(caps) = entry_re.captures(&line_str) {
            let label = caps
                .get(2)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            match caps[1].parse::<usize>() {
                Ok(n) if n >= 1 && n <= max_line => out.entries.push((n - 1, label)),
                Ok(_) => out.skipped += 1,
                Err(_) => out.synerr += 1,
            }
        } else if !skip_re.is_match(&line_str) {
            out.synerr += 1;
        }
    }
    Ok(out)
}

/// Default bookmark file for a trace: `<name>.bok`, or the trace name with
/// its extension replaced by `.bok`. Only an existing file is returned;
/// `is_older` reports whether it is older than the trace (callers warn and
/// skip the automatic load then).
pub fn default_file_name(trace: &Path) -> Option<(PathBuf, bool)> {
    if !trace.is_file() {
        return None;
    }
    let appended = PathBuf::from(format!("{}.bok", trace.display()));
    let candidate = if appended.is_file() {
        appended
    } else {
        let replaced = trace.with_extension("bok");
        if replaced != trace && replaced.is_file() {
            replaced
        } else {
            return None;
        }
    };
    let is_older = match (mtime(trace), mtime(&candidate)) {
        (Some(trace_m), Some(bok_m)) => bok_m < trace_m,
        _ => false,
    };
    Some((candidate, is_older))
}

fn mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn toggle_uses_line_text_as_label() {
        let doc = Document::from_str("first\n\nthird");
        let mut b = Bookmarks::new();
        assert!(b.toggle(&doc, 0));
        assert_eq!(b.text(0), Some("first"));
        assert!(b.toggle(&doc, 1));
        assert_eq!(b.text(1), Some("Bookmark in empty line 1"));
        assert!(!b.toggle(&doc, 0));
        assert!(!b.contains(0));
    }

    #[test]
    fn next_line_skips_current_block() {
        let doc = Document::from_str("a\nb\nc\nd");
        let mut b = Bookmarks::new();
        b.toggle(&doc, 1);
        b.toggle(&doc, 3);
        assert_eq!(b.next_line(1, true), Some(3));
        assert_eq!(b.next_line(0, true), Some(1));
        assert_eq!(b.next_line(3, false), Some(1));
        assert_eq!(b.next_line(1, false), None);
    }

    #[test]
    fn file_round_trip() {
        let doc = Document::from_str("one\ntwo\nthree\nfour");
        let mut b = Bookmarks::new();
        b.toggle(&doc, 0);
        b.toggle(&doc, 2);
        b.set_text(2, "my label");

        let tmp = tempfile::NamedTempFile::new().unwrap();
        b.save_file(tmp.path()).unwrap();
        assert!(!b.is_modified());

        let parsed = Bookmarks::parse_file(tmp.path(), doc.block_count()).unwrap();
        assert_eq!((parsed.skipped, parsed.synerr), (0, 0));
        let mut b2 = Bookmarks::new();
        b2.apply_parsed(&doc, parsed.entries);
        assert_eq!(b2.text(0), Some("one"));
        assert_eq!(b2.text(2), Some("my label"));
        assert_eq!(b2.count(), 2);
    }

    #[test]
    fn parser_accepts_documented_separators() {
        let input = "1 label a\n2:label b\n3\n4,x\n# comment\n\n";
        let got = parse_reader(Cursor::new(input), 10).unwrap();
        assert_eq!(got.entries.len(), 4);
        assert_eq!(got.entries[0], (0, "label a".into()));
        assert_eq!(got.entries[1], (1, "label b".into()));
        assert_eq!(got.entries[2], (2, String::new()));
        assert_eq!(got.entries[3], (3, "x".into()));
    }

    #[test]
    fn parser_tallies_errors() {
        let input = "0 too small\n99 too big\ngarbage\n5 ok\n";
        let got = parse_reader(Cursor::new(input), 10).unwrap();
        assert_eq!(got.entries, vec![(4, "ok".into())]);
        assert_eq!(got.skipped, 2);
        assert_eq!(got.synerr, 1);
    }

    #[test]
    fn adjust_line_nums_drops_and_shifts() {
        let doc = Document::from_str("a\nb\nc\nd\ne");
        let mut b = Bookmarks::new();
        b.toggle(&doc, 0);
        b.toggle(&doc, 2);
        b.toggle(&doc, 4);
        b.adjust_line_nums(2, 4);
        assert_eq!(b.line_list(), vec![0]);
        assert_eq!(b.text(0), Some("c"));
    }

    #[test]
    fn default_file_name_prefers_appended_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let trace = dir.path().join("out.txt");
        std::fs::write(&trace, "x").unwrap();
        assert!(default_file_name(&trace).is_none());

        let bok = dir.path().join("out.txt.bok");
        std::fs::write(&bok, "1").unwrap();
        let (found, _) = default_file_name(&trace).unwrap();
        assert_eq!(found, bok);
    }
}
