//! Export and import of the filter list.
//!
//! Two export formats: bare 1-based line numbers, or number plus tab plus
//! line text. The importer accepts the number format back, tolerating
//! arbitrary trailing separators, blank lines and `#` comments; numbers out
//! of range and malformed lines are tallied so the caller can let the user
//! decide whether to proceed.

use std::io::{BufRead, Write};
use std::sync::OnceLock;

use core_text::Document;
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ListIoError {
    #[error("error accessing file: {0}")]
    Io(#[from] std::io::Error),
}

/// Write the list, 1-based, one entry per line: either `<line>\n` or
/// `<line>\t<text>\n`.
pub fn write_list<W: Write>(
    mut out: W,
    lines: &[u32],
    doc: &Document,
    lnum_only: bool,
) -> Result<(), ListIoError> {
    let mut buf = String::new();
    for &line in lines {
        if lnum_only {
            writeln!(out, "{}", line + 1)?;
        } else {
            doc.line_into(line as usize, &mut buf);
            writeln!(out, "{}\t{}", line + 1, buf)?;
        }
    }
    out.flush()?;
    Ok(())
}

/// Result of parsing a line-number file. `lines` is ascending, 0-based and
/// de-duplicated; `skipped` counts numbers outside `[1, max_line]` and
/// `synerr` non-empty lines without a leading number.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportOutcome {
    pub lines: Vec<u32>,
    pub skipped: usize,
    pub synerr: usize,
}

pub fn parse_line_list<R: BufRead>(input: R, max_line: usize) -> Result<ImportOutcome, ListIoError> {
    static NUM_RE: OnceLock<Regex> = OnceLock::new();
    static SKIP_RE: OnceLock<Regex> = OnceLock::new();
    let num_re = NUM_RE.get_or_init(|| Regex::new(r"^(\d+)(?:[^\d\w]|$)").unwrap());
    let skip_re = SKIP_RE.get_or_init(|| Regex::new(r"^\s*(?:#.*)?$").unwrap());

    let mut out = ImportOutcome::default();
    for line_str in input.lines() {
        let line_str = line_str?;
        if let Some(caps) = num_re.captures(&line_str) {
            match caps[1].parse::<usize>() {
                Ok(n) if n >= 1 && n <= max_line => out.lines.push((n - 1) as u32),
                Ok(_) => out.skipped += 1,
                Err(_) => out.synerr += 1,
            }
        } else if !skip_re.is_match(&line_str) {
            out.synerr += 1;
        }
    }
    out.lines.sort_unstable();
    out.lines.dedup();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufReader, Cursor};

    #[test]
    fn export_number_format_round_trips() {
        let doc = Document::from_str("a\nb\nc\nd");
        let lines = vec![0u32, 2, 3];
        let mut buf = Vec::new();
        write_list(&mut buf, &lines, &doc, true).unwrap();
        assert_eq!(String::from_utf8(buf.clone()).unwrap(), "1\n3\n4\n");

        let got = parse_line_list(BufReader::new(Cursor::new(buf)), doc.block_count()).unwrap();
        assert_eq!(got.lines, lines);
        assert_eq!((got.skipped, got.synerr), (0, 0));
    }

    #[test]
    fn export_text_format() {
        let doc = Document::from_str("alpha\nbeta");
        let mut buf = Vec::new();
        write_list(&mut buf, &[1], &doc, false).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "2\tbeta\n");
    }

    #[test]
    fn import_tolerates_comments_and_separators() {
        let input = "# header\n3 trailing text\n1:label\n\n2\n";
        let got = parse_line_list(BufReader::new(Cursor::new(input)), 10).unwrap();
        assert_eq!(got.lines, vec![0, 1, 2]);
        assert_eq!((got.skipped, got.synerr), (0, 0));
    }

    #[test]
    fn import_tallies_range_and_syntax_errors() {
        let input = "0\n5\n99\nnot-a-number\n7abc\n";
        let got = parse_line_list(BufReader::new(Cursor::new(input)), 10).unwrap();
        // 0 and 99 out of range; "not-a-number" and "7abc" malformed
        assert_eq!(got.lines, vec![4]);
        assert_eq!(got.skipped, 2);
        assert_eq!(got.synerr, 2);
    }

    #[test]
    fn import_deduplicates_and_sorts() {
        let input = "4\n2\n4\n2\n";
        let got = parse_line_list(BufReader::new(Cursor::new(input)), 10).unwrap();
        assert_eq!(got.lines, vec![1, 3]);
    }

    #[test]
    fn round_trip_through_real_file() {
        let doc = Document::from_str(&(0..50).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n"));
        let lines: Vec<u32> = vec![3, 17, 42];
        let tmp = tempfile::NamedTempFile::new().unwrap();
        write_list(std::fs::File::create(tmp.path()).unwrap(), &lines, &doc, true).unwrap();

        let fh = std::fs::File::open(tmp.path()).unwrap();
        let got = parse_line_list(BufReader::new(fh), doc.block_count()).unwrap();
        assert_eq!(got.lines, lines);
    }
}
