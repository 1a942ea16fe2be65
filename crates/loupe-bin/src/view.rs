//! Viewport state and terminal painting.
//!
//! The main pane shows the document with composed highlight formats; an
//! optional bottom pane shows the filter list with its side columns. The
//! last row is shared by the search entry and the status line.

use std::io::Write;

use core_highlight::FormatSpec;
use core_text::Document;
use crossterm::style::{
    Attribute, Color, Print, ResetColor, SetAttribute, SetBackgroundColor, SetForegroundColor,
};
use crossterm::{cursor, queue, terminal};
use unicode_width::UnicodeWidthChar;

use crate::app::{App, Focus};

#[derive(Debug)]
pub struct View {
    pub top: usize,
    pub left: usize,
    pub cursor: usize,
    pub cursor_col: usize,
    pub rows: u16,
    pub cols: u16,
    pub filter_open: bool,
    pub filter_sel: Option<usize>,
    pub filter_top: usize,
}

impl View {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            top: 0,
            left: 0,
            cursor: 0,
            cursor_col: 0,
            rows,
            cols,
            filter_open: false,
            filter_sel: None,
            filter_top: 0,
        }
    }

    pub fn resize(&mut self, cols: u16, rows: u16) {
        self.cols = cols;
        self.rows = rows;
    }

    /// Rows of the filter pane including its separator, 0 when closed.
    pub fn filter_rows(&self) -> usize {
        if self.filter_open {
            (self.rows as usize / 3).max(4)
        } else {
            0
        }
    }

    /// Rows available for the document text.
    pub fn text_rows(&self) -> usize {
        (self.rows as usize)
            .saturating_sub(1) // entry/status row
            .saturating_sub(self.filter_rows())
            .max(1)
    }

    pub fn visible_range(&self, doc: &Document) -> (usize, usize) {
        let last = (self.top + self.text_rows())
            .min(doc.block_count())
            .saturating_sub(1);
        (self.top, last.max(self.top))
    }

    pub fn clamp_cursor(&mut self, doc: &Document) {
        let count = doc.block_count();
        if count == 0 {
            self.cursor = 0;
            self.cursor_col = 0;
            return;
        }
        self.cursor = self.cursor.min(count - 1);
        self.cursor_col = self.cursor_col.min(doc.line_len(self.cursor));
    }

    /// Scroll so the cursor stays inside the text area.
    pub fn ensure_cursor_visible(&mut self) {
        let rows = self.text_rows();
        if self.cursor < self.top {
            self.top = self.cursor;
        } else if self.cursor >= self.top + rows {
            self.top = self.cursor + 1 - rows;
        }
    }

    pub fn move_cursor_line(&mut self, doc: &Document, delta: isize) {
        let count = doc.block_count();
        if count == 0 {
            return;
        }
        self.cursor = self
            .cursor
            .saturating_add_signed(delta)
            .min(count - 1);
        self.ensure_cursor_visible();
    }

    pub fn scroll_lines(&mut self, doc: &Document, delta: isize) {
        let max_top = doc.block_count().saturating_sub(1);
        self.top = self.top.saturating_add_signed(delta).min(max_top);
        // drag the cursor along so it stays visible
        let rows = self.text_rows();
        self.cursor = self.cursor.clamp(self.top, self.top + rows - 1);
        self.clamp_cursor(doc);
    }

    pub fn page(&mut self, doc: &Document, dir: isize) {
        let rows = self.text_rows() as isize;
        self.scroll_lines(doc, dir * rows.max(1));
    }

    pub fn goto_block(&mut self, doc: &Document, block: usize) {
        self.cursor = block.min(doc.block_count().saturating_sub(1));
        self.cursor_col = 0;
        self.ensure_cursor_visible();
    }

    /// Absolute byte position of the cursor.
    pub fn cursor_pos(&self, doc: &Document) -> usize {
        doc.block_pos(self.cursor) + self.cursor_col.min(doc.line_len(self.cursor))
    }
}

fn rgb(col: u32) -> Color {
    Color::Rgb {
        r: ((col >> 16) & 0xff) as u8,
        g: ((col >> 8) & 0xff) as u8,
        b: (col & 0xff) as u8,
    }
}

fn apply_fmt<W: Write>(out: &mut W, fmt: &FormatSpec) -> std::io::Result<()> {
    if let Some(bg) = fmt.bg_col {
        queue!(out, SetBackgroundColor(rgb(bg)))?;
    }
    if let Some(fg) = fmt.fg_col {
        queue!(out, SetForegroundColor(rgb(fg)))?;
    }
    if fmt.bold {
        queue!(out, SetAttribute(Attribute::Bold))?;
    }
    if fmt.italic {
        queue!(out, SetAttribute(Attribute::Italic))?;
    }
    if fmt.underline {
        queue!(out, SetAttribute(Attribute::Underlined))?;
    }
    if fmt.overstrike {
        queue!(out, SetAttribute(Attribute::CrossedOut))?;
    }
    Ok(())
}

/// Clip a line to the viewport: skip `left` display columns, emit at most
/// `width` columns.
fn clip_line(line: &str, left: usize, width: usize) -> String {
    let mut out = String::new();
    let mut col = 0usize;
    for ch in line.chars() {
        let w = ch.width().unwrap_or(0);
        if col + w > left + width {
            break;
        }
        if col >= left {
            out.push(ch);
        }
        col += w;
    }
    out
}

pub fn draw<W: Write>(out: &mut W, app: &App) -> anyhow::Result<()> {
    let view = &app.view;
    let width = view.cols as usize;
    queue!(out, cursor::Hide, terminal::Clear(terminal::ClearType::All))?;

    draw_text_pane(out, app, width)?;
    if view.filter_open {
        draw_filter_pane(out, app, width)?;
    }
    draw_bottom_row(out, app, width)?;

    // terminal cursor on the document cursor while the main pane has focus
    if app.focus == Focus::Main && view.cursor >= view.top {
        let row = (view.cursor - view.top) as u16;
        if (row as usize) < view.text_rows() {
            let col = view.cursor_col.saturating_sub(view.left) as u16;
            queue!(out, cursor::MoveTo(col.min(view.cols - 1), row), cursor::Show)?;
        }
    } else if app.focus == Focus::SearchEntry {
        let col = (app.entry.len() + 1).min(width - 1) as u16;
        queue!(out, cursor::MoveTo(col, view.rows - 1), cursor::Show)?;
    }
    out.flush()?;
    Ok(())
}

fn draw_text_pane<W: Write>(out: &mut W, app: &App, width: usize) -> anyhow::Result<()> {
    let view = &app.view;
    let mut buf = String::new();
    for row in 0..view.text_rows() {
        let block = view.top + row;
        queue!(out, cursor::MoveTo(0, row as u16))?;
        if !app.doc.line_into(block, &mut buf) {
            queue!(out, SetForegroundColor(Color::DarkGrey), Print("~"), ResetColor)?;
            continue;
        }
        let fmt = app.higl.compose(block);
        let inc = app.higl.inc_mark().filter(|m| m.block == block);

        match inc {
            Some(mark) => {
                // split the line so the exact match region stands out
                let start = mark.col.min(buf.len());
                let end = (mark.col + mark.len).min(buf.len());
                apply_fmt(out, &fmt)?;
                queue!(out, Print(clip_line(&buf[..start], view.left, width)))?;
                apply_fmt(out, &app.higl.inc_fmt())?;
                queue!(out, Print(&buf[start..end]))?;
                queue!(out, SetAttribute(Attribute::Reset), ResetColor)?;
                apply_fmt(out, &fmt)?;
                queue!(out, Print(clip_line(&buf[end..], 0, width)))?;
            }
            None => {
                if fmt.is_default() {
                    queue!(out, Print(clip_line(&buf, view.left, width)))?;
                } else {
                    apply_fmt(out, &fmt)?;
                    let text = clip_line(&buf, view.left, width);
                    let pad = width.saturating_sub(text.chars().map(|c| c.width().unwrap_or(0)).sum());
                    queue!(out, Print(text), Print(" ".repeat(pad)))?;
                }
            }
        }
        queue!(out, SetAttribute(Attribute::Reset), ResetColor)?;
    }
    Ok(())
}

fn draw_filter_pane<W: Write>(out: &mut W, app: &App, width: usize) -> anyhow::Result<()> {
    let view = &app.view;
    let first_row = view.text_rows();
    let pane_rows = view.filter_rows().saturating_sub(1);

    let title = match app.filter_progress {
        Some(p) => format!("── filter: {} lines ── {:>3}% ", app.filter.len(), p),
        None => format!("── filter: {} lines ", app.filter.len()),
    };
    queue!(
        out,
        cursor::MoveTo(0, first_row as u16),
        SetForegroundColor(Color::DarkGrey),
        Print(format!("{title:─<width$}")),
        ResetColor
    )?;

    let mut buf = String::new();
    for row in 0..pane_rows {
        let idx = view.filter_top + row;
        queue!(out, cursor::MoveTo(0, (first_row + 1 + row) as u16))?;
        let Some(line) = app.filter.line_of_idx(idx) else {
            continue;
        };
        let selected = view.filter_sel == Some(idx) && app.focus == Focus::Filter;
        if selected {
            queue!(out, SetAttribute(Attribute::Reverse))?;
        }
        let mark = if app.bookmarks.contains(line as usize) {
            '●'
        } else {
            ' '
        };
        let delta = match app.filter.root_line() {
            Some(root) => format!("{:>6}", line as i64 - root as i64),
            None => format!("{:>6}", line + 1),
        };
        app.doc.line_into(line as usize, &mut buf);
        let cols = app.parser_columns(line as usize);
        let text = clip_line(&buf, 0, width.saturating_sub(10 + cols.len()));
        queue!(out, Print(format!("{mark}{delta} {cols} {text}")))?;
        if selected {
            queue!(out, SetAttribute(Attribute::Reset))?;
        }
    }
    Ok(())
}

fn draw_bottom_row<W: Write>(out: &mut W, app: &App, width: usize) -> anyhow::Result<()> {
    let view = &app.view;
    queue!(out, cursor::MoveTo(0, view.rows - 1))?;

    if app.focus == Focus::SearchEntry {
        let prefix = if app.inc.last_dir_fwd { '/' } else { '?' };
        let mut opts = String::new();
        if app.search_opts.regexp {
            opts.push_str(" [re]");
        }
        if app.search_opts.match_case {
            opts.push_str(" [case]");
        }
        queue!(
            out,
            Print(clip_line(&format!("{prefix}{}{opts}", app.entry), 0, width))
        )?;
        return Ok(());
    }

    if let Some((text, severity)) = app.status.visible() {
        let (bg, fg) = match severity {
            crate::status::Severity::Plain => (Color::Grey, Color::Black),
            crate::status::Severity::Warning => (Color::Yellow, Color::Black),
            crate::status::Severity::Error => (Color::Red, Color::White),
        };
        queue!(
            out,
            SetBackgroundColor(bg),
            SetForegroundColor(fg),
            Print(clip_line(text, 0, width)),
            ResetColor
        )?;
        return Ok(());
    }

    // default: position indicator
    let count = app.doc.block_count();
    let percent = if count > 1 {
        100 * view.cursor / (count - 1)
    } else {
        100
    };
    let info = format!(
        "{}  line {}/{}  {percent}%",
        app.doc_name,
        view.cursor + 1,
        count
    );
    queue!(
        out,
        SetForegroundColor(Color::DarkGrey),
        Print(clip_line(&info, 0, width)),
        ResetColor
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_skips_left_columns() {
        assert_eq!(clip_line("abcdef", 2, 3), "cde");
        assert_eq!(clip_line("abc", 0, 10), "abc");
        assert_eq!(clip_line("abc", 5, 10), "");
    }

    #[test]
    fn clip_respects_wide_chars() {
        // CJK chars occupy two columns
        assert_eq!(clip_line("漢字ab", 0, 4), "漢字");
        assert_eq!(clip_line("漢字ab", 2, 2), "字");
    }

    #[test]
    fn cursor_scrolling_keeps_cursor_in_view() {
        let doc = Document::from_str(&vec!["l"; 100].join("\n"));
        let mut v = View::new(80, 24);
        v.move_cursor_line(&doc, 50);
        assert!(v.cursor >= v.top && v.cursor < v.top + v.text_rows());
        v.move_cursor_line(&doc, -50);
        assert_eq!(v.cursor, 0);
        assert_eq!(v.top, 0);
    }

    #[test]
    fn visible_range_is_clamped() {
        let doc = Document::from_str("a\nb\nc");
        let v = View::new(80, 24);
        let (first, last) = v.visible_range(&doc);
        assert_eq!((first, last), (0, 2));
    }
}
