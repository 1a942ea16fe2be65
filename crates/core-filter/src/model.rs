//! Sorted line-number list backing the filter view.
//!
//! The list stores block numbers in strictly ascending order without
//! duplicates. Bulk mutations arrive as pre-sorted batches whose target
//! indices were computed against the unmodified list; insertion compensates
//! for the shift caused by earlier elements of the same batch and both paths
//! group runs of consecutive indices into single range operations.

#[derive(Debug, Default)]
pub struct LineList {
    lines: Vec<u32>,
    root_line: Option<u32>,
}

impl LineList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[u32] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn line_of_idx(&self, idx: usize) -> Option<u32> {
        self.lines.get(idx).copied()
    }

    /// Index of the first entry >= `line` (so the insert position keeps the
    /// list sorted); equals `len` when all entries are smaller.
    pub fn idx_of(&self, line: u32) -> usize {
        self.lines.partition_point(|&l| l < line)
    }

    /// Look up a line; returns `(found, idx)` where `idx` is the entry's
    /// index on a hit and the insert position on a miss.
    pub fn find(&self, line: u32) -> (bool, usize) {
        let idx = self.idx_of(line);
        (self.lines.get(idx) == Some(&line), idx)
    }

    pub fn contains(&self, line: u32) -> bool {
        self.find(line).0
    }

    /// Origin for the relative line-number column.
    pub fn root_line(&self) -> Option<u32> {
        self.root_line
    }

    pub fn set_root_line(&mut self, line: Option<u32>) {
        self.root_line = line;
    }

    pub fn insert_one(&mut self, line: u32) -> bool {
        let (found, idx) = self.find(line);
        if found {
            return false;
        }
        self.lines.insert(idx, line);
        true
    }

    /// Bulk insert of ascending `line_list`. `idx_list` holds the insert
    /// position of each line as computed against the list before any of the
    /// batch was applied; positions are compensated here for the shift of
    /// preceding batch elements, then applied as grouped range inserts.
    /// On return `idx_list` holds the final indices of the inserted lines.
    pub fn insert_presorted(&mut self, line_list: &[u32], idx_list: &mut [usize]) {
        debug_assert_eq!(line_list.len(), idx_list.len());
        self.lines.reserve(line_list.len());

        for i in 1..idx_list.len() {
            idx_list[i] += i;
        }

        let mut i = 0;
        let mut prev: Option<usize> = None;
        while i < idx_list.len() {
            debug_assert!(prev.is_none_or(|p| idx_list[i] > p));
            prev = Some(idx_list[i]);

            let mut count = 1;
            while i + count < idx_list.len() && idx_list[i] + count == idx_list[i + count] {
                count += 1;
            }
            let row = idx_list[i];
            self.lines
                .splice(row..row, line_list[i..i + count].iter().copied());
            i += count;
        }
    }

    /// Bulk removal by index, `idx_list` sorted descending; runs of
    /// consecutive descending indices collapse into single range removals.
    pub fn remove_presorted(&mut self, idx_list: &[usize]) {
        let mut prev = self.lines.len();
        let mut i = 0;
        while i < idx_list.len() {
            debug_assert!(idx_list[i] < prev);
            prev = idx_list[i];

            let mut count = 1;
            while i + count < idx_list.len() && idx_list[i] == idx_list[i + count] + count {
                count += 1;
            }
            let row = idx_list[i + count - 1];
            self.lines.drain(row..row + count);
            i += count;
        }
    }

    /// Insert lines one by one, skipping those already present (undo/redo
    /// replay path).
    pub fn insert_lines(&mut self, line_list: &[u32]) {
        for &line in line_list {
            self.insert_one(line);
        }
    }

    /// Remove lines one by one, skipping those not present.
    pub fn remove_lines(&mut self, line_list: &[u32]) {
        for &line in line_list {
            let (found, idx) = self.find(line);
            if found {
                self.lines.remove(idx);
            }
        }
    }

    pub fn remove_all(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.lines)
    }

    /// Remap block numbers after a truncation keeping `[top, bottom)`;
    /// `bottom == 0` means unbounded. The delta root is dropped when it falls
    /// outside the window.
    pub fn adjust_line_nums(&mut self, top: u32, bottom: u32) {
        self.lines.retain(|&l| l >= top && (l < bottom || bottom == 0));
        for l in &mut self.lines {
            *l -= top;
        }
        self.root_line = match self.root_line {
            Some(l) if l >= top && (l < bottom || bottom == 0) => Some(l - top),
            _ => None,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(lines: &[u32]) -> LineList {
        let mut m = LineList::new();
        for &l in lines {
            m.insert_one(l);
        }
        m
    }

    #[test]
    fn idx_of_is_lower_bound() {
        let m = filled(&[10, 20, 30]);
        assert_eq!(m.idx_of(5), 0);
        assert_eq!(m.idx_of(10), 0);
        assert_eq!(m.idx_of(15), 1);
        assert_eq!(m.idx_of(30), 2);
        assert_eq!(m.idx_of(31), 3);
    }

    #[test]
    fn insert_presorted_compensates_shift() {
        let mut m = filled(&[10, 40]);
        // lines 5, 20, 30: target indices against the unmodified list
        let line_list = [5u32, 20, 30];
        let mut idx_list = vec![m.idx_of(5), m.idx_of(20), m.idx_of(30)];
        assert_eq!(idx_list, vec![0, 1, 1]);
        m.insert_presorted(&line_list, &mut idx_list);
        assert_eq!(m.lines(), &[5, 10, 20, 30, 40]);
        // idx_list now holds the final positions
        assert_eq!(idx_list, vec![0, 2, 3]);
    }

    #[test]
    fn insert_presorted_groups_consecutive_runs() {
        let mut m = filled(&[100]);
        let line_list = [1u32, 2, 3, 50, 51];
        let mut idx_list = vec![0, 0, 0, 0, 0];
        m.insert_presorted(&line_list, &mut idx_list);
        assert_eq!(m.lines(), &[1, 2, 3, 50, 51, 100]);
    }

    #[test]
    fn remove_presorted_descending_ranges() {
        let mut m = filled(&[1, 2, 3, 4, 5, 6]);
        // remove indices 4,3,1 (values 5,4,2)
        m.remove_presorted(&[4, 3, 1]);
        assert_eq!(m.lines(), &[1, 3, 6]);
    }

    #[test]
    fn insert_lines_skips_duplicates() {
        let mut m = filled(&[2, 4]);
        m.insert_lines(&[1, 2, 3]);
        assert_eq!(m.lines(), &[1, 2, 3, 4]);
    }

    #[test]
    fn adjust_line_nums_window() {
        let mut m = filled(&[1, 5, 9]);
        m.set_root_line(Some(5));
        m.adjust_line_nums(4, 8);
        assert_eq!(m.lines(), &[1]); // old line 5
        assert_eq!(m.root_line(), Some(1));

        let mut m = filled(&[1, 5, 9]);
        m.set_root_line(Some(1));
        m.adjust_line_nums(4, 0);
        assert_eq!(m.lines(), &[1, 5]);
        assert_eq!(m.root_line(), None);
    }
}
