//! Cursor jump history.
//!
//! Commands that move the cursor far away push the previous position here so
//! the user can walk back and forth through visited places. Only one entry is
//! kept per block; pushing a position in an already-recorded block replaces
//! the older entry.

const JUMP_STACK_MAXLEN: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpPos {
    pub pos: usize,
    pub block: usize,
}

/// Result of walking the jump history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpWalk {
    Moved(JumpPos),
    /// Walked past the oldest entry, continuing at the newest.
    WrappedToNewest(JumpPos),
    /// Walked past the newest entry, continuing at the oldest.
    WrappedToOldest(JumpPos),
    Empty,
}

#[derive(Default)]
pub struct JumpStack {
    stack: Vec<JumpPos>,
    walk_idx: Option<usize>,
}

impl JumpStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn clear(&mut self) {
        self.stack.clear();
        self.walk_idx = None;
    }

    /// Record the given position. An older entry in the same block is
    /// discarded first (only the block number is compared).
    pub fn push(&mut self, cur: JumpPos) {
        if let Some(idx) = self.stack.iter().position(|p| p.block == cur.block) {
            self.stack.remove(idx);
        }
        self.stack.push(cur);
        self.walk_idx = None;

        if self.stack.len() > JUMP_STACK_MAXLEN {
            let excess = self.stack.len() - JUMP_STACK_MAXLEN;
            self.stack.drain(0..excess);
        }
    }

    /// Jump back to the origin of the last jump. The current position is
    /// pushed first so the toggle can be repeated. Returns `None` when the
    /// stack is empty or the cursor is already on the only mark.
    pub fn toggle(&mut self, cur: JumpPos) -> Option<JumpPos> {
        if self.stack.is_empty() {
            return None;
        }
        self.push(cur);
        if self.stack.len() > 1 {
            let idx = self.stack.len() - 2;
            self.walk_idx = Some(idx);
            Some(self.stack[idx])
        } else {
            None
        }
    }

    /// Traverse the history by `rel` steps (negative = towards older
    /// entries). The first call pushes the current position.
    pub fn walk(&mut self, cur: JumpPos, rel: isize) -> JumpWalk {
        if self.stack.is_empty() {
            return JumpWalk::Empty;
        }
        match self.walk_idx {
            None => {
                self.push(cur);
                let idx = if rel < 0 && self.stack.len() >= 2 {
                    self.stack.len() - 2
                } else {
                    0
                };
                self.walk_idx = Some(idx);
                JumpWalk::Moved(self.stack[idx])
            }
            Some(idx) => {
                let next = idx as isize + rel;
                if next < 0 {
                    let idx = self.stack.len() - 1;
                    self.walk_idx = Some(idx);
                    JumpWalk::WrappedToNewest(self.stack[idx])
                } else if next as usize >= self.stack.len() {
                    self.walk_idx = Some(0);
                    JumpWalk::WrappedToOldest(self.stack[0])
                } else {
                    self.walk_idx = Some(next as usize);
                    JumpWalk::Moved(self.stack[next as usize])
                }
            }
        }
    }

    /// Remap block numbers after a truncation keeping `[top, bottom)`;
    /// `bottom == 0` means unbounded. Entries outside the window are dropped.
    pub fn adjust_line_nums(&mut self, top: usize, bottom: usize) {
        self.stack.retain_mut(|p| {
            if p.block >= top && (p.block < bottom || bottom == 0) {
                p.block -= top;
                true
            } else {
                false
            }
        });
        self.walk_idx = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jp(pos: usize, block: usize) -> JumpPos {
        JumpPos { pos, block }
    }

    #[test]
    fn push_replaces_same_block_entry() {
        let mut js = JumpStack::new();
        js.push(jp(0, 3));
        js.push(jp(10, 7));
        js.push(jp(5, 3));
        assert_eq!(js.len(), 2);
        // walking backwards from a fresh position returns the newest entry
        let got = js.walk(jp(99, 50), -1);
        assert_eq!(got, JumpWalk::Moved(jp(5, 3)));
    }

    #[test]
    fn toggle_returns_origin_of_last_jump() {
        let mut js = JumpStack::new();
        assert_eq!(js.toggle(jp(0, 0)), None);
        js.push(jp(4, 2));
        let back = js.toggle(jp(30, 9));
        assert_eq!(back, Some(jp(4, 2)));
    }

    #[test]
    fn walk_wraps_with_notice() {
        let mut js = JumpStack::new();
        js.push(jp(0, 0));
        js.push(jp(10, 1));
        // first walk pushes current pos (block 5) and lands on block 1
        assert_eq!(js.walk(jp(50, 5), -1), JumpWalk::Moved(jp(10, 1)));
        assert_eq!(js.walk(jp(10, 1), -1), JumpWalk::Moved(jp(0, 0)));
        match js.walk(jp(0, 0), -1) {
            JumpWalk::WrappedToNewest(p) => assert_eq!(p.block, 5),
            other => panic!("expected wrap, got {other:?}"),
        }
    }

    #[test]
    fn adjust_drops_and_shifts() {
        let mut js = JumpStack::new();
        js.push(jp(0, 2));
        js.push(jp(10, 8));
        js.adjust_line_nums(5, 0);
        assert_eq!(js.len(), 1);
        let got = js.walk(jp(0, 0), -1);
        assert_eq!(got, JumpWalk::Moved(jp(10, 3)));
    }
}
