//! Bounded most-recently-used stack of search parameter sets.
//!
//! The newest entry sits at the front. Re-adding a pattern that is already
//! somewhere in the stack moves it to the front; the options of the older
//! copy are discarded. Iteration supports filtering by a pattern prefix,
//! which backs the up/down-arrow browsing in the search entry.

use tracing::trace;

use crate::SearchPar;

pub const TLB_HIST_MAXLEN: usize = 50;

#[derive(Debug, Default)]
pub struct SearchHistory {
    history: Vec<SearchPar>,
}

/// Iteration state for prefix-filtered browsing. The prefix is captured when
/// the iteration starts; reaching either end yields the prefix back and the
/// next step restarts from the opposite end.
#[derive(Debug, Default, Clone)]
pub struct HistoryIter {
    pos: Option<usize>,
    prev_up: bool,
    prefix: String,
}

impl HistoryIter {
    pub fn reset(&mut self) {
        self.pos = None;
        self.prefix.clear();
    }

    pub fn is_browsing(&self) -> bool {
        self.pos.is_some()
    }

    fn valid(&self, len: usize) -> bool {
        matches!(self.pos, Some(p) if p < len)
    }
}

impl SearchHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn front(&self) -> Option<&SearchPar> {
        self.history.first()
    }

    pub fn entries(&self) -> &[SearchPar] {
        &self.history
    }

    /// Replace the whole stack, trimming to capacity; used when applying the
    /// persisted configuration.
    pub fn set_entries(&mut self, entries: Vec<SearchPar>) {
        self.history = entries;
        self.history.truncate(TLB_HIST_MAXLEN);
    }

    /// Push a parameter set to the front. An existing entry with the same
    /// pattern is removed first (options are not compared). Returns whether
    /// the stack changed, so the caller can schedule a config write.
    pub fn add_entry(&mut self, par: &SearchPar) -> bool {
        if par.pat.is_empty() {
            return false;
        }
        if let Some(idx) = self.history.iter().position(|h| h.pat == par.pat) {
            self.history.remove(idx);
        }
        self.history.insert(0, par.clone());
        self.history.truncate(TLB_HIST_MAXLEN);
        trace!(target: "search.hist", pat = %par.pat, len = self.history.len(), "history_add");
        true
    }

    /// Add several sets, keeping the given order at the front.
    pub fn add_multiple(&mut self, pats: &[SearchPar]) {
        for par in pats.iter().rev() {
            self.add_entry(par);
        }
    }

    /// Bulk-remove entries by index (history dialog).
    pub fn remove_multiple(&mut self, excluded: &[usize]) -> bool {
        if excluded.is_empty() {
            return false;
        }
        let mut idx = 0;
        self.history.retain(|_| {
            let drop = excluded.contains(&idx);
            idx += 1;
            !drop
        });
        true
    }

    /// Remove the entry the iterator points at. Afterwards the iterator
    /// points at the following entry (relative to the last browse direction);
    /// the returned text is the new current pattern, or the stored prefix
    /// when the iteration ran off the stack.
    pub fn remove_entry(&mut self, it: &mut HistoryIter) -> String {
        if it.valid(self.history.len()) {
            let pos = it.pos.unwrap();
            self.history.remove(pos);

            if !it.prev_up {
                it.pos = pos.checked_sub(1);
            }
            if !it.valid(self.history.len()) {
                let prefix = it.prefix.clone();
                it.reset();
                return prefix;
            }
        }
        match it.pos {
            Some(p) if p < self.history.len() => self.history[p].pat.clone(),
            _ => it.prefix.clone(),
        }
    }

    /// Reset the iterator when the entry it points at no longer matches the
    /// text in the entry field (the user edited while browsing).
    pub fn track_iter(&self, it: &mut HistoryIter, pat: &str) {
        if it.valid(self.history.len()) && self.history[it.pos.unwrap()].pat != pat {
            it.reset();
        }
    }

    /// Step the iterator towards older (`is_up`) or newer entries, skipping
    /// entries that do not start with the captured prefix. At either end the
    /// original prefix is returned and the next call restarts from the
    /// opposite end.
    pub fn iter_next(&self, it: &mut HistoryIter, prefix: &str, is_up: bool) -> String {
        if !self.history.is_empty() {
            match it.pos {
                None => {
                    it.prefix = prefix.to_string();
                    it.pos = Some(if is_up { 0 } else { self.history.len() - 1 });
                }
                Some(p) if is_up => {
                    it.pos = if p + 1 < self.history.len() {
                        Some(p + 1)
                    } else {
                        None
                    };
                }
                Some(p) => {
                    it.pos = p.checked_sub(1);
                }
            }

            it.pos = self.search_prefix(it, is_up);
            it.prev_up = is_up;
        }

        match it.pos {
            Some(p) => self.history[p].pat.clone(),
            None => it.prefix.clone(),
        }
    }

    fn search_prefix(&self, it: &HistoryIter, is_up: bool) -> Option<usize> {
        let mut idx = it.pos?;
        loop {
            if self.history[idx].pat.starts_with(&it.prefix) {
                return Some(idx);
            }
            if is_up {
                idx += 1;
                if idx >= self.history.len() {
                    return None;
                }
            } else {
                idx = idx.checked_sub(1)?;
            }
        }
    }
}
