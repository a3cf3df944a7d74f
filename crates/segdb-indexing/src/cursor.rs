//! A stateful ordered cursor over an index's `(key, recId)` pairs, used by
//! `createIndexIterForward`/`createIndexIterBackward`.
//!
//! Works uniformly over either backing by operating on a materialized,
//! sorted snapshot of `(key, recId)` pairs (see [`crate::store::IndexStore::iter_forward`]).
//! For a trie-backed index this snapshot is effectively free (the trie is
//! already sorted); for a KV-backed index it is a point-in-time read
//! consistent with read-committed isolation within the owning segment.

use segdb_value::RecId;

pub struct Cursor {
    entries: Vec<(Vec<u8>, RecId)>,
    pos: Option<usize>,
}

impl Cursor {
    pub fn new(mut entries: Vec<(Vec<u8>, RecId)>) -> Self {
        entries.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
        Cursor { entries, pos: None }
    }

    pub fn reset(&mut self) {
        self.pos = None;
    }

    fn lower_bound(&self, key: &[u8]) -> usize {
        self.entries.partition_point(|(k, _)| k.as_slice() < key)
    }

    /// Returns `0` on an exact match, `1` on landing on the next-greater
    /// key, or `-1` if no key `>= key` exists.
    pub fn seek_lower_bound(&mut self, key: &[u8]) -> i8 {
        let idx = self.lower_bound(key);
        if idx >= self.entries.len() {
            self.pos = None;
            return -1;
        }
        self.pos = Some(idx);
        if self.entries[idx].0 == key {
            0
        } else {
            1
        }
    }

    /// Position on the smallest key strictly greater than `key`. Returns
    /// `1` if found, `-1` otherwise.
    pub fn seek_upper_bound(&mut self, key: &[u8]) -> i8 {
        let idx = self.entries.partition_point(|(k, _)| k.as_slice() <= key);
        if idx >= self.entries.len() {
            self.pos = None;
            return -1;
        }
        self.pos = Some(idx);
        1
    }

    /// Position on the longest stored key that is a byte-prefix of `key`.
    pub fn seek_max_prefix(&mut self, key: &[u8]) -> i8 {
        let range_end = self.lower_bound(key) + 1;
        let range_end = range_end.min(self.entries.len());
        for idx in (0..range_end).rev() {
            if key.starts_with(self.entries[idx].0.as_slice()) {
                self.pos = Some(idx);
                return 0;
            }
        }
        self.pos = None;
        -1
    }

    pub fn increment(&mut self) -> bool {
        match self.pos {
            Some(idx) if idx + 1 < self.entries.len() => {
                self.pos = Some(idx + 1);
                true
            },
            _ => {
                self.pos = None;
                false
            },
        }
    }

    pub fn decrement(&mut self) -> bool {
        match self.pos {
            Some(idx) if idx > 0 => {
                self.pos = Some(idx - 1);
                true
            },
            _ => {
                self.pos = None;
                false
            },
        }
    }

    pub fn current(&self) -> Option<(&[u8], RecId)> {
        self.pos.map(|idx| (self.entries[idx].0.as_slice(), self.entries[idx].1))
    }
}
