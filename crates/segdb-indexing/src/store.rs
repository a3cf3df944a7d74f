//! Tagged-variant index store: an index is *either* trie-backed (readonly
//! segments) *or* KV-backed (the writable segment), never a dynamic
//! dispatch hierarchy. See SPEC_FULL.md §9 ("deep inheritance").

use regex::Regex;
use segdb_errors::{
    Result,
    StorageError,
};
use segdb_value::{
    IndexKind,
    RecId,
};

use crate::{
    kv_index::KvIndex,
    trie_index::{
        TrieIndex,
        TrieIndexBuilder,
    },
};

pub enum IndexStore {
    Trie(TrieIndex),
    Kv(KvIndex),
}

impl IndexStore {
    pub fn kind(&self) -> IndexKind {
        match self {
            IndexStore::Trie(t) => t.kind(),
            IndexStore::Kv(k) => k.kind(),
        }
    }

    pub fn is_unique(&self) -> bool {
        matches!(self.kind(), IndexKind::Unique)
    }

    /// `searchExact`, available on both backings.
    pub fn search_exact(&self, key: &[u8], out: &mut Vec<RecId>) -> Result<()> {
        match self {
            IndexStore::Trie(t) => t.search_exact(key, out),
            IndexStore::Kv(k) => k.search_exact(key, out),
        }
    }

    pub fn key_exists(&self, key: &[u8]) -> Result<bool> {
        let mut buf = Vec::new();
        self.search_exact(key, &mut buf)?;
        Ok(!buf.is_empty())
    }

    /// `insert` is only meaningful on the writable (KV) backing; a trie
    /// index is immutable once converted.
    pub fn insert(&self, key: &[u8], id: RecId) -> Result<bool> {
        match self {
            IndexStore::Kv(k) => k.insert(key, id),
            IndexStore::Trie(_) => Err(StorageError::invariant(
                "cannot insert into an immutable trie index",
            )),
        }
    }

    pub fn remove(&self, key: &[u8], id: RecId) -> Result<()> {
        match self {
            IndexStore::Kv(k) => k.remove(key, id),
            IndexStore::Trie(_) => Err(StorageError::invariant(
                "cannot remove from an immutable trie index",
            )),
        }
    }

    /// `matchRegex` is only meaningful against a trie index; a writable
    /// segment has no regex-ready structure to intersect.
    pub fn match_regex(&self, pattern: &Regex, mem_limit: usize) -> Result<Option<Vec<RecId>>> {
        match self {
            IndexStore::Trie(t) => t.match_regex(pattern, mem_limit),
            IndexStore::Kv(_) => Err(StorageError::invariant(
                "regex scan is only supported on trie-backed indexes",
            )),
        }
    }

    pub fn iter_forward(&self) -> Vec<(Vec<u8>, RecId)> {
        match self {
            IndexStore::Trie(t) => t.iter_forward().map(|(k, id)| (k.to_vec(), id)).collect(),
            IndexStore::Kv(k) => k.iter_forward(),
        }
    }

    pub fn iter_backward(&self) -> Vec<(Vec<u8>, RecId)> {
        match self {
            IndexStore::Trie(t) => t.iter_backward().map(|(k, id)| (k.to_vec(), id)).collect(),
            IndexStore::Kv(k) => k.iter_backward(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            IndexStore::Trie(t) => t.num_entries(),
            IndexStore::Kv(k) => k.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rebuilds this index as a trie-backed one, sorting its current
    /// entries. Used by `convert` (§4.7) to turn a writable segment's
    /// KV-backed indexes into the readonly segment's compressed tries; a
    /// no-op (beyond the copy) when already trie-backed.
    pub fn to_trie(&self) -> Result<IndexStore> {
        let mut builder = TrieIndexBuilder::new(self.kind());
        for (key, id) in self.iter_forward() {
            builder.push(key, id);
        }
        Ok(IndexStore::Trie(builder.build()?))
    }
}
