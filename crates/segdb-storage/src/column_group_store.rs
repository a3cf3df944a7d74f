//! Tagged-variant dispatch over the three column-group representations,
//! the storage-plane counterpart of `segdb_indexing::store::IndexStore`.

use segdb_errors::Result;

use crate::{
    fixed_len_store::FixedLenStore,
    readable_store::ReadableStore,
    trie_store::TrieStore,
    writable_row_store::WritableRowStore,
};

pub enum ColumnGroupStore {
    Trie(TrieStore),
    FixedLength(FixedLenStore),
    WritableRow(WritableRowStore),
}

impl ReadableStore for ColumnGroupStore {
    fn num_rows(&self) -> usize {
        match self {
            ColumnGroupStore::Trie(s) => s.num_rows(),
            ColumnGroupStore::FixedLength(s) => s.num_rows(),
            ColumnGroupStore::WritableRow(s) => s.num_rows(),
        }
    }

    fn data_storage_size(&self) -> usize {
        match self {
            ColumnGroupStore::Trie(s) => s.data_storage_size(),
            ColumnGroupStore::FixedLength(s) => s.data_storage_size(),
            ColumnGroupStore::WritableRow(s) => s.data_storage_size(),
        }
    }

    fn data_inflate_size(&self) -> usize {
        match self {
            ColumnGroupStore::Trie(s) => s.data_inflate_size(),
            ColumnGroupStore::FixedLength(s) => s.data_inflate_size(),
            ColumnGroupStore::WritableRow(s) => s.data_inflate_size(),
        }
    }

    fn get_value_append(&self, id: u32, buf: &mut Vec<u8>) -> Result<()> {
        match self {
            ColumnGroupStore::Trie(s) => s.get_value_append(id, buf),
            ColumnGroupStore::FixedLength(s) => s.get_value_append(id, buf),
            ColumnGroupStore::WritableRow(s) => s.get_value_append(id, buf),
        }
    }

    fn iter_forward(&self) -> Box<dyn Iterator<Item = (u32, Vec<u8>)> + '_> {
        match self {
            ColumnGroupStore::Trie(s) => s.iter_forward(),
            ColumnGroupStore::FixedLength(s) => s.iter_forward(),
            ColumnGroupStore::WritableRow(s) => s.iter_forward(),
        }
    }

    fn iter_backward(&self) -> Box<dyn Iterator<Item = (u32, Vec<u8>)> + '_> {
        match self {
            ColumnGroupStore::Trie(s) => s.iter_backward(),
            ColumnGroupStore::FixedLength(s) => s.iter_backward(),
            ColumnGroupStore::WritableRow(s) => s.iter_backward(),
        }
    }
}

impl ColumnGroupStore {
    /// `append`: only meaningful on a writable representation.
    pub fn append(&self, row: &[u8]) -> Result<u32> {
        match self {
            ColumnGroupStore::FixedLength(s) => s.append(row),
            ColumnGroupStore::WritableRow(s) => Ok(s.append(row)),
            ColumnGroupStore::Trie(_) => Err(segdb_errors::StorageError::invariant(
                "cannot append to an immutable trie-backed column group",
            )),
        }
    }

    pub fn update(&self, id: u32, row: &[u8]) -> Result<()> {
        match self {
            ColumnGroupStore::FixedLength(s) => s.update(id, row),
            ColumnGroupStore::WritableRow(s) => s.update(id, row),
            ColumnGroupStore::Trie(_) => Err(segdb_errors::StorageError::invariant(
                "cannot update an immutable trie-backed column group",
            )),
        }
    }
}
