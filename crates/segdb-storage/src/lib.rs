//! Column-group storage representations (trie/blob, fixed-length, writable
//! row) and the tombstone/purge bitmap shared by every segment kind.
//!
//! Nothing here knows about recIds, transactions or segments proper — those
//! live in `segdb-database`, which composes these stores per §4.3/§4.4.

pub mod column_group_store;
pub mod deleted_bitset;
pub mod fixed_len_store;
pub mod readable_store;
pub mod trie_store;
pub mod writable_row_store;

pub use column_group_store::ColumnGroupStore;
pub use deleted_bitset::DeletedBitset;
pub use fixed_len_store::FixedLenStore;
pub use readable_store::ReadableStore;
pub use trie_store::{
    TrieStore,
    TrieStoreBuilder,
};
pub use writable_row_store::WritableRowStore;
