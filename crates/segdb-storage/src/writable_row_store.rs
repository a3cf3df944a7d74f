//! Mutable key(sub-id)→value(bytes) store backing a writable segment's
//! row-wise (or remainder) column group.
//!
//! `append` assigns the next sub-id; `remove` is `update`-to-empty rather
//! than a real delete, matching §4.3 — actual tombstoning lives in the
//! segment's `DeletedBitset`. Tracks an estimated live-byte count refreshed
//! from the underlying map every ~10 MiB of churn, since a precise count
//! would mean walking every entry on every write.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use segdb_errors::{
    Result,
    StorageError,
};

use crate::readable_store::ReadableStore;

const LIVE_BYTES_REFRESH_INTERVAL: u64 = 10 * 1024 * 1024;

struct Inner {
    rows: BTreeMap<u32, Vec<u8>>,
    next_id: u32,
    churn_since_refresh: u64,
    live_bytes_estimate: usize,
}

pub struct WritableRowStore {
    inner: RwLock<Inner>,
}

impl WritableRowStore {
    pub fn new() -> Self {
        WritableRowStore {
            inner: RwLock::new(Inner {
                rows: BTreeMap::new(),
                next_id: 0,
                churn_since_refresh: 0,
                live_bytes_estimate: 0,
            }),
        }
    }

    pub fn append(&self, row: &[u8]) -> u32 {
        let mut inner = self.inner.write();
        let id = inner.next_id;
        inner.next_id += 1;
        let len = row.len() as u64;
        inner.rows.insert(id, row.to_vec());
        Self::account_churn(&mut inner, len);
        id
    }

    pub fn update(&self, id: u32, row: &[u8]) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.rows.contains_key(&id) {
            return Err(StorageError::NotFound);
        }
        let len = row.len() as u64;
        inner.rows.insert(id, row.to_vec());
        Self::account_churn(&mut inner, len);
        Ok(())
    }

    /// `remove`: rewrite to an empty value rather than drop the key, so
    /// `seek_exact` still reports the id as populated (tombstone-checked
    /// elsewhere).
    pub fn remove(&self, id: u32) -> Result<()> {
        self.update(id, &[])
    }

    fn account_churn(inner: &mut Inner, bytes_written: u64) {
        inner.churn_since_refresh += bytes_written;
        if inner.churn_since_refresh >= LIVE_BYTES_REFRESH_INTERVAL {
            inner.live_bytes_estimate = inner.rows.values().map(Vec::len).sum();
            inner.churn_since_refresh = 0;
        } else {
            inner.live_bytes_estimate += bytes_written as usize;
        }
    }

    pub fn live_bytes_estimate(&self) -> usize {
        self.inner.read().live_bytes_estimate
    }

    pub fn save(&self, mut out: impl std::io::Write) -> Result<()> {
        use byteorder::{
            LittleEndian,
            WriteBytesExt,
        };
        let inner = self.inner.read();
        out.write_u32::<LittleEndian>(inner.next_id).map_err(anyhow::Error::from)?;
        out.write_u32::<LittleEndian>(inner.rows.len() as u32)
            .map_err(anyhow::Error::from)?;
        for (id, row) in inner.rows.iter() {
            out.write_u32::<LittleEndian>(*id).map_err(anyhow::Error::from)?;
            out.write_u32::<LittleEndian>(row.len() as u32)
                .map_err(anyhow::Error::from)?;
            out.write_all(row).map_err(anyhow::Error::from)?;
        }
        Ok(())
    }

    pub fn load(mut input: impl std::io::Read) -> Result<Self> {
        use byteorder::{
            LittleEndian,
            ReadBytesExt,
        };
        let next_id = input.read_u32::<LittleEndian>().map_err(anyhow::Error::from)?;
        let count = input.read_u32::<LittleEndian>().map_err(anyhow::Error::from)?;
        let mut rows = BTreeMap::new();
        let mut live_bytes_estimate = 0;
        for _ in 0..count {
            let id = input.read_u32::<LittleEndian>().map_err(anyhow::Error::from)?;
            let len = input.read_u32::<LittleEndian>().map_err(anyhow::Error::from)? as usize;
            let mut row = vec![0u8; len];
            input.read_exact(&mut row).map_err(anyhow::Error::from)?;
            live_bytes_estimate += row.len();
            rows.insert(id, row);
        }
        Ok(WritableRowStore {
            inner: RwLock::new(Inner {
                rows,
                next_id,
                churn_since_refresh: 0,
                live_bytes_estimate,
            }),
        })
    }
}

impl Default for WritableRowStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadableStore for WritableRowStore {
    fn num_rows(&self) -> usize {
        self.inner.read().next_id as usize
    }

    fn data_storage_size(&self) -> usize {
        self.inner.read().rows.values().map(Vec::len).sum()
    }

    fn data_inflate_size(&self) -> usize {
        self.data_storage_size()
    }

    fn get_value_append(&self, id: u32, buf: &mut Vec<u8>) -> Result<()> {
        let inner = self.inner.read();
        let row = inner.rows.get(&id).ok_or(StorageError::NotFound)?;
        buf.extend_from_slice(row);
        Ok(())
    }

    fn iter_forward(&self) -> Box<dyn Iterator<Item = (u32, Vec<u8>)> + '_> {
        let entries: Vec<_> = self.inner.read().rows.iter().map(|(&id, row)| (id, row.clone())).collect();
        Box::new(entries.into_iter())
    }

    fn iter_backward(&self) -> Box<dyn Iterator<Item = (u32, Vec<u8>)> + '_> {
        let entries: Vec<_> = self
            .inner
            .read()
            .rows
            .iter()
            .rev()
            .map(|(&id, row)| (id, row.clone()))
            .collect();
        Box::new(entries.into_iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_assigns_sequential_ids() {
        let store = WritableRowStore::new();
        assert_eq!(store.append(b"a"), 0);
        assert_eq!(store.append(b"b"), 1);
        assert_eq!(store.num_rows(), 2);
    }

    #[test]
    fn remove_keeps_id_populated_with_empty_value() {
        let store = WritableRowStore::new();
        let id = store.append(b"hello");
        store.remove(id).unwrap();
        let mut buf = Vec::new();
        store.get_value_append(id, &mut buf).unwrap();
        assert!(buf.is_empty());
        assert!(store.seek_exact(id));
    }

    #[test]
    fn live_bytes_estimate_tracks_writes() {
        let store = WritableRowStore::new();
        store.append(b"hello");
        assert_eq!(store.live_bytes_estimate(), 5);
        store.update(0, b"hi").unwrap();
        assert_eq!(store.live_bytes_estimate(), 7);
    }

    #[test]
    fn save_load_round_trips() {
        let store = WritableRowStore::new();
        store.append(b"abc");
        store.append(b"de");
        let mut buf = Vec::new();
        store.save(&mut buf).unwrap();
        let loaded = WritableRowStore::load(&buf[..]).unwrap();
        assert_eq!(loaded.num_rows(), 2);
        let mut out = Vec::new();
        loaded.get_value_append(1, &mut out).unwrap();
        assert_eq!(out, b"de");
    }
}
