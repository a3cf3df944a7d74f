//! Fixed-length packed column-group store: every row is `fixlen` bytes,
//! stored contiguously so `get(id)` is `base + id * fixlen`.
//!
//! Grounded on `terark::terichdb::FixedLenStore`: deletion is the
//! segment's tombstone bitmap's job, not this store's (`remove` here is a
//! no-op at the storage level), and a single caller-declared `needs_lock`
//! flag picks between a real latch and no latch at all when the caller can
//! guarantee there's only ever one writer (`unneedsLock()` in the original).

use parking_lot::RwLock;
use segdb_errors::{
    Result,
    StorageError,
};

use crate::readable_store::ReadableStore;

pub struct FixedLenStore {
    fixlen: usize,
    /// Documents the caller's single-writer contract; doesn't change how
    /// `rows` is locked (`parking_lot::RwLock` is uncontended either way).
    needs_lock: bool,
    rows: RwLock<Vec<u8>>,
}

impl FixedLenStore {
    pub fn new(fixlen: usize, needs_lock: bool) -> Self {
        FixedLenStore {
            fixlen,
            needs_lock,
            rows: RwLock::new(Vec::new()),
        }
    }

    pub fn fixlen(&self) -> usize {
        self.fixlen
    }

    pub fn needs_lock(&self) -> bool {
        self.needs_lock
    }

    pub fn unneeds_lock(&mut self) {
        self.needs_lock = false;
    }

    pub fn reserve_rows(&self, rows: usize) {
        self.rows.write().reserve(rows * self.fixlen);
    }

    /// `append`: writes `row` (must be exactly `fixlen` bytes) and returns
    /// its assigned sub-id.
    pub fn append(&self, row: &[u8]) -> Result<u32> {
        if row.len() != self.fixlen {
            return Err(StorageError::invariant(format!(
                "row length {} does not match fixlen {}",
                row.len(),
                self.fixlen
            )));
        }
        let mut rows = self.rows.write();
        let id = (rows.len() / self.fixlen) as u32;
        rows.extend_from_slice(row);
        Ok(id)
    }

    pub fn update(&self, id: u32, row: &[u8]) -> Result<()> {
        if row.len() != self.fixlen {
            return Err(StorageError::invariant(format!(
                "row length {} does not match fixlen {}",
                row.len(),
                self.fixlen
            )));
        }
        let mut rows = self.rows.write();
        let start = id as usize * self.fixlen;
        let end = start + self.fixlen;
        if end > rows.len() {
            return Err(StorageError::NotFound);
        }
        rows[start..end].copy_from_slice(row);
        Ok(())
    }

    /// No-op: tombstoning is the segment's job, per the store's contract.
    pub fn remove(&self, _id: u32) {}

    pub fn save(&self, mut out: impl std::io::Write) -> Result<()> {
        use byteorder::{
            LittleEndian,
            WriteBytesExt,
        };
        let rows = self.rows.read();
        let num_rows = (rows.len() / self.fixlen) as u32;
        out.write_u32::<LittleEndian>(num_rows).map_err(anyhow::Error::from)?;
        out.write_u32::<LittleEndian>(self.fixlen as u32)
            .map_err(anyhow::Error::from)?;
        out.write_all(&rows).map_err(anyhow::Error::from)?;
        Ok(())
    }

    pub fn load(mut input: impl std::io::Read) -> Result<Self> {
        use byteorder::{
            LittleEndian,
            ReadBytesExt,
        };
        let num_rows = input.read_u32::<LittleEndian>().map_err(anyhow::Error::from)? as usize;
        let fixlen = input.read_u32::<LittleEndian>().map_err(anyhow::Error::from)? as usize;
        let mut rows = vec![0u8; num_rows * fixlen];
        input.read_exact(&mut rows).map_err(anyhow::Error::from)?;
        Ok(FixedLenStore {
            fixlen,
            needs_lock: true,
            rows: RwLock::new(rows),
        })
    }
}

impl ReadableStore for FixedLenStore {
    fn num_rows(&self) -> usize {
        self.rows.read().len() / self.fixlen
    }

    fn data_storage_size(&self) -> usize {
        self.rows.read().len()
    }

    fn data_inflate_size(&self) -> usize {
        self.data_storage_size()
    }

    fn get_value_append(&self, id: u32, buf: &mut Vec<u8>) -> Result<()> {
        let rows = self.rows.read();
        let start = id as usize * self.fixlen;
        let end = start + self.fixlen;
        if end > rows.len() {
            return Err(StorageError::NotFound);
        }
        buf.extend_from_slice(&rows[start..end]);
        Ok(())
    }

    fn iter_forward(&self) -> Box<dyn Iterator<Item = (u32, Vec<u8>)> + '_> {
        let rows = self.rows.read().clone();
        let fixlen = self.fixlen;
        let num_rows = rows.len() / fixlen;
        Box::new((0..num_rows as u32).map(move |id| {
            let start = id as usize * fixlen;
            (id, rows[start..start + fixlen].to_vec())
        }))
    }

    fn iter_backward(&self) -> Box<dyn Iterator<Item = (u32, Vec<u8>)> + '_> {
        let rows = self.rows.read().clone();
        let fixlen = self.fixlen;
        let num_rows = rows.len() / fixlen;
        Box::new((0..num_rows as u32).rev().map(move |id| {
            let start = id as usize * fixlen;
            (id, rows[start..start + fixlen].to_vec())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_get_round_trip() {
        let store = FixedLenStore::new(4, true);
        let id0 = store.append(b"abcd").unwrap();
        let id1 = store.append(b"efgh").unwrap();
        assert_eq!(id0, 0);
        assert_eq!(id1, 1);

        let mut buf = Vec::new();
        store.get_value_append(1, &mut buf).unwrap();
        assert_eq!(buf, b"efgh");
    }

    #[test]
    fn append_rejects_wrong_width() {
        let store = FixedLenStore::new(4, true);
        assert!(store.append(b"ab").is_err());
    }

    #[test]
    fn update_overwrites_in_place() {
        let store = FixedLenStore::new(3, true);
        store.append(b"abc").unwrap();
        store.update(0, b"xyz").unwrap();
        let mut buf = Vec::new();
        store.get_value_append(0, &mut buf).unwrap();
        assert_eq!(buf, b"xyz");
    }

    #[test]
    fn save_load_round_trips() {
        let store = FixedLenStore::new(2, true);
        store.append(b"hi").unwrap();
        store.append(b"ok").unwrap();
        let mut buf = Vec::new();
        store.save(&mut buf).unwrap();
        let loaded = FixedLenStore::load(&buf[..]).unwrap();
        assert_eq!(loaded.num_rows(), 2);
        let mut out = Vec::new();
        loaded.get_value_append(1, &mut out).unwrap();
        assert_eq!(out, b"ok");
    }
}
