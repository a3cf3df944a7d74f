//! Writable, KV-backed index used by the active writable segment.
//!
//! Grounded on `terark::terichdb::WritableIndex` (wraps an embedded KV
//! store per the spec, §4.2 "Writable contract"): every mutation takes
//! the index's own read-write latch rather than relying on the segment
//! latch, matching §5's "store-internal latches" note.

use std::{
    collections::BTreeMap,
    io::{
        Read,
        Write,
    },
};

use byteorder::{
    LittleEndian,
    ReadBytesExt,
    WriteBytesExt,
};
use parking_lot::RwLock;
use segdb_errors::{
    Result,
    StorageError,
};
use segdb_value::{
    IndexKind,
    RecId,
};

const KV_INDEX_VERSION: u8 = 1;

pub struct KvIndex {
    kind: IndexKind,
    map: RwLock<BTreeMap<Vec<u8>, Vec<RecId>>>,
}

impl KvIndex {
    pub fn new(kind: IndexKind) -> Self {
        KvIndex {
            kind,
            map: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.map.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `insert`: returns `Ok(false)` without side effect on a unique-key
    /// violation, per §4.5's "unique-key violation" contract.
    pub fn insert(&self, key: &[u8], id: RecId) -> Result<bool> {
        let mut map = self.map.write();
        let entry = map.entry(key.to_vec()).or_default();
        if self.kind == IndexKind::Unique && !entry.is_empty() {
            return Ok(false);
        }
        // recIds are assigned monotonically table-wide, so pushing keeps
        // each key's run in (key, recId) order without needing a sort.
        entry.push(id);
        Ok(true)
    }

    pub fn remove(&self, key: &[u8], id: RecId) -> Result<()> {
        let mut map = self.map.write();
        if let Some(ids) = map.get_mut(key) {
            ids.retain(|&existing| existing != id);
            if ids.is_empty() {
                map.remove(key);
            }
        }
        Ok(())
    }

    pub fn search_exact(&self, key: &[u8], out: &mut Vec<RecId>) -> Result<()> {
        if let Some(ids) = self.map.read().get(key) {
            out.extend_from_slice(ids);
        }
        Ok(())
    }

    pub fn key_exists(&self, key: &[u8]) -> bool {
        self.map.read().contains_key(key)
    }

    pub fn seek_lower_bound(&self, key: &[u8]) -> Option<(Vec<u8>, i8)> {
        let map = self.map.read();
        if map.contains_key(key) {
            return Some((key.to_vec(), 0));
        }
        map.range(key.to_vec()..).next().map(|(k, _)| (k.clone(), 1))
    }

    pub fn iter_forward(&self) -> Vec<(Vec<u8>, RecId)> {
        self.map
            .read()
            .iter()
            .flat_map(|(k, ids)| ids.iter().map(move |&id| (k.clone(), id)))
            .collect()
    }

    pub fn iter_backward(&self) -> Vec<(Vec<u8>, RecId)> {
        self.map
            .read()
            .iter()
            .rev()
            .flat_map(|(k, ids)| ids.iter().rev().map(move |&id| (k.clone(), id)))
            .collect()
    }

    /// Serialize for checkpoint/conversion. Format: version byte, kind
    /// byte, entry count, then `(key_len, key bytes, id_count, ids)*`.
    pub fn save(&self, mut out: impl Write) -> Result<()> {
        let map = self.map.read();
        out.write_u8(KV_INDEX_VERSION)
            .map_err(anyhow::Error::from)?;
        out.write_u8(match self.kind {
            IndexKind::Unique => 0,
            IndexKind::Duplicable => 1,
        })
        .map_err(anyhow::Error::from)?;
        out.write_u32::<LittleEndian>(map.len() as u32)
            .map_err(anyhow::Error::from)?;
        for (key, ids) in map.iter() {
            out.write_u32::<LittleEndian>(key.len() as u32)
                .map_err(anyhow::Error::from)?;
            out.write_all(key).map_err(anyhow::Error::from)?;
            out.write_u32::<LittleEndian>(ids.len() as u32)
                .map_err(anyhow::Error::from)?;
            for id in ids {
                out.write_u64::<LittleEndian>(id.as_u64())
                    .map_err(anyhow::Error::from)?;
            }
        }
        Ok(())
    }

    pub fn load(mut input: impl Read) -> Result<Self> {
        let version = input.read_u8().map_err(anyhow::Error::from)?;
        if version != KV_INDEX_VERSION {
            return Err(StorageError::corrupt(format!(
                "unsupported kv index version {version}"
            )));
        }
        let kind = match input.read_u8().map_err(anyhow::Error::from)? {
            0 => IndexKind::Unique,
            1 => IndexKind::Duplicable,
            other => return Err(StorageError::corrupt(format!("bad index kind tag {other}"))),
        };
        let entry_count = input.read_u32::<LittleEndian>().map_err(anyhow::Error::from)?;
        let mut map = BTreeMap::new();
        for _ in 0..entry_count {
            let key_len = input.read_u32::<LittleEndian>().map_err(anyhow::Error::from)? as usize;
            let mut key = vec![0u8; key_len];
            input.read_exact(&mut key).map_err(anyhow::Error::from)?;
            let id_count = input.read_u32::<LittleEndian>().map_err(anyhow::Error::from)?;
            let mut ids = Vec::with_capacity(id_count as usize);
            for _ in 0..id_count {
                ids.push(RecId::new(
                    input.read_u64::<LittleEndian>().map_err(anyhow::Error::from)?,
                ));
            }
            map.insert(key, ids);
        }
        Ok(KvIndex {
            kind,
            map: RwLock::new(map),
        })
    }
}
