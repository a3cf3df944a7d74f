//! A dense, persisted bitmap of logical row indices. Used both as a
//! segment's `isDel` tombstone bitmap and, on readonly segments, its
//! `isPurged` bitmap — same shape, different meaning.

use std::{
    io::{
        Read,
        Write,
    },
    mem,
};

use bitvec::{
    slice::BitSlice,
    vec::BitVec,
};
use byteorder::{
    LittleEndian,
    ReadBytesExt,
    WriteBytesExt,
};
use segdb_errors::{
    Result,
    StorageError,
};

/// Format: `[ version:u8 ] [ count:u32 ] [ num_set:u32 ] [ u64 words ]*`.
pub const DELETED_BITSET_VERSION: u8 = 1;

#[derive(Clone, Default, Debug)]
pub struct DeletedBitset {
    bits: BitVec,
    num_set: usize,
}

impl DeletedBitset {
    pub fn new(count: usize) -> Self {
        let mut result = DeletedBitset {
            bits: BitVec::new(),
            num_set: 0,
        };
        result.resize(count);
        result
    }

    pub fn resize(&mut self, size: usize) {
        self.bits.resize(size, false);
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn num_set(&self) -> usize {
        self.num_set
    }

    /// `isDel(id)` / `isPurged(id)`: out-of-range ids read as set, matching
    /// the convention that a row past the known row count cannot be live.
    pub fn is_set(&self, id: u32) -> bool {
        let offset = id as usize;
        offset >= self.bits.len() || self.bits[offset]
    }

    pub fn clear_bit(&mut self, id: u32) {
        let offset = id as usize;
        if self.bits[offset] {
            self.bits.set(offset, false);
            self.num_set -= 1;
        }
    }

    pub fn bitslice(&self) -> &BitSlice {
        &self.bits
    }

    /// Sets bit `id`. Fails with `Invariant` if the bit was already set —
    /// double-delete is a programmer bug, not a retryable condition.
    pub fn set_bit(&mut self, id: u32) -> Result<()> {
        if self.is_set(id) {
            return Err(StorageError::invariant(format!("row {id} already marked")));
        }
        self.bits.set(id as usize, true);
        self.num_set += 1;
        Ok(())
    }

    fn check_invariants(&mut self) -> Result<()> {
        if self.num_set != self.bits.count_ones() {
            return Err(StorageError::corrupt("deleted bitset set-count mismatch"));
        }
        self.bits.force_align();
        self.bits.set_uninitialized(false);
        Ok(())
    }

    pub fn save(&mut self, mut out: impl Write) -> Result<()> {
        self.check_invariants()?;

        let count = self.len();
        let expected_words = count.next_multiple_of(64) / 64;
        if self.bits.as_raw_slice().len() != expected_words {
            return Err(StorageError::invariant("bitset word count mismatch"));
        }
        if mem::size_of::<usize>() * 8 != 64 {
            return Err(StorageError::invariant("deleted bitset requires a 64-bit platform"));
        }

        out.write_u8(DELETED_BITSET_VERSION).map_err(anyhow::Error::from)?;
        out.write_u32::<LittleEndian>(count as u32).map_err(anyhow::Error::from)?;
        out.write_u32::<LittleEndian>(self.num_set as u32)
            .map_err(anyhow::Error::from)?;
        for word in self.bits.as_raw_slice() {
            out.write_u64::<LittleEndian>(*word as u64).map_err(anyhow::Error::from)?;
        }
        out.flush().map_err(anyhow::Error::from)?;
        Ok(())
    }

    pub fn load(file_len: usize, mut input: impl Read) -> Result<Self> {
        if mem::size_of::<usize>() * 8 != 64 {
            return Err(StorageError::invariant("deleted bitset requires a 64-bit platform"));
        }

        let version = input.read_u8().map_err(anyhow::Error::from)?;
        if version != DELETED_BITSET_VERSION {
            return Err(StorageError::corrupt(format!("unsupported deleted bitset version {version}")));
        }
        let num_bits = input.read_u32::<LittleEndian>().map_err(anyhow::Error::from)? as usize;
        let num_set = input.read_u32::<LittleEndian>().map_err(anyhow::Error::from)? as usize;
        if num_set > num_bits {
            return Err(StorageError::corrupt("deleted bitset set-count exceeds bit count"));
        }

        let num_words = num_bits.next_multiple_of(64) / 64;
        let expected_len = 1 + 4 + 4 + num_words * 8;
        if expected_len != file_len {
            return Err(StorageError::corrupt("deleted bitset file length mismatch"));
        }

        let mut words = vec![0u64; num_words];
        input.read_u64_into::<LittleEndian>(&mut words).map_err(anyhow::Error::from)?;
        let mut bits = BitVec::from_vec(words.into_iter().map(|w| w as usize).collect());
        bits.resize(num_bits, false);

        if bits.count_ones() != num_set {
            return Err(StorageError::corrupt("deleted bitset contents don't match recorded set-count"));
        }

        Ok(DeletedBitset { bits, num_set })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_query_round_trip() {
        let mut bs = DeletedBitset::new(10);
        bs.set_bit(3).unwrap();
        bs.set_bit(7).unwrap();
        assert!(bs.is_set(3));
        assert!(bs.is_set(7));
        assert!(!bs.is_set(0));
        assert_eq!(bs.num_set(), 2);
    }

    #[test]
    fn double_set_is_an_invariant_violation() {
        let mut bs = DeletedBitset::new(4);
        bs.set_bit(1).unwrap();
        assert!(bs.set_bit(1).is_err());
    }

    #[test]
    fn save_load_round_trips() {
        let mut bs = DeletedBitset::new(130);
        bs.set_bit(0).unwrap();
        bs.set_bit(64).unwrap();
        bs.set_bit(129).unwrap();

        let mut buf = Vec::new();
        bs.save(&mut buf).unwrap();
        let loaded = DeletedBitset::load(buf.len(), &buf[..]).unwrap();

        assert_eq!(loaded.num_set(), 3);
        assert!(loaded.is_set(0));
        assert!(loaded.is_set(64));
        assert!(loaded.is_set(129));
        assert!(!loaded.is_set(1));
    }

    #[test]
    fn out_of_range_id_reads_as_set() {
        let bs = DeletedBitset::new(4);
        assert!(bs.is_set(100));
    }
}
