use std::fmt;

/// A stable 63-bit row identifier assigned at insert time by the table.
///
/// A `RecId` never changes for the life of the row: deletion tombstones it
/// but does not free the id, and the id space is only compacted by purge.
/// The top bit is reserved (kept unset) so the value always fits a signed
/// 64-bit integer on any host language binding to this engine.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecId(u64);

pub const MAX_REC_ID: u64 = (1 << 63) - 1;

impl RecId {
    pub fn new(id: u64) -> Self {
        assert!(id <= MAX_REC_ID, "recId {id} exceeds the 63-bit id space");
        RecId(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for RecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecId({})", self.0)
    }
}

impl fmt::Display for RecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RecId {
    fn from(id: u64) -> Self {
        RecId::new(id)
    }
}

impl From<RecId> for u64 {
    fn from(id: RecId) -> Self {
        id.0
    }
}
