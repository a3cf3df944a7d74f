//! The segment array: the ordered list of segments backing one table, plus
//! the bookkeeping needed to translate a table-wide recId into a segment
//! and sub-id, per §4.6.

use std::sync::atomic::{
    AtomicU64,
    Ordering,
};

use parking_lot::Mutex;
use segdb_errors::{
    Result,
    StorageError,
};
use segdb_value::{
    RecId,
    RowSchema,
};

use crate::segment::Segment;

struct Inner {
    segments: Vec<Segment>,
    /// Cumulative row counts; `row_num_vec[i+1] - row_num_vec[i]` is
    /// segment `i`'s logical row count. Length is `segments.len() + 1`.
    row_num_vec: Vec<u64>,
    /// Index of the sole writable segment, always last when present.
    active_writable_index: Option<usize>,
}

/// Guards `segments`, `row_num_vec` and `active_writable_index` (§5's
/// "table segment mutex"). `snapshot_version` and `seg_array_seq` are
/// separate atomics so readers can poll staleness without taking the lock.
pub struct Table {
    inner: Mutex<Inner>,
    schema: RowSchema,
    snapshot_version: AtomicU64,
    seg_array_seq: AtomicU64,
    next_rec_id: AtomicU64,
}

impl Table {
    pub fn new() -> Self {
        Self::new_with_schema(RowSchema::empty())
    }

    /// A table whose writable segments (the initial one and every one
    /// `do_freeze` creates afterwards) carry `schema`'s column groups and
    /// indexes, so an index created on the table's first segment is still
    /// there after every later freeze.
    pub fn new_with_schema(schema: RowSchema) -> Self {
        Table {
            inner: Mutex::new(Inner {
                segments: Vec::new(),
                row_num_vec: vec![0],
                active_writable_index: None,
            }),
            schema,
            snapshot_version: AtomicU64::new(0),
            seg_array_seq: AtomicU64::new(0),
            next_rec_id: AtomicU64::new(0),
        }
    }

    pub fn schema(&self) -> &RowSchema {
        &self.schema
    }

    pub fn snapshot_version(&self) -> u64 {
        self.snapshot_version.load(Ordering::Acquire)
    }

    pub fn seg_array_seq(&self) -> u64 {
        self.seg_array_seq.load(Ordering::Acquire)
    }

    fn bump_commit(&self) -> u64 {
        self.snapshot_version.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn bump_seg_array(&self) -> u64 {
        self.seg_array_seq.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// `append` path (§4.6): reserves the next recId under the table
    /// mutex, calls the writable segment's `append`, and only advances
    /// `row_num_vec` on success.
    pub fn insert_row(&self, row: &[u8], column_values: &std::collections::HashMap<String, Vec<u8>>) -> Result<RecId> {
        let mut inner = self.inner.lock();
        let writable_idx = inner.active_writable_index.ok_or(StorageError::WriteThrottle)?;
        let rec_id = RecId::new(self.next_rec_id.load(Ordering::Acquire));

        let writable = inner.segments[writable_idx]
            .as_writable()
            .ok_or_else(|| StorageError::invariant("active_writable_index does not point at a writable segment"))?;
        writable.append(row, column_values)?;

        self.next_rec_id.fetch_add(1, Ordering::AcqRel);
        let last = *inner.row_num_vec.last().expect("row_num_vec is never empty");
        *inner.row_num_vec.last_mut().expect("row_num_vec is never empty") = last + 1;
        drop(inner);
        self.bump_commit();
        Ok(rec_id)
    }

    /// Appends a freshly built segment (writable or readonly) to the end
    /// of the array and bumps `seg_array_seq`. Used by both initial table
    /// construction and the lifecycle controller's freeze step.
    pub fn push_segment(&self, segment: Segment) {
        let mut inner = self.inner.lock();
        let is_writable = segment.as_writable().is_some();
        let rows = segment.num_rows() as u64;
        inner.segments.push(segment);
        if is_writable {
            inner.active_writable_index = Some(inner.segments.len() - 1);
        }
        let last = *inner.row_num_vec.last().expect("row_num_vec is never empty");
        inner.row_num_vec.push(last + rows);
        drop(inner);
        self.bump_seg_array();
    }

    /// Atomically replaces a contiguous run `[start, end)` of segments
    /// with a single new segment (convert/merge/purge's publish step),
    /// per §4.7's publish-then-retire protocol. Row ids are preserved
    /// because `row_num_vec`'s endpoints for the run are unchanged.
    pub fn replace_segments(&self, start: usize, end: usize, replacement: Segment) -> Result<()> {
        let mut inner = self.inner.lock();
        if start >= end || end > inner.segments.len() {
            return Err(StorageError::invariant("replace_segments: invalid range"));
        }
        let expected_rows: u64 = inner.row_num_vec[end] - inner.row_num_vec[start];
        if replacement.num_rows() as u64 != expected_rows {
            return Err(StorageError::invariant("replacement segment row count does not match the run it replaces"));
        }
        if replacement.as_writable().is_some() {
            return Err(StorageError::invariant("replace_segments never installs a writable segment"));
        }
        inner.segments.splice(start..end, std::iter::once(replacement));
        inner.row_num_vec.splice((start + 1)..(end + 1), std::iter::empty());
        if let Some(active) = inner.active_writable_index {
            inner.active_writable_index = Some(if active >= end { active - (end - start) + 1 } else { active });
        }
        drop(inner);
        self.bump_seg_array();
        Ok(())
    }

    /// Resolves a table-wide recId to `(segment index, sub-id)` via binary
    /// search over `row_num_vec`.
    pub fn resolve(&self, rec_id: RecId) -> Result<(usize, u32)> {
        let inner = self.inner.lock();
        let r = rec_id.as_u64();
        let total = *inner.row_num_vec.last().expect("row_num_vec is never empty");
        if r >= total {
            return Err(StorageError::NotFound);
        }
        // `r < total` guarantees a match lands strictly before the last
        // entry, so both branches index a real segment.
        let idx = match inner.row_num_vec.binary_search(&r) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let sub_id = (r - inner.row_num_vec[idx]) as u32;
        Ok((idx, sub_id))
    }

    pub fn with_segment<R>(&self, idx: usize, f: impl FnOnce(&Segment) -> R) -> Result<R> {
        let inner = self.inner.lock();
        let segment = inner.segments.get(idx).ok_or(StorageError::NotFound)?;
        Ok(f(segment))
    }

    pub fn num_segments(&self) -> usize {
        self.inner.lock().segments.len()
    }

    pub fn total_rows(&self) -> u64 {
        *self.inner.lock().row_num_vec.last().expect("row_num_vec is never empty")
    }

    pub fn active_writable_index(&self) -> Option<usize> {
        self.inner.lock().active_writable_index
    }
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use crate::segment::WritableSegment;

    use super::*;

    #[test]
    fn insert_row_advances_row_num_vec_only_on_success() {
        let table = Table::new();
        table.push_segment(Segment::Writable(WritableSegment::new_plain(0)));

        let rec_id = table.insert_row(b"row", &Default::default()).unwrap();
        assert_eq!(rec_id.as_u64(), 0);
        assert_eq!(table.total_rows(), 1);

        let (seg_idx, sub_id) = table.resolve(rec_id).unwrap();
        assert_eq!(seg_idx, 0);
        assert_eq!(sub_id, 0);
    }

    #[test]
    fn resolve_rejects_out_of_range_rec_id() {
        let table = Table::new();
        table.push_segment(Segment::Writable(WritableSegment::new_plain(0)));
        table.insert_row(b"row", &Default::default()).unwrap();
        assert!(table.resolve(RecId::new(5)).is_err());
    }

    #[test]
    fn insert_row_without_a_writable_segment_throttles() {
        let table = Table::new();
        assert!(matches!(table.insert_row(b"row", &Default::default()), Err(StorageError::WriteThrottle)));
    }
}
