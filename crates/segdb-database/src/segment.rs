//! Segment kinds: one writable segment accepting inserts, any number of
//! readonly (frozen/converted) segments behind it.
//!
//! Grounded on `terark::terichdb::db_segment.hpp`'s class lattice
//! (`ReadableSegment` → `ColgroupSegment` → `{ReadonlySegment,
//! WritableSegment → {PlainWritableSegment, ColgroupWritableSegment}}`),
//! collapsed from inheritance into the tagged variants below per
//! SPEC_FULL.md §9's "deep inheritance" redesign flag. `m_segMutex`'s
//! `tbb::spin_rw_mutex` becomes `parking_lot::RwLock`, its idiomatic Rust
//! analogue.

use std::collections::{
    HashMap,
    HashSet,
};

use parking_lot::{
    Mutex,
    RwLock,
};
use segdb_errors::{
    Result,
    StorageError,
};
use segdb_indexing::{
    IndexStore,
    KvIndex,
};
use segdb_storage::{
    ColumnGroupStore,
    DeletedBitset,
    ReadableStore,
    WritableRowStore,
};
use segdb_value::{
    RecId,
    RowSchema,
};

/// Reserved column-group name carrying the full, undivided row, the way a
/// `Plain` writable segment always does and a converted `Colgroup`
/// segment's `remainder` does for columns no index needed to split out.
/// Readonly segments key this same data under the same name so `getValue`
/// works identically across segment kinds.
pub const ROW_COLUMN_GROUP: &str = "__row__";

/// The on-disk `meta.json` kind tag of §6.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentKind {
    Readonly,
    WritablePlain,
    WritableColgroup,
    /// A lifecycle job hit `Corrupt` rebuilding one of this segment's
    /// indexes; row data survived but the segment is retired from further
    /// convert/merge/purge attempts (§7).
    Quarantined,
}

/// How a writable segment lays out row data: whole rows in one KV
/// (`PlainWritableSegment`), or split per column group plus a catch-all
/// row store for the remainder (`ColgroupWritableSegment`).
pub enum WritableLayout {
    Plain(WritableRowStore),
    Colgroup {
        groups: HashMap<String, ColumnGroupStore>,
        remainder: WritableRowStore,
    },
}

/// Sparse set of logical ids touched since the last snapshot, consumed by
/// the lifecycle controller when it replaces the owning segment (§3).
#[derive(Default)]
struct UpdateList(Mutex<HashSet<u32>>);

impl UpdateList {
    fn mark(&self, id: u32) {
        self.0.lock().insert(id);
    }

    /// Takes and clears the set, handing ownership to whoever is about to
    /// replace this segment.
    fn drain(&self) -> HashSet<u32> {
        std::mem::take(&mut *self.0.lock())
    }
}

/// State shared by both writable layouts.
pub struct WritableSegment {
    layout: WritableLayout,
    indexes: HashMap<String, IndexStore>,
    /// `isDel`, guarded because writers flip bits concurrently with reads.
    tombstones: RwLock<DeletedBitset>,
    /// `m_deletedWrIdSet`: recyclable sub-ids freed by `remove`. Collected
    /// but never drained — see DESIGN.md Open Question 1.
    deleted_wr_id_set: Mutex<Vec<u32>>,
    update_list: UpdateList,
    is_frozen: RwLock<bool>,
    /// `(index, key)` pairs staged for each sub-id at insert/update time,
    /// so `remove`/`replace_index_entries` know what to undo without the
    /// caller having to remember (§3 invariant 2: a tombstoned row leaves
    /// no trace in any index).
    row_index_entries: Mutex<HashMap<u32, (RecId, Vec<(String, Vec<u8>)>)>>,
}

impl WritableSegment {
    pub fn new_plain(capacity_hint: usize) -> Self {
        WritableSegment {
            layout: WritableLayout::Plain(WritableRowStore::new()),
            indexes: HashMap::new(),
            tombstones: RwLock::new(DeletedBitset::new(capacity_hint)),
            deleted_wr_id_set: Mutex::new(Vec::new()),
            update_list: UpdateList::default(),
            is_frozen: RwLock::new(false),
            row_index_entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn new_colgroup(groups: HashMap<String, ColumnGroupStore>, capacity_hint: usize) -> Self {
        WritableSegment {
            layout: WritableLayout::Colgroup {
                groups,
                remainder: WritableRowStore::new(),
            },
            indexes: HashMap::new(),
            tombstones: RwLock::new(DeletedBitset::new(capacity_hint)),
            deleted_wr_id_set: Mutex::new(Vec::new()),
            update_list: UpdateList::default(),
            is_frozen: RwLock::new(false),
            row_index_entries: Mutex::new(HashMap::new()),
        }
    }

    /// Builds an empty writable segment matching `schema`'s column-group
    /// and index layout: one `WritableRow` store per declared column
    /// group (or the bare `Plain` layout when the schema declares none),
    /// plus one fresh `Kv`-backed index per declared index. Used both for
    /// a table's very first segment and by `do_freeze` to replace the
    /// segment it just froze, so every writable segment a table ever has
    /// carries the same indexes.
    pub fn new_from_schema(schema: &RowSchema) -> Self {
        let mut segment = if schema.column_groups.is_empty() {
            WritableSegment::new_plain(0)
        } else {
            let groups = schema
                .column_groups
                .iter()
                .map(|group| (group.name.clone(), ColumnGroupStore::WritableRow(WritableRowStore::new())))
                .collect();
            WritableSegment::new_colgroup(groups, 0)
        };
        for index in &schema.indexes {
            segment.add_index(index.name.clone(), IndexStore::Kv(KvIndex::new(index.kind)));
        }
        segment
    }

    pub fn kind(&self) -> SegmentKind {
        match self.layout {
            WritableLayout::Plain(_) => SegmentKind::WritablePlain,
            WritableLayout::Colgroup { .. } => SegmentKind::WritableColgroup,
        }
    }

    pub fn index(&self, name: &str) -> Option<&IndexStore> {
        self.indexes.get(name)
    }

    pub fn indexes(&self) -> &HashMap<String, IndexStore> {
        &self.indexes
    }

    pub fn add_index(&mut self, name: impl Into<String>, index: IndexStore) {
        self.indexes.insert(name.into(), index);
    }

    /// The per-column-group stores of a `Colgroup` layout, or `None` for
    /// `Plain`. Used by `convert` to rebuild each group in its frozen form.
    pub fn column_groups(&self) -> Option<&HashMap<String, ColumnGroupStore>> {
        match &self.layout {
            WritableLayout::Colgroup { groups, .. } => Some(groups),
            WritableLayout::Plain(_) => None,
        }
    }

    pub fn is_frozen(&self) -> bool {
        *self.is_frozen.read()
    }

    /// Stops the segment accepting further writes; readers are unaffected.
    pub fn freeze(&self) {
        *self.is_frozen.write() = true;
    }

    pub fn num_rows(&self) -> usize {
        match &self.layout {
            WritableLayout::Plain(rows) => rows.num_rows(),
            WritableLayout::Colgroup { remainder, .. } => remainder.num_rows(),
        }
    }

    /// `append`: serializes the row (splitting across column groups for the
    /// colgroup layout) and returns the assigned sub-id.
    pub fn append(&self, row: &[u8], column_values: &HashMap<String, Vec<u8>>) -> Result<u32> {
        if self.is_frozen() {
            return Err(StorageError::WriteThrottle);
        }
        let id = match &self.layout {
            WritableLayout::Plain(rows) => rows.append(row),
            WritableLayout::Colgroup { groups, remainder } => {
                let mut assigned = None;
                for (name, store) in groups {
                    let value = column_values.get(name).map(Vec::as_slice).unwrap_or(&[]);
                    let id = store.append(value)?;
                    assigned.get_or_insert(id);
                }
                assigned.unwrap_or_else(|| remainder.append(row))
            },
        };
        self.tombstones.write().resize((id as usize) + 1);
        self.update_list.mark(id);
        Ok(id)
    }

    pub fn update(&self, id: u32, row: &[u8], column_values: &HashMap<String, Vec<u8>>) -> Result<()> {
        if self.is_frozen() {
            return Err(StorageError::WriteThrottle);
        }
        match &self.layout {
            WritableLayout::Plain(rows) => rows.update(id, row)?,
            WritableLayout::Colgroup { groups, remainder } => {
                for (name, store) in groups {
                    if let Some(value) = column_values.get(name) {
                        store.update(id, value)?;
                    }
                }
                remainder.update(id, row)?;
            },
        }
        self.update_list.mark(id);
        Ok(())
    }

    /// `remove`: sets the tombstone bit and records the sub-id as
    /// recyclable (not yet reused, per §9 open question). Does not touch
    /// any index — callers that staged index entries for `id` must go
    /// through [`WritableSegment::remove_with_indexes`] instead.
    pub fn remove(&self, id: u32) -> Result<()> {
        self.tombstones.write().set_bit(id)?;
        self.deleted_wr_id_set.lock().push(id);
        self.update_list.mark(id);
        Ok(())
    }

    /// Records the `(index, key)` pairs committed for sub-id `id` under
    /// `rec_id`, so a later `remove_with_indexes`/`replace_index_entries`
    /// can undo exactly what was staged at insert time.
    pub fn record_index_entries(&self, id: u32, rec_id: RecId, entries: Vec<(String, Vec<u8>)>) {
        self.row_index_entries.lock().insert(id, (rec_id, entries));
    }

    fn take_index_entries(&self, id: u32) -> Option<(RecId, Vec<(String, Vec<u8>)>)> {
        self.row_index_entries.lock().remove(&id)
    }

    /// Removes every index entry recorded for `id` (best effort — a
    /// missing index is skipped rather than failing the whole removal),
    /// then tombstones it. This is what `removeRow` must use instead of
    /// the bare [`WritableSegment::remove`] so a deleted row stops being
    /// reachable through any index it was ever staged against (§3
    /// invariant 2).
    pub fn remove_with_indexes(&self, id: u32) -> Result<()> {
        if let Some((rec_id, entries)) = self.take_index_entries(id) {
            for (name, key) in entries {
                if let Some(index) = self.indexes.get(&name) {
                    let _ = index.remove(&key, rec_id);
                }
            }
        }
        self.remove(id)
    }

    /// Swaps whatever index entries `id` previously carried for
    /// `new_entries`, inserting each under `rec_id`. A unique-key
    /// collision on one of the new entries aborts before any old entry is
    /// removed, leaving the row's indexing unchanged — unless the only
    /// existing hit is `rec_id` itself, i.e. the row is re-declaring the
    /// same key it already owns, which is not a collision.
    pub fn replace_index_entries(&self, id: u32, rec_id: RecId, new_entries: Vec<(String, Vec<u8>)>) -> Result<()> {
        for (name, key) in &new_entries {
            let index = self
                .indexes
                .get(name)
                .ok_or_else(|| StorageError::invariant(format!("no such index {name}")))?;
            if index.is_unique() {
                let mut hits = Vec::new();
                index.search_exact(key, &mut hits)?;
                if hits.iter().any(|&hit| hit != rec_id) {
                    return Err(StorageError::DuplicateKey);
                }
            }
        }
        if let Some((_, old_entries)) = self.take_index_entries(id) {
            for (name, key) in old_entries {
                if let Some(index) = self.indexes.get(&name) {
                    let _ = index.remove(&key, rec_id);
                }
            }
        }
        for (name, key) in &new_entries {
            if let Some(index) = self.indexes.get(name) {
                index.insert(key, rec_id)?;
            }
        }
        self.row_index_entries.lock().insert(id, (rec_id, new_entries));
        Ok(())
    }

    /// Takes the set of ids touched since the last time this was called.
    /// The lifecycle controller drains this when it freezes or replaces
    /// the segment, per SPEC_FULL.md §3.
    pub fn drain_update_list(&self) -> HashSet<u32> {
        self.update_list.drain()
    }

    pub fn is_deleted(&self, id: u32) -> bool {
        self.tombstones.read().is_set(id)
    }

    pub fn get_value_append(&self, id: u32, buf: &mut Vec<u8>) -> Result<()> {
        if self.is_deleted(id) {
            return Err(StorageError::DeletedRow);
        }
        match &self.layout {
            WritableLayout::Plain(rows) => rows.get_value_append(id, buf),
            WritableLayout::Colgroup { remainder, .. } => remainder.get_value_append(id, buf),
        }
    }

    pub fn column_group(&self, name: &str) -> Option<&ColumnGroupStore> {
        match &self.layout {
            WritableLayout::Colgroup { groups, .. } => groups.get(name),
            WritableLayout::Plain(_) => None,
        }
    }

    pub fn live_bytes_estimate(&self) -> usize {
        match &self.layout {
            WritableLayout::Plain(rows) => rows.live_bytes_estimate(),
            WritableLayout::Colgroup { groups, remainder } => {
                remainder.live_bytes_estimate() + groups.values().map(|g| g.data_storage_size()).sum::<usize>()
            },
        }
    }

    pub fn tombstone_density(&self) -> f64 {
        let tombstones = self.tombstones.read();
        if tombstones.len() == 0 {
            return 0.0;
        }
        tombstones.num_set() as f64 / tombstones.len() as f64
    }

    pub fn freed_sub_ids(&self) -> Vec<u32> {
        self.deleted_wr_id_set.lock().clone()
    }

    /// Clones the current tombstone bitmap. Used by `convert` to carry
    /// deletions made before freeze forward into the readonly segment.
    pub fn tombstones_snapshot(&self) -> DeletedBitset {
        self.tombstones.read().clone()
    }

    /// Rebuilds a standalone full-row store from this segment's current
    /// contents, for `convert` to install under the reserved `__row__`
    /// column group of the readonly segment it replaces this one with.
    pub fn snapshot_rows(&self) -> WritableRowStore {
        let store = WritableRowStore::new();
        let mut buf = Vec::new();
        for id in 0..self.num_rows() as u32 {
            buf.clear();
            if self.get_value_append(id, &mut buf).is_ok() {
                store.append(&buf);
            } else {
                store.append(&[]);
            }
        }
        store
    }
}

/// Immutable segment produced by `convert`/`merge`/`purge`.
///
/// "Immutable" refers to its column-group stores and indexes, not its
/// tombstones: a row that lived in a segment before it was frozen can still
/// be deleted afterwards, so `isDel` keeps the same `RwLock` shape as the
/// writable segment's. §5's "readonly-frozen segments need no latch for
/// tombstone reads" describes the steady state once conversion is done and
/// no concurrent delete is in flight, not a structural guarantee — an
/// uncontended `parking_lot::RwLock` read is already effectively latch-free.
pub struct ReadonlySegment {
    column_groups: HashMap<String, ColumnGroupStore>,
    indexes: HashMap<String, IndexStore>,
    is_del: RwLock<DeletedBitset>,
    is_purged: RwLock<Option<DeletedBitset>>,
}

impl ReadonlySegment {
    pub fn new(
        column_groups: HashMap<String, ColumnGroupStore>,
        indexes: HashMap<String, IndexStore>,
        is_del: DeletedBitset,
    ) -> Self {
        ReadonlySegment {
            column_groups,
            indexes,
            is_del: RwLock::new(is_del),
            is_purged: RwLock::new(None),
        }
    }

    pub fn kind(&self) -> SegmentKind {
        SegmentKind::Readonly
    }

    pub fn num_rows(&self) -> usize {
        self.is_del.read().len()
    }

    pub fn index(&self, name: &str) -> Option<&IndexStore> {
        self.indexes.get(name)
    }

    pub fn indexes(&self) -> &HashMap<String, IndexStore> {
        &self.indexes
    }

    pub fn column_group(&self, name: &str) -> Option<&ColumnGroupStore> {
        self.column_groups.get(name)
    }

    pub fn column_groups(&self) -> &HashMap<String, ColumnGroupStore> {
        &self.column_groups
    }

    pub fn is_deleted(&self, id: u32) -> bool {
        self.is_del.read().is_set(id) || self.is_purged.read().as_ref().is_some_and(|p| p.is_set(id))
    }

    /// Clones the current tombstone bitmap, e.g. for `merge`/`purge` to
    /// carry deletions forward into the segment that replaces this one.
    pub fn is_del_snapshot(&self) -> DeletedBitset {
        self.is_del.read().clone()
    }

    /// Tombstones a row that belongs to this already-converted segment.
    pub fn remove(&self, id: u32) -> Result<()> {
        self.is_del.write().set_bit(id)
    }

    pub fn get_value_append(&self, column_group: &str, id: u32, buf: &mut Vec<u8>) -> Result<()> {
        if self.is_deleted(id) {
            return Err(StorageError::DeletedRow);
        }
        let store = self.column_groups.get(column_group).ok_or(StorageError::NotFound)?;
        store.get_value_append(id, buf)
    }

    /// Full-row read via the reserved [`ROW_COLUMN_GROUP`], mirroring
    /// `WritableSegment::get_value_append`.
    pub fn get_row_append(&self, id: u32, buf: &mut Vec<u8>) -> Result<()> {
        self.get_value_append(ROW_COLUMN_GROUP, id, buf)
    }

    pub fn tombstone_density(&self) -> f64 {
        let is_del = self.is_del.read();
        if is_del.len() == 0 {
            return 0.0;
        }
        is_del.num_set() as f64 / is_del.len() as f64
    }

    /// Sum of each column group's on-disk footprint, used by
    /// `LifecycleController::maybe_merge` to bound a merge run by total
    /// bytes rather than just segment count.
    pub fn data_storage_size(&self) -> usize {
        self.column_groups.values().map(|g| g.data_storage_size()).sum()
    }

    /// Installs a purge bitmap, replacing any previous one. Called only
    /// under the publish-then-retire protocol of §4.7.
    pub fn set_purged(&self, is_purged: DeletedBitset) {
        *self.is_purged.write() = Some(is_purged);
    }
}

/// A segment a lifecycle job gave up on after hitting `StorageError::Corrupt`
/// while rebuilding one of its indexes (§7). Row data survives — it was
/// rebuilt by the infallible column-group path before the index step
/// failed — but the segment carries no indexes and is excluded from every
/// future convert/merge/purge attempt (`as_readonly` returns `None` for
/// it), so a bad index can't wedge the lifecycle queue.
pub struct QuarantinedSegment {
    inner: ReadonlySegment,
}

impl QuarantinedSegment {
    pub fn new(inner: ReadonlySegment) -> Self {
        QuarantinedSegment { inner }
    }

    pub fn inner(&self) -> &ReadonlySegment {
        &self.inner
    }
}

pub enum Segment {
    Readonly(ReadonlySegment),
    Writable(WritableSegment),
    Quarantined(QuarantinedSegment),
}

impl Segment {
    pub fn kind(&self) -> SegmentKind {
        match self {
            Segment::Readonly(s) => s.kind(),
            Segment::Writable(s) => s.kind(),
            Segment::Quarantined(_) => SegmentKind::Quarantined,
        }
    }

    pub fn num_rows(&self) -> usize {
        match self {
            Segment::Readonly(s) => s.num_rows(),
            Segment::Writable(s) => s.num_rows(),
            Segment::Quarantined(s) => s.inner().num_rows(),
        }
    }

    pub fn is_deleted(&self, id: u32) -> bool {
        match self {
            Segment::Readonly(s) => s.is_deleted(id),
            Segment::Writable(s) => s.is_deleted(id),
            Segment::Quarantined(s) => s.inner().is_deleted(id),
        }
    }

    pub fn as_writable(&self) -> Option<&WritableSegment> {
        match self {
            Segment::Writable(s) => Some(s),
            Segment::Readonly(_) | Segment::Quarantined(_) => None,
        }
    }

    /// `None` for a quarantined segment even though it wraps a
    /// `ReadonlySegment` internally — excluding it here is what keeps
    /// `maybe_merge`/`do_merge`/`do_purge`'s segment scans from ever
    /// picking it back up.
    pub fn as_readonly(&self) -> Option<&ReadonlySegment> {
        match self {
            Segment::Readonly(s) => Some(s),
            Segment::Writable(_) | Segment::Quarantined(_) => None,
        }
    }

    pub fn as_quarantined(&self) -> Option<&QuarantinedSegment> {
        match self {
            Segment::Quarantined(s) => Some(s),
            Segment::Readonly(_) | Segment::Writable(_) => None,
        }
    }

    pub fn index(&self, name: &str) -> Option<&IndexStore> {
        match self {
            Segment::Readonly(s) => s.index(name),
            Segment::Writable(s) => s.index(name),
            Segment::Quarantined(s) => s.inner().index(name),
        }
    }

    /// Tombstones `id` regardless of which kind owns it — a row inserted
    /// before the segment froze can still be removed after conversion.
    /// Does not touch any index; writable callers that staged index
    /// entries should resolve `as_writable` and call
    /// `remove_with_indexes` instead.
    pub fn remove(&self, id: u32) -> Result<()> {
        match self {
            Segment::Readonly(s) => s.remove(id),
            Segment::Writable(s) => s.remove(id),
            Segment::Quarantined(s) => s.inner().remove(id),
        }
    }

    /// Full-row read, delegating to the reserved row column group on
    /// readonly segments and the remainder/plain store on writable ones.
    pub fn get_row_append(&self, id: u32, buf: &mut Vec<u8>) -> Result<()> {
        match self {
            Segment::Readonly(s) => s.get_row_append(id, buf),
            Segment::Writable(s) => s.get_value_append(id, buf),
            Segment::Quarantined(s) => s.inner().get_row_append(id, buf),
        }
    }

    pub fn column_group(&self, name: &str) -> Option<&ColumnGroupStore> {
        match self {
            Segment::Readonly(s) => s.column_group(name),
            Segment::Writable(s) => s.column_group(name),
            Segment::Quarantined(s) => s.inner().column_group(name),
        }
    }

    pub fn tombstone_density(&self) -> f64 {
        match self {
            Segment::Readonly(s) => s.tombstone_density(),
            Segment::Writable(s) => s.tombstone_density(),
            Segment::Quarantined(s) => s.inner().tombstone_density(),
        }
    }

    /// Ids touched since the last drain. Readonly and quarantined segments
    /// never accumulate new touches outside of a publish-then-retire swap,
    /// so they drain empty.
    pub fn drain_update_list(&self) -> HashSet<u32> {
        match self {
            Segment::Readonly(_) | Segment::Quarantined(_) => HashSet::new(),
            Segment::Writable(s) => s.drain_update_list(),
        }
    }
}

#[cfg(test)]
mod tests {
    use segdb_value::{
        IndexKind,
        IndexSchema,
    };

    use super::*;

    #[test]
    fn plain_writable_segment_append_and_read() {
        let segment = WritableSegment::new_plain(0);
        let id = segment.append(b"row-bytes", &HashMap::new()).unwrap();
        let mut buf = Vec::new();
        segment.get_value_append(id, &mut buf).unwrap();
        assert_eq!(buf, b"row-bytes");
    }

    #[test]
    fn remove_marks_tombstone_and_records_free_id() {
        let segment = WritableSegment::new_plain(0);
        let id = segment.append(b"x", &HashMap::new()).unwrap();
        segment.remove(id).unwrap();
        assert!(segment.is_deleted(id));
        assert_eq!(segment.freed_sub_ids(), vec![id]);

        let mut buf = Vec::new();
        assert!(matches!(segment.get_value_append(id, &mut buf), Err(StorageError::DeletedRow)));
    }

    #[test]
    fn frozen_segment_rejects_writes() {
        let segment = WritableSegment::new_plain(0);
        segment.freeze();
        assert!(matches!(segment.append(b"x", &HashMap::new()), Err(StorageError::WriteThrottle)));
    }

    #[test]
    fn update_list_tracks_touched_ids_and_drains_once() {
        let segment = WritableSegment::new_plain(0);
        let a = segment.append(b"a", &HashMap::new()).unwrap();
        let b = segment.append(b"b", &HashMap::new()).unwrap();
        segment.update(a, b"a2", &HashMap::new()).unwrap();
        segment.remove(b).unwrap();

        let touched = segment.drain_update_list();
        assert_eq!(touched, HashSet::from([a, b]));
        assert!(segment.drain_update_list().is_empty());
    }

    #[test]
    fn new_from_schema_carries_over_declared_indexes() {
        let schema = RowSchema {
            columns: Vec::new(),
            column_groups: Vec::new(),
            indexes: vec![IndexSchema {
                name: "by_email".to_string(),
                key_columns: vec![],
                kind: IndexKind::Unique,
                ordered: false,
                needs_byte_lex_encode: false,
            }],
        };
        let segment = WritableSegment::new_from_schema(&schema);
        assert_eq!(segment.kind(), SegmentKind::WritablePlain);
        let index = segment.index("by_email").unwrap();
        assert!(index.is_unique());
    }
}
