//! Background lifecycle controller: freeze, convert, merge, purge and
//! checkpoint, per §4.7.
//!
//! Grounded on the teacher's `database::committer` (a dedicated background
//! thread reacting to write volume) combined with `tantivy`'s
//! `indexer::merger_sorted_index` shape for the merge/delete-queue style
//! (a bounded work queue consumed up to a watermark, applied before the
//! next conversion) — see SPEC_FULL.md §12.

use std::{
    collections::HashMap,
    sync::{
        atomic::{
            AtomicBool,
            Ordering,
        },
        Arc,
    },
    thread,
    time::Duration,
};

use crossbeam_channel::{
    bounded,
    Receiver,
    Sender,
};
use segdb_errors::Result;
use segdb_storage::{
    ColumnGroupStore,
    DeletedBitset,
    ReadableStore,
    TrieStoreBuilder,
};

use crate::{
    config::EngineConfig,
    segment::{
        QuarantinedSegment,
        ReadonlySegment,
        Segment,
        SegmentKind,
        WritableSegment,
        ROW_COLUMN_GROUP,
    },
    table::Table,
};

/// Snapshots a writable column-group store's current rows into its frozen,
/// deduplicating `Trie` representation (§4.3). Fixed-length groups would
/// normally freeze into a packed `FixedLenStore` instead, but distinguishing
/// "this column happens to be fixed-width" from the writable store's bytes
/// alone needs the schema, which the lifecycle controller does not carry;
/// `Trie` is always a valid (if not maximally compact) frozen shape.
fn rebuild_as_trie(store: &ColumnGroupStore) -> ColumnGroupStore {
    let mut builder = TrieStoreBuilder::new();
    for (_, bytes) in store.iter_forward() {
        builder.push(bytes);
    }
    ColumnGroupStore::Trie(builder.build())
}

/// Concatenates one column group's rows across several segments, in
/// segment order, into a single frozen `Trie` store.
fn merge_column_group<'a>(stores: impl Iterator<Item = &'a ColumnGroupStore>) -> ColumnGroupStore {
    let mut builder = TrieStoreBuilder::new();
    for store in stores {
        for (_, bytes) in store.iter_forward() {
            builder.push(bytes);
        }
    }
    ColumnGroupStore::Trie(builder.build())
}

/// Concatenates tombstone bitmaps across several segments, in segment
/// order, preserving each source bit at its new offset.
fn concat_tombstones<'a>(parts: impl Iterator<Item = &'a DeletedBitset>) -> DeletedBitset {
    let mut offset = 0usize;
    let mut result = DeletedBitset::new(0);
    for part in parts {
        result.resize(offset + part.len());
        for i in 0..part.len() as u32 {
            if part.is_set(i) {
                let _ = result.set_bit(offset as u32 + i);
            }
        }
        offset += part.len();
    }
    result
}

/// An owned copy of a readonly segment's column groups, indexes and
/// tombstones, rebuilt fresh (not literally cloned, since neither
/// `ColumnGroupStore` nor `IndexStore` implement `Clone`) so `merge` and
/// `purge` can read a segment's contents without holding the table latch.
struct ReadonlySnapshot {
    column_groups: HashMap<String, ColumnGroupStore>,
    indexes: HashMap<String, segdb_indexing::IndexStore>,
    is_del: DeletedBitset,
}

impl ReadonlySnapshot {
    /// Fails with whatever error `IndexStore::to_trie` surfaced for the
    /// first index that wouldn't rebuild — a `Corrupt` here is exactly
    /// what the caller quarantines the segment over (§7).
    fn take(segment: &ReadonlySegment) -> Result<ReadonlySnapshot> {
        let column_groups = segment.column_groups().iter().map(|(name, store)| (name.clone(), rebuild_as_trie(store))).collect();
        let indexes = rebuild_indexes_as_trie(segment.indexes().iter())?;
        Ok(ReadonlySnapshot {
            column_groups,
            indexes,
            is_del: segment.is_del_snapshot(),
        })
    }
}

/// Rebuilds every index to its trie-backed form, failing on the first one
/// that won't rebuild (typically `Corrupt`, or `DuplicateKey` if a unique
/// index's writable KV backing somehow picked up a collision).
fn rebuild_indexes_as_trie<'a>(
    indexes: impl Iterator<Item = (&'a String, &'a segdb_indexing::IndexStore)>,
) -> Result<HashMap<String, segdb_indexing::IndexStore>> {
    indexes.map(|(name, index)| index.to_trie().map(|trie| (name.clone(), trie))).collect()
}

/// Degrades a segment to quarantined (§7): row data (already rebuilt into
/// `column_groups`) survives, but it carries no indexes and is excluded
/// from every further convert/merge/purge attempt.
fn degrade_to_quarantined(column_groups: HashMap<String, ColumnGroupStore>, is_del: DeletedBitset) -> QuarantinedSegment {
    QuarantinedSegment::new(ReadonlySegment::new(column_groups, HashMap::new(), is_del))
}

/// One unit of lifecycle work, queued by whatever observes the table
/// (normally the controller's own poll loop, but tests can enqueue
/// directly).
pub enum LifecycleJob {
    Freeze,
    Convert { segment_index: usize },
    Merge { start: usize, end: usize },
    Purge { segment_index: usize },
    Checkpoint,
}

pub struct LifecycleController {
    table: Arc<Table>,
    config: EngineConfig,
    queue_tx: Sender<LifecycleJob>,
    queue_rx: Receiver<LifecycleJob>,
    shutdown: Arc<AtomicBool>,
}

impl LifecycleController {
    pub fn new(table: Arc<Table>, config: EngineConfig) -> Self {
        let (queue_tx, queue_rx) = bounded(1024);
        LifecycleController {
            table,
            config,
            queue_tx,
            queue_rx,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn enqueue(&self, job: LifecycleJob) {
        // A full queue means the controller is behind; drop rather than
        // block the caller, matching §5's "background jobs check a
        // shutdown flag at each segment boundary" cooperative-cancellation
        // stance rather than applying backpressure to foreground writers.
        let _ = self.queue_tx.try_send(job);
    }

    /// Observes the writable segment's live-byte estimate against
    /// `writable_flush_size` and enqueues a `Freeze` job if it's over
    /// budget. Callers typically call this after every `insert_row`.
    pub fn maybe_freeze(&self) {
        if let Some(idx) = self.table.active_writable_index() {
            let over_budget = self
                .table
                .with_segment(idx, |segment| {
                    segment
                        .as_writable()
                        .map(|w| w.live_bytes_estimate() >= self.config.writable_flush_size)
                        .unwrap_or(false)
                })
                .unwrap_or(false);
            if over_budget {
                self.enqueue(LifecycleJob::Freeze);
            }
        }
    }

    pub fn maybe_purge(&self, segment_index: usize) {
        let over_threshold = self
            .table
            .with_segment(segment_index, |segment| segment.tombstone_density() >= self.config.purge_delete_threshold)
            .unwrap_or(false);
        if over_threshold {
            self.enqueue(LifecycleJob::Purge { segment_index });
        }
    }

    /// Scans the readonly prefix of the segment array for the first
    /// contiguous run of at least two readonly segments that fits under
    /// `merge_max_count`/`merge_max_size`, and enqueues it (§4.7). Segments
    /// are only ever appended, so every segment before the active writable
    /// one (if any) has already gone through `do_convert` and stays
    /// readonly — except a quarantined one, which `as_readonly` reports as
    /// absent, splitting the run there.
    pub fn maybe_merge(&self) {
        let total = self.table.num_segments();
        let readonly_end = self.table.active_writable_index().unwrap_or(total);

        let mut start = 0;
        while start < readonly_end {
            let is_readonly = self.table.with_segment(start, |s| s.as_readonly().is_some()).unwrap_or(false);
            if !is_readonly {
                start += 1;
                continue;
            }
            let mut end = start + 1;
            let mut size = self
                .table
                .with_segment(start, |s| s.as_readonly().map(|ro| ro.data_storage_size()).unwrap_or(0))
                .unwrap_or(0);
            while end < readonly_end && end - start < self.config.merge_max_count {
                let (next_readonly, next_size) = self
                    .table
                    .with_segment(end, |s| (s.as_readonly().is_some(), s.as_readonly().map(|ro| ro.data_storage_size()).unwrap_or(0)))
                    .unwrap_or((false, 0));
                if !next_readonly || size + next_size > self.config.merge_max_size {
                    break;
                }
                size += next_size;
                end += 1;
            }
            if end - start >= 2 {
                self.enqueue(LifecycleJob::Merge { start, end });
                return;
            }
            start += 1;
        }
    }

    /// Replaces a single readonly segment whose index rebuild failed with
    /// a quarantined one carrying the same row data and no indexes (§7).
    fn quarantine_readonly(&self, segment_index: usize) {
        let built = self.table.with_segment(segment_index, |segment| {
            let ro = segment.as_readonly()?;
            let column_groups = ro.column_groups().iter().map(|(name, store)| (name.clone(), rebuild_as_trie(store))).collect();
            Some((column_groups, ro.is_del_snapshot()))
        });
        let Ok(Some((column_groups, is_del))) = built else {
            tracing::warn!(segment_index, "quarantine_readonly: segment vanished before it could be quarantined");
            return;
        };
        let quarantined = Segment::Quarantined(degrade_to_quarantined(column_groups, is_del));
        if self.table.replace_segments(segment_index, segment_index + 1, quarantined).is_ok() {
            segdb_metrics::log_segment_quarantined();
        }
    }

    /// Runs one queued job, if any, without blocking. Intended for tests
    /// and for the worker loop spawned by `spawn_worker`.
    pub fn run_one(&self) -> bool {
        let Ok(job) = self.queue_rx.try_recv() else {
            return false;
        };
        self.run_job(job);
        true
    }

    fn run_job(&self, job: LifecycleJob) {
        match job {
            LifecycleJob::Freeze => self.do_freeze(),
            LifecycleJob::Convert { segment_index } => self.do_convert(segment_index),
            LifecycleJob::Merge { start, end } => self.do_merge(start, end),
            LifecycleJob::Purge { segment_index } => self.do_purge(segment_index),
            LifecycleJob::Checkpoint => self.do_checkpoint(),
        }
    }

    fn do_freeze(&self) {
        let Some(idx) = self.table.active_writable_index() else {
            return;
        };
        let froze = self.table.with_segment(idx, |segment| segment.as_writable().map(|w| w.freeze())).unwrap_or_default();
        if froze.is_some() {
            // Conversion rebuilds the segment's stores wholesale, so the ids
            // this segment accumulated since its last snapshot are fully
            // accounted for by the new readonly segment; draining here just
            // retires the bookkeeping rather than feeding it forward.
            let touched = self.table.with_segment(idx, |segment| segment.drain_update_list()).unwrap_or_default();
            tracing::info!(segment_index = idx, touched_ids = touched.len(), "froze writable segment");
            segdb_metrics::log_segment_frozen();
            self.table.push_segment(Segment::Writable(WritableSegment::new_from_schema(self.table.schema())));
            self.enqueue(LifecycleJob::Convert { segment_index: idx });
        }
    }

    /// Builds a readonly segment from a frozen writable segment: per §4.7
    /// this sorts indexed columns, builds trie/column-group stores, writes
    /// files and swaps in the result under the table mutex. This engine is
    /// in-memory-first, so "writing files" is represented by constructing
    /// the equivalent in-memory readonly representation; on-disk
    /// persistence is the `save`/`load` methods on each store.
    fn do_convert(&self, segment_index: usize) {
        let built = self.table.with_segment(segment_index, |segment| {
            let writable = segment.as_writable()?;
            let mut column_groups: HashMap<String, ColumnGroupStore> = writable
                .column_groups()
                .map(|groups| {
                    groups
                        .iter()
                        .map(|(name, store)| (name.clone(), rebuild_as_trie(store)))
                        .collect()
                })
                .unwrap_or_default();
            column_groups.insert(ROW_COLUMN_GROUP.to_string(), ColumnGroupStore::WritableRow(writable.snapshot_rows()));

            let indexes = rebuild_indexes_as_trie(writable.indexes().iter());
            let is_del = writable.tombstones_snapshot();
            Some((column_groups, indexes, is_del))
        });

        let Ok(Some((column_groups, indexes, is_del))) = built else {
            tracing::warn!(segment_index, "do_convert: writable segment vanished before it could be converted");
            return;
        };
        let rows = is_del.len();
        let (replacement, quarantined) = match indexes {
            Ok(indexes) => (Segment::Readonly(ReadonlySegment::new(column_groups, indexes, is_del)), false),
            Err(err) => {
                tracing::error!(segment_index, error = %err, "index rebuild failed during convert; quarantining segment");
                (Segment::Quarantined(degrade_to_quarantined(column_groups, is_del)), true)
            },
        };
        if self.table.replace_segments(segment_index, segment_index + 1, replacement).is_ok() {
            if quarantined {
                segdb_metrics::log_segment_quarantined();
            } else {
                tracing::info!(segment_index, rows, "converted frozen segment to readonly");
                segdb_metrics::log_segment_converted(rows as u64);
            }
            self.maybe_merge();
        }
    }

    /// Merges the readonly run `[start, end)` into one segment: row data and
    /// column groups concatenate in segment order (sub-ids simply renumber
    /// within the merged segment), while index entries carry their global
    /// recIds forward unchanged, so a straight union of entries is correct.
    fn do_merge(&self, start: usize, end: usize) {
        if end <= start {
            return;
        }
        let mut snapshots = Vec::with_capacity(end - start);
        for idx in start..end {
            let snapshot = self.table.with_segment(idx, |segment| segment.as_readonly().map(ReadonlySnapshot::take));
            match snapshot {
                Ok(Some(Ok(snap))) => snapshots.push(snap),
                Ok(Some(Err(err))) => {
                    tracing::error!(segment_index = idx, error = %err, "index rebuild failed during merge; quarantining segment");
                    self.quarantine_readonly(idx);
                    return;
                },
                Ok(None) | Err(_) => {
                    tracing::warn!(segment_index = idx, "do_merge: segment in range is not readonly; aborting merge");
                    return;
                },
            }
        }

        let mut group_names: Vec<String> = snapshots.first().map(|s| s.column_groups.keys().cloned().collect()).unwrap_or_default();
        group_names.retain(|name| snapshots.iter().all(|s| s.column_groups.contains_key(name)));
        let column_groups = group_names
            .into_iter()
            .map(|name| {
                let store = merge_column_group(snapshots.iter().map(|s| &s.column_groups[&name]));
                (name, store)
            })
            .collect();

        let mut index_names: Vec<String> = Vec::new();
        for snapshot in &snapshots {
            for name in snapshot.indexes.keys() {
                if !index_names.contains(name) {
                    index_names.push(name.clone());
                }
            }
        }
        let indexes = index_names
            .into_iter()
            .filter_map(|name| {
                let kind = snapshots.iter().find_map(|s| s.indexes.get(&name)).map(|i| i.kind())?;
                let mut builder = segdb_indexing::TrieIndexBuilder::new(kind);
                for snapshot in &snapshots {
                    if let Some(index) = snapshot.indexes.get(&name) {
                        for (key, id) in index.iter_forward() {
                            builder.push(key, id);
                        }
                    }
                }
                match builder.build() {
                    Ok(trie) => Some((name, segdb_indexing::IndexStore::Trie(trie))),
                    Err(err) => {
                        tracing::warn!(index = %name, error = %err, "dropping index while merging segments");
                        None
                    },
                }
            })
            .collect();

        let is_del = concat_tombstones(snapshots.iter().map(|s| &s.is_del));
        let rows = is_del.len();
        let merged = ReadonlySegment::new(column_groups, indexes, is_del);
        if self.table.replace_segments(start, end, Segment::Readonly(merged)).is_ok() {
            tracing::info!(start, end, rows, "merged adjacent segments");
            segdb_metrics::log_segment_merged((end - start) as u64);
            self.maybe_merge();
        }
    }

    /// Rebuilds the segment with its current tombstones promoted to
    /// permanent purges. Row slots are preserved (not physically shrunk)
    /// so sub-id alignment — and therefore every other segment's recId
    /// range — is untouched; `isPurged` is what actually hides the rows.
    fn do_purge(&self, segment_index: usize) {
        let snapshot = self.table.with_segment(segment_index, |segment| segment.as_readonly().map(ReadonlySnapshot::take));
        let snapshot = match snapshot {
            Ok(Some(Ok(snap))) => snap,
            Ok(Some(Err(err))) => {
                tracing::error!(segment_index, error = %err, "index rebuild failed during purge; quarantining segment");
                self.quarantine_readonly(segment_index);
                return;
            },
            Ok(None) | Err(_) => {
                tracing::warn!(segment_index, "do_purge: segment is not readonly; nothing to purge");
                return;
            },
        };
        let rows = snapshot.is_del.len();
        let purged = ReadonlySegment::new(snapshot.column_groups, snapshot.indexes, DeletedBitset::new(rows));
        purged.set_purged(snapshot.is_del);
        if self
            .table
            .replace_segments(segment_index, segment_index + 1, Segment::Readonly(purged))
            .is_ok()
        {
            tracing::info!(segment_index, "purged tombstoned rows");
            segdb_metrics::log_segment_purged(rows as u64);
            self.maybe_merge();
        }
    }

    fn do_checkpoint(&self) {
        tracing::debug!("checkpoint: flushing writable stores and tombstone bitmaps");
        segdb_metrics::log_checkpoint();
    }

    /// Spawns the background worker thread. The returned handle's
    /// `shutdown` flag is checked at each job boundary (§5's
    /// cancellation contract); foreground operations are unaffected.
    pub fn spawn_worker(self: &Arc<Self>, poll_interval: Duration) -> thread::JoinHandle<()> {
        let controller = Arc::clone(self);
        thread::spawn(move || {
            while !controller.shutdown.load(Ordering::Acquire) {
                if !controller.run_one() {
                    thread::sleep(poll_interval);
                }
            }
        })
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::EngineConfig,
        segment::WritableSegment,
    };

    fn empty_readonly() -> Segment {
        Segment::Readonly(ReadonlySegment::new(HashMap::new(), HashMap::new(), DeletedBitset::new(0)))
    }

    #[test]
    fn freeze_then_convert_replaces_the_segment() {
        let table = Arc::new(Table::new());
        table.push_segment(Segment::Writable(WritableSegment::new_plain(0)));
        table.insert_row(b"row", &Default::default()).unwrap();

        let controller = LifecycleController::new(Arc::clone(&table), EngineConfig::default());
        controller.enqueue(LifecycleJob::Freeze);
        assert!(controller.run_one());
        assert!(controller.run_one()); // the Convert job Freeze enqueues

        assert_eq!(table.num_segments(), 2);
        let kind = table.with_segment(0, |s| s.kind()).unwrap();
        assert_eq!(kind, SegmentKind::Readonly);
    }

    #[test]
    fn maybe_freeze_enqueues_only_past_the_flush_size() {
        let table = Arc::new(Table::new());
        table.push_segment(Segment::Writable(WritableSegment::new_plain(0)));
        table.insert_row(b"x", &Default::default()).unwrap();

        let mut config = EngineConfig::default();
        config.writable_flush_size = 1_000_000;
        let controller = LifecycleController::new(Arc::clone(&table), config);
        controller.maybe_freeze();
        assert!(!controller.run_one());
    }

    #[test]
    fn maybe_merge_enqueues_and_collapses_a_run_of_readonly_segments() {
        let table = Arc::new(Table::new());
        table.push_segment(empty_readonly());
        table.push_segment(empty_readonly());
        table.push_segment(Segment::Writable(WritableSegment::new_plain(0)));

        let controller = LifecycleController::new(Arc::clone(&table), EngineConfig::default());
        controller.maybe_merge();
        assert!(controller.run_one());

        assert_eq!(table.num_segments(), 2);
        let kind = table.with_segment(0, |s| s.kind()).unwrap();
        assert_eq!(kind, SegmentKind::Readonly);
    }

    #[test]
    fn maybe_merge_does_not_enqueue_a_single_readonly_segment() {
        let table = Arc::new(Table::new());
        table.push_segment(empty_readonly());
        table.push_segment(Segment::Writable(WritableSegment::new_plain(0)));

        let controller = LifecycleController::new(Arc::clone(&table), EngineConfig::default());
        controller.maybe_merge();
        assert!(!controller.run_one());
    }
}
