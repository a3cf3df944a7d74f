//! The engine's external operation surface (§6): the named entry points a
//! host embeds against, composing `Table`, `LifecycleController` and
//! `EngineConfig`. Not a CLI and not a query planner — every method here
//! corresponds 1:1 to one of §6's listed operations.

use std::{
    collections::HashMap,
    sync::Arc,
    time::Duration,
};

use regex::Regex;
use segdb_errors::{
    Result,
    StorageError,
};
use segdb_indexing::IndexStore;
use segdb_value::{
    RecId,
    RowSchema,
};

use crate::{
    config::EngineConfig,
    lifecycle::LifecycleController,
    segment::{
        Segment,
        WritableSegment,
    },
    table::Table,
    ticket::TicketHolder,
    transaction::Transaction,
};

/// One column's proposed index key, paired with the index it belongs to.
/// Engine callers build these from their schema; the engine itself has no
/// opinion on how a row's bytes map to a key (that's `segdb-value`'s job).
pub struct IndexWrite {
    pub index: String,
    pub key: Vec<u8>,
}

pub struct Engine {
    table: Arc<Table>,
    lifecycle: Arc<LifecycleController>,
    config: EngineConfig,
    read_tickets: TicketHolder,
    write_tickets: TicketHolder,
}

impl Engine {
    /// Opens a table with no declared columns, column groups or indexes —
    /// every row stored whole, no secondary index maintained.
    pub fn new(config: EngineConfig) -> Self {
        Self::new_with_schema(config, RowSchema::empty())
    }

    /// Opens a table whose column-group layout and indexes follow
    /// `schema`. The schema is fixed for the table's lifetime: every
    /// writable segment `do_freeze` creates afterwards is built from the
    /// same schema, so an index declared up front survives every freeze.
    pub fn new_with_schema(config: EngineConfig, schema: RowSchema) -> Self {
        let table = Arc::new(Table::new_with_schema(schema));
        table.push_segment(Segment::Writable(WritableSegment::new_from_schema(table.schema())));
        let lifecycle = Arc::new(LifecycleController::new(Arc::clone(&table), config.clone()));
        let read_tickets = TicketHolder::new(config.concurrent_read_tickets);
        let write_tickets = TicketHolder::new(config.concurrent_write_tickets);
        Engine {
            table,
            lifecycle,
            config,
            read_tickets,
            write_tickets,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Acquires a read ticket, blocking if every one of
    /// `concurrent_read_tickets` is currently held. Tries the non-blocking
    /// path first so the common uncontended case never touches the condvar.
    fn acquire_read_ticket(&self) -> crate::ticket::TicketGuard<'_> {
        if let Some(guard) = self.read_tickets.try_acquire() {
            return guard;
        }
        segdb_metrics::log_ticket_wait("read");
        self.read_tickets.acquire()
    }

    fn acquire_write_ticket(&self) -> crate::ticket::TicketGuard<'_> {
        if let Some(guard) = self.write_tickets.try_acquire() {
            return guard;
        }
        segdb_metrics::log_ticket_wait("write");
        self.write_tickets.acquire()
    }

    /// `recId`s whose owning segment currently reports them tombstoned.
    /// Used to filter `index_search_exact`/`index_match_regex` results: a
    /// trie-backed (readonly) index entry can't be physically removed, so
    /// a row removed after conversion stays in the index until the
    /// segment's next merge/purge rewrite and must be filtered at read
    /// time instead (§3 invariant 2, §7).
    fn is_tombstoned(&self, rec_id: RecId) -> bool {
        match self.table.resolve(rec_id) {
            Ok((idx, sub_id)) => self.table.with_segment(idx, |segment| segment.is_deleted(sub_id)).unwrap_or(true),
            Err(_) => true,
        }
    }

    /// `insertRow`: appends the row to the active writable segment, then
    /// stages every caller-supplied index entry inside one transaction
    /// against that segment. A unique-index collision rolls the index
    /// transaction back and tombstones the row it was staged against,
    /// rather than leaving an unreachable, unindexed row occupying a
    /// recId forever.
    pub fn insert_row(&self, row: &[u8], column_values: &HashMap<String, Vec<u8>>, index_writes: &[IndexWrite]) -> Result<RecId> {
        let _ticket = self.acquire_write_ticket();
        let rec_id = self.table.insert_row(row, column_values)?;
        let (idx, sub_id) = self.table.resolve(rec_id)?;
        let staged = self.table.with_segment(idx, |segment| {
            let writable = segment.as_writable().ok_or_else(|| StorageError::invariant("freshly inserted row is not in a writable segment"))?;
            let mut txn = Transaction::start(writable, rec_id, sub_id);
            for write in index_writes {
                if !txn.index_insert(&write.index, write.key.clone())? {
                    txn.rollback();
                    return Err(StorageError::DuplicateKey);
                }
            }
            txn.commit()?;
            let entries = index_writes.iter().map(|w| (w.index.clone(), w.key.clone())).collect();
            writable.record_index_entries(sub_id, rec_id, entries);
            Ok(())
        })?;
        if let Err(err) = staged {
            // Drop our own write ticket before calling back into
            // `remove_row`, which acquires its own — holding two at once
            // would self-deadlock a holder configured with capacity 1.
            drop(_ticket);
            let _ = self.remove_row(rec_id);
            return Err(err);
        }
        self.lifecycle.maybe_freeze();
        Ok(rec_id)
    }

    /// `upsertRow` (§4.6): looks up every unique index named in
    /// `index_writes` by its key. All misses → insert. A single consistent
    /// hit → update that row. Disagreeing hits → `AmbiguousUpsert`. Races
    /// with a concurrent upserter surface as a miss-then-duplicate on
    /// retry; exhausting `upsert_max_retry` surfaces `NeedRetry`.
    pub fn upsert_row(&self, row: &[u8], column_values: &HashMap<String, Vec<u8>>, index_writes: &[IndexWrite]) -> Result<RecId> {
        for _ in 0..self.config.upsert_max_retry {
            let mut hits: Option<RecId> = None;
            for write in index_writes {
                let is_unique = (0..self.table.num_segments()).any(|seg_idx| {
                    self.table
                        .with_segment(seg_idx, |segment| segment.index(&write.index).map(|i| i.is_unique()).unwrap_or(false))
                        .unwrap_or(false)
                });
                if !is_unique {
                    continue;
                }
                let found = self.index_search_exact(&write.index, &write.key)?.first().copied();
                match (hits, found) {
                    (None, Some(id)) => hits = Some(id),
                    (Some(existing), Some(id)) if existing != id => return Err(StorageError::AmbiguousUpsert),
                    _ => {},
                }
            }
            match hits {
                None => match self.insert_row(row, column_values, index_writes) {
                    Ok(id) => return Ok(id),
                    Err(StorageError::DuplicateKey) => continue, // lost the race; retry as an update
                    Err(err) => return Err(err),
                },
                Some(existing) => match self.update_row(existing, row, column_values, index_writes) {
                    Ok(new_id) => return Ok(new_id),
                    Err(StorageError::NotFound | StorageError::DeletedRow) => continue, // lost the race; retry as an insert
                    Err(err) => return Err(err),
                },
            }
        }
        Err(StorageError::NeedRetry)
    }

    /// `updateRow`: in-place on the active writable segment, returning the
    /// same recId. A row that already lives in a converted (readonly)
    /// segment cannot be updated in place — its column-group stores are
    /// immutable once frozen — so it is tombstoned there and its
    /// replacement reinserted under a new recId, which callers must use
    /// going forward.
    pub fn update_row(&self, rec_id: RecId, row: &[u8], column_values: &HashMap<String, Vec<u8>>, index_writes: &[IndexWrite]) -> Result<RecId> {
        let _ticket = self.acquire_write_ticket();
        let (idx, sub_id) = self.table.resolve(rec_id)?;
        let handled = self.table.with_segment(idx, |segment| match segment {
            Segment::Writable(writable) => {
                // Swap index entries first: a `DuplicateKey` collision
                // aborts here with the row's bytes still untouched, rather
                // than leaving updated row data pointed at by a stale index
                // entry.
                let entries = index_writes.iter().map(|w| (w.index.clone(), w.key.clone())).collect();
                writable.replace_index_entries(sub_id, rec_id, entries)?;
                writable.update(sub_id, row, column_values)?;
                Ok(true)
            },
            Segment::Readonly(_) | Segment::Quarantined(_) => Ok(false),
        })??;
        if handled {
            Ok(rec_id)
        } else {
            // Same reasoning as `insert_row`'s rollback: release before
            // calling into methods that acquire their own write ticket.
            drop(_ticket);
            self.remove_row(rec_id)?;
            self.insert_row(row, column_values, index_writes)
        }
    }

    /// `removeRow`: tombstones `recId` wherever it lives, readonly or
    /// writable (§8 invariant 4). A writable segment also drops every
    /// index entry staged for the row, so it stops being reachable
    /// through an index without waiting for that segment's next
    /// merge/purge rewrite.
    pub fn remove_row(&self, rec_id: RecId) -> Result<()> {
        let _ticket = self.acquire_write_ticket();
        let (idx, sub_id) = self.table.resolve(rec_id)?;
        self.table.with_segment(idx, |segment| match segment {
            Segment::Writable(writable) => writable.remove_with_indexes(sub_id),
            Segment::Readonly(ro) => ro.remove(sub_id),
            Segment::Quarantined(q) => q.inner().remove(sub_id),
        })??;
        self.lifecycle.maybe_purge(idx);
        Ok(())
    }

    /// `getValue`: the full row, or `DeletedRow`/`NotFound` per §7.
    pub fn get_value(&self, rec_id: RecId) -> Result<Vec<u8>> {
        let _ticket = self.acquire_read_ticket();
        let (idx, sub_id) = self.table.resolve(rec_id)?;
        self.table.with_segment(idx, |segment| {
            let mut buf = Vec::new();
            segment.get_row_append(sub_id, &mut buf)?;
            Ok(buf)
        })?
    }

    /// `selectColumns`/`selectColgroups`: a single named column group's
    /// bytes for one row, from whichever segment owns it.
    pub fn select_column_group(&self, rec_id: RecId, group: &str) -> Result<Vec<u8>> {
        let _ticket = self.acquire_read_ticket();
        let (idx, sub_id) = self.table.resolve(rec_id)?;
        self.table.with_segment(idx, |segment| {
            if segment.is_deleted(sub_id) {
                return Err(StorageError::DeletedRow);
            }
            let store = segment.column_group(group).ok_or(StorageError::NotFound)?;
            let mut buf = Vec::new();
            store.get_value_append(sub_id, &mut buf)?;
            Ok(buf)
        })?
    }

    /// `indexSearchExact`, unioned across every segment that carries
    /// `index` under this name (each segment's index is segment-local,
    /// but entries carry table-wide recIds, so a plain concatenation is
    /// correct without re-offsetting).
    pub fn index_search_exact(&self, index: &str, key: &[u8]) -> Result<Vec<RecId>> {
        let _ticket = self.acquire_read_ticket();
        let mut out = Vec::new();
        for seg_idx in 0..self.table.num_segments() {
            self.table.with_segment(seg_idx, |segment| {
                if let Some(store) = segment.index(index) {
                    let _ = store.search_exact(key, &mut out);
                }
            })?;
        }
        // A trie-backed (readonly) index entry can't be physically removed
        // on delete, so a row tombstoned after its segment converted can
        // still show up here until the segment's next merge/purge.
        out.retain(|rec_id| !self.is_tombstoned(*rec_id));
        Ok(out)
    }

    pub fn index_key_exists(&self, index: &str, key: &[u8]) -> Result<bool> {
        Ok(!self.index_search_exact(index, key)?.is_empty())
    }

    /// `indexMatchRegex`: only meaningful against trie-backed (readonly)
    /// indexes; entries from every readonly segment carrying this index
    /// are combined, budget-limited per segment.
    pub fn index_match_regex(&self, index: &str, pattern: &Regex) -> Result<Option<Vec<RecId>>> {
        let _ticket = self.acquire_read_ticket();
        let mut out = Vec::new();
        for seg_idx in 0..self.table.num_segments() {
            let matched = self.table.with_segment(seg_idx, |segment| match segment.index(index) {
                Some(store @ IndexStore::Trie(_)) => store.match_regex(pattern, self.config.regex_match_mem_limit),
                // A KV-backed (still-writable) or absent index contributes
                // nothing to the scan rather than failing it outright.
                _ => Ok(Some(Vec::new())),
            })??;
            match matched {
                Some(ids) => out.extend(ids),
                None => return Ok(None),
            }
        }
        out.retain(|rec_id| !self.is_tombstoned(*rec_id));
        Ok(Some(out))
    }

    /// `createIndexIterForward`/`createIndexIterBackward`: a materialized
    /// snapshot of one segment's index entries, in key order. Ordered
    /// traversal across *all* segments for one logical index would need a
    /// k-way merge keyed on the decoded key; out of scope here, matching
    /// how `segdb-indexing::Cursor` already operates on one already-merged
    /// entry set rather than a live multi-segment stream.
    pub fn create_index_iter_forward(&self, segment_index: usize, index: &str) -> Result<Vec<(Vec<u8>, RecId)>> {
        let _ticket = self.acquire_read_ticket();
        self.table.with_segment(segment_index, |segment| segment.index(index).map(|s| s.iter_forward()).unwrap_or_default())
    }

    pub fn create_index_iter_backward(&self, segment_index: usize, index: &str) -> Result<Vec<(Vec<u8>, RecId)>> {
        let _ticket = self.acquire_read_ticket();
        self.table.with_segment(segment_index, |segment| segment.index(index).map(|s| s.iter_backward()).unwrap_or_default())
    }

    /// `createTableIterForward`: every live row across every segment, in
    /// recId order, skipping tombstones (§4.1's "iterators skip tombstoned
    /// rows").
    pub fn create_table_iter_forward(&self) -> Result<Vec<(RecId, Vec<u8>)>> {
        let _ticket = self.acquire_read_ticket();
        let mut out = Vec::new();
        let mut base: u64 = 0;
        for seg_idx in 0..self.table.num_segments() {
            let (rows, num_rows) = self.table.with_segment(seg_idx, |segment| {
                let mut rows = Vec::new();
                for sub_id in 0..segment.num_rows() as u32 {
                    if segment.is_deleted(sub_id) {
                        continue;
                    }
                    let mut buf = Vec::new();
                    if segment.get_row_append(sub_id, &mut buf).is_ok() {
                        rows.push((RecId::new(base + sub_id as u64), buf));
                    }
                }
                (rows, segment.num_rows())
            })?;
            base += num_rows as u64;
            out.extend(rows);
        }
        Ok(out)
    }

    /// `syncFinishWriting`: drains every queued lifecycle job (freeze,
    /// convert, merge, purge, checkpoint) synchronously, for callers that
    /// need "everything written so far is now durable and visible" rather
    /// than waiting on the background poll loop.
    pub fn sync_finish_writing(&self) {
        while self.lifecycle.run_one() {}
    }

    /// `safeStopAndWaitForCompress`: finishes any in-flight lifecycle work
    /// then signals the background worker to stop.
    pub fn safe_stop_and_wait_for_compress(&self) {
        self.sync_finish_writing();
        self.lifecycle.shutdown();
    }

    pub fn spawn_lifecycle_worker(&self, poll_interval: Duration) -> std::thread::JoinHandle<()> {
        self.lifecycle.spawn_worker(poll_interval)
    }
}

#[cfg(test)]
mod tests {
    use segdb_value::{
        IndexKind,
        IndexSchema,
    };

    use super::*;

    fn schema_with_unique_index(name: &str) -> RowSchema {
        RowSchema {
            columns: Vec::new(),
            column_groups: Vec::new(),
            indexes: vec![IndexSchema {
                name: name.to_string(),
                key_columns: vec![],
                kind: IndexKind::Unique,
                ordered: false,
                needs_byte_lex_encode: false,
            }],
        }
    }

    #[test]
    fn insert_then_get_value_roundtrips() {
        let engine = Engine::new(EngineConfig::default());
        let id = engine.insert_row(b"hello", &HashMap::new(), &[]).unwrap();
        assert_eq!(engine.get_value(id).unwrap(), b"hello");
    }

    #[test]
    fn insert_with_duplicate_unique_key_rolls_back_and_tombstones_the_orphan_row() {
        let engine = Engine::new_with_schema(EngineConfig::default(), schema_with_unique_index("by_email"));
        let writes = [IndexWrite {
            index: "by_email".to_string(),
            key: b"a@example.com".to_vec(),
        }];
        let first = engine.insert_row(b"first", &HashMap::new(), &writes).unwrap();
        let err = engine.insert_row(b"second", &HashMap::new(), &writes).unwrap_err();
        assert!(matches!(err, StorageError::DuplicateKey));

        // only the first row's index entry survives; the second row was
        // physically appended before the index collision was discovered,
        // so it's tombstoned rather than left live and unreachable.
        assert!(engine.index_key_exists("by_email", b"a@example.com").unwrap());
        assert_eq!(engine.get_value(first).unwrap(), b"first");
        let rows = engine.create_table_iter_forward().unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn remove_row_then_get_value_sees_deleted_row() {
        let engine = Engine::new(EngineConfig::default());
        let id = engine.insert_row(b"row", &HashMap::new(), &[]).unwrap();
        engine.remove_row(id).unwrap();
        assert!(matches!(engine.get_value(id), Err(StorageError::DeletedRow)));
    }

    #[test]
    fn create_table_iter_forward_skips_removed_rows() {
        let engine = Engine::new(EngineConfig::default());
        let a = engine.insert_row(b"a", &HashMap::new(), &[]).unwrap();
        let _b = engine.insert_row(b"b", &HashMap::new(), &[]).unwrap();
        engine.remove_row(a).unwrap();

        let rows = engine.create_table_iter_forward().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1, b"b");
    }

    #[test]
    fn upsert_inserts_on_first_call_and_updates_on_second() {
        let engine = Engine::new_with_schema(EngineConfig::default(), schema_with_unique_index("by_email"));
        let writes = [IndexWrite {
            index: "by_email".to_string(),
            key: b"a@example.com".to_vec(),
        }];

        let first = engine.upsert_row(b"v1", &HashMap::new(), &writes).unwrap();
        assert_eq!(engine.get_value(first).unwrap(), b"v1");

        let second = engine.upsert_row(b"v2", &HashMap::new(), &writes).unwrap();
        assert_eq!(second, first);
        assert_eq!(engine.get_value(first).unwrap(), b"v2");
    }

    #[test]
    fn upsert_with_disagreeing_unique_hits_is_ambiguous() {
        let schema = RowSchema {
            columns: Vec::new(),
            column_groups: Vec::new(),
            indexes: vec![
                IndexSchema {
                    name: "by_email".to_string(),
                    key_columns: vec![],
                    kind: IndexKind::Unique,
                    ordered: false,
                    needs_byte_lex_encode: false,
                },
                IndexSchema {
                    name: "by_ssn".to_string(),
                    key_columns: vec![],
                    kind: IndexKind::Unique,
                    ordered: false,
                    needs_byte_lex_encode: false,
                },
            ],
        };
        let engine = Engine::new_with_schema(EngineConfig::default(), schema);

        engine
            .insert_row(
                b"alice",
                &HashMap::new(),
                &[IndexWrite {
                    index: "by_email".to_string(),
                    key: b"a@example.com".to_vec(),
                }],
            )
            .unwrap();
        engine
            .insert_row(
                b"bob",
                &HashMap::new(),
                &[IndexWrite {
                    index: "by_ssn".to_string(),
                    key: b"123-45-6789".to_vec(),
                }],
            )
            .unwrap();

        let conflicting = [
            IndexWrite {
                index: "by_email".to_string(),
                key: b"a@example.com".to_vec(),
            },
            IndexWrite {
                index: "by_ssn".to_string(),
                key: b"123-45-6789".to_vec(),
            },
        ];
        let err = engine.upsert_row(b"carol", &HashMap::new(), &conflicting).unwrap_err();
        assert!(matches!(err, StorageError::AmbiguousUpsert));
    }

    #[test]
    fn update_row_on_a_frozen_segment_reinserts_under_a_new_rec_id() {
        // a flush size of 0 means the very first insert is already over
        // budget, so `sync_finish_writing` freezes and converts it.
        let mut config = EngineConfig::default();
        config.writable_flush_size = 0;
        let engine = Engine::new(config);
        let id = engine.insert_row(b"v1", &HashMap::new(), &[]).unwrap();
        engine.sync_finish_writing();

        let new_id = engine.update_row(id, b"v2", &HashMap::new(), &[]).unwrap();
        assert_ne!(new_id, id);
        assert!(matches!(engine.get_value(id), Err(StorageError::DeletedRow)));
        assert_eq!(engine.get_value(new_id).unwrap(), b"v2");
    }

    #[test]
    fn index_search_exact_finds_rows_across_a_frozen_and_a_writable_segment() {
        let mut config = EngineConfig::default();
        config.writable_flush_size = 0;
        let engine = Engine::new_with_schema(config, schema_with_unique_index("by_email"));

        let writes = |key: &[u8]| {
            vec![IndexWrite {
                index: "by_email".to_string(),
                key: key.to_vec(),
            }]
        };
        let first = engine.insert_row(b"alice", &HashMap::new(), &writes(b"a@example.com")).unwrap();
        engine.sync_finish_writing(); // freezes+converts the segment holding `first`
        let _second = engine.insert_row(b"bob", &HashMap::new(), &writes(b"b@example.com")).unwrap();

        assert_eq!(engine.index_search_exact("by_email", b"a@example.com").unwrap(), vec![first]);
        assert!(engine.index_key_exists("by_email", b"b@example.com").unwrap());
        assert!(!engine.index_key_exists("by_email", b"nobody@example.com").unwrap());
    }

    #[test]
    fn safe_stop_and_wait_for_compress_does_not_panic_with_no_pending_work() {
        let engine = Engine::new(EngineConfig::default());
        engine.insert_row(b"row", &HashMap::new(), &[]).unwrap();
        engine.safe_stop_and_wait_for_compress();
    }
}
