//! A transaction against one writable segment and one logical recId,
//! per §4.5.
//!
//! Grounded on `db_segment.hpp`'s `DbTransaction`/`TransactionGuard`: the
//! `{started, committed, rollbacked}` state machine and the guard that
//! asserts (there: via destructor-time `assert`; here: via an automatic
//! `rollback` and a `warn!` if the caller forgot to) that a scope never
//! exits mid-transaction.

use segdb_errors::{
    Result,
    StorageError,
};
use segdb_indexing::IndexStore;
use segdb_value::RecId;

use crate::segment::WritableSegment;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionState {
    Started,
    Committed,
    Rollbacked,
}

enum BufferedWrite {
    Remove,
}

/// One staged index mutation, applied on commit and discarded on rollback.
enum BufferedIndexOp {
    Insert { index: String, key: Vec<u8> },
    Remove { index: String, key: Vec<u8> },
}

pub struct Transaction<'seg> {
    segment: &'seg WritableSegment,
    rec_id: RecId,
    sub_id: u32,
    state: TransactionState,
    buffered_write: Option<BufferedWrite>,
    buffered_index_ops: Vec<BufferedIndexOp>,
}

impl<'seg> Transaction<'seg> {
    pub fn start(segment: &'seg WritableSegment, rec_id: RecId, sub_id: u32) -> Self {
        Transaction {
            segment,
            rec_id,
            sub_id,
            state: TransactionState::Started,
            buffered_write: None,
            buffered_index_ops: Vec::new(),
        }
    }

    pub fn rec_id(&self) -> RecId {
        self.rec_id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    fn require_started(&self) -> Result<()> {
        if self.state != TransactionState::Started {
            return Err(StorageError::invariant("transaction is not in the started state"));
        }
        Ok(())
    }

    pub fn store_remove(&mut self) -> Result<()> {
        self.require_started()?;
        self.buffered_write = Some(BufferedWrite::Remove);
        Ok(())
    }

    /// `indexInsert`: returns `false` without side effect on a unique-key
    /// violation. The mutation itself is staged, applied at `commit`.
    pub fn index_insert(&mut self, index: &str, key: Vec<u8>) -> Result<bool> {
        self.require_started()?;
        let store = self
            .segment
            .index(index)
            .ok_or_else(|| StorageError::invariant(format!("no such index {index}")))?;
        if store.is_unique() && store.key_exists(&key)? {
            return Ok(false);
        }
        self.buffered_index_ops.push(BufferedIndexOp::Insert {
            index: index.to_string(),
            key,
        });
        Ok(true)
    }

    pub fn index_remove(&mut self, index: &str, key: Vec<u8>) -> Result<()> {
        self.require_started()?;
        self.buffered_index_ops.push(BufferedIndexOp::Remove {
            index: index.to_string(),
            key,
        });
        Ok(())
    }

    /// Flushes buffered writes to the segment's KVs and releases the
    /// transaction. All errors surface as `StoreInternal`/propagate and
    /// move the transaction to `Rollbacked`, per §4.5.
    pub fn commit(mut self) -> Result<()> {
        self.require_started()?;
        if let Err(err) = self.apply_buffered() {
            self.state = TransactionState::Rollbacked;
            segdb_metrics::log_transaction_rolled_back();
            return Err(err);
        }
        self.state = TransactionState::Committed;
        segdb_metrics::log_transaction_committed();
        Ok(())
    }

    pub fn rollback(mut self) {
        self.buffered_write = None;
        self.buffered_index_ops.clear();
        self.state = TransactionState::Rollbacked;
        segdb_metrics::log_transaction_rolled_back();
    }

    fn apply_buffered(&mut self) -> Result<()> {
        match self.buffered_write.take() {
            Some(BufferedWrite::Remove) => {
                self.segment.remove(self.sub_id)?;
            },
            None => {},
        }
        for op in self.buffered_index_ops.drain(..) {
            match op {
                BufferedIndexOp::Insert { index, key } => {
                    if let Some(store) = self.segment.index(&index) {
                        store.insert(&key, self.rec_id)?;
                    }
                },
                BufferedIndexOp::Remove { index, key } => {
                    if let Some(store) = self.segment.index(&index) {
                        store.remove(&key, self.rec_id)?;
                    }
                },
            }
        }
        Ok(())
    }
}

impl Drop for Transaction<'_> {
    /// A transaction left `Started` when its scope exits (panic, early
    /// `return`, forgotten `commit`) is rolled back rather than silently
    /// leaking buffered writes, mirroring the original's destructor assert
    /// with a safe default instead of aborting the process.
    fn drop(&mut self) {
        if self.state == TransactionState::Started {
            tracing::warn!(rec_id = ?self.rec_id, "transaction dropped without commit or rollback; rolling back");
            self.buffered_write = None;
            self.buffered_index_ops.clear();
            self.state = TransactionState::Rollbacked;
            segdb_metrics::log_transaction_rolled_back();
        }
    }
}

#[cfg(test)]
mod tests {
    use segdb_indexing::KvIndex;
    use segdb_value::IndexKind;

    use super::*;

    fn segment_with_index(name: &str, kind: IndexKind) -> WritableSegment {
        let mut segment = WritableSegment::new_plain(0);
        segment.add_index(name, IndexStore::Kv(KvIndex::new(kind)));
        segment
    }

    #[test]
    fn commit_applies_buffered_index_insert() {
        let segment = segment_with_index("by_email", IndexKind::Unique);
        let sub_id = segment.append(b"row", &Default::default()).unwrap();
        let mut txn = Transaction::start(&segment, RecId::new(1), sub_id);
        assert!(txn.index_insert("by_email", b"a@example.com".to_vec()).unwrap());
        txn.commit().unwrap();

        let store = segment.index("by_email").unwrap();
        assert!(store.key_exists(b"a@example.com").unwrap());
    }

    #[test]
    fn unique_violation_returns_false_without_staging() {
        let segment = segment_with_index("by_email", IndexKind::Unique);
        segment.index("by_email").unwrap().insert(b"taken", RecId::new(1)).unwrap();
        let sub_id = segment.append(b"row", &Default::default()).unwrap();
        let mut txn = Transaction::start(&segment, RecId::new(2), sub_id);
        assert!(!txn.index_insert("by_email", b"taken".to_vec()).unwrap());
    }

    #[test]
    fn drop_without_commit_rolls_back() {
        let segment = segment_with_index("by_email", IndexKind::Unique);
        let sub_id = segment.append(b"row", &Default::default()).unwrap();
        {
            let mut txn = Transaction::start(&segment, RecId::new(1), sub_id);
            txn.index_insert("by_email", b"a@example.com".to_vec()).unwrap();
            // txn dropped here without commit
        }
        let store = segment.index("by_email").unwrap();
        assert!(!store.key_exists(b"a@example.com").unwrap());
    }

    #[test]
    fn rollback_discards_buffered_remove() {
        let segment = WritableSegment::new_plain(0);
        let sub_id = segment.append(b"row", &Default::default()).unwrap();
        let mut txn = Transaction::start(&segment, RecId::new(1), sub_id);
        txn.store_remove().unwrap();
        txn.rollback();
        assert!(!segment.is_deleted(sub_id));
    }
}
