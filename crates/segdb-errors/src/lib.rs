//! Typed error kinds for the segment storage engine.
//!
//! The engine never uses exceptions or untyped control flow to signal
//! expected conditions (a deleted row, a duplicate key, a busy writable
//! segment). Every fallible operation returns a [`StorageError`], and the
//! read path treats `NotFound`/`DeletedRow` as plain absence rather than a
//! propagated failure.

use std::fmt;

/// The closed set of error kinds the engine can surface.
///
/// Each variant corresponds 1:1 to a named failure mode; callers match on
/// the variant rather than parsing a string or inspecting an HTTP-style
/// status code.
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    /// A unique-index insert found an existing entry for the key.
    #[error("duplicate key in unique index")]
    DuplicateKey,

    /// A read referenced a recId or index key that never existed.
    #[error("not found")]
    NotFound,

    /// A read referenced a recId whose row has been tombstoned.
    #[error("row is deleted")]
    DeletedRow,

    /// A read referenced a recId belonging to an insert not yet committed
    /// in another transaction.
    #[error("row is uncommitted")]
    UncommittedRow,

    /// On-disk state failed to decode: header mismatch, length mismatch,
    /// or a checksum failure.
    #[error("corrupt on-disk state: {0}")]
    Corrupt(String),

    /// A majority/committed snapshot was requested before any commit has
    /// ever happened.
    #[error("no committed snapshot is available yet")]
    ReadConcernUnavailable,

    /// Transient contention the caller should retry: a lost upsert race or
    /// a lock-free segment-array publish collision.
    #[error("transient contention, retry the operation")]
    NeedRetry,

    /// The embedded KV store reported an internal error.
    #[error("underlying store error")]
    StoreInternal(#[source] anyhow::Error),

    /// The writable segment is not currently accepting writes, e.g. during
    /// a freeze handover to a fresh writable segment.
    #[error("writable segment unavailable")]
    WriteThrottle,

    /// An upsert matched more than one existing row across its unique
    /// indexes; the caller's schema or data is inconsistent.
    #[error("upsert key lookups do not agree on a single existing row")]
    AmbiguousUpsert,

    /// A broken invariant. Always a programmer bug; callers should treat
    /// this as fatal rather than retry.
    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl StorageError {
    pub fn corrupt(msg: impl fmt::Display) -> Self {
        StorageError::Corrupt(msg.to_string())
    }

    pub fn invariant(msg: impl fmt::Display) -> Self {
        StorageError::Invariant(msg.to_string())
    }

    /// True for errors a caller can reasonably retry without changing
    /// anything about the request itself.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::NeedRetry | StorageError::WriteThrottle)
    }
}

impl From<anyhow::Error> for StorageError {
    fn from(err: anyhow::Error) -> Self {
        StorageError::StoreInternal(err)
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
