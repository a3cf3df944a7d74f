//! Thin, named wrappers over the `metrics` facade.
//!
//! Mirrors the per-crate `metrics.rs` convention used elsewhere in this
//! codebase: one free function per tracked event rather than scattering
//! `counter!`/`gauge!` call sites through the engine, so the set of
//! emitted metrics is greppable from one file.

use metrics::{
    counter,
    gauge,
    histogram,
};

pub fn log_segment_frozen() {
    counter!("segdb_segment_freeze_total").increment(1);
}

pub fn log_segment_converted(rows: u64) {
    counter!("segdb_segment_convert_total").increment(1);
    histogram!("segdb_segment_convert_rows").record(rows as f64);
}

pub fn log_segment_merged(segments_merged: u64) {
    counter!("segdb_segment_merge_total").increment(1);
    histogram!("segdb_segment_merge_width").record(segments_merged as f64);
}

pub fn log_segment_purged(rows_dropped: u64) {
    counter!("segdb_segment_purge_total").increment(1);
    histogram!("segdb_segment_purge_rows_dropped").record(rows_dropped as f64);
}

pub fn log_segment_quarantined() {
    counter!("segdb_segment_quarantined_total").increment(1);
}

pub fn log_checkpoint() {
    counter!("segdb_checkpoint_total").increment(1);
}

pub fn log_upsert_retry() {
    counter!("segdb_upsert_retry_total").increment(1);
}

pub fn log_upsert_exhausted() {
    counter!("segdb_upsert_retry_exhausted_total").increment(1);
}

pub fn log_ticket_wait(kind: &'static str) {
    counter!("segdb_ticket_wait_total", "kind" => kind).increment(1);
}

pub fn log_transaction_committed() {
    counter!("segdb_transaction_committed_total").increment(1);
}

pub fn log_transaction_rolled_back() {
    counter!("segdb_transaction_rolled_back_total").increment(1);
}

pub fn log_active_segments(count: u64) {
    gauge!("segdb_active_segments").set(count as f64);
}

pub fn log_tombstone_density(segment_index: u64, density: f64) {
    gauge!("segdb_segment_tombstone_density", "segment" => segment_index.to_string())
        .set(density);
}
