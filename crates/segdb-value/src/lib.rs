//! Row and column-group schema, plus byte-lex order-preserving key encoding.
//!
//! This crate has no notion of segments, indexes, or storage
//! representations — it only describes the shape of a row and how to turn
//! a sequence of column values into a binary string whose `memcmp` order
//! matches the values' natural order.

pub mod heap_size;
pub mod rec_id;
pub mod row;
pub mod schema;
pub mod scalar;
pub mod sort_key;

pub use heap_size::HeapSize;
pub use rec_id::RecId;
pub use row::Row;
pub use schema::{
    ColumnDef,
    ColumnGroupRepr,
    ColumnGroupSchema,
    IndexKind,
    IndexSchema,
    RowSchema,
};
pub use scalar::Scalar;
pub use sort_key::{
    decode_key,
    encode_key,
};
