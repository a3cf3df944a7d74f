use segdb_value::{
    encode_key,
    Scalar,
};

/// An encoded index key, with the same ordering as the underlying values.
///
/// We keep this as opaque bytes rather than parsing it back out in the
/// hot path: ordered indexes only ever need to `memcmp` two keys, and
/// decoding is only needed when handing a key back to a caller.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexKeyBytes(pub Vec<u8>);

impl AsRef<[u8]> for IndexKeyBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl IndexKeyBytes {
    /// The bytes stored for the indexed columns, as taken by
    /// `searchExact`/`seekLowerBound` from a caller who has values but no
    /// recId yet.
    pub fn prefix_bytes(values: &[Scalar]) -> IndexKeyBytes {
        IndexKeyBytes(encode_key(values))
    }
}
