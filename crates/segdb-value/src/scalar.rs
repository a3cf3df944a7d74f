use std::cmp::Ordering;

use compact_str::CompactString;

/// A single column value.
///
/// This is a deliberately small lattice compared to a general document
/// value type: the engine only needs to know enough about a value to pack
/// it into a fixed-length row, encode it into a byte-lex key, or store it
/// as an opaque blob. Richer application-level types are expected to be
/// flattened into these before they reach the engine.
#[derive(Clone, Debug)]
#[cfg_attr(any(test, feature = "testing"), derive(proptest_derive::Arbitrary))]
pub enum Scalar {
    Null,
    Int64(i64),
    Float64(f64),
    Bool(bool),
    Bytes(Vec<u8>),
    String(CompactString),
}

impl Scalar {
    /// Fixed-width scalars pack into a [fixed-length store](crate::schema::ColumnGroupRepr::FixedLength);
    /// everything else needs a variable-length representation.
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            Scalar::Null => Some(0),
            Scalar::Int64(_) => Some(8),
            Scalar::Float64(_) => Some(8),
            Scalar::Bool(_) => Some(1),
            Scalar::Bytes(_) | Scalar::String(_) => None,
        }
    }

    fn type_tag(&self) -> u8 {
        match self {
            Scalar::Null => 0,
            Scalar::Int64(_) => 1,
            Scalar::Float64(_) => 2,
            Scalar::Bool(_) => 3,
            Scalar::String(_) => 4,
            Scalar::Bytes(_) => 5,
        }
    }
}

// Manual `Ord`/`Eq`: `Float64` carries an `f64`, which is only a total
// order via `total_cmp`, so we can't derive.
impl Ord for Scalar {
    fn cmp(&self, other: &Self) -> Ordering {
        let tag_cmp = self.type_tag().cmp(&other.type_tag());
        if tag_cmp != Ordering::Equal {
            return tag_cmp;
        }
        match (self, other) {
            (Scalar::Null, Scalar::Null) => Ordering::Equal,
            (Scalar::Int64(a), Scalar::Int64(b)) => a.cmp(b),
            (Scalar::Float64(a), Scalar::Float64(b)) => a.total_cmp(b),
            (Scalar::Bool(a), Scalar::Bool(b)) => a.cmp(b),
            (Scalar::String(a), Scalar::String(b)) => a.cmp(b),
            (Scalar::Bytes(a), Scalar::Bytes(b)) => a.cmp(b),
            _ => unreachable!("type tags matched but variants did not"),
        }
    }
}

impl PartialOrd for Scalar {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scalar {}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int64(v)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float64(v)
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::String(CompactString::from(v))
    }
}

impl From<Vec<u8>> for Scalar {
    fn from(v: Vec<u8>) -> Self {
        Scalar::Bytes(v)
    }
}
