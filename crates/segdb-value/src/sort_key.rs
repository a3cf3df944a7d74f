//! Byte-lex (order-preserving) encoding for [`Scalar`] sequences.
//!
//! Each value is prefixed with a tag byte chosen so that comparing the tags
//! reproduces the values' relative order, then a type-specific payload:
//! fixed-width integers/floats in big-endian (so `memcmp` order matches
//! numeric order), and variable-length strings/bytes terminated with a
//! `0x00` byte (with embedded `0x00` escaped to `0x00 0xFF`, since `0xFF`
//! is otherwise unused as a tag). Concatenating encoded values reproduces
//! the tuple's lexicographic order over the encoded columns, which is what
//! lets an ordered index compare two multi-column keys with a raw
//! `memcmp` after encoding.
//!
//! This mirrors the FoundationDB tuple layer approach used by the example
//! this crate's authors drew from, trimmed to the scalar lattice in
//! [`crate::scalar::Scalar`].

use crate::scalar::Scalar;

const NULL_TAG: u8 = 0x01;
const NEG_INT_TAG: u8 = 0x02;
const FLOAT_TAG: u8 = 0x03;
const FALSE_TAG: u8 = 0x04;
const TRUE_TAG: u8 = 0x05;
const STRING_TAG: u8 = 0x06;
const BYTES_TAG: u8 = 0x07;

const TERMINATOR: u8 = 0x00;
const ESCAPE: u8 = 0xFF;

fn write_escaped(bytes: &[u8], out: &mut Vec<u8>) {
    for &b in bytes {
        out.push(b);
        if b == TERMINATOR {
            out.push(ESCAPE);
        }
    }
    out.push(TERMINATOR);
}

fn read_escaped(buf: &[u8], pos: &mut usize) -> segdb_errors::Result<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let Some(&b) = buf.get(*pos) else {
            return Err(segdb_errors::StorageError::corrupt(
                "unterminated byte-lex string",
            ));
        };
        *pos += 1;
        if b == TERMINATOR {
            if buf.get(*pos) == Some(&ESCAPE) {
                *pos += 1;
                out.push(TERMINATOR);
            } else {
                break;
            }
        } else {
            out.push(b);
        }
    }
    Ok(out)
}

/// Flip the sign bit (for non-negative floats) or all bits (for negative
/// floats) of an IEEE-754 bit pattern so that big-endian `memcmp` order
/// matches float order, including across the zero/negative boundary.
fn float_sort_bits(f: f64) -> u64 {
    let bits = f.to_bits();
    if bits & (1 << 63) != 0 {
        !bits
    } else {
        bits | (1 << 63)
    }
}

fn float_from_sort_bits(bits: u64) -> f64 {
    let bits = if bits & (1 << 63) != 0 {
        bits & !(1 << 63)
    } else {
        !bits
    };
    f64::from_bits(bits)
}

fn write_one(value: &Scalar, out: &mut Vec<u8>) {
    match value {
        Scalar::Null => out.push(NULL_TAG),
        Scalar::Int64(i) => {
            // i64 is made byte-lex-comparable by flipping the sign bit:
            // this maps the signed range onto an order-preserving unsigned
            // range, so a plain big-endian write then compares correctly.
            out.push(NEG_INT_TAG);
            let unsigned = (*i as u64) ^ (1 << 63);
            out.extend_from_slice(&unsigned.to_be_bytes());
        },
        Scalar::Float64(f) => {
            out.push(FLOAT_TAG);
            out.extend_from_slice(&float_sort_bits(*f).to_be_bytes());
        },
        Scalar::Bool(false) => out.push(FALSE_TAG),
        Scalar::Bool(true) => out.push(TRUE_TAG),
        Scalar::String(s) => {
            out.push(STRING_TAG);
            write_escaped(s.as_bytes(), out);
        },
        Scalar::Bytes(b) => {
            out.push(BYTES_TAG);
            write_escaped(b, out);
        },
    }
}

/// Encode a sequence of column values into one order-preserving key.
///
/// For a multi-column index on `(a, b)`, callers pass `&[a, b]` (the
/// `recId` tiebreaker, if any, is appended by the caller as one more
/// `Scalar::Int64`).
pub fn encode_key(values: &[Scalar]) -> Vec<u8> {
    let mut out = Vec::new();
    for v in values {
        write_one(v, &mut out);
    }
    out
}

/// Decode a byte-lex key back into its constituent values.
///
/// Round-trips with [`encode_key`]: `decode_key(&encode_key(vs)) == vs`.
pub fn decode_key(buf: &[u8]) -> segdb_errors::Result<Vec<Scalar>> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < buf.len() {
        let tag = buf[pos];
        pos += 1;
        let value = match tag {
            NULL_TAG => Scalar::Null,
            NEG_INT_TAG => {
                let bytes: [u8; 8] = buf
                    .get(pos..pos + 8)
                    .ok_or_else(|| segdb_errors::StorageError::corrupt("truncated int key"))?
                    .try_into()
                    .unwrap();
                pos += 8;
                let unsigned = u64::from_be_bytes(bytes);
                Scalar::Int64((unsigned ^ (1 << 63)) as i64)
            },
            FLOAT_TAG => {
                let bytes: [u8; 8] = buf
                    .get(pos..pos + 8)
                    .ok_or_else(|| segdb_errors::StorageError::corrupt("truncated float key"))?
                    .try_into()
                    .unwrap();
                pos += 8;
                Scalar::Float64(float_from_sort_bits(u64::from_be_bytes(bytes)))
            },
            FALSE_TAG => Scalar::Bool(false),
            TRUE_TAG => Scalar::Bool(true),
            STRING_TAG => {
                let bytes = read_escaped(buf, &mut pos)?;
                Scalar::String(
                    String::from_utf8(bytes)
                        .map_err(|_| segdb_errors::StorageError::corrupt("invalid utf8 in key"))?
                        .into(),
                )
            },
            BYTES_TAG => Scalar::Bytes(read_escaped(buf, &mut pos)?),
            other => {
                return Err(segdb_errors::StorageError::corrupt(format!(
                    "unrecognized byte-lex tag {other}"
                )))
            },
        };
        out.push(value);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn assert_order_preserved(a: &Scalar, b: &Scalar) {
        let ord = a.cmp(b);
        let byte_ord = encode_key(std::slice::from_ref(a)).cmp(&encode_key(std::slice::from_ref(b)));
        assert_eq!(ord, byte_ord, "{a:?} vs {b:?}");
    }

    #[test]
    fn orders_integers() {
        assert_order_preserved(&Scalar::Int64(-5), &Scalar::Int64(3));
        assert_order_preserved(&Scalar::Int64(i64::MIN), &Scalar::Int64(i64::MAX));
        assert_order_preserved(&Scalar::Int64(-1), &Scalar::Int64(0));
    }

    #[test]
    fn orders_floats() {
        assert_order_preserved(&Scalar::Float64(-1.5), &Scalar::Float64(2.5));
        assert_order_preserved(&Scalar::Float64(f64::NEG_INFINITY), &Scalar::Float64(0.0));
        assert_order_preserved(&Scalar::Float64(0.0), &Scalar::Float64(f64::INFINITY));
    }

    #[test]
    fn orders_strings() {
        assert_order_preserved(&Scalar::from("a"), &Scalar::from("b"));
        assert_order_preserved(&Scalar::from("ab"), &Scalar::from("abc"));
    }

    #[test]
    fn roundtrips_single_values() {
        for value in [
            Scalar::Null,
            Scalar::Int64(-42),
            Scalar::Int64(0),
            Scalar::Float64(3.25),
            Scalar::Bool(true),
            Scalar::Bool(false),
            Scalar::from("hello\u{0}world"),
            Scalar::Bytes(vec![0, 0xFF, 1, 0]),
        ] {
            let encoded = encode_key(std::slice::from_ref(&value));
            let decoded = decode_key(&encoded).unwrap();
            assert_eq!(decoded, vec![value]);
        }
    }

    #[test]
    fn roundtrips_multi_column_keys() {
        let values = vec![Scalar::Int64(7), Scalar::from("city"), Scalar::Bool(false)];
        let encoded = encode_key(&values);
        assert_eq!(decode_key(&encoded).unwrap(), values);
    }

    proptest! {
        #[test]
        fn prop_int_roundtrip(v in any::<i64>()) {
            let value = Scalar::Int64(v);
            let encoded = encode_key(std::slice::from_ref(&value));
            prop_assert_eq!(decode_key(&encoded).unwrap(), vec![value]);
        }

        #[test]
        fn prop_int_order(a in any::<i64>(), b in any::<i64>()) {
            let (va, vb) = (Scalar::Int64(a), Scalar::Int64(b));
            let byte_ord = encode_key(std::slice::from_ref(&va)).cmp(&encode_key(std::slice::from_ref(&vb)));
            prop_assert_eq!(a.cmp(&b), byte_ord);
        }

        #[test]
        fn prop_string_roundtrip(s in ".*") {
            let value = Scalar::from(s.as_str());
            let encoded = encode_key(std::slice::from_ref(&value));
            prop_assert_eq!(decode_key(&encoded).unwrap(), vec![value]);
        }
    }
}
