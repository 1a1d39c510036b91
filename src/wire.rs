//! Tagged-shape serialization for all-reduce payloads and persistence.
//!
//! Layout: one shape byte (`0` sparse, `1` dense). Sparse payloads carry the
//! varint list bytes and the buffered registers, each behind a u32
//! little-endian length; dense payloads are exactly the `2^P` register
//! bytes. Precision is part of the sketch type and never travels on the
//! wire. Decoding rebuilds the in-memory state bit for bit, so
//! encode-decode-encode is byte-identical.

use thiserror::Error;

use crate::dense::DenseRegisters;
use crate::sketch::{Repr, Sketch};
use crate::sparse::{DiffList, SparseRegisters};

const SPARSE_TAG: u8 = 0;
const DENSE_TAG: u8 = 1;

/// Types that can ride the engine's collective transport.
pub trait Wire: Sized {
    fn to_wire(&self) -> Vec<u8>;
    fn from_wire(bytes: &[u8]) -> Result<Self, WireError>;
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("empty payload")]
    Empty,
    #[error("unknown shape tag {0:#04x}")]
    UnknownTag(u8),
    #[error("payload truncated at byte {at}: {missing} more bytes expected")]
    Truncated { at: usize, missing: usize },
    #[error("malformed varint in sparse list payload")]
    MalformedVarint,
    #[error("{0} trailing bytes after sketch payload")]
    TrailingBytes(usize),
}

impl<const P: u8, S: Default> Wire for Sketch<P, S> {
    fn to_wire(&self) -> Vec<u8> {
        match &self.repr {
            Repr::Sparse(sparse) => {
                let list = sparse.list.as_bytes();
                let mut out = Vec::with_capacity(9 + list.len() + sparse.tmp.len() * 4);
                out.push(SPARSE_TAG);
                out.extend_from_slice(&(list.len() as u32).to_le_bytes());
                out.extend_from_slice(list);
                out.extend_from_slice(&(sparse.tmp.len() as u32).to_le_bytes());
                for reg in &sparse.tmp {
                    out.extend_from_slice(&reg.to_le_bytes());
                }
                out
            }
            Repr::Dense(dense) => {
                let mut out = Vec::with_capacity(1 + dense.as_bytes().len());
                out.push(DENSE_TAG);
                out.extend_from_slice(dense.as_bytes());
                out
            }
        }
    }

    fn from_wire(bytes: &[u8]) -> Result<Self, WireError> {
        let (&tag, rest) = bytes.split_first().ok_or(WireError::Empty)?;
        let repr = match tag {
            SPARSE_TAG => {
                let mut at = 1;
                let list_len = read_len(bytes, &mut at)?;
                let list_bytes = take(bytes, &mut at, list_len)?;
                if !varint_stream_ok(list_bytes) {
                    return Err(WireError::MalformedVarint);
                }
                let list = DiffList::from_bytes(list_bytes.to_vec());

                let tmp_len = read_len(bytes, &mut at)?;
                let tmp_bytes = take(bytes, &mut at, tmp_len * 4)?;
                let tmp = tmp_bytes
                    .chunks_exact(4)
                    .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
                    .collect();

                if at != bytes.len() {
                    return Err(WireError::TrailingBytes(bytes.len() - at));
                }
                Repr::Sparse(SparseRegisters { list, tmp })
            }
            DENSE_TAG => {
                let count = Sketch::<P, S>::register_count();
                match rest.len() {
                    n if n < count => {
                        return Err(WireError::Truncated {
                            at: bytes.len(),
                            missing: count - n,
                        })
                    }
                    n if n > count => return Err(WireError::TrailingBytes(n - count)),
                    _ => {}
                }
                Repr::Dense(DenseRegisters::from_bytes(rest.to_vec().into_boxed_slice()))
            }
            other => return Err(WireError::UnknownTag(other)),
        };
        Ok(Sketch::from_parts(repr, S::default()))
    }
}

fn read_len(bytes: &[u8], at: &mut usize) -> Result<usize, WireError> {
    let raw = take(bytes, at, 4)?;
    Ok(u32::from_le_bytes(raw.try_into().unwrap()) as usize)
}

fn take<'a>(bytes: &'a [u8], at: &mut usize, n: usize) -> Result<&'a [u8], WireError> {
    let available = bytes.len() - *at;
    if available < n {
        return Err(WireError::Truncated {
            at: *at,
            missing: n - available,
        });
    }
    let slice = &bytes[*at..*at + n];
    *at += n;
    Ok(slice)
}

/// True when the bytes are a whole number of well-formed varints, so the
/// streaming decoder can never walk off the end.
fn varint_stream_ok(bytes: &[u8]) -> bool {
    let mut at = 0;
    while at < bytes.len() {
        let mut width = 0;
        loop {
            if at >= bytes.len() || width == 5 {
                return false;
            }
            let byte = bytes[at];
            at += 1;
            width += 1;
            if byte & 0x80 == 0 {
                break;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sparse_fixture() -> Sketch<14> {
        let mut list = DiffList::default();
        for reg in [0x01000001u32, 0x02000003, 0x04000005] {
            list.push(reg);
        }
        let sparse = SparseRegisters {
            list,
            tmp: vec![0x05000007],
        };
        Sketch::from_parts(Repr::Sparse(sparse), Default::default())
    }

    #[test]
    fn sparse_roundtrip_is_byte_identical() {
        let sketch = sparse_fixture();
        let first = sketch.to_wire();
        let decoded = Sketch::<14>::from_wire(&first).unwrap();
        assert_eq!(decoded, sketch);
        assert_eq!(decoded.to_wire(), first);
    }

    #[test]
    fn dense_roundtrip() {
        let mut sketch: Sketch<10> = Sketch::new();
        sketch.extend(0u64..10_000);
        assert!(!sketch.is_sparse());

        let bytes = sketch.to_wire();
        assert_eq!(bytes.len(), 1 + Sketch::<10>::register_count());
        let decoded = Sketch::<10>::from_wire(&bytes).unwrap();
        assert_eq!(decoded, sketch);
        assert_eq!(decoded.estimate(), sketch.estimate());
    }

    #[test]
    fn fresh_sketch_roundtrip() {
        let sketch: Sketch<14> = Sketch::new();
        let decoded = Sketch::<14>::from_wire(&sketch.to_wire()).unwrap();
        assert!(decoded.is_empty());
        assert_eq!(decoded, sketch);
    }

    #[test]
    fn rejects_empty_and_unknown_tag() {
        assert_eq!(Sketch::<14>::from_wire(&[]), Err(WireError::Empty));
        assert_eq!(
            Sketch::<14>::from_wire(&[7, 0, 0]),
            Err(WireError::UnknownTag(7))
        );
    }

    #[test]
    fn rejects_truncation() {
        let bytes = sparse_fixture().to_wire();
        for cut in 1..bytes.len() {
            let err = Sketch::<14>::from_wire(&bytes[..cut]).unwrap_err();
            assert!(
                matches!(err, WireError::Truncated { .. } | WireError::MalformedVarint),
                "cut at {cut}: {err}"
            );
        }
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut bytes = sparse_fixture().to_wire();
        bytes.push(0);
        assert_eq!(
            Sketch::<14>::from_wire(&bytes),
            Err(WireError::TrailingBytes(1))
        );

        let mut sketch: Sketch<4> = Sketch::new();
        sketch.promote();
        let mut bytes = sketch.to_wire();
        bytes.extend_from_slice(&[0, 0]);
        assert_eq!(
            Sketch::<4>::from_wire(&bytes),
            Err(WireError::TrailingBytes(2))
        );
    }

    #[test]
    fn rejects_wrong_dense_length() {
        let mut sketch: Sketch<4> = Sketch::new();
        sketch.promote();
        let mut bytes = sketch.to_wire();
        bytes.pop();
        assert_eq!(
            Sketch::<4>::from_wire(&bytes),
            Err(WireError::Truncated {
                at: bytes.len(),
                missing: 1
            })
        );
    }

    #[test]
    fn rejects_dangling_continuation_bit() {
        // L1 = 1 with a lone continuation byte as the list payload
        let bytes = [SPARSE_TAG, 1, 0, 0, 0, 0x80, 0, 0, 0, 0];
        assert_eq!(
            Sketch::<14>::from_wire(&bytes),
            Err(WireError::MalformedVarint)
        );
    }
}
