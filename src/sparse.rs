//! Difference-encoded sparse register list and the sparse half of the sketch.

use crate::encode::index_of;
use crate::vint::VarInt;

/// Max byte length of the delta-encoded list; crossing it after a flush
/// promotes the sketch to dense.
pub(crate) const MAX_LIST_BYTES: usize = 200;

/// Max buffered registers before they are merged into the list.
pub(crate) const MAX_TMP_LEN: usize = 40;

/// Strictly-ascending u32 registers stored as varint deltas: the first
/// element is written whole, every later one as the difference from its
/// predecessor.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub(crate) struct DiffList {
    bytes: Vec<u8>,
    last: u32,
    len: u32,
}

impl DiffList {
    fn with_capacity(cap: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(cap),
            last: 0,
            len: 0,
        }
    }

    /// Rebuilds the list state from its serialized bytes by walking the
    /// deltas once.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let mut last = 0u32;
        let mut len = 0u32;
        let mut at = 0;
        while at < bytes.len() {
            let (diff, next) = VarInt::read(&bytes, at);
            last = last.wrapping_add(diff);
            len += 1;
            at = next;
        }
        Self { bytes, last, len }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    pub fn push(&mut self, reg: u32) {
        debug_assert!(
            self.len == 0 || reg > self.last,
            "sparse list must stay strictly increasing"
        );
        VarInt::write(&mut self.bytes, reg - self.last);
        self.last = reg;
        self.len += 1;
    }

    #[inline]
    pub fn iter(&self) -> DiffIter<'_> {
        DiffIter {
            bytes: &self.bytes,
            at: 0,
            last: 0,
        }
    }
}

/// Streaming decoder: one forward pass over the byte buffer, no
/// materialization.
pub(crate) struct DiffIter<'a> {
    bytes: &'a [u8],
    at: usize,
    last: u32,
}

impl Iterator for DiffIter<'_> {
    type Item = u32;

    #[inline]
    fn next(&mut self) -> Option<u32> {
        if self.at >= self.bytes.len() {
            return None;
        }
        let (diff, next) = VarInt::read(self.bytes, self.at);
        self.at = next;
        self.last = self.last.wrapping_add(diff);
        Some(self.last)
    }
}

/// Sparse shape of the sketch: the encoded list plus an unordered buffer of
/// freshly inserted registers awaiting a merge.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub(crate) struct SparseRegisters {
    pub(crate) list: DiffList,
    pub(crate) tmp: Vec<u32>,
}

impl SparseRegisters {
    /// Buffers one encoded register. Returns true when the post-flush list
    /// has outgrown [`MAX_LIST_BYTES`] and the caller must promote.
    #[inline]
    pub fn insert(&mut self, reg: u32) -> bool {
        self.tmp.push(reg);
        if self.tmp.len() > MAX_TMP_LEN {
            self.flush();
            return self.list.size() > MAX_LIST_BYTES;
        }
        false
    }

    /// Sorts the buffer and merges it into the list in one sorted pass,
    /// keeping the maximum value for any index seen on both sides.
    pub fn flush(&mut self) {
        if self.tmp.is_empty() {
            return;
        }
        self.tmp.sort_unstable();

        let old = core::mem::take(&mut self.list);
        let mut merged = DiffList::with_capacity(old.size() + self.tmp.len() * 5);

        let mut fresh = self.tmp.iter().copied().peekable();
        let mut listed = old.iter().peekable();
        // Registers with equal index share the encoded form, so within an
        // index the numerically largest u32 carries the largest value.
        let mut pending: Option<u32> = None;
        let mut take = |reg: u32, out: &mut DiffList| match pending {
            Some(p) if index_of(p) == index_of(reg) => pending = Some(p.max(reg)),
            Some(p) => {
                out.push(p);
                pending = Some(reg);
            }
            None => pending = Some(reg),
        };

        loop {
            match (fresh.peek(), listed.peek()) {
                (Some(&a), Some(&b)) => {
                    if a <= b {
                        take(a, &mut merged);
                        fresh.next();
                        if a == b {
                            listed.next();
                        }
                    } else {
                        take(b, &mut merged);
                        listed.next();
                    }
                }
                (Some(&a), None) => {
                    take(a, &mut merged);
                    fresh.next();
                }
                (None, Some(&b)) => {
                    take(b, &mut merged);
                    listed.next();
                }
                (None, None) => break,
            }
        }
        if let Some(p) = pending {
            merged.push(p);
        }

        self.list = merged;
        self.tmp.clear();
    }

    /// Count of distinct 25-bit indices across the list and the buffer,
    /// without mutating either.
    pub fn distinct_indices(&self) -> usize {
        let mut buffered: Vec<u32> = self.tmp.iter().map(|&r| index_of(r)).collect();
        buffered.sort_unstable();
        buffered.dedup();

        let mut count = 0;
        let mut at = 0;
        for reg in self.list.iter() {
            let index = index_of(reg);
            while at < buffered.len() && buffered[at] < index {
                count += 1;
                at += 1;
            }
            if at < buffered.len() && buffered[at] == index {
                at += 1;
            }
            count += 1;
        }
        count + (buffered.len() - at)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.list.len() == 0 && self.tmp.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_list_roundtrip() {
        let vals = [0x80u32, 0x81, 0x2000, 0x010000FF, 0x7FFFFF00, u32::MAX];
        let mut list = DiffList::default();
        for v in vals {
            list.push(v);
        }
        assert_eq!(list.len(), vals.len());
        assert!(list.iter().eq(vals.into_iter()));
    }

    #[test]
    fn diff_list_from_bytes_restores_state() {
        let mut list = DiffList::default();
        for v in [0x100u32, 0x200, 0x04000000] {
            list.push(v);
        }
        let restored = DiffList::from_bytes(list.as_bytes().to_vec());
        assert_eq!(restored, list);

        // appending still works after restoration
        let mut restored = restored;
        restored.push(0x05000000);
        assert_eq!(restored.len(), 4);
        assert_eq!(restored.iter().last(), Some(0x05000000));
    }

    #[test]
    fn flush_merges_sorted() {
        let mut sparse = SparseRegisters::default();
        // indices 3, 1 buffered out of order
        sparse.tmp.extend([3u32 << 7, 1 << 7]);
        sparse.flush();
        // second batch interleaves and extends
        sparse.tmp.extend([2u32 << 7, 4 << 7]);
        sparse.flush();
        let got: Vec<u32> = sparse.list.iter().collect();
        assert_eq!(got, vec![1 << 7, 2 << 7, 3 << 7, 4 << 7]);
        assert!(sparse.tmp.is_empty());
    }

    #[test]
    fn flush_keeps_max_per_index() {
        // same index 5, residual values 3 and 9 (tagged form)
        let low = (5u32 << 7) | (3 << 1) | 1;
        let high = (5u32 << 7) | (9 << 1) | 1;

        let mut sparse = SparseRegisters::default();
        sparse.tmp.extend([high, low]);
        sparse.flush();
        assert_eq!(sparse.list.iter().collect::<Vec<_>>(), vec![high]);

        // and across the list/buffer boundary
        sparse.tmp.push(low);
        sparse.flush();
        assert_eq!(sparse.list.iter().collect::<Vec<_>>(), vec![high]);
    }

    #[test]
    fn flush_collapses_duplicates() {
        let mut sparse = SparseRegisters::default();
        sparse.tmp.extend([7u32 << 7; 10]);
        sparse.flush();
        assert_eq!(sparse.list.len(), 1);
    }

    #[test]
    fn distinct_indices_spans_list_and_tmp() {
        let mut sparse = SparseRegisters::default();
        sparse.tmp.extend([1u32 << 7, 2 << 7]);
        sparse.flush();
        // one overlapping index, one fresh
        sparse.tmp.extend([(2u32 << 7) | 3, 9 << 7]);
        assert_eq!(sparse.distinct_indices(), 3);
    }

    #[test]
    fn insert_reports_overgrowth() {
        let mut sparse = SparseRegisters::default();
        let mut promoted = false;
        // far-apart indices make every delta cost several bytes
        for i in 0..200u32 {
            promoted |= sparse.insert(i * 0x8000 << 7);
            if promoted {
                break;
            }
        }
        assert!(promoted);
        assert!(sparse.list.size() > MAX_LIST_BYTES);
    }
}
