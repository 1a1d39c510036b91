//! Bit codec for single sparse registers.
//!
//! A 64-bit hash is compacted to a 32-bit register for sparse storage: the
//! top 25 bits become the sparse index, and the low bit tags which of two
//! forms the register takes. When the bits of the index below the dense
//! prefix are nonzero, the dense leading-zero count is recoverable from the
//! index alone and the register is just the shifted index (tag 0). When
//! those bits are all zero the count spills past the sparse index, so the
//! register carries the leading-zero count of the 39-bit hash tail in a
//! 6-bit residual (tag 1).

/// Sparse indices are always 25 bits, independent of the dense precision.
pub(crate) const SPARSE_PRECISION: u32 = 25;

/// Bit position of the sparse index inside the 32-bit register.
pub(crate) const INDEX_SHIFT: u32 = 32 - SPARSE_PRECISION;

const INDEX_MASK: u32 = !((1 << INDEX_SHIFT) - 1);
const VALUE_MASK: u32 = 0x3F;

/// Compacts `hash` into a 32-bit sparse register at dense precision `P`.
#[inline]
pub(crate) fn encode<const P: u8>(hash: u64) -> u32 {
    let index = (hash >> (64 - SPARSE_PRECISION)) as u32;
    let prefix = index << INDEX_SHIFT;
    // The index bits below the dense prefix: nonzero means the first set bit
    // of the dense tail lives inside the sparse index.
    if index & ((1 << (SPARSE_PRECISION - P as u32)) - 1) != 0 {
        return prefix;
    }
    let tail = hash << SPARSE_PRECISION;
    // Guard bit caps the count at the 39 tail bits, so an all-zero tail
    // encodes as 40.
    let residual = (tail | (1 << (SPARSE_PRECISION - 1))).leading_zeros() + 1;
    prefix | (residual << 1) | 1
}

/// Expands a sparse register to the (index, value) pair a dense insert at
/// precision `P` would have produced from the original hash.
#[inline]
pub(crate) fn decode<const P: u8>(reg: u32) -> (u32, u8) {
    let index = reg >> (32 - P as u32);
    let value = if reg & 1 == 1 {
        (((reg >> 1) & VALUE_MASK) + SPARSE_PRECISION - P as u32) as u8
    } else {
        (((reg & INDEX_MASK) << P).leading_zeros() + 1) as u8
    };
    (index, value)
}

/// The sparse index of a register, shared by both forms.
#[inline]
pub(crate) fn index_of(reg: u32) -> u32 {
    reg >> INDEX_SHIFT
}
