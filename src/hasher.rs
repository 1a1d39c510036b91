use core::hash::BuildHasher;
use siphasher::sip::SipHasher24;

/// SipHash-2-4 keyed with a fixed key.
///
/// Every worker must map equal values to equal 64-bit hashes or merged
/// sketches are meaningless, so the key is a compile-time constant rather
/// than per-process random state. It is not a secret.
const KEY: [u8; 16] = [0u8; 16];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DefaultHasher;

impl BuildHasher for DefaultHasher {
    type Hasher = SipHasher24;

    #[inline]
    fn build_hasher(&self) -> SipHasher24 {
        SipHasher24::new_with_key(&KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::hash::{Hash, Hasher};

    #[test]
    fn deterministic_across_builders() {
        let a = DefaultHasher.build_hasher();
        let b = DefaultHasher::default().build_hasher();

        let hash = |mut h: SipHasher24| {
            42u64.hash(&mut h);
            h.finish()
        };
        assert_eq!(hash(a), hash(b));
    }

    #[test]
    fn distinct_values_spread() {
        let mut seen = std::collections::HashSet::new();
        for x in 0u64..1000 {
            seen.insert(DefaultHasher.hash_one(x));
        }
        assert_eq!(seen.len(), 1000);
    }
}
