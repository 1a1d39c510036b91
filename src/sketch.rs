use core::hash::{BuildHasher, Hash};

use crate::dense::DenseRegisters;
use crate::encode::encode;
use crate::hasher::DefaultHasher;
use crate::sparse::{SparseRegisters, MAX_LIST_BYTES};

/// A HyperLogLog++ register sketch with compile-time precision `P`.
///
/// A sketch is born sparse (difference-encoded register list plus an
/// insertion buffer) and promotes one-way to a dense `2^P`-byte register
/// file once the sparse form stops paying for itself. Inserts and merges
/// only ever raise register values, which makes [`Sketch::merge`]
/// commutative and associative and the whole type safe to use as the
/// combiner of a tree reduction.
///
/// One sketch belongs to one worker; there is no interior synchronization.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sketch<const P: u8, S = DefaultHasher> {
    pub(crate) repr: Repr<P>,
    builder: S,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub(crate) enum Repr<const P: u8> {
    Sparse(SparseRegisters),
    Dense(DenseRegisters<P>),
}

impl<const P: u8> Sketch<P> {
    pub fn new() -> Self {
        Self::with_hasher(DefaultHasher)
    }
}

impl<const P: u8, S> Sketch<P, S> {
    const PRECISION_OK: () = assert!(P >= 4 && P <= 16, "precision must be in [4, 16]");

    pub fn with_hasher(builder: S) -> Self {
        Self::from_parts(Repr::Sparse(SparseRegisters::default()), builder)
    }

    pub(crate) fn from_parts(repr: Repr<P>, builder: S) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::PRECISION_OK;
        Self { repr, builder }
    }

    /// Number of dense registers, `2^P`.
    pub const fn register_count() -> usize {
        1 << P
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self.repr, Repr::Sparse(_))
    }

    /// True when no value was ever inserted or merged in.
    pub fn is_empty(&self) -> bool {
        match &self.repr {
            Repr::Sparse(sparse) => sparse.is_empty(),
            Repr::Dense(_) => false,
        }
    }

    /// Feeds a pre-computed 64-bit hash. The hash must come from the same
    /// keyed function on every worker whose sketches will be merged.
    #[inline]
    pub fn insert_hash(&mut self, hash: u64) {
        match &mut self.repr {
            Repr::Sparse(sparse) => {
                if sparse.insert(encode::<P>(hash)) {
                    self.promote();
                }
            }
            Repr::Dense(dense) => dense.insert_hash(hash),
        }
    }

    /// One-way transition to the dense register file. Happens automatically
    /// once the sparse list outgrows its byte cap; calling it twice is a bug.
    pub fn promote(&mut self) {
        debug_assert!(self.is_sparse(), "sketch is already dense");
        if let Repr::Sparse(sparse) = &self.repr {
            tracing::debug!(
                list_bytes = sparse.list.size(),
                buffered = sparse.tmp.len(),
                "promoting sparse sketch to dense"
            );
            let mut dense = DenseRegisters::new();
            dense.absorb(sparse);
            self.repr = Repr::Dense(dense);
        }
    }

    /// Associative, commutative combiner: the result holds, for every
    /// register, the maximum of the two inputs. Keeps `a`'s hasher.
    pub fn merge(a: Self, b: Self) -> Self {
        let builder = a.builder;
        let repr = match (a.repr, b.repr) {
            (Repr::Sparse(mut sa), Repr::Sparse(sb)) => {
                sa.tmp.reserve(sb.list.len() + sb.tmp.len());
                sa.tmp.extend(sb.list.iter());
                sa.tmp.extend_from_slice(&sb.tmp);
                sa.flush();
                if sa.list.size() > MAX_LIST_BYTES {
                    tracing::debug!(
                        list_bytes = sa.list.size(),
                        "sparse merge overflowed, promoting"
                    );
                    let mut dense = DenseRegisters::new();
                    dense.absorb(&sa);
                    Repr::Dense(dense)
                } else {
                    Repr::Sparse(sa)
                }
            }
            (Repr::Sparse(sparse), Repr::Dense(mut dense))
            | (Repr::Dense(mut dense), Repr::Sparse(sparse)) => {
                dense.absorb(&sparse);
                Repr::Dense(dense)
            }
            (Repr::Dense(mut da), Repr::Dense(db)) => {
                da.merge(&db);
                Repr::Dense(da)
            }
        };
        Self { repr, builder }
    }

    /// Estimated number of distinct inserted values.
    pub fn estimate(&self) -> f64 {
        crate::estimate::estimate(self)
    }
}

impl<const P: u8, S: BuildHasher> Sketch<P, S> {
    /// Inserts one value by hashing its byte image. Values with identical
    /// byte images count once no matter how often or on which worker they
    /// are inserted.
    #[inline]
    pub fn insert<T: Hash + ?Sized>(&mut self, value: &T) {
        self.insert_hash(self.builder.hash_one(value));
    }
}

impl<const P: u8, S: Default> Default for Sketch<P, S> {
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<const P: u8, T: Hash, S: BuildHasher> Extend<T> for Sketch<P, S> {
    #[inline]
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for val in iter {
            self.insert(&val);
        }
    }
}

impl<const P: u8, S> PartialEq for Sketch<P, S> {
    fn eq(&self, other: &Self) -> bool {
        self.repr == other.repr
    }
}

impl<const P: u8, S> Eq for Sketch<P, S> {}
