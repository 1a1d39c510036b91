//! Action-node glue between the sketch and a data-parallel engine.

use core::hash::{BuildHasher, Hash};
use thiserror::Error;

use crate::hasher::DefaultHasher;
use crate::sketch::Sketch;
use crate::wire::{Wire, WireError};

#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("peer {rank} left the collective")]
    Disconnected { rank: usize },
    #[error("collective scalar payload had {0} bytes, expected 8")]
    BadScalar(usize),
}

/// What the surrounding engine must provide: an associative all-reduce over
/// wire-encodable values that leaves the reduction at every worker, and a
/// scalar broadcast. Each input element must reach exactly one worker's
/// operator instance; that routing is the engine's concern.
pub trait Collective {
    fn rank(&self) -> usize;
    fn peers(&self) -> usize;

    fn all_reduce<T, F>(&mut self, local: T, combine: F) -> Result<T, FlowError>
    where
        T: Wire,
        F: FnMut(T, T) -> T;

    fn broadcast(&mut self, value: f64, root: usize) -> Result<f64, FlowError>;
}

/// Distributed distinct-count operator: one value-typed input stream in, one
/// scalar out.
///
/// Feed the worker's slice of the input with [`insert`](Self::insert), then
/// [`execute`](Self::execute) once the stream is drained. Execution merges
/// the per-worker sketches through the engine's all-reduce, estimates at the
/// root, and hands every worker the same double.
#[derive(Clone, Debug, Default)]
pub struct CountDistinct<const P: u8, S = DefaultHasher> {
    sketch: Sketch<P, S>,
}

impl<const P: u8> CountDistinct<P> {
    pub fn new() -> Self {
        Self {
            sketch: Sketch::new(),
        }
    }
}

impl<const P: u8, S> CountDistinct<P, S> {
    pub fn with_hasher(builder: S) -> Self {
        Self {
            sketch: Sketch::with_hasher(builder),
        }
    }

    #[inline]
    pub fn insert<T: Hash + ?Sized>(&mut self, value: &T)
    where
        S: BuildHasher,
    {
        self.sketch.insert(value);
    }

    /// Runs the global reduction and returns the cardinality estimate.
    ///
    /// The merge is deterministic, commutative and associative, so any
    /// reduction topology yields the same merged sketch; the floating-point
    /// estimator runs only at rank 0 and the scalar is broadcast, keeping
    /// the returned value bit-identical across workers.
    pub fn execute<C: Collective>(self, net: &mut C) -> Result<f64, FlowError>
    where
        S: Default,
    {
        let merged = net.all_reduce(self.sketch, Sketch::merge)?;
        let estimate = if net.rank() == 0 {
            merged.estimate()
        } else {
            0.0
        };
        net.broadcast(estimate, 0)
    }
}
