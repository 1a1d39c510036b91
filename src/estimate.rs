//! Bias-corrected cardinality estimation over a merged sketch.

use crate::dense::DenseRegisters;
use crate::encode::SPARSE_PRECISION;
use crate::sketch::{Repr, Sketch};
use crate::tables;

/// Number of bias-table neighbors averaged around the raw estimate.
const NEIGHBORS: usize = 6;

pub(crate) fn estimate<const P: u8, S>(sketch: &Sketch<P, S>) -> f64 {
    match &sketch.repr {
        // A sketch that never promoted still holds registers at the full
        // 25-bit sparse resolution, where linear counting over the 2^25
        // register space beats the dense estimator.
        Repr::Sparse(sparse) => {
            let m = (1u64 << SPARSE_PRECISION) as f64;
            let zeros = m - sparse.distinct_indices() as f64;
            let count = m * (m / zeros).ln();
            tracing::debug!(path = "sparse-linear", estimate = count, "estimated");
            count
        }
        Repr::Dense(dense) => dense_estimate(dense),
    }
}

fn dense_estimate<const P: u8>(dense: &DenseRegisters<P>) -> f64 {
    let m = DenseRegisters::<P>::COUNT as f64;
    let (sum, zeros) = dense.indicator();

    let mut raw = alpha(DenseRegisters::<P>::COUNT) * m * m / sum;
    if raw <= 5.0 * m {
        raw -= bias(raw, P);
    }

    let gated = if zeros > 0 {
        m * (m / zeros as f64).ln()
    } else {
        raw
    };
    if gated <= tables::THRESHOLD[(P - 4) as usize] {
        tracing::debug!(path = "linear", estimate = gated, zeros, "estimated");
        gated
    } else {
        tracing::debug!(path = "raw", estimate = raw, "estimated");
        raw
    }
}

fn alpha(register_count: usize) -> f64 {
    match register_count {
        16 => 0.673,
        32 => 0.697,
        64 => 0.709,
        _ => 0.7213 / (1.0 + 1.079 / register_count as f64),
    }
}

/// Empirical bias of the raw estimator near `raw_estimate`: locate the
/// estimate in the per-precision table, then average the biases of the six
/// nearest entries (ties resolved toward the lower neighbor).
fn bias(raw_estimate: f64, precision: u8) -> f64 {
    let raws = tables::RAW_ESTIMATE[(precision - 4) as usize];
    let biases = tables::BIAS[(precision - 4) as usize];
    let index = binary_search(raw_estimate, raws);
    nearest_neighbors(NEIGHBORS, index, raw_estimate, biases, raws)
}

fn binary_search(raw_estimate: f64, table: &[f64]) -> usize {
    let mut lower = 0usize;
    let mut upper = table.len() - 1;
    let mut middle = table.len() / 2;
    while upper - lower > 1 {
        if raw_estimate < table[middle] {
            upper = middle - 1;
        } else {
            lower = middle;
        }
        middle = (upper + lower) / 2;
    }
    lower
}

fn nearest_neighbors(k: usize, index: usize, estimate: f64, biases: &[f64], raws: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut lower = index as isize;
    let mut upper = index + 1;
    for _ in 0..k {
        let dist_lower = if lower >= 0 {
            (estimate - raws[lower as usize]).abs()
        } else {
            f64::INFINITY
        };
        let dist_upper = if upper < raws.len() {
            (raws[upper] - estimate).abs()
        } else {
            f64::INFINITY
        };
        if dist_lower <= dist_upper {
            sum += biases[lower as usize];
            lower -= 1;
        } else {
            sum += biases[upper];
            upper += 1;
        }
    }
    sum / k as f64
}
