use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

#[inline]
pub(crate) fn squared_euclidean(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Log-sum-exp; `-inf` for an empty slice or when every term is `-inf`.
pub(crate) fn log_sum_exp(values: &[f64]) -> f64 {
    let max_val = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max_val.is_finite() {
        return max_val;
    }
    max_val + values.iter().map(|&v| (v - max_val).exp()).sum::<f64>().ln()
}

/// Index of the nearest point in `centers` (ties go to the lowest index).
pub(crate) fn nearest(point: &[f64], centers: &[Vec<f64>]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (idx, center) in centers.iter().enumerate() {
        let d = squared_euclidean(point, center);
        if d < best.1 {
            best = (idx, d);
        }
    }
    best
}

/// Resolve the run-wide base seed; an unseeded run draws one from the thread RNG.
pub(crate) fn base_seed(seed: Option<u64>) -> u64 {
    seed.unwrap_or_else(|| rand::rng().random())
}

/// Fitting stage a random stream feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    /// k-means++ seeding and random EM initialization.
    Init = 0,
    /// EM training.
    Em = 1,
}

/// Independent RNG stream for one group and stage.
///
/// Streams depend only on `(base, group, stage)`, never on which worker runs the group.
pub(crate) fn group_rng(base: u64, group: usize, stage: Stage) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(base);
    rng.set_stream(((group as u64) << 1) | stage as u64);
    rng
}
