//! Covariance factorization on top of `nalgebra`.
//!
//! Covariances are stored row-major as `dim * dim` slices on the model types and
//! converted to `DMatrix` here. Only what the mixture code needs is provided: a
//! Cholesky factor with escalating diagonal jitter, the Gaussian log-density and
//! the `μ + L z` transform used for sampling.

use nalgebra::{DMatrix, DVector};

/// `ln(2π)`.
pub(crate) const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Escalation steps tried by [`Cholesky::factor_regularized`].
const JITTER_STEPS: u32 = 8;

/// Lower-triangular Cholesky factor `L` with `A = L Lᵀ`, plus `ln |A|`.
#[derive(Debug, Clone)]
pub(crate) struct Cholesky {
    lower: DMatrix<f64>,
    log_det: f64,
}

impl Cholesky {
    /// Factor the row-major matrix `a`, returning `None` when it is not
    /// (numerically) positive definite.
    pub(crate) fn factor(a: &[f64], dim: usize) -> Option<Self> {
        if a.len() != dim * dim || a.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let lower = DMatrix::from_row_slice(dim, dim, a).cholesky()?.l();
        let diag = lower.diagonal();
        if !diag.iter().all(|d| d.is_finite() && *d > 0.0) {
            return None;
        }
        let log_det = 2.0 * diag.iter().map(|d| d.ln()).sum::<f64>();
        Some(Self { lower, log_det })
    }

    /// Factor `a`, adding growing multiples of `floor` to its diagonal until it succeeds.
    ///
    /// On success `a` holds the regularized matrix that was factored, so callers keep
    /// a covariance that agrees with the returned factor.
    pub(crate) fn factor_regularized(a: &mut [f64], dim: usize, floor: f64) -> Option<Self> {
        if let Some(chol) = Self::factor(a, dim) {
            return Some(chol);
        }
        let base = if floor > 0.0 { floor } else { f64::EPSILON };
        let mut added = 0.0;
        for step in 0..JITTER_STEPS {
            let target = base * 10f64.powi(step as i32);
            let delta = target - added;
            for i in 0..dim {
                a[i * dim + i] += delta;
            }
            added = target;
            if let Some(chol) = Self::factor(a, dim) {
                return Some(chol);
            }
        }
        None
    }

    /// `ln |A|`.
    pub(crate) fn log_det(&self) -> f64 {
        self.log_det
    }

    /// `diffᵀ A⁻¹ diff`, i.e. `|L⁻¹ diff|²`.
    pub(crate) fn mahalanobis_sq(&self, diff: &DVector<f64>) -> f64 {
        match self.lower.solve_lower_triangular(diff) {
            Some(z) => z.norm_squared(),
            None => f64::INFINITY,
        }
    }

    /// `mean + L z`.
    pub(crate) fn transform(&self, mean: &[f64], z: &[f64]) -> Vec<f64> {
        let x = DVector::from_column_slice(mean) + &self.lower * DVector::from_column_slice(z);
        x.as_slice().to_vec()
    }
}

/// Log density of a multivariate normal at `x`, given the factor of its covariance.
pub(crate) fn log_gaussian(chol: &Cholesky, mean: &[f64], x: &[f64]) -> f64 {
    let diff = DVector::from_iterator(mean.len(), x.iter().zip(mean).map(|(xi, mi)| xi - mi));
    let maha = chol.mahalanobis_sq(&diff);
    -0.5 * (mean.len() as f64 * LN_2PI + chol.log_det() + maha)
}
