//! Fitted mixture entities: components, per-group mixtures and the collection of all groups.

use std::ops::Index;

use serde::{Deserialize, Serialize};

use super::linalg::{log_gaussian, Cholesky};
use super::util::log_sum_exp;
use crate::error::{Error, Result};

/// Covariance structure estimated by the trainer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CovarianceType {
    /// Full symmetric `D x D` covariance.
    #[default]
    Full,
    /// Diagonal covariance; off-diagonal entries stay exactly zero.
    Diagonal,
}

/// One weighted Gaussian of a mixture.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianComponent {
    /// Mixing weight in `[0, 1]`.
    pub weight: f64,
    /// Mean vector (length `D`).
    pub mean: Vec<f64>,
    /// Row-major `D x D` covariance.
    pub covariance: Vec<f64>,
}

impl GaussianComponent {
    /// Create a component, checking that the covariance is `D x D` for the mean's `D`.
    pub fn new(weight: f64, mean: Vec<f64>, covariance: Vec<f64>) -> Result<Self> {
        let dim = mean.len();
        if covariance.len() != dim * dim {
            return Err(Error::DimensionMismatch {
                expected: dim * dim,
                found: covariance.len(),
            });
        }
        if !(0.0..=1.0).contains(&weight) {
            return Err(Error::InvalidParameter {
                name: "weight",
                message: "must lie in [0, 1]",
            });
        }
        Ok(Self {
            weight,
            mean,
            covariance,
        })
    }

    fn check_shape(&self, dim: usize) -> Result<()> {
        if self.dim() != dim {
            return Err(Error::DimensionMismatch {
                expected: dim,
                found: self.dim(),
            });
        }
        if self.covariance.len() != dim * dim {
            return Err(Error::DimensionMismatch {
                expected: dim * dim,
                found: self.covariance.len(),
            });
        }
        Ok(())
    }

    /// A zero-weight component centred at the origin with covariance `floor * I`.
    pub fn degenerate(dim: usize, floor: f64) -> Self {
        let mut covariance = vec![0.0; dim * dim];
        for i in 0..dim {
            covariance[i * dim + i] = floor;
        }
        Self {
            weight: 0.0,
            mean: vec![0.0; dim],
            covariance,
        }
    }

    /// Dimensionality `D`.
    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    /// Covariance entry at `(row, col)`.
    pub fn covariance_at(&self, row: usize, col: usize) -> f64 {
        self.covariance[row * self.dim() + col]
    }

    /// Diagonal of the covariance matrix.
    pub fn variances(&self) -> impl Iterator<Item = f64> + '_ {
        let dim = self.dim();
        (0..dim).map(move |i| self.covariance[i * dim + i])
    }
}

/// Gaussian mixture fitted to one group.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianMixtureModel {
    components: Vec<GaussianComponent>,
}

impl GaussianMixtureModel {
    /// Build a mixture from components that all share one dimensionality.
    ///
    /// Every covariance must be `D x D` for that dimensionality.
    pub fn new(components: Vec<GaussianComponent>) -> Result<Self> {
        if let Some(first) = components.first() {
            let dim = first.dim();
            for c in &components {
                c.check_shape(dim)?;
            }
        }
        Ok(Self { components })
    }

    /// Model of a group without samples: `k` zero-weight components.
    pub fn empty(k: usize, dim: usize, floor: f64) -> Self {
        Self {
            components: (0..k).map(|_| GaussianComponent::degenerate(dim, floor)).collect(),
        }
    }

    pub(crate) fn from_components(components: Vec<GaussianComponent>) -> Self {
        Self { components }
    }

    /// Components in fixed order.
    pub fn components(&self) -> &[GaussianComponent] {
        &self.components
    }

    /// Number of components `K`.
    pub fn n_components(&self) -> usize {
        self.components.len()
    }

    /// Dimensionality `D` (0 for a mixture without components).
    pub fn dim(&self) -> usize {
        self.components.first().map_or(0, GaussianComponent::dim)
    }

    /// Mixing weights.
    pub fn weights(&self) -> Vec<f64> {
        self.components.iter().map(|c| c.weight).collect()
    }

    /// Sum of the mixing weights (1 for a trained group, 0 for an empty one).
    pub fn weight_sum(&self) -> f64 {
        self.components.iter().map(|c| c.weight).sum()
    }

    /// True when no component carries weight (the group had no samples).
    pub fn is_empty(&self) -> bool {
        self.components.iter().all(|c| c.weight <= 0.0)
    }

    /// Log density of the mixture at `x`.
    ///
    /// Components whose covariance cannot be factored contribute nothing. An empty
    /// mixture has density zero everywhere (`-inf`).
    pub fn log_pdf(&self, x: &[f64]) -> Result<f64> {
        let dim = self.dim();
        if x.len() != dim {
            return Err(Error::DimensionMismatch {
                expected: dim,
                found: x.len(),
            });
        }
        let terms: Vec<f64> = self
            .components
            .iter()
            .map(|c| {
                if c.weight <= 0.0 {
                    return f64::NEG_INFINITY;
                }
                match Cholesky::factor(&c.covariance, dim) {
                    Some(chol) => c.weight.ln() + log_gaussian(&chol, &c.mean, x),
                    None => f64::NEG_INFINITY,
                }
            })
            .collect();
        Ok(log_sum_exp(&terms))
    }

    /// Density of the mixture at `x`.
    pub fn pdf(&self, x: &[f64]) -> Result<f64> {
        Ok(self.log_pdf(x)?.exp())
    }
}

/// Mixtures of all groups, indexed by group id. Every mixture has `K` components of dimension `D`.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelCollection {
    n_components: usize,
    dim: usize,
    models: Vec<GaussianMixtureModel>,
}

impl ModelCollection {
    /// Assemble a collection, checking every model against `(n_components, dim)`.
    pub fn new(n_components: usize, dim: usize, models: Vec<GaussianMixtureModel>) -> Result<Self> {
        for model in &models {
            if model.n_components() != n_components {
                return Err(Error::DimensionMismatch {
                    expected: n_components,
                    found: model.n_components(),
                });
            }
            for c in model.components() {
                c.check_shape(dim)?;
            }
        }
        Ok(Self {
            n_components,
            dim,
            models,
        })
    }

    /// Components per mixture (`K`).
    pub fn n_components(&self) -> usize {
        self.n_components
    }

    /// Sample dimensionality (`D`).
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of groups (`G`).
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// True when the collection holds no groups.
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Mixture of `group`, if it exists.
    pub fn get(&self, group: usize) -> Option<&GaussianMixtureModel> {
        self.models.get(group)
    }

    /// All mixtures in group order.
    pub fn models(&self) -> &[GaussianMixtureModel] {
        &self.models
    }

    /// Iterate over mixtures in group order.
    pub fn iter(&self) -> std::slice::Iter<'_, GaussianMixtureModel> {
        self.models.iter()
    }

    /// Take ownership of the mixtures.
    pub fn into_models(self) -> Vec<GaussianMixtureModel> {
        self.models
    }
}

impl Index<usize> for ModelCollection {
    type Output = GaussianMixtureModel;

    fn index(&self, group: usize) -> &Self::Output {
        &self.models[group]
    }
}

impl<'a> IntoIterator for &'a ModelCollection {
    type Item = &'a GaussianMixtureModel;
    type IntoIter = std::slice::Iter<'a, GaussianMixtureModel>;

    fn into_iter(self) -> Self::IntoIter {
        self.models.iter()
    }
}
