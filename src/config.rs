//! Caller-facing configuration for a fitting run.

use serde::{Deserialize, Serialize};

use crate::cluster::{CovarianceType, GmmTrainer, InitMode, KMeansPP, Verbosity};
use crate::error::{Error, Result};

/// Every knob of a fitting run: k-means++ initialization plus EM training.
///
/// Serializable so glue code can read it from JSON or any other serde format;
/// missing fields take their default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Gaussian components per group (`K`).
    pub n_components: usize,
    /// Maximum EM iterations per group.
    pub max_em_iterations: usize,
    /// Maximum Lloyd iterations per group during initialization.
    pub max_kmeans_iterations: usize,
    /// Where EM's starting responsibilities come from.
    pub init_mode: InitMode,
    /// Trainer logging level.
    pub verbosity: Verbosity,
    /// Relative log-likelihood change at which a group stops.
    pub convergence_threshold: f64,
    /// Added to every covariance diagonal.
    pub covariance_floor: f64,
    /// Full or diagonal covariance.
    pub covariance_type: CovarianceType,
    /// Component resets allowed per group before it is given up.
    pub max_reinitializations: usize,
    /// Seed for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            n_components: 3,
            max_em_iterations: 100,
            max_kmeans_iterations: 100,
            init_mode: InitMode::UseProvidedLabels,
            verbosity: Verbosity::Silent,
            convergence_threshold: 1e-3,
            covariance_floor: 1e-6,
            covariance_type: CovarianceType::Full,
            max_reinitializations: 10,
            seed: None,
        }
    }
}

impl FitConfig {
    /// Default configuration with `n_components` components per group.
    pub fn new(n_components: usize) -> Self {
        Self {
            n_components,
            ..Self::default()
        }
    }

    /// Set the maximum EM iterations.
    pub fn with_max_em_iterations(mut self, n: usize) -> Self {
        self.max_em_iterations = n;
        self
    }

    /// Set the maximum k-means iterations.
    pub fn with_max_kmeans_iterations(mut self, n: usize) -> Self {
        self.max_kmeans_iterations = n;
        self
    }

    /// Set the initialization mode.
    pub fn with_init_mode(mut self, init_mode: InitMode) -> Self {
        self.init_mode = init_mode;
        self
    }

    /// Set the verbosity.
    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set the convergence threshold.
    pub fn with_convergence_threshold(mut self, threshold: f64) -> Self {
        self.convergence_threshold = threshold;
        self
    }

    /// Set the covariance floor.
    pub fn with_covariance_floor(mut self, floor: f64) -> Self {
        self.covariance_floor = floor;
        self
    }

    /// Set the covariance type.
    pub fn with_covariance_type(mut self, covariance_type: CovarianceType) -> Self {
        self.covariance_type = covariance_type;
        self
    }

    /// Set the reinitialization bound.
    pub fn with_max_reinitializations(mut self, n: usize) -> Self {
        self.max_reinitializations = n;
        self
    }

    /// Set the seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Check every field.
    pub fn validate(&self) -> Result<()> {
        if self.n_components == 0 {
            return Err(Error::InvalidParameter {
                name: "n_components",
                message: "must be at least 1",
            });
        }
        if !(self.convergence_threshold.is_finite() && self.convergence_threshold >= 0.0) {
            return Err(Error::InvalidParameter {
                name: "convergence_threshold",
                message: "must be finite and non-negative",
            });
        }
        if !(self.covariance_floor.is_finite() && self.covariance_floor >= 0.0) {
            return Err(Error::InvalidParameter {
                name: "covariance_floor",
                message: "must be finite and non-negative",
            });
        }
        Ok(())
    }

    /// The k-means++ initializer described by this configuration.
    pub fn initializer(&self) -> KMeansPP {
        let init = KMeansPP::new(self.n_components).with_max_iter(self.max_kmeans_iterations);
        match self.seed {
            Some(seed) => init.with_seed(seed),
            None => init,
        }
    }

    /// The EM trainer described by this configuration.
    pub fn trainer(&self) -> GmmTrainer {
        let trainer = GmmTrainer::new(self.n_components)
            .with_max_iter(self.max_em_iterations)
            .with_init_mode(self.init_mode)
            .with_verbosity(self.verbosity)
            .with_convergence_threshold(self.convergence_threshold)
            .with_covariance_floor(self.covariance_floor)
            .with_covariance_type(self.covariance_type)
            .with_max_reinitializations(self.max_reinitializations);
        match self.seed {
            Some(seed) => trainer.with_seed(seed),
            None => trainer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = FitConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.n_components, 3);
        assert_eq!(cfg.init_mode, InitMode::UseProvidedLabels);
    }

    #[test]
    fn invalid_fields_are_reported() {
        assert!(FitConfig::new(0).validate().is_err());
        assert!(FitConfig::new(2).with_covariance_floor(-1.0).validate().is_err());
        assert!(FitConfig::new(2)
            .with_convergence_threshold(f64::INFINITY)
            .validate()
            .is_err());
    }

    #[test]
    fn deserializes_partial_json() {
        let cfg: FitConfig = serde_json::from_str(
            r#"{
                "n_components": 10,
                "init_mode": "random_init",
                "verbosity": "detailed",
                "seed": 5
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.n_components, 10);
        assert_eq!(cfg.init_mode, InitMode::RandomInit);
        assert_eq!(cfg.verbosity, Verbosity::Detailed);
        assert_eq!(cfg.seed, Some(5));
        assert_eq!(cfg.max_em_iterations, 100);
    }

    #[test]
    fn builds_components_from_fields() {
        let cfg = FitConfig::new(4).with_seed(9);
        assert_eq!(cfg.trainer().n_components(), 4);
        assert_eq!(crate::cluster::GroupInitializer::n_clusters(&cfg.initializer()), 4);
    }
}
