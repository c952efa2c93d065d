//! Batched per-group Gaussian mixture models.
//!
//! `gmmset` fits one Gaussian mixture per group of a partitioned dataset (spatial
//! blocks, histogram bins, ...) in a single batched pass, then persists or resamples
//! the fitted mixtures.
//!
//! - [`cluster`]: k-means++ initialization, EM training, mixture entities, sampling
//! - [`store`]: versioned binary model files
//! - [`FitConfig`] and [`fit_groups`]: one-call configuration and pipeline

#![forbid(unsafe_code)]

pub mod cluster;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod store;

pub use cluster::{
    CovarianceType, Executor, GaussianComponent, GaussianMixtureModel, GmmTrainer,
    GroupDiagnostics, GroupIndex, GroupLayout, GroupStatus, InitMode, KMeansPP,
    MixtureSampler, ModelCollection, Parallel, Sequential, TrainOutput, Verbosity,
};
pub use config::FitConfig;
pub use error::{Error, Result};
pub use pipeline::{fit_groups, fit_groups_on};
pub use store::{load_models, write_models};
