//! Per-group Gaussian mixture fitting.
//!
//! The input is a sample sequence partitioned into groups (for example spatial
//! blocks of a volume, or histogram bins). Every group is fitted with its own
//! mixture of `K` Gaussians, independently of all other groups.
//!
//! ## Pipeline
//!
//! 1. [`KMeansPP`] labels the samples of each group (hard clustering, k-means++
//!    seeding followed by Lloyd iterations).
//! 2. [`GmmTrainer`] runs EM per group, starting from those labels, and returns a
//!    [`ModelCollection`] with one [`GaussianMixtureModel`] per group.
//! 3. The collection can be persisted with [`crate::store`] and resampled with
//!    [`MixtureSampler`].
//!
//! ## Hard vs Soft Clustering
//!
//! **Hard clustering** (k-means) assigns each sample to exactly one cluster. It is
//! cheap and a good starting point, but ignores cluster shape and overlap.
//!
//! **Soft clustering** (GMM) gives each sample a probability over components and
//! models every component's covariance, which is what makes the mixtures usable as a
//! compact density model of the group.
//!
//! ## Execution
//!
//! Groups are independent, so both stages submit one task per group to an
//! [`Executor`]: [`Sequential`] for tests and small inputs, [`Parallel`] (rayon)
//! otherwise. Random streams are derived per group from the seed, so results do not
//! depend on the executor.
//!
//! ## Usage
//!
//! ```rust
//! use gmmset::cluster::{GmmTrainer, KMeansPP, MixtureSampler, Sequential};
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let samples = vec![
//!     vec![0.0, 0.0],
//!     vec![0.1, 0.2],
//!     vec![0.2, 0.1],
//!     vec![5.0, 5.0],
//!     vec![5.1, 4.9],
//!     vec![4.9, 5.2],
//! ];
//! let group_ids = vec![0, 0, 0, 1, 1, 1];
//!
//! let labels = KMeansPP::new(1).with_seed(42).run(&samples, &group_ids, 2).unwrap();
//! let output = GmmTrainer::new(1)
//!     .run_on(&Sequential, &samples, &group_ids, 2, Some(&labels))
//!     .unwrap();
//! assert_eq!(output.models.len(), 2);
//!
//! let sampler = MixtureSampler::new(&output.models).unwrap();
//! let draws: Vec<Vec<f64>> = sampler
//!     .sample_groups(&[0, 1], StdRng::seed_from_u64(7))
//!     .unwrap()
//!     .collect();
//! assert_eq!(draws.len(), 2);
//! ```

mod executor;
mod gmm;
mod groups;
mod kmeans;
mod linalg;
mod model;
mod sampler;
mod traits;
mod util;

pub use executor::{Executor, Parallel, Sequential};
pub use gmm::{GmmTrainer, GroupDiagnostics, GroupStatus, InitMode, TrainOutput, Verbosity};
pub use groups::{sort_by_group, GroupIndex, GroupLayout};
pub use kmeans::{GroupedKmeansFit, KMeansPP, KmeansFit};
pub use model::{CovarianceType, GaussianComponent, GaussianMixtureModel, ModelCollection};
pub use sampler::{MixtureSampler, Samples};
pub use traits::GroupInitializer;

pub(crate) use groups::check_samples;
