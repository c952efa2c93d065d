//! Batched EM training of one Gaussian mixture per group.
//!
//! # The Model
//!
//! Each group is modelled as
//!
//! ```text
//! P(x) = Σₖ πₖ × N(x | μₖ, Σₖ)
//! ```
//!
//! # The EM Algorithm
//!
//! **E-step**: responsibilities, computed in the log domain:
//! ```text
//! γₙₖ = πₖ N(xₙ | μₖ, Σₖ) / Σⱼ πⱼ N(xₙ | μⱼ, Σⱼ)
//! ```
//!
//! **M-step**:
//! - πₖ = (1/N) Σₙ γₙₖ
//! - μₖ = Σₙ γₙₖ xₙ / Σₙ γₙₖ
//! - Σₖ = Σₙ γₙₖ (xₙ - μₖ)(xₙ - μₖ)ᵀ / Σₙ γₙₖ + floor × I
//!
//! A group stops when the relative change of its log-likelihood drops below the
//! convergence threshold, or when the iteration budget is spent. Groups never wait
//! for each other.
//!
//! # Failure Modes
//!
//! - **Singular covariance**: the floor keeps matrices invertible; if a Cholesky
//!   factorization still fails, growing jitter is added to the diagonal.
//! - **Collapsed component**: a component that loses all responsibility is moved to
//!   the group's farthest outlier. Each group has a bounded number of such resets;
//!   past the bound it stops as [`GroupStatus::Degenerate`] with its last valid
//!   parameters.
//! - **Too few samples**: a group with fewer samples than components keeps the
//!   surplus components at zero weight. A group without samples gets an all-zero model.

use log::{debug, info, warn};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::executor::{Executor, Parallel};
use super::groups::{check_samples, GroupLayout};
use super::linalg::{log_gaussian, Cholesky};
use super::model::{CovarianceType, GaussianComponent, GaussianMixtureModel, ModelCollection};
use super::util::{base_seed, group_rng, log_sum_exp, nearest, squared_euclidean, Stage};
use crate::error::{Error, Result};

/// Responsibility mass below which a component counts as collapsed.
const MIN_COMPONENT_MASS: f64 = 1e-10;

/// Starting responsibilities for EM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitMode {
    /// One-hot responsibilities from caller-supplied labels (e.g. k-means++).
    #[default]
    UseProvidedLabels,
    /// One-hot responsibilities from the nearest of `K` randomly drawn samples.
    RandomInit,
}

/// How much the trainer logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
    /// No output.
    #[default]
    Silent,
    /// One `info` line per group and one for the run.
    Summary,
    /// Additionally every iteration and every recovery at `debug`.
    Detailed,
}

impl From<u8> for Verbosity {
    /// `0` silent, `1` summary, anything higher detailed.
    fn from(level: u8) -> Self {
        match level {
            0 => Verbosity::Silent,
            1 => Verbosity::Summary,
            _ => Verbosity::Detailed,
        }
    }
}

/// How a group's EM loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStatus {
    /// Relative log-likelihood change fell below the threshold.
    Converged,
    /// The iteration budget ran out first.
    MaxIterations,
    /// The reinitialization bound was exceeded; parameters are the last valid ones.
    Degenerate,
    /// The group has no samples.
    Empty,
}

/// Per-group training report.
#[derive(Debug, Clone)]
pub struct GroupDiagnostics {
    /// Number of samples in the group.
    pub samples: usize,
    /// E-steps performed.
    pub iterations: usize,
    /// Log-likelihood after every E-step.
    pub log_likelihood: Vec<f64>,
    /// Why the loop stopped.
    pub status: GroupStatus,
    /// Components moved to an outlier during training.
    pub reinitializations: usize,
}

impl GroupDiagnostics {
    /// Log-likelihood of the last E-step, if any ran.
    pub fn final_log_likelihood(&self) -> Option<f64> {
        self.log_likelihood.last().copied()
    }
}

/// Trained models plus the per-group reports.
#[derive(Debug, Clone)]
pub struct TrainOutput {
    /// One mixture per group, indexed by group id.
    pub models: ModelCollection,
    /// One report per group, indexed by group id.
    pub diagnostics: Vec<GroupDiagnostics>,
}

impl TrainOutput {
    /// Number of groups that reached the convergence threshold.
    pub fn converged_groups(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.status == GroupStatus::Converged)
            .count()
    }

    /// Drop the diagnostics and keep the models.
    pub fn into_models(self) -> ModelCollection {
        self.models
    }
}

/// Batched EM trainer for per-group Gaussian mixtures.
#[derive(Debug, Clone)]
pub struct GmmTrainer {
    /// Components per group (`K`).
    n_components: usize,
    /// Maximum EM iterations per group.
    max_iter: usize,
    init_mode: InitMode,
    verbosity: Verbosity,
    /// Relative log-likelihood change that counts as converged.
    tol: f64,
    /// Added to every covariance diagonal.
    reg_covar: f64,
    covariance_type: CovarianceType,
    /// Component resets allowed per group.
    max_reinit: usize,
    seed: Option<u64>,
}

impl GmmTrainer {
    /// Create a trainer fitting `n_components` Gaussians per group.
    pub fn new(n_components: usize) -> Self {
        Self {
            n_components,
            max_iter: 100,
            init_mode: InitMode::UseProvidedLabels,
            verbosity: Verbosity::Silent,
            tol: 1e-3,
            reg_covar: 1e-6,
            covariance_type: CovarianceType::Full,
            max_reinit: 10,
            seed: None,
        }
    }

    /// Set the maximum number of EM iterations per group.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Set how starting responsibilities are produced.
    pub fn with_init_mode(mut self, init_mode: InitMode) -> Self {
        self.init_mode = init_mode;
        self
    }

    /// Set the logging level.
    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set the relative log-likelihood change below which a group stops.
    pub fn with_convergence_threshold(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Set the value added to every covariance diagonal.
    pub fn with_covariance_floor(mut self, floor: f64) -> Self {
        self.reg_covar = floor;
        self
    }

    /// Set full or diagonal covariance estimation.
    pub fn with_covariance_type(mut self, covariance_type: CovarianceType) -> Self {
        self.covariance_type = covariance_type;
        self
    }

    /// Set how many component resets a group may perform before it is given up.
    pub fn with_max_reinitializations(mut self, max_reinit: usize) -> Self {
        self.max_reinit = max_reinit;
        self
    }

    /// Fix the random seed (only consumed by [`InitMode::RandomInit`]).
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Components per group.
    pub fn n_components(&self) -> usize {
        self.n_components
    }

    /// Train every group in parallel.
    ///
    /// `init_labels` holds one label in `0..K` per sample and is required with
    /// [`InitMode::UseProvidedLabels`]; it is ignored with [`InitMode::RandomInit`].
    pub fn run(
        &self,
        samples: &[Vec<f64>],
        group_ids: &[usize],
        group_count: usize,
        init_labels: Option<&[usize]>,
    ) -> Result<TrainOutput> {
        self.run_on(&Parallel::new(), samples, group_ids, group_count, init_labels)
    }

    /// Train every group on `executor`.
    pub fn run_on<E: Executor>(
        &self,
        executor: &E,
        samples: &[Vec<f64>],
        group_ids: &[usize],
        group_count: usize,
        init_labels: Option<&[usize]>,
    ) -> Result<TrainOutput> {
        let dim = check_samples(samples, group_ids)?;
        let layout = GroupLayout::new(group_ids, group_count)?;
        self.train_layout(executor, samples, &layout, dim, init_labels)
    }

    pub(crate) fn train_layout<E: Executor>(
        &self,
        executor: &E,
        samples: &[Vec<f64>],
        layout: &GroupLayout,
        dim: usize,
        init_labels: Option<&[usize]>,
    ) -> Result<TrainOutput> {
        self.validate()?;
        let labels = match self.init_mode {
            InitMode::UseProvidedLabels => Some(self.check_labels(init_labels, samples.len())?),
            InitMode::RandomInit => None,
        };

        let base = base_seed(self.seed);
        let results = executor.map_groups(layout.group_count(), |group| {
            let range = layout.range(group);
            let rng = group_rng(base, group, Stage::Em);
            let em = GroupEm::new(self, group, &samples[range.clone()], dim, rng);
            em.fit(labels.map(|l| &l[range]))
        });
        let (models, diagnostics): (Vec<_>, Vec<_>) = results.into_iter().unzip();

        let output = TrainOutput {
            models: ModelCollection::new(self.n_components, dim, models)?,
            diagnostics,
        };
        if self.verbosity >= Verbosity::Summary {
            info!(
                "trained {} groups: {} converged, {} samples, k={}, d={}",
                layout.group_count(),
                output.converged_groups(),
                samples.len(),
                self.n_components,
                dim
            );
        }
        Ok(output)
    }

    fn validate(&self) -> Result<()> {
        if self.n_components == 0 {
            return Err(Error::InvalidParameter {
                name: "n_components",
                message: "must be at least 1",
            });
        }
        if !(self.tol.is_finite() && self.tol >= 0.0) {
            return Err(Error::InvalidParameter {
                name: "convergence_threshold",
                message: "must be finite and non-negative",
            });
        }
        if !(self.reg_covar.is_finite() && self.reg_covar >= 0.0) {
            return Err(Error::InvalidParameter {
                name: "covariance_floor",
                message: "must be finite and non-negative",
            });
        }
        Ok(())
    }

    fn check_labels<'a>(&self, labels: Option<&'a [usize]>, n: usize) -> Result<&'a [usize]> {
        let labels = labels.ok_or_else(|| Error::InputContract {
            index: 0,
            message: "initial labels are required when initializing from labels".to_string(),
        })?;
        if labels.len() != n {
            return Err(Error::InputContract {
                index: labels.len().min(n),
                message: format!("expected {n} initial labels, found {}", labels.len()),
            });
        }
        if let Some(index) = labels.iter().position(|&l| l >= self.n_components) {
            return Err(Error::InputContract {
                index,
                message: format!(
                    "initial label {} is not below component count {}",
                    labels[index], self.n_components
                ),
            });
        }
        Ok(labels)
    }
}

impl Default for GmmTrainer {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Raised when a group exhausts its reinitialization budget.
struct Degenerate;

/// EM state of a single group. Owned by the task fitting that group.
struct GroupEm<'a> {
    params: &'a GmmTrainer,
    group: usize,
    points: &'a [Vec<f64>],
    k: usize,
    dim: usize,
    rng: ChaCha8Rng,
    components: Vec<GaussianComponent>,
    /// Row-major `n x k`.
    resp: Vec<f64>,
    center: Vec<f64>,
    /// Per-dimension variance of the group, used when a component is reset.
    spread: Vec<f64>,
    reinitializations: usize,
}

impl<'a> GroupEm<'a> {
    fn new(
        params: &'a GmmTrainer,
        group: usize,
        points: &'a [Vec<f64>],
        dim: usize,
        rng: ChaCha8Rng,
    ) -> Self {
        let k = params.n_components;
        let n = points.len();
        let mut center = vec![0.0; dim];
        let mut spread = vec![0.0; dim];
        if n > 0 {
            for p in points {
                for (c, x) in center.iter_mut().zip(p) {
                    *c += x;
                }
            }
            center.iter_mut().for_each(|c| *c /= n as f64);
            for p in points {
                for ((s, c), x) in spread.iter_mut().zip(&center).zip(p) {
                    *s += (x - c) * (x - c);
                }
            }
            spread.iter_mut().for_each(|s| *s /= n as f64);
        }

        Self {
            params,
            group,
            points,
            k,
            dim,
            rng,
            components: (0..k)
                .map(|_| GaussianComponent::degenerate(dim, params.reg_covar))
                .collect(),
            resp: vec![0.0; n * k],
            center,
            spread,
            reinitializations: 0,
        }
    }

    fn fit(mut self, labels: Option<&[usize]>) -> (GaussianMixtureModel, GroupDiagnostics) {
        let n = self.points.len();
        if n == 0 {
            let diagnostics = GroupDiagnostics {
                samples: 0,
                iterations: 0,
                log_likelihood: Vec::new(),
                status: GroupStatus::Empty,
                reinitializations: 0,
            };
            let model = GaussianMixtureModel::empty(self.k, self.dim, self.params.reg_covar);
            return (model, diagnostics);
        }

        self.init_responsibilities(labels);

        let mut trace: Vec<f64> = Vec::new();
        let mut status = GroupStatus::MaxIterations;
        let mut last_valid: Option<Vec<GaussianComponent>> = None;

        if self.m_step().is_err() {
            status = GroupStatus::Degenerate;
        } else {
            for iteration in 0..self.params.max_iter {
                let Ok(ll) = self.e_step() else {
                    status = GroupStatus::Degenerate;
                    break;
                };
                last_valid = Some(self.components.clone());
                trace.push(ll);
                if self.params.verbosity >= Verbosity::Detailed {
                    debug!(
                        "group {}: iteration {} log-likelihood {:.6}",
                        self.group, iteration, ll
                    );
                }

                if let [.., prev, current] = trace.as_slice() {
                    if relative_change(*prev, *current) < self.params.tol {
                        status = GroupStatus::Converged;
                        break;
                    }
                }

                if self.m_step().is_err() {
                    status = GroupStatus::Degenerate;
                    break;
                }
            }
        }

        if status == GroupStatus::Degenerate {
            if let Some(valid) = last_valid {
                self.components = valid;
            }
            self.normalize_weights();
        }

        if self.params.verbosity >= Verbosity::Summary {
            match status {
                GroupStatus::Degenerate => warn!(
                    "group {}: gave up after {} component resets",
                    self.group, self.reinitializations
                ),
                _ => info!(
                    "group {}: {:?} after {} iterations ({} samples), log-likelihood {:.6}",
                    self.group,
                    status,
                    trace.len(),
                    n,
                    trace.last().copied().unwrap_or(f64::NAN)
                ),
            }
        }

        let diagnostics = GroupDiagnostics {
            samples: n,
            iterations: trace.len(),
            log_likelihood: trace,
            status,
            reinitializations: self.reinitializations,
        };
        (GaussianMixtureModel::from_components(self.components), diagnostics)
    }

    /// One-hot starting responsibilities.
    ///
    /// Without labels, `min(K, N)` distinct samples are drawn at random and every
    /// sample goes to the nearest of them, so components start apart from each other.
    fn init_responsibilities(&mut self, labels: Option<&[usize]>) {
        let k = self.k;
        let labels: Vec<usize> = match labels {
            Some(labels) => labels.to_vec(),
            None => {
                let n = self.points.len();
                let centers: Vec<Vec<f64>> = rand::seq::index::sample(&mut self.rng, n, k.min(n))
                    .into_iter()
                    .map(|i| self.points[i].clone())
                    .collect();
                self.points.iter().map(|p| nearest(p, &centers).0).collect()
            }
        };
        for (i, label) in labels.into_iter().enumerate() {
            self.resp[i * k + label] = 1.0;
        }
    }

    /// Responsibilities for the current parameters; returns the group log-likelihood.
    fn e_step(&mut self) -> std::result::Result<f64, Degenerate> {
        let factors = self.factor_components()?;
        let k = self.k;
        let mut log_probs = vec![f64::NEG_INFINITY; k];
        let mut total = 0.0;
        let mut unexplained = 0usize;

        for (i, x) in self.points.iter().enumerate() {
            for (c, lp) in log_probs.iter_mut().enumerate() {
                let comp = &self.components[c];
                *lp = match &factors[c] {
                    Some(chol) => comp.weight.ln() + log_gaussian(chol, &comp.mean, x),
                    None => f64::NEG_INFINITY,
                };
            }

            let norm = log_sum_exp(&log_probs);
            let row = &mut self.resp[i * k..(i + 1) * k];
            if norm.is_finite() {
                for (r, lp) in row.iter_mut().zip(&log_probs) {
                    *r = (lp - norm).exp();
                }
                total += norm;
            } else {
                // Underflow everywhere: hand the sample to the nearest live component.
                unexplained += 1;
                row.fill(0.0);
                row[nearest_live(&self.components, x)] = 1.0;
            }
        }

        if unexplained > 0 && self.params.verbosity >= Verbosity::Detailed {
            debug!(
                "group {}: {} samples had no finite density, assigned to nearest component",
                self.group, unexplained
            );
        }
        Ok(total)
    }

    /// Factor every live covariance, regularizing or resetting components that fail.
    fn factor_components(&mut self) -> std::result::Result<Vec<Option<Cholesky>>, Degenerate> {
        let dim = self.dim;
        let floor = self.params.reg_covar;
        let mut factors = Vec::with_capacity(self.k);
        for c in 0..self.k {
            if self.components[c].weight <= 0.0 {
                factors.push(None);
                continue;
            }
            let covariance = &mut self.components[c].covariance;
            let chol = match Cholesky::factor_regularized(covariance, dim, floor) {
                Some(chol) => chol,
                None => {
                    self.reinitialize(c)?;
                    let covariance = &mut self.components[c].covariance;
                    Cholesky::factor_regularized(covariance, dim, floor).ok_or(Degenerate)?
                }
            };
            factors.push(Some(chol));
        }
        Ok(factors)
    }

    /// Re-estimate weights, means and covariances from the responsibilities.
    fn m_step(&mut self) -> std::result::Result<(), Degenerate> {
        let (n, k, dim) = (self.points.len(), self.k, self.dim);
        let floor = self.params.reg_covar;
        let diagonal = self.params.covariance_type == CovarianceType::Diagonal;
        let mut collapsed = Vec::new();
        let mut diff = vec![0.0; dim];

        for c in 0..k {
            let mass: f64 = (0..n).map(|i| self.resp[i * k + c]).sum();
            if !(mass.is_finite() && mass > MIN_COMPONENT_MASS) {
                collapsed.push(c);
                continue;
            }

            let mut mean = vec![0.0; dim];
            for (i, x) in self.points.iter().enumerate() {
                let r = self.resp[i * k + c];
                if r == 0.0 {
                    continue;
                }
                for (m, v) in mean.iter_mut().zip(x) {
                    *m += r * v;
                }
            }
            mean.iter_mut().for_each(|m| *m /= mass);

            let mut covariance = vec![0.0; dim * dim];
            for (i, x) in self.points.iter().enumerate() {
                let r = self.resp[i * k + c];
                if r == 0.0 {
                    continue;
                }
                for ((d, v), m) in diff.iter_mut().zip(x).zip(&mean) {
                    *d = v - m;
                }
                for a in 0..dim {
                    if diagonal {
                        covariance[a * dim + a] += r * diff[a] * diff[a];
                    } else {
                        for b in 0..=a {
                            covariance[a * dim + b] += r * diff[a] * diff[b];
                        }
                    }
                }
            }
            for a in 0..dim {
                for b in 0..=a {
                    let v = covariance[a * dim + b] / mass;
                    covariance[a * dim + b] = v;
                    covariance[b * dim + a] = v;
                }
                covariance[a * dim + a] += floor;
            }

            self.components[c] = GaussianComponent {
                weight: mass / n as f64,
                mean,
                covariance,
            };
        }

        for c in collapsed {
            if n >= k {
                self.reinitialize(c)?;
            } else {
                // Not enough samples to populate every component.
                let mean = std::mem::take(&mut self.components[c].mean);
                self.components[c] = GaussianComponent {
                    mean,
                    ..GaussianComponent::degenerate(dim, floor)
                };
            }
        }

        self.normalize_weights();
        Ok(())
    }

    /// Move component `c` onto the sample the rest of the mixture explains worst.
    fn reinitialize(&mut self, c: usize) -> std::result::Result<(), Degenerate> {
        self.reinitializations += 1;
        if self.reinitializations > self.params.max_reinit {
            return Err(Degenerate);
        }

        let outlier = farthest_outlier(
            self.points,
            &self.components,
            c,
            &self.center,
            self.params.reg_covar,
        );
        let dim = self.dim;
        let floor = self.params.reg_covar;
        let mut covariance = vec![0.0; dim * dim];
        for (a, s) in self.spread.iter().enumerate() {
            covariance[a * dim + a] = s + floor;
        }
        self.components[c] = GaussianComponent {
            weight: 1.0 / self.points.len() as f64,
            mean: self.points[outlier].clone(),
            covariance,
        };
        self.normalize_weights();

        if self.params.verbosity >= Verbosity::Detailed {
            debug!(
                "group {}: component {} reset to outlier sample {}",
                self.group, c, outlier
            );
        }
        Ok(())
    }

    fn normalize_weights(&mut self) {
        let total: f64 = self.components.iter().map(|c| c.weight).sum();
        if total > 0.0 && total.is_finite() {
            for c in &mut self.components {
                c.weight /= total;
            }
        }
    }
}

fn relative_change(prev: f64, current: f64) -> f64 {
    (current - prev).abs() / prev.abs().max(f64::MIN_POSITIVE)
}

/// Live component whose mean is nearest to `x` (component 0 if none is live).
fn nearest_live(components: &[GaussianComponent], x: &[f64]) -> usize {
    let mut best = (0, f64::INFINITY);
    for (idx, comp) in components.iter().enumerate() {
        if comp.weight <= 0.0 {
            continue;
        }
        let d = squared_euclidean(x, &comp.mean);
        if d < best.1 {
            best = (idx, d);
        }
    }
    best.0
}

/// Sample with the lowest log-likelihood under the live components other than `skip`.
///
/// Falls back to the sample farthest from `center` when no other component can be
/// evaluated.
fn farthest_outlier(
    points: &[Vec<f64>],
    components: &[GaussianComponent],
    skip: usize,
    center: &[f64],
    floor: f64,
) -> usize {
    let dim = center.len();
    let live: Vec<(&GaussianComponent, Cholesky)> = components
        .iter()
        .enumerate()
        .filter(|(idx, c)| *idx != skip && c.weight > 0.0)
        .filter_map(|(_, c)| {
            let mut cov = c.covariance.clone();
            Some((c, Cholesky::factor_regularized(&mut cov, dim, floor)?))
        })
        .collect();

    if live.is_empty() {
        let mut best = (0, f64::NEG_INFINITY);
        for (idx, p) in points.iter().enumerate() {
            let d = squared_euclidean(p, center);
            if d > best.1 {
                best = (idx, d);
            }
        }
        return best.0;
    }

    let mut log_probs = vec![0.0; live.len()];
    let mut best = (0, f64::INFINITY);
    for (idx, x) in points.iter().enumerate() {
        for (lp, (comp, chol)) in log_probs.iter_mut().zip(&live) {
            *lp = comp.weight.ln() + log_gaussian(chol, &comp.mean, x);
        }
        let ll = log_sum_exp(&log_probs);
        if ll < best.1 {
            best = (idx, ll);
        }
    }
    best.0
}
