//! One-call fitting: initialization followed by EM, driven by a [`FitConfig`].

use crate::cluster::{
    check_samples, Executor, GroupInitializer, GroupLayout, InitMode, Parallel, TrainOutput,
};
use crate::config::FitConfig;
use crate::error::Result;

/// Fit one mixture per group with `config`, running groups in parallel.
pub fn fit_groups(
    samples: &[Vec<f64>],
    group_ids: &[usize],
    group_count: usize,
    config: &FitConfig,
) -> Result<TrainOutput> {
    fit_groups_on(&Parallel::new(), samples, group_ids, group_count, config)
}

/// Fit one mixture per group with `config` on `executor`.
///
/// With [`InitMode::UseProvidedLabels`] the labels come from k-means++; with
/// [`InitMode::RandomInit`] initialization is skipped. Input validation happens once,
/// before any numerical work.
pub fn fit_groups_on<E: Executor>(
    executor: &E,
    samples: &[Vec<f64>],
    group_ids: &[usize],
    group_count: usize,
    config: &FitConfig,
) -> Result<TrainOutput> {
    config.validate()?;
    let dim = check_samples(samples, group_ids)?;
    let layout = GroupLayout::new(group_ids, group_count)?;

    let labels = match config.init_mode {
        InitMode::UseProvidedLabels => {
            Some(config.initializer().init_labels(executor, samples, &layout)?)
        }
        InitMode::RandomInit => None,
    };
    config
        .trainer()
        .train_layout(executor, samples, &layout, dim, labels.as_deref())
}
