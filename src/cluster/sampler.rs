//! Drawing new samples from trained per-group mixtures.
//!
//! A draw picks a component by its weight, then maps a standard-normal vector `z`
//! through the component's Cholesky factor: `x = μ + L z`. Factors are computed once
//! when the sampler is built.

use rand::prelude::*;
use rand_distr::weighted::WeightedIndex;
use rand_distr::{Distribution, StandardNormal};

use super::linalg::Cholesky;
use super::model::{GaussianMixtureModel, ModelCollection};
use crate::error::{Error, Result};

/// Factored form of one group's mixture.
#[derive(Debug, Clone)]
struct PreparedMixture {
    chooser: WeightedIndex<f64>,
    /// `None` for zero-weight components, which the chooser never selects.
    factors: Vec<Option<Cholesky>>,
}

/// Sampling state of one group.
#[derive(Debug, Clone)]
enum GroupState {
    Ready(PreparedMixture),
    /// All weights are zero.
    Empty,
    /// A weighted covariance is not positive definite even after regularization.
    Unfactorable,
}

/// Sampler over a trained [`ModelCollection`].
#[derive(Debug, Clone)]
pub struct MixtureSampler<'m> {
    models: &'m ModelCollection,
    groups: Vec<GroupState>,
}

impl<'m> MixtureSampler<'m> {
    /// Factor every weighted component of every group.
    ///
    /// A group whose mixture is empty or cannot be factored is only reported when
    /// samples are requested from it; other groups stay usable.
    pub fn new(models: &'m ModelCollection) -> Result<Self> {
        let dim = models.dim();
        let groups = models.iter().map(|model| prepare(model, dim)).collect();
        Ok(Self { models, groups })
    }

    /// The collection being sampled.
    pub fn models(&self) -> &'m ModelCollection {
        self.models
    }

    /// Draw one sample from `group`, returning the chosen component alongside it.
    pub fn draw<R: Rng + ?Sized>(&self, group: usize, rng: &mut R) -> Result<(usize, Vec<f64>)> {
        let mixture = self.mixture(group)?;
        Ok(self.draw_from(group, mixture, rng))
    }

    /// Lazily draw one sample per entry of `group_ids`, in order.
    ///
    /// Every id is checked up front, so the returned iterator cannot fail. It is
    /// one-shot: drawing the same values again needs a fresh, identically seeded RNG.
    pub fn sample_groups<'s, R: Rng>(
        &'s self,
        group_ids: &'s [usize],
        rng: R,
    ) -> Result<Samples<'s, 'm, R>> {
        for &group in group_ids {
            self.mixture(group)?;
        }
        Ok(Samples {
            sampler: self,
            group_ids: group_ids.iter(),
            rng,
        })
    }

    fn mixture(&self, group: usize) -> Result<&PreparedMixture> {
        match self.groups.get(group) {
            Some(GroupState::Ready(mixture)) => Ok(mixture),
            Some(GroupState::Empty) => Err(Error::EmptyMixture { group }),
            Some(GroupState::Unfactorable) => Err(Error::InvalidParameter {
                name: "covariance",
                message: "not positive definite",
            }),
            None => Err(Error::InvalidGroup {
                group,
                group_count: self.groups.len(),
            }),
        }
    }

    fn draw_from<R: Rng + ?Sized>(
        &self,
        group: usize,
        mixture: &PreparedMixture,
        rng: &mut R,
    ) -> (usize, Vec<f64>) {
        let component = mixture.chooser.sample(rng);
        let comp = &self.models[group].components()[component];
        let z: Vec<f64> = (0..comp.dim())
            .map(|_| Distribution::<f64>::sample(&StandardNormal, rng))
            .collect();
        let out = match &mixture.factors[component] {
            Some(chol) => chol.transform(&comp.mean, &z),
            None => comp.mean.clone(),
        };
        (component, out)
    }
}

fn prepare(model: &GaussianMixtureModel, dim: usize) -> GroupState {
    let weights = model.weights();
    let Ok(chooser) = WeightedIndex::new(&weights) else {
        return GroupState::Empty;
    };
    let mut factors = Vec::with_capacity(weights.len());
    for comp in model.components() {
        if comp.weight <= 0.0 {
            factors.push(None);
            continue;
        }
        let mut covariance = comp.covariance.clone();
        match Cholesky::factor_regularized(&mut covariance, dim, f64::EPSILON) {
            Some(chol) => factors.push(Some(chol)),
            None => return GroupState::Unfactorable,
        }
    }
    GroupState::Ready(PreparedMixture { chooser, factors })
}

/// One-shot stream of samples produced by [`MixtureSampler::sample_groups`].
#[derive(Debug)]
pub struct Samples<'s, 'm, R> {
    sampler: &'s MixtureSampler<'m>,
    group_ids: std::slice::Iter<'s, usize>,
    rng: R,
}

impl<R: Rng> Iterator for Samples<'_, '_, R> {
    type Item = Vec<f64>;

    fn next(&mut self) -> Option<Self::Item> {
        let group = *self.group_ids.next()?;
        // Ids were validated when the stream was created.
        let GroupState::Ready(mixture) = &self.sampler.groups[group] else {
            return None;
        };
        Some(self.sampler.draw_from(group, mixture, &mut self.rng).1)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.group_ids.size_hint()
    }
}

impl<R: Rng> ExactSizeIterator for Samples<'_, '_, R> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::model::{GaussianComponent, GaussianMixtureModel};

    fn collection() -> ModelCollection {
        let skewed = GaussianMixtureModel::new(vec![
            GaussianComponent::new(0.99, vec![0.0, 0.0], vec![1.0, 0.0, 0.0, 1.0]).unwrap(),
            GaussianComponent::new(0.01, vec![100.0, 100.0], vec![1.0, 0.0, 0.0, 1.0]).unwrap(),
        ])
        .unwrap();
        let shifted = GaussianMixtureModel::new(vec![
            GaussianComponent::new(0.0, vec![0.0, 0.0], vec![1.0, 0.0, 0.0, 1.0]).unwrap(),
            GaussianComponent::new(1.0, vec![5.0, -5.0], vec![4.0, 1.0, 1.0, 2.0]).unwrap(),
        ])
        .unwrap();
        let empty = GaussianMixtureModel::empty(2, 2, 1e-6);
        ModelCollection::new(2, 2, vec![skewed, shifted, empty]).unwrap()
    }

    #[test]
    fn stream_matches_request_length_and_order() {
        let models = collection();
        let sampler = MixtureSampler::new(&models).unwrap();
        let ids = [1, 1, 0, 1];
        let stream = sampler.sample_groups(&ids, StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(stream.len(), 4);
        let draws: Vec<Vec<f64>> = stream.collect();
        assert_eq!(draws.len(), 4);
        // Group 1 only ever uses its weighted component around (5, -5).
        for idx in [0, 1, 3] {
            assert!((draws[idx][0] - 5.0).abs() < 15.0);
            assert!((draws[idx][1] + 5.0).abs() < 15.0);
        }
    }

    #[test]
    fn zero_weight_component_is_never_drawn() {
        let models = collection();
        let sampler = MixtureSampler::new(&models).unwrap();
        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..500 {
            let (component, _) = sampler.draw(1, &mut rng).unwrap();
            assert_eq!(component, 1);
        }
    }

    #[test]
    fn sample_moments_follow_component() {
        let models = collection();
        let sampler = MixtureSampler::new(&models).unwrap();
        let ids = vec![1; 20_000];
        let draws: Vec<Vec<f64>> = sampler
            .sample_groups(&ids, StdRng::seed_from_u64(3))
            .unwrap()
            .collect();
        let n = draws.len() as f64;
        let mean_x = draws.iter().map(|d| d[0]).sum::<f64>() / n;
        let mean_y = draws.iter().map(|d| d[1]).sum::<f64>() / n;
        let cov_xy = draws.iter().map(|d| (d[0] - mean_x) * (d[1] - mean_y)).sum::<f64>() / n;
        assert!((mean_x - 5.0).abs() < 0.1);
        assert!((mean_y + 5.0).abs() < 0.1);
        assert!((cov_xy - 1.0).abs() < 0.15);
    }

    #[test]
    fn seeded_streams_repeat() {
        let models = collection();
        let sampler = MixtureSampler::new(&models).unwrap();
        let ids = [0, 1, 0, 0, 1];
        let a: Vec<_> = sampler.sample_groups(&ids, StdRng::seed_from_u64(9)).unwrap().collect();
        let b: Vec<_> = sampler.sample_groups(&ids, StdRng::seed_from_u64(9)).unwrap().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn unfactorable_group_does_not_block_healthy_groups() {
        let healthy = GaussianMixtureModel::new(vec![GaussianComponent::new(
            1.0,
            vec![3.0, 3.0],
            vec![1.0, 0.0, 0.0, 1.0],
        )
        .unwrap()])
        .unwrap();
        let indefinite = GaussianMixtureModel::new(vec![GaussianComponent::new(
            1.0,
            vec![0.0, 0.0],
            vec![1.0, 2.0, 2.0, 1.0],
        )
        .unwrap()])
        .unwrap();
        let models = ModelCollection::new(1, 2, vec![healthy, indefinite]).unwrap();

        let sampler = MixtureSampler::new(&models).unwrap();
        let draws: Vec<Vec<f64>> = sampler
            .sample_groups(&[0, 0], StdRng::seed_from_u64(5))
            .unwrap()
            .collect();
        assert_eq!(draws.len(), 2);
        assert!(matches!(
            sampler.sample_groups(&[0, 1], StdRng::seed_from_u64(5)),
            Err(Error::InvalidParameter { name: "covariance", .. })
        ));
    }

    #[test]
    fn invalid_requests_fail_before_sampling() {
        let models = collection();
        let sampler = MixtureSampler::new(&models).unwrap();
        let rng = StdRng::seed_from_u64(4);
        assert!(matches!(
            sampler.sample_groups(&[0, 7], rng.clone()),
            Err(Error::InvalidGroup { group: 7, group_count: 3 })
        ));
        assert!(matches!(
            sampler.sample_groups(&[0, 2], rng),
            Err(Error::EmptyMixture { group: 2 })
        ));
    }
}
