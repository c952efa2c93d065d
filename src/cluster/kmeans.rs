//! Batched k-means++ initialization: one k-means fit per group.
//!
//! # Seeding (Arthur & Vassilvitskii, 2007)
//!
//! The first centroid is a uniformly random sample of the group. Each following
//! centroid is drawn with probability proportional to `D(x)²`, the squared distance
//! from `x` to its nearest already-chosen centroid. Far-away samples are favoured,
//! which spreads the seeds over the group and usually shortens refinement.
//!
//! # Refinement
//!
//! Plain Lloyd iterations: assign each sample to its nearest centroid, move every
//! centroid to the mean of its samples, stop when no label changes or the iteration
//! budget runs out.
//!
//! A group with fewer samples than `k` gets one centroid per sample, so its labels
//! only use `0..n`; the remaining mixture components end up with zero weight.

use rand::prelude::*;
use rand_distr::weighted::WeightedIndex;

use super::executor::{Executor, Parallel};
use super::groups::{check_samples, GroupLayout};
use super::traits::GroupInitializer;
use super::util::{base_seed, group_rng, nearest, squared_euclidean, Stage};
use crate::error::{Error, Result};

/// Per-group k-means with k-means++ seeding.
#[derive(Debug, Clone)]
pub struct KMeansPP {
    /// Clusters per group.
    k: usize,
    /// Maximum Lloyd iterations per group.
    max_iter: usize,
    /// Base seed; per-group streams are derived from it.
    seed: Option<u64>,
}

/// Result of fitting one group.
#[derive(Debug, Clone, Default)]
pub struct KmeansFit {
    /// Final centroids (at most `k`; fewer when the group has fewer samples).
    pub centroids: Vec<Vec<f64>>,
    /// Label of every sample of the group, in sample order.
    pub labels: Vec<usize>,
    /// Lloyd iterations performed.
    pub iterations: usize,
}

/// Result of fitting every group.
#[derive(Debug, Clone)]
pub struct GroupedKmeansFit {
    /// One label per input sample, aligned with the input sequence.
    pub labels: Vec<usize>,
    /// Per-group fits, indexed by group id.
    pub groups: Vec<KmeansFit>,
}

impl KMeansPP {
    /// Create an initializer producing `k` clusters per group.
    pub fn new(k: usize) -> Self {
        Self {
            k,
            max_iter: 100,
            seed: None,
        }
    }

    /// Set the maximum number of Lloyd iterations per group.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Fix the random seed for reproducible labels.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Label every sample, fitting groups in parallel.
    pub fn run(
        &self,
        samples: &[Vec<f64>],
        group_ids: &[usize],
        group_count: usize,
    ) -> Result<Vec<usize>> {
        Ok(self.fit(samples, group_ids, group_count)?.labels)
    }

    /// Fit every group in parallel and return labels plus per-group centroids.
    pub fn fit(
        &self,
        samples: &[Vec<f64>],
        group_ids: &[usize],
        group_count: usize,
    ) -> Result<GroupedKmeansFit> {
        self.fit_on(&Parallel::new(), samples, group_ids, group_count)
    }

    /// Fit every group on `executor`.
    pub fn fit_on<E: Executor>(
        &self,
        executor: &E,
        samples: &[Vec<f64>],
        group_ids: &[usize],
        group_count: usize,
    ) -> Result<GroupedKmeansFit> {
        check_samples(samples, group_ids)?;
        let layout = GroupLayout::new(group_ids, group_count)?;
        self.fit_layout(executor, samples, &layout)
    }

    fn fit_layout<E: Executor>(
        &self,
        executor: &E,
        samples: &[Vec<f64>],
        layout: &GroupLayout,
    ) -> Result<GroupedKmeansFit> {
        if self.k == 0 {
            return Err(Error::InvalidParameter {
                name: "k",
                message: "must be at least 1",
            });
        }

        let base = base_seed(self.seed);
        let groups = executor.map_groups(layout.group_count(), |group| {
            let mut rng = group_rng(base, group, Stage::Init);
            fit_group(&samples[layout.range(group)], self.k, self.max_iter, &mut rng)
        });

        // Ranges partition the samples in order, so concatenation realigns the labels.
        let mut labels = Vec::with_capacity(samples.len());
        for fit in &groups {
            labels.extend_from_slice(&fit.labels);
        }
        Ok(GroupedKmeansFit { labels, groups })
    }
}

impl Default for KMeansPP {
    fn default() -> Self {
        Self::new(3)
    }
}

impl GroupInitializer for KMeansPP {
    fn init_labels<E: Executor>(
        &self,
        executor: &E,
        samples: &[Vec<f64>],
        layout: &GroupLayout,
    ) -> Result<Vec<usize>> {
        Ok(self.fit_layout(executor, samples, layout)?.labels)
    }

    fn n_clusters(&self) -> usize {
        self.k
    }
}

fn fit_group<R: Rng + ?Sized>(
    points: &[Vec<f64>],
    k: usize,
    max_iter: usize,
    rng: &mut R,
) -> KmeansFit {
    if points.is_empty() {
        return KmeansFit::default();
    }

    let mut centroids = seed_centroids(points, k.min(points.len()), rng);
    let mut labels = assign(points, &centroids);
    let mut iterations = 0;

    while iterations < max_iter {
        iterations += 1;
        update_centroids(points, &labels, &mut centroids);
        let next = assign(points, &centroids);
        if next == labels {
            break;
        }
        labels = next;
    }

    KmeansFit {
        centroids,
        labels,
        iterations,
    }
}

/// k-means++ seeding of `k` centroids (`k <= points.len()`).
fn seed_centroids<R: Rng + ?Sized>(points: &[Vec<f64>], k: usize, rng: &mut R) -> Vec<Vec<f64>> {
    let n = points.len();
    let mut centroids = Vec::with_capacity(k);
    centroids.push(points[rng.random_range(0..n)].clone());

    let mut min_dist: Vec<f64> = points
        .iter()
        .map(|p| squared_euclidean(p, &centroids[0]))
        .collect();

    while centroids.len() < k {
        // All-zero weights (only duplicates left) fall back to a uniform draw.
        let next = match WeightedIndex::new(&min_dist) {
            Ok(dist) => dist.sample(rng),
            Err(_) => rng.random_range(0..n),
        };
        let chosen = points[next].clone();
        for (d, p) in min_dist.iter_mut().zip(points) {
            let candidate = squared_euclidean(p, &chosen);
            if candidate < *d {
                *d = candidate;
            }
        }
        centroids.push(chosen);
    }
    centroids
}

fn assign(points: &[Vec<f64>], centroids: &[Vec<f64>]) -> Vec<usize> {
    points.iter().map(|p| nearest(p, centroids).0).collect()
}

/// Move centroids to the mean of their members; empty clusters keep their position.
fn update_centroids(points: &[Vec<f64>], labels: &[usize], centroids: &mut [Vec<f64>]) {
    let dim = centroids[0].len();
    let mut sums = vec![vec![0.0; dim]; centroids.len()];
    let mut counts = vec![0usize; centroids.len()];

    for (p, &label) in points.iter().zip(labels) {
        counts[label] += 1;
        for (s, x) in sums[label].iter_mut().zip(p) {
            *s += x;
        }
    }

    for ((centroid, sum), &count) in centroids.iter_mut().zip(sums).zip(&counts) {
        if count > 0 {
            let inv = 1.0 / count as f64;
            for (c, s) in centroid.iter_mut().zip(sum) {
                *c = s * inv;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::executor::Sequential;

    fn two_blobs() -> Vec<Vec<f64>> {
        vec![
            vec![0.0, 0.0],
            vec![0.1, 0.1],
            vec![0.2, 0.0],
            vec![10.0, 10.0],
            vec![10.1, 10.1],
            vec![10.0, 10.2],
        ]
    }

    #[test]
    fn test_kmeans_separates_blobs() {
        let data = two_blobs();
        let labels = KMeansPP::new(2).with_seed(42).run(&data, &[0; 6], 1).unwrap();
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[1], labels[2]);
        assert_eq!(labels[3], labels[4]);
        assert_eq!(labels[4], labels[5]);
        assert_ne!(labels[0], labels[3]);
    }

    #[test]
    fn test_groups_are_fitted_independently() {
        let mut data = two_blobs();
        data.extend(two_blobs().into_iter().map(|p| vec![p[0] + 100.0, p[1] - 100.0]));
        let ids = [0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 1, 1];
        let fit = KMeansPP::new(2)
            .with_seed(7)
            .fit_on(&Sequential, &data, &ids, 2)
            .unwrap();

        assert_eq!(fit.labels.len(), 12);
        assert_eq!(fit.groups.len(), 2);
        for group in &fit.groups {
            assert_eq!(group.centroids.len(), 2);
            assert_ne!(group.labels[0], group.labels[3]);
        }
        let right = &fit.groups[1].centroids;
        assert!(right.iter().all(|c| c[0] >= 100.0));
    }

    #[test]
    fn test_seeded_runs_are_reproducible_across_executors() {
        let data: Vec<Vec<f64>> = (0..60).map(|i| vec![(i % 7) as f64, (i % 11) as f64]).collect();
        let ids: Vec<usize> = (0..60).map(|i| i / 20).collect();
        let model = KMeansPP::new(3).with_seed(99);
        let a = model.fit_on(&Sequential, &data, &ids, 3).unwrap();
        let b = model.fit_on(&Parallel::new(), &data, &ids, 3).unwrap();
        assert_eq!(a.labels, b.labels);
    }

    #[test]
    fn test_small_group_uses_one_centroid_per_sample() {
        let data = vec![vec![1.0], vec![2.0]];
        let fit = KMeansPP::new(5).with_seed(1).fit(&data, &[0, 0], 1).unwrap();
        assert_eq!(fit.groups[0].centroids.len(), 2);
        assert!(fit.labels.iter().all(|&l| l < 2));
        assert_ne!(fit.labels[0], fit.labels[1]);
    }

    #[test]
    fn test_empty_group_yields_no_labels() {
        let data = vec![vec![1.0], vec![2.0]];
        let fit = KMeansPP::new(2).with_seed(1).fit(&data, &[1, 1], 3).unwrap();
        assert!(fit.groups[0].labels.is_empty());
        assert_eq!(fit.groups[1].labels.len(), 2);
        assert!(fit.groups[2].centroids.is_empty());
    }

    #[test]
    fn test_duplicate_points_do_not_fail_seeding() {
        let data = vec![vec![3.0, 3.0]; 8];
        let labels = KMeansPP::new(3).with_seed(5).run(&data, &[0; 8], 1).unwrap();
        assert!(labels.iter().all(|&l| l < 3));
    }

    #[test]
    fn test_invalid_inputs() {
        let data = two_blobs();
        assert!(KMeansPP::new(0).run(&data, &[0; 6], 1).is_err());
        assert!(matches!(
            KMeansPP::new(2).run(&data, &[0, 0, 1, 0, 1, 1], 2),
            Err(Error::InputContract { index: 3, .. })
        ));
        assert!(matches!(
            KMeansPP::new(2).run(&data, &[0; 5], 1),
            Err(Error::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_zero_iterations_keeps_seed_assignment() {
        let data = two_blobs();
        let fit = KMeansPP::new(2).with_max_iter(0).with_seed(3).fit(&data, &[0; 6], 1).unwrap();
        assert_eq!(fit.groups[0].iterations, 0);
        assert!(fit.labels.iter().all(|&l| l < 2));
    }
}
