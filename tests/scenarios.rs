use gmmset::cluster::{
    sort_by_group, GaussianComponent, GaussianMixtureModel, GroupIndex, KMeansPP, MixtureSampler,
    ModelCollection, Sequential,
};
use gmmset::store::{load_models, write_models};
use gmmset::{fit_groups, fit_groups_on, Error, FitConfig, GmmTrainer, GroupStatus, InitMode};
use rand::prelude::*;
use rand_distr::StandardNormal;

fn two_blobs(rng: &mut StdRng, per_blob: usize) -> Vec<Vec<f64>> {
    let mut samples = Vec::with_capacity(2 * per_blob);
    for center in [0.0, 10.0] {
        for _ in 0..per_blob {
            let x: f64 = rng.sample(StandardNormal);
            let y: f64 = rng.sample(StandardNormal);
            samples.push(vec![center + x, center + y]);
        }
    }
    samples
}

fn assert_recovers_blobs(model: &GaussianMixtureModel) {
    let mut comps: Vec<&GaussianComponent> = model.components().iter().collect();
    comps.sort_by(|a, b| a.mean[0].total_cmp(&b.mean[0]));
    for (comp, center) in comps.iter().zip([0.0, 10.0]) {
        assert!((comp.mean[0] - center).abs() < 0.5, "mean {:?}", comp.mean);
        assert!((comp.mean[1] - center).abs() < 0.5, "mean {:?}", comp.mean);
        assert!((comp.weight - 0.5).abs() < 0.05, "weight {}", comp.weight);
    }
}

#[test]
fn separated_blobs_recover_means_and_weights() {
    let mut rng = StdRng::seed_from_u64(2024);
    let samples = two_blobs(&mut rng, 100);
    let ids = vec![0; samples.len()];

    let cfg = FitConfig::new(2).with_seed(7);
    let output = fit_groups(&samples, &ids, 1, &cfg).unwrap();
    assert_recovers_blobs(&output.models[0]);
    assert_ne!(output.diagnostics[0].status, GroupStatus::Degenerate);
}

#[test]
fn random_init_recovers_separated_blobs() {
    let mut rng = StdRng::seed_from_u64(2024);
    let samples = two_blobs(&mut rng, 100);
    let ids = vec![0; samples.len()];

    for seed in 0..5 {
        let cfg = FitConfig::new(2)
            .with_init_mode(InitMode::RandomInit)
            .with_seed(seed);
        let output = fit_groups(&samples, &ids, 1, &cfg).unwrap();
        assert_recovers_blobs(&output.models[0]);
    }
}

#[test]
fn groups_are_fitted_independently() {
    let mut rng = StdRng::seed_from_u64(11);
    let blobs = two_blobs(&mut rng, 60);
    let shifted: Vec<Vec<f64>> = blobs.iter().map(|p| vec![p[0] - 50.0, p[1] + 50.0]).collect();

    let mut samples = blobs.clone();
    samples.extend(shifted);
    let ids: Vec<usize> = (0..samples.len()).map(|i| i / blobs.len()).collect();

    let cfg = FitConfig::new(2).with_seed(3);
    let joint = fit_groups_on(&Sequential, &samples, &ids, 2, &cfg).unwrap();
    let alone = fit_groups_on(&Sequential, &blobs, &vec![0; blobs.len()], 1, &cfg).unwrap();

    // Group 0 sees the same samples and the same random stream either way.
    assert_eq!(joint.models[0], alone.models[0]);
    for comp in joint.models[1].components() {
        assert!(comp.mean[0] < -30.0 && comp.mean[1] > 30.0);
    }
}

#[test]
fn sorted_group_ids_are_accepted() {
    let samples = vec![vec![0.0], vec![0.5], vec![1.0], vec![5.0], vec![5.5]];
    let labels = KMeansPP::new(1).with_seed(1).run(&samples, &[0, 0, 0, 1, 1], 2).unwrap();
    assert_eq!(labels, vec![0; 5]);

    let output = GmmTrainer::new(1)
        .run(&samples, &[0, 0, 0, 1, 1], 2, Some(&labels))
        .unwrap();
    assert!((output.models[0].components()[0].mean[0] - 0.5).abs() < 1e-9);
    assert!((output.models[1].components()[0].mean[0] - 5.25).abs() < 1e-9);
}

#[test]
fn unsorted_group_ids_violate_the_contract() {
    let samples = vec![vec![0.0], vec![1.0], vec![2.0]];
    let err = KMeansPP::new(1).run(&samples, &[0, 1, 0], 2).unwrap_err();
    assert!(matches!(err, Error::InputContract { index: 2, .. }));

    let (sorted, ids) = sort_by_group(samples, vec![0, 1, 0]).unwrap();
    assert_eq!(ids, vec![0, 0, 1]);
    assert_eq!(sorted, vec![vec![0.0], vec![2.0], vec![1.0]]);
    assert!(KMeansPP::new(1).run(&sorted, &ids, 2).is_ok());
}

#[test]
fn string_keys_map_to_dense_groups() {
    let keys = ["block-b", "block-a", "block-b", "block-a"];
    let index = GroupIndex::from_keys(keys.iter());
    assert_eq!(index.len(), 2);

    let ids = index.assign(&keys).unwrap();
    let samples: Vec<Vec<f64>> = (0..4).map(|i| vec![i as f64]).collect();
    let (samples, ids) = sort_by_group(samples, ids).unwrap();
    let output = fit_groups(&samples, &ids, index.len(), &FitConfig::new(1).with_seed(0)).unwrap();

    let a = index.group_of(&"block-a").unwrap();
    assert!((output.models[a].components()[0].mean[0] - 2.0).abs() < 1e-9);
}

#[test]
fn sampler_follows_component_weights() {
    let dominant = GaussianComponent::new(0.99, vec![0.0], vec![1.0]).unwrap();
    let rare = GaussianComponent::new(0.01, vec![100.0], vec![1.0]).unwrap();
    let model = GaussianMixtureModel::new(vec![dominant, rare]).unwrap();
    let models = ModelCollection::new(2, 1, vec![model]).unwrap();

    let sampler = MixtureSampler::new(&models).unwrap();
    let requests = vec![0; 10_000];
    let near_dominant = sampler
        .sample_groups(&requests, StdRng::seed_from_u64(99))
        .unwrap()
        .filter(|x| x[0] < 50.0)
        .count();

    let fraction = near_dominant as f64 / requests.len() as f64;
    assert!((fraction - 0.99).abs() < 0.02, "fraction {fraction}");
}

#[test]
fn train_store_load_sample() {
    let mut rng = StdRng::seed_from_u64(5);
    let samples = two_blobs(&mut rng, 40);
    let ids: Vec<usize> = (0..samples.len()).map(|i| if i < 40 { 0 } else { 2 }).collect();

    let models = fit_groups(&samples, &ids, 3, &FitConfig::new(2).with_seed(5))
        .unwrap()
        .into_models();
    assert!(models[1].is_empty());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blocks.gmm");
    write_models(&path, &models).unwrap();
    let loaded = load_models(&path, 2, 2).unwrap();
    assert_eq!(loaded, models);

    let sampler = MixtureSampler::new(&loaded).unwrap();
    let draws: Vec<Vec<f64>> = sampler
        .sample_groups(&[2, 0, 2], StdRng::seed_from_u64(1))
        .unwrap()
        .collect();
    assert_eq!(draws.len(), 3);
    assert!(draws[0][0] > 5.0 && draws[1][0] < 5.0);

    let err = sampler.sample_groups(&[1], StdRng::seed_from_u64(1)).unwrap_err();
    assert!(matches!(err, Error::EmptyMixture { group: 1 }));
}

#[test]
fn kmeans_uses_every_label_on_separated_data() {
    let samples: Vec<Vec<f64>> = (0..3)
        .flat_map(|c| (0..10).map(move |i| vec![c as f64 * 50.0 + i as f64 * 0.01]))
        .collect();
    let ids = vec![0; samples.len()];

    for seed in 0..20 {
        let labels = KMeansPP::new(3).with_seed(seed).run(&samples, &ids, 1).unwrap();
        let mut seen = [false; 3];
        for &l in &labels {
            seen[l] = true;
        }
        assert!(seen.iter().all(|&s| s), "seed {seed} left a label unused");
    }
}
