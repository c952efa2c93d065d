//! Fit mixtures for a few spatial blocks, store them, reload and resample.
//!
//! Run with `RUST_LOG=info` to see the trainer's summary.

use gmmset::cluster::{MixtureSampler, Verbosity};
use gmmset::store::{load_models, write_models};
use gmmset::{fit_groups, FitConfig};
use rand::prelude::*;
use rand_distr::StandardNormal;

fn main() -> gmmset::Result<()> {
    env_logger::init();

    // Four blocks, each holding two clusters of 3D points at block-specific positions.
    let mut rng = StdRng::seed_from_u64(42);
    let mut samples = Vec::new();
    let mut group_ids = Vec::new();
    for block in 0..4 {
        let base = block as f64 * 20.0;
        for i in 0..200 {
            let center = if i % 3 == 0 { base + 6.0 } else { base };
            let point: Vec<f64> = (0..3)
                .map(|_| center + 0.5 * rng.sample::<f64, _>(StandardNormal))
                .collect();
            samples.push(point);
            group_ids.push(block);
        }
    }

    let config = FitConfig::new(2)
        .with_seed(7)
        .with_verbosity(Verbosity::Summary);
    let output = fit_groups(&samples, &group_ids, 4, &config)?;

    println!("=== Trained mixtures ===");
    for (block, (model, diag)) in output.models.iter().zip(&output.diagnostics).enumerate() {
        println!(
            "block {block}: {:?} after {} iterations, log-likelihood {:.2}",
            diag.status,
            diag.iterations,
            diag.final_log_likelihood().unwrap_or(f64::NAN)
        );
        for comp in model.components() {
            println!("  weight {:.3} mean {:?}", comp.weight, comp.mean);
        }
    }

    let dir = std::env::temp_dir().join("gmmset-demo");
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("blocks.gmm");
    write_models(&path, &output.models)?;
    let models = load_models(&path, 2, 3)?;
    println!("\nstored {} mixtures at {}", models.len(), path.display());

    let sampler = MixtureSampler::new(&models)?;
    let requests = [0, 1, 2, 3, 3, 2, 1, 0];
    println!("\n=== Resampled points ===");
    let draws = sampler.sample_groups(&requests, StdRng::seed_from_u64(1))?;
    for (group, x) in requests.iter().zip(draws) {
        println!("  block {group}: ({:6.2}, {:6.2}, {:6.2})", x[0], x[1], x[2]);
    }
    Ok(())
}
