use anyhow::{bail, Context, Result};
use elpips::Metric;
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::PathBuf;

pub mod adam;
pub mod image_io;
pub mod optimize;
pub mod schedule;

use image_io::{load_image, save_png};
use optimize::{initial_image, Barycenter, DirectorySink, TOLERANCE};

#[derive(Debug, Clone)]
pub struct Config {
    pub steps: u64,
    pub learning_rate: f32,
    /// `None` seeds from OS entropy.
    pub seed: Option<u64>,
    pub metric: String,
    pub tolerance: f32,
    /// Every this many iterations a checkpoint also stores the raw float image.
    pub raw_save_interval: u64,
}

pub fn default_config() -> Config {
    Config {
        steps: 100_000,
        learning_rate: 0.03,
        seed: None,
        metric: "elpips_vgg".to_string(),
        tolerance: TOLERANCE,
        raw_save_interval: 10_000,
    }
}

#[derive(Debug, Clone)]
pub struct Params {
    pub images: [PathBuf; 2],
    pub outdir: PathBuf,
    pub config: Config,
}

/// Compute the perceptual barycenter of two images, writing inputs, the
/// initial noise and every checkpoint into `outdir`.
pub fn process(params: Params) -> Result<()> {
    let Params { images, outdir, config } = params;
    info!("Starting perceptual barycenter");
    info!("Inputs: {} and {}", images[0].display(), images[1].display());
    info!("Output directory: {}", outdir.display());
    info!("Metric: {}, steps: {}, learning rate: {}", config.metric, config.steps, config.learning_rate);

    let mut metric_config = elpips::get_config(&config.metric)?;

    fs::create_dir_all(&outdir).with_context(|| format!("failed to create '{}'", outdir.display()))?;

    let src = load_image(&images[0])?;
    let dest = load_image(&images[1])?;
    for (path, image) in images.iter().zip([&src, &dest]) {
        if image.dim() != src.dim() {
            bail!("Image '{}' has wrong shape: {:?}, expected {:?}", path.display(), image.dim(), src.dim());
        }
    }
    let (h, w, _) = src.dim();
    info!("Image size: {}x{}", w, h);

    save_png(&outdir.join("src_image.png"), &src)?;
    save_png(&outdir.join("dest_image.png"), &dest)?;

    let mut rng = match config.seed {
        Some(seed) => {
            info!("Seed: {}", seed);
            StdRng::seed_from_u64(seed)
        }
        None => StdRng::from_entropy(),
    };

    metric_config.set_scale_levels_by_image_size(h, w);
    info!("Scale levels: {}", metric_config.scale_levels);

    let initial = initial_image(&mut rng, h, w, config.tolerance)?;
    save_png(&outdir.join("initial_image.png"), &initial)?;

    let metric = Metric::with_seed(metric_config, rng.gen());
    let mut barycenter = Barycenter::new(&config, [src, dest], initial, metric)?;

    let mut sink = DirectorySink::new(&outdir);
    barycenter.run(&mut sink)?;
    info!("Finished after {} steps", barycenter.counter());
    Ok(())
}
