//! Perceptual image distance in the spirit of E-LPIPS, with an analytic
//! backward pass so callers can optimize an image against it.
//!
//! An evaluation runs each image through an optional random ensemble
//! transform, cube-root lightness, an opponent color transform and a 2×2
//! pooling pyramid. The distance is the Euclidean norm of the weighted
//! per-level feature differences (channels plus their finite differences).

use log::debug;
use ndarray::Array3;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use thiserror::Error;

pub mod config;
mod features;
pub mod transform;

pub use config::{get_config, Config, Pooling, METRIC_NAMES};
pub use transform::EnsembleTransform;

use features::{energy, energy_gradient, lightness, lightness_derivative, opponent, opponent_adjoint, pool2, pool2_adjoint};

pub type MetricResult<T> = Result<T, MetricError>;

#[derive(Debug, Error)]
pub enum MetricError {
    #[error("unsupported metric '{0}' (expected one of: elpips_vgg, elpips_squeeze_maxpool, lpips_vgg, lpips_squeeze)")]
    UnsupportedMetric(String),
    #[error("image must be H×W×3 and non-empty, got {0:?}")]
    BadShape((usize, usize, usize)),
    #[error("reference {index} has shape {reference:?} but the candidate has {candidate:?}")]
    ShapeMismatch { index: usize, reference: (usize, usize, usize), candidate: (usize, usize, usize) },
    #[error("non-finite {what} for reference {index}")]
    NonFinite { what: &'static str, index: usize },
}

/// Distances of one candidate to each reference, with `∂distance/∂candidate`
/// for each of them.
#[derive(Clone, Debug)]
pub struct Evaluation {
    pub distances: Vec<f32>,
    pub gradients: Vec<Array3<f32>>,
}

/// A distance between images that is differentiable in its second argument.
pub trait PerceptualMetric {
    fn forward(&mut self, references: &[Array3<f32>], candidate: &Array3<f32>) -> MetricResult<Vec<f32>>;

    fn forward_with_gradient(&mut self, references: &[Array3<f32>], candidate: &Array3<f32>) -> MetricResult<Evaluation>;
}

struct Level {
    features: Array3<f32>,
    argmax: Option<Array3<u8>>,
}

/// Feature pyramid of one (transformed) image.
struct Pyramid {
    levels: Vec<Level>,
}

pub struct Metric {
    config: Config,
    rng: StdRng,
}

impl Metric {
    pub fn new(config: Config) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    pub fn with_seed(config: Config, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(config: Config, rng: StdRng) -> Self {
        debug!(
            "metric {}: {} scale levels, {:?} pooling, ensemble={}",
            config.name, config.scale_levels, config.pooling, config.enable_ensemble
        );
        Self { config, rng }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn sample_transform(&mut self, height: usize, width: usize) -> EnsembleTransform {
        if self.config.enable_ensemble {
            EnsembleTransform::sample(&mut self.rng, &self.config, height, width)
        } else {
            EnsembleTransform::identity()
        }
    }

    fn evaluate(&mut self, references: &[Array3<f32>], candidate: &Array3<f32>, with_gradient: bool) -> MetricResult<Evaluation> {
        let dim = candidate.dim();
        if dim.0 == 0 || dim.1 == 0 || dim.2 != 3 {
            return Err(MetricError::BadShape(dim));
        }
        for (index, reference) in references.iter().enumerate() {
            if reference.dim() != dim {
                return Err(MetricError::ShapeMismatch { index, reference: reference.dim(), candidate: dim });
            }
        }

        let samples = self.config.average_over.max(1);
        let mut distances = vec![0.0f32; references.len()];
        let mut gradients: Vec<Array3<f32>> =
            if with_gradient { references.iter().map(|_| Array3::zeros(dim)).collect() } else { Vec::new() };

        for _ in 0..samples {
            let transform = self.sample_transform(dim.0, dim.1);
            let config = &self.config;
            let transformed = transform.apply(candidate);
            let cand_pyr = build_pyramid(config, &transformed);
            let results: Vec<(f32, Option<Array3<f32>>)> = references
                .par_iter()
                .map(|reference| {
                    let ref_pyr = build_pyramid(config, &transform.apply(reference));
                    compare(config, &cand_pyr, &ref_pyr, with_gradient)
                })
                .collect();

            let dlightness = if with_gradient { Some(lightness_derivative(&transformed)) } else { None };
            for (index, (distance, grad)) in results.into_iter().enumerate() {
                if !distance.is_finite() {
                    return Err(MetricError::NonFinite { what: "distance", index });
                }
                distances[index] += distance / samples as f32;
                if let (Some(grad), Some(dl)) = (grad, dlightness.as_ref()) {
                    let grad = transform.adjoint(&(opponent_adjoint(&grad) * dl), dim.0, dim.1);
                    gradients[index].scaled_add(1.0 / samples as f32, &grad);
                }
            }
        }

        for (index, grad) in gradients.iter().enumerate() {
            if grad.iter().any(|v| !v.is_finite()) {
                return Err(MetricError::NonFinite { what: "gradient", index });
            }
        }
        Ok(Evaluation { distances, gradients })
    }
}

impl PerceptualMetric for Metric {
    fn forward(&mut self, references: &[Array3<f32>], candidate: &Array3<f32>) -> MetricResult<Vec<f32>> {
        Ok(self.evaluate(references, candidate, false)?.distances)
    }

    fn forward_with_gradient(&mut self, references: &[Array3<f32>], candidate: &Array3<f32>) -> MetricResult<Evaluation> {
        self.evaluate(references, candidate, true)
    }
}

fn build_pyramid(config: &Config, image: &Array3<f32>) -> Pyramid {
    let mut levels = vec![Level { features: opponent(&lightness(image)), argmax: None }];
    for _ in 1..config.scale_levels {
        let prev = &levels[levels.len() - 1].features;
        let (h, w, _) = prev.dim();
        if h < 2 || w < 2 {
            break;
        }
        let pooled = pool2(prev, config.pooling);
        levels.push(Level { features: pooled.output, argmax: pooled.argmax });
    }
    Pyramid { levels }
}

/// Distance between two pyramids and, optionally, its gradient with respect
/// to the candidate's finest-level opponent features.
fn compare(config: &Config, candidate: &Pyramid, reference: &Pyramid, with_gradient: bool) -> (f32, Option<Array3<f32>>) {
    let deltas: Vec<Array3<f32>> =
        candidate.levels.iter().zip(&reference.levels).map(|(c, r)| &c.features - &r.features).collect();

    let mut total = 0.0f64;
    for (level, delta) in deltas.iter().enumerate() {
        let n = delta.dim().0 * delta.dim().1;
        let weight = config.level_weight(level) as f64 / n as f64;
        total += weight * energy(delta, &config.channel_weights, config.edge_weight);
    }
    let distance = total.sqrt() as f32;
    if !with_gradient {
        return (distance, None);
    }
    if distance == 0.0 {
        return (distance, Some(Array3::zeros(candidate.levels[0].features.dim())));
    }

    // d sqrt(S) = dS / (2 sqrt(S)), folded into every level's scale.
    let mut grad: Option<Array3<f32>> = None;
    for level in (0..deltas.len()).rev() {
        let delta = &deltas[level];
        let n = delta.dim().0 * delta.dim().1;
        let scale = config.level_weight(level) / n as f32 / (2.0 * distance);
        let mut local = energy_gradient(delta, &config.channel_weights, config.edge_weight, scale);
        if let Some(coarser) = grad.take() {
            let (h, w, _) = delta.dim();
            local += &pool2_adjoint(&coarser, h, w, candidate.levels[level + 1].argmax.as_ref());
        }
        grad = Some(local);
    }
    (distance, grad)
}
