use crate::{MetricError, MetricResult};

/// Names accepted by [`get_config`].
pub const METRIC_NAMES: [&str; 4] = ["elpips_vgg", "elpips_squeeze_maxpool", "lpips_vgg", "lpips_squeeze"];

/// Smallest side (in pixels) the coarsest pyramid level is allowed to shrink to.
const MIN_LEVEL_SIDE: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pooling {
    Average,
    Max,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub name: String,
    /// Sample a random input transformation per evaluation (the "E" in E-LPIPS).
    pub enable_ensemble: bool,
    pub pooling: Pooling,
    pub max_scale_levels: usize,
    pub scale_levels: usize,
    /// Geometric falloff of the per-level weight: level `l` is weighted `level_decay^l`.
    pub level_decay: f32,
    /// Weights of the achromatic, red-green and blue-yellow channels.
    pub channel_weights: [f32; 3],
    /// Weight of the finite-difference (edge) features relative to the plain channels.
    pub edge_weight: f32,
    /// Number of ensemble samples averaged per evaluation.
    pub average_over: usize,
    /// Inclusive range of the random per-channel color scale.
    pub color_scale_range: (f32, f32),
}

impl Config {
    fn preset(name: &str, enable_ensemble: bool, pooling: Pooling, max_scale_levels: usize, level_decay: f32, edge_weight: f32) -> Self {
        Self {
            name: name.to_string(),
            enable_ensemble,
            pooling,
            max_scale_levels,
            scale_levels: max_scale_levels,
            level_decay,
            channel_weights: [1.0, 0.5, 0.25],
            edge_weight,
            average_over: 1,
            color_scale_range: (0.8, 1.2),
        }
    }

    /// Pick the number of pyramid levels so the coarsest level keeps at least
    /// `MIN_LEVEL_SIDE` pixels on its shorter side.
    pub fn set_scale_levels_by_image_size(&mut self, height: usize, width: usize) {
        let mut side = height.min(width);
        let mut levels = 1;
        while side >= 2 * MIN_LEVEL_SIDE && levels < self.max_scale_levels {
            side /= 2;
            levels += 1;
        }
        self.scale_levels = levels;
    }

    pub fn level_weight(&self, level: usize) -> f32 {
        self.level_decay.powi(level as i32)
    }

    /// Upper bound (exclusive) of the random crop offset on each axis.
    pub fn max_offset(&self) -> usize {
        1 << self.scale_levels.saturating_sub(1)
    }
}

/// Look up one of the named metric configurations.
pub fn get_config(name: &str) -> MetricResult<Config> {
    let config = match name {
        "elpips_vgg" => Config::preset(name, true, Pooling::Average, 5, 0.75, 4.0),
        "elpips_squeeze_maxpool" => Config::preset(name, true, Pooling::Max, 4, 0.6, 2.0),
        "lpips_vgg" => Config::preset(name, false, Pooling::Average, 5, 0.75, 4.0),
        "lpips_squeeze" => Config::preset(name, false, Pooling::Average, 4, 0.6, 2.0),
        other => return Err(MetricError::UnsupportedMetric(other.to_string())),
    };
    Ok(config)
}
