use ndarray::Array3;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::config::Config;

/// Random input transformation shared by the references and the candidate
/// within one evaluation. Every part of it is linear, so the backward pass is
/// just the adjoint map.
#[derive(Clone, Debug, PartialEq)]
pub struct EnsembleTransform {
    pub flip_x: bool,
    pub flip_y: bool,
    /// Output channel `c` reads input channel `permutation[c]`.
    pub permutation: [usize; 3],
    pub color_scale: [f32; 3],
    /// Rows and columns cropped from the top-left corner.
    pub offset: (usize, usize),
}

impl EnsembleTransform {
    pub fn identity() -> Self {
        Self { flip_x: false, flip_y: false, permutation: [0, 1, 2], color_scale: [1.0; 3], offset: (0, 0) }
    }

    pub fn sample<R: Rng + ?Sized>(rng: &mut R, config: &Config, height: usize, width: usize) -> Self {
        let mut permutation = [0, 1, 2];
        permutation.shuffle(rng);
        let (lo, hi) = config.color_scale_range;
        let color_scale = [rng.gen_range(lo..=hi), rng.gen_range(lo..=hi), rng.gen_range(lo..=hi)];
        let max_offset = config.max_offset();
        let oy = rng.gen_range(0..max_offset).min(height.saturating_sub(1));
        let ox = rng.gen_range(0..max_offset).min(width.saturating_sub(1));
        Self { flip_x: rng.gen(), flip_y: rng.gen(), permutation, color_scale, offset: (oy, ox) }
    }

    pub fn output_dim(&self, height: usize, width: usize) -> (usize, usize) {
        (height - self.offset.0, width - self.offset.1)
    }

    #[inline]
    fn source(&self, y: usize, x: usize, height: usize, width: usize) -> (usize, usize) {
        let sy = y + self.offset.0;
        let sx = x + self.offset.1;
        let sy = if self.flip_y { height - 1 - sy + self.offset.0 } else { sy };
        let sx = if self.flip_x { width - 1 - sx + self.offset.1 } else { sx };
        (sy, sx)
    }

    pub fn apply(&self, image: &Array3<f32>) -> Array3<f32> {
        let (h, w, _) = image.dim();
        let (oh, ow) = self.output_dim(h, w);
        Array3::from_shape_fn((oh, ow, 3), |(y, x, c)| {
            let (sy, sx) = self.source(y, x, h, w);
            self.color_scale[c] * image[(sy, sx, self.permutation[c])]
        })
    }

    /// Pull a gradient with respect to the transformed image back onto an
    /// image of the original `height × width`.
    pub fn adjoint(&self, grad: &Array3<f32>, height: usize, width: usize) -> Array3<f32> {
        let mut out = Array3::<f32>::zeros((height, width, 3));
        for ((y, x, c), &g) in grad.indexed_iter() {
            let (sy, sx) = self.source(y, x, height, width);
            out[(sy, sx, self.permutation[c])] += self.color_scale[c] * g;
        }
        out
    }
}
