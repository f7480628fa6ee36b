//! Differentiable feature extraction: lightness compression, opponent color,
//! 2×2 pooling pyramid and the weighted squared-difference energy, each with
//! its backward pass.

use ndarray::{Array3, Axis, Zip};

use crate::config::Pooling;

/// Rows: achromatic, red-green, blue-yellow.
pub(crate) const OPPONENT: [[f32; 3]; 3] = [
    [1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0],
    [0.5, -0.5, 0.0],
    [0.25, 0.25, -0.5],
];

const ONE_THIRD: f32 = 1.0 / 3.0;

/// Cube-root lightness. Negative input yields NaN, which the caller reports.
pub(crate) fn lightness(image: &Array3<f32>) -> Array3<f32> {
    image.mapv(|v| v.powf(ONE_THIRD))
}

/// d/dv v^(1/3); unbounded as v approaches 0.
pub(crate) fn lightness_derivative(image: &Array3<f32>) -> Array3<f32> {
    image.mapv(|v| ONE_THIRD / v.powf(2.0 * ONE_THIRD))
}

fn mix_channels(image: &Array3<f32>, matrix: &[[f32; 3]; 3], transpose: bool) -> Array3<f32> {
    let mut out = Array3::<f32>::zeros(image.dim());
    Zip::from(out.lanes_mut(Axis(2))).and(image.lanes(Axis(2))).for_each(|mut o, i| {
        for k in 0..3 {
            let mut acc = 0.0;
            for c in 0..3 {
                let m = if transpose { matrix[c][k] } else { matrix[k][c] };
                acc += m * i[c];
            }
            o[k] = acc;
        }
    });
    out
}

pub(crate) fn opponent(image: &Array3<f32>) -> Array3<f32> {
    mix_channels(image, &OPPONENT, false)
}

pub(crate) fn opponent_adjoint(grad: &Array3<f32>) -> Array3<f32> {
    mix_channels(grad, &OPPONENT, true)
}

/// Output of one 2×2 pooling step. For max pooling the winning position
/// inside each window (0..4, row-major) is kept for the backward pass.
pub(crate) struct Pooled {
    pub output: Array3<f32>,
    pub argmax: Option<Array3<u8>>,
}

pub(crate) fn pool2(input: &Array3<f32>, pooling: Pooling) -> Pooled {
    let (h, w, c) = input.dim();
    let (oh, ow) = (h / 2, w / 2);
    let mut output = Array3::<f32>::zeros((oh, ow, c));
    match pooling {
        Pooling::Average => {
            for ((y, x, k), o) in output.indexed_iter_mut() {
                let (sy, sx) = (2 * y, 2 * x);
                *o = 0.25
                    * (input[(sy, sx, k)] + input[(sy, sx + 1, k)] + input[(sy + 1, sx, k)] + input[(sy + 1, sx + 1, k)]);
            }
            Pooled { output, argmax: None }
        }
        Pooling::Max => {
            let mut argmax = Array3::<u8>::zeros((oh, ow, c));
            for ((y, x, k), o) in output.indexed_iter_mut() {
                let (sy, sx) = (2 * y, 2 * x);
                let mut best = 0u8;
                let mut best_v = input[(sy, sx, k)];
                for (idx, (dy, dx)) in [(0, 1), (1, 0), (1, 1)].into_iter().enumerate() {
                    let v = input[(sy + dy, sx + dx, k)];
                    if v > best_v {
                        best_v = v;
                        best = idx as u8 + 1;
                    }
                }
                *o = best_v;
                argmax[(y, x, k)] = best;
            }
            Pooled { output, argmax: Some(argmax) }
        }
    }
}

/// Adjoint of [`pool2`] onto an input of `height × width`.
pub(crate) fn pool2_adjoint(grad: &Array3<f32>, height: usize, width: usize, argmax: Option<&Array3<u8>>) -> Array3<f32> {
    let c = grad.dim().2;
    let mut out = Array3::<f32>::zeros((height, width, c));
    for ((y, x, k), &g) in grad.indexed_iter() {
        let (sy, sx) = (2 * y, 2 * x);
        match argmax {
            None => {
                let q = 0.25 * g;
                out[(sy, sx, k)] += q;
                out[(sy, sx + 1, k)] += q;
                out[(sy + 1, sx, k)] += q;
                out[(sy + 1, sx + 1, k)] += q;
            }
            Some(am) => {
                let idx = am[(y, x, k)] as usize;
                out[(sy + idx / 2, sx + idx % 2, k)] += g;
            }
        }
    }
    out
}

/// Weighted energy of a feature difference:
/// `Σ_c w_c (Σ Δ² + edge · (Σ (∂xΔ)² + Σ (∂yΔ)²))`.
pub(crate) fn energy(delta: &Array3<f32>, channel_weights: &[f32; 3], edge_weight: f32) -> f64 {
    let (h, w, _) = delta.dim();
    let mut total = 0.0f64;
    for ((y, x, c), &d) in delta.indexed_iter() {
        let cw = channel_weights[c] as f64;
        let mut e = (d as f64) * (d as f64);
        if x + 1 < w {
            let dx = (delta[(y, x + 1, c)] - d) as f64;
            e += edge_weight as f64 * dx * dx;
        }
        if y + 1 < h {
            let dy = (delta[(y + 1, x, c)] - d) as f64;
            e += edge_weight as f64 * dy * dy;
        }
        total += cw * e;
    }
    total
}

/// Gradient of [`energy`] with respect to `delta`, scaled by `scale`.
pub(crate) fn energy_gradient(delta: &Array3<f32>, channel_weights: &[f32; 3], edge_weight: f32, scale: f32) -> Array3<f32> {
    let (h, w, _) = delta.dim();
    Array3::from_shape_fn(delta.dim(), |(y, x, c)| {
        let d = delta[(y, x, c)];
        let mut lap = 0.0;
        if x > 0 {
            lap += d - delta[(y, x - 1, c)];
        }
        if x + 1 < w {
            lap += d - delta[(y, x + 1, c)];
        }
        if y > 0 {
            lap += d - delta[(y - 1, x, c)];
        }
        if y + 1 < h {
            lap += d - delta[(y + 1, x, c)];
        }
        scale * channel_weights[c] * 2.0 * (d + edge_weight * lap)
    })
}
