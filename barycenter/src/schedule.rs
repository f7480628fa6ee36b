use std::collections::BTreeSet;

/// Dense early checkpoints; the fast initial transient is sampled closely.
pub const CHECKPOINT_PREFIX: [u64; 21] =
    [0, 1, 2, 3, 5, 7, 10, 15, 20, 30, 50, 70, 100, 150, 200, 300, 400, 600, 900, 1200, 1500];

const STRIDE_START: u64 = 2000;
const STRIDE: u64 = 500;

/// Iterations at which a snapshot is written: the dense prefix, then every
/// 500 steps from 2000 on, and always the final step.
pub fn checkpoints(total_steps: u64) -> BTreeSet<u64> {
    let mut out: BTreeSet<u64> = CHECKPOINT_PREFIX.iter().copied().filter(|&i| i <= total_steps).collect();
    out.extend((STRIDE_START..=total_steps).step_by(STRIDE as usize));
    out.insert(total_steps);
    out
}

/// Step size for the update taken once the counter has reached `step`.
///
/// `sqrt(100² + step²) - 100` starts flat and grows linearly later, so the
/// decay `1 / (1 + 0.02 · warm^0.75)` sits between 1/t and 1/sqrt(t).
pub fn learning_rate(base: f32, step: u64) -> f32 {
    let step = step as f64;
    let warm = (100.0f64 * 100.0 + step * step).sqrt() - 100.0;
    (base as f64 / (1.0 + 0.02 * warm.powf(0.75))) as f32
}
