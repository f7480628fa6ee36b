use anyhow::{bail, Result};
use ndarray::{Array3, Zip};

/// Hyperparameters of the adaptive-moment update. The defaults are the usual
/// `beta1 = 0.9`, `beta2 = 0.999`, `epsilon = 1e-8`.
#[derive(Clone, Copy, Debug)]
pub struct Adam {
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
}

impl Default for Adam {
    fn default() -> Self {
        Self { beta1: 0.9, beta2: 0.999, epsilon: 1e-8 }
    }
}

/// Running moment estimates for one parameter buffer.
#[derive(Clone, Debug)]
pub struct AdamState {
    m: Array3<f32>,
    v: Array3<f32>,
    t: u64,
}

impl AdamState {
    pub fn new(dim: (usize, usize, usize)) -> Self {
        Self { m: Array3::zeros(dim), v: Array3::zeros(dim), t: 0 }
    }

    /// Number of updates applied so far.
    pub fn steps(&self) -> u64 {
        self.t
    }
}

impl Adam {
    /// Apply one bias-corrected update to `param` in place.
    ///
    /// The bias correction is folded into the step size,
    /// `lr_t = lr · sqrt(1 - beta2^t) / (1 - beta1^t)`, and epsilon is added to
    /// the uncorrected `sqrt(v)`.
    pub fn step(&self, state: &mut AdamState, param: &mut Array3<f32>, grad: &Array3<f32>, lr: f32) -> Result<()> {
        if param.dim() != grad.dim() || param.dim() != state.m.dim() {
            bail!(
                "adam: parameter {:?}, gradient {:?} and state {:?} shapes differ",
                param.dim(),
                grad.dim(),
                state.m.dim()
            );
        }
        state.t += 1;
        let t = state.t as f64;
        let correction1 = 1.0 - (self.beta1 as f64).powf(t);
        let correction2 = 1.0 - (self.beta2 as f64).powf(t);
        let lr_t = (lr as f64 * correction2.sqrt() / correction1) as f32;

        let (b1, b2, eps) = (self.beta1, self.beta2, self.epsilon);
        Zip::from(param).and(&mut state.m).and(&mut state.v).and(grad).for_each(|p, m, v, &g| {
            *m = b1 * *m + (1.0 - b1) * g;
            *v = b2 * *v + (1.0 - b2) * g * g;
            *p -= lr_t * *m / (v.sqrt() + eps);
        });
        Ok(())
    }
}
