use anyhow::{bail, Context, Result};
use elpips::{Evaluation, PerceptualMetric};
use image::RgbImage;
use log::info;
use ndarray::Array3;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::adam::{Adam, AdamState};
use crate::image_io::{save_npy, to_u8_image, write_png};
use crate::schedule::{checkpoints, learning_rate};
use crate::Config;

/// Distance kept between the image and the invalid colors 0 and 1.
pub const TOLERANCE: f32 = 1e-5;

/// Clamp every value into `[tolerance, 1 - tolerance]`.
pub fn project(x: &mut Array3<f32>, tolerance: f32) {
    x.mapv_inplace(|v| v.clamp(tolerance, 1.0 - tolerance));
}

/// Gaussian noise around mid-gray (mean 0.5, std 0.2), projected into the valid range.
pub fn initial_image<R: Rng + ?Sized>(rng: &mut R, height: usize, width: usize, tolerance: f32) -> Result<Array3<f32>> {
    let normal = Normal::new(0.5f32, 0.2).context("invalid initial noise distribution")?;
    let mut x = Array3::from_shape_simple_fn((height, width, 3), || normal.sample(&mut *rng));
    project(&mut x, tolerance);
    Ok(x)
}

/// `Σ dᵢ²` and its gradient `Σ 2·dᵢ·∂dᵢ/∂X`.
pub fn barycenter_loss(eval: &Evaluation) -> (f32, Option<Array3<f32>>) {
    let loss = eval.distances.iter().map(|d| d * d).sum();
    let grad = eval
        .distances
        .iter()
        .zip(&eval.gradients)
        .map(|(&d, g)| g.mapv(|v| 2.0 * d * v))
        .reduce(|acc, g| acc + g);
    (loss, grad)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Done,
}

/// What a checkpoint iteration records. `image` and `loss` describe the
/// projected image before that iteration's update; `raw` is the float image
/// after it, present every `raw_save_interval` iterations.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub iteration: u64,
    pub total_steps: u64,
    pub loss: f32,
    pub learning_rate: f32,
    pub elapsed: Duration,
    pub image: RgbImage,
    pub raw: Option<Array3<f32>>,
}

pub trait SnapshotSink {
    fn record(&mut self, snapshot: &Snapshot) -> Result<()>;
}

/// Writes `{iteration:06}.png` and `save_{iteration:06}.npy` into a directory.
pub struct DirectorySink {
    outdir: PathBuf,
}

impl DirectorySink {
    pub fn new(outdir: &Path) -> Self {
        Self { outdir: outdir.to_path_buf() }
    }
}

impl SnapshotSink for DirectorySink {
    fn record(&mut self, snapshot: &Snapshot) -> Result<()> {
        write_png(&self.outdir.join(format!("{:06}.png", snapshot.iteration)), &snapshot.image)?;
        if let Some(raw) = &snapshot.raw {
            save_npy(&self.outdir.join(format!("save_{:06}.npy", snapshot.iteration)), raw)?;
        }
        Ok(())
    }
}

/// The optimization loop. Owns the image being optimized, the iteration
/// counter that drives the learning-rate schedule, and the optimizer state.
pub struct Barycenter<M: PerceptualMetric> {
    references: Vec<Array3<f32>>,
    x: Array3<f32>,
    metric: M,
    adam: Adam,
    adam_state: AdamState,
    counter: u64,
    total_steps: u64,
    base_learning_rate: f32,
    tolerance: f32,
    raw_save_interval: u64,
    checkpoints: BTreeSet<u64>,
    state: LoopState,
    started: Option<Instant>,
}

impl<M: PerceptualMetric> Barycenter<M> {
    /// `initial` is the starting image; it is projected before the first evaluation.
    pub fn new(config: &Config, references: [Array3<f32>; 2], initial: Array3<f32>, metric: M) -> Result<Self> {
        let dim = initial.dim();
        if dim.2 != 3 {
            bail!("image must have 3 channels, got {:?}", dim);
        }
        for (i, r) in references.iter().enumerate() {
            if r.dim() != dim {
                bail!("reference {} has shape {:?}, expected {:?}", i, r.dim(), dim);
            }
        }
        Ok(Self {
            references: references.into(),
            x: initial,
            metric,
            adam: Adam::default(),
            adam_state: AdamState::new(dim),
            counter: 0,
            total_steps: config.steps,
            base_learning_rate: config.learning_rate,
            tolerance: config.tolerance,
            raw_save_interval: config.raw_save_interval,
            checkpoints: checkpoints(config.steps),
            state: LoopState::Running,
            started: None,
        })
    }

    pub fn image(&self) -> &Array3<f32> {
        &self.x
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn checkpoints(&self) -> &BTreeSet<u64> {
        &self.checkpoints
    }

    /// Run one iteration: project, evaluate, then take the Adam step with the
    /// rate scheduled for the incremented counter. Returns the snapshot on
    /// checkpoint iterations.
    pub fn iterate(&mut self) -> Result<Option<Snapshot>> {
        if self.state == LoopState::Done {
            bail!("optimization already finished after {} steps", self.total_steps);
        }
        let started = *self.started.get_or_insert_with(Instant::now);
        let i = self.counter;

        project(&mut self.x, self.tolerance);

        let eval = self
            .metric
            .forward_with_gradient(&self.references, &self.x)
            .with_context(|| format!("metric evaluation failed at step {i}"))?;
        let (loss, grad) = barycenter_loss(&eval);
        if !loss.is_finite() {
            bail!("non-finite loss {} at step {}", loss, i);
        }
        let grad = grad.context("no reference images to compare against")?;

        let captured = self.checkpoints.contains(&i).then(|| to_u8_image(&self.x));

        self.counter += 1;
        let lr = learning_rate(self.base_learning_rate, self.counter);
        self.adam.step(&mut self.adam_state, &mut self.x, &grad, lr)?;

        if i >= self.total_steps {
            self.state = LoopState::Done;
        }

        Ok(captured.map(|image| Snapshot {
            iteration: i,
            total_steps: self.total_steps,
            loss,
            learning_rate: lr,
            elapsed: started.elapsed(),
            image,
            raw: (self.raw_save_interval > 0 && i % self.raw_save_interval == 0).then(|| self.x.clone()),
        }))
    }

    /// Iterate until `total_steps` is done, handing every checkpoint to `sink`.
    pub fn run(&mut self, sink: &mut dyn SnapshotSink) -> Result<()> {
        while self.state == LoopState::Running {
            if let Some(snapshot) = self.iterate()? {
                info!(
                    "Elapsed: {} s.  Step {}/{}.  Loss: {}.  Learning rate: {}",
                    snapshot.elapsed.as_secs(),
                    snapshot.iteration,
                    snapshot.total_steps,
                    snapshot.loss,
                    snapshot.learning_rate
                );
                sink.record(&snapshot)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_clamps_and_is_idempotent() {
        let mut x = Array3::from_shape_vec((1, 2, 3), vec![-3.0, 0.0, 1e-6, 0.5, 1.0, 7.0]).unwrap();
        project(&mut x, TOLERANCE);
        assert_eq!(x.as_slice().unwrap(), &[TOLERANCE, TOLERANCE, TOLERANCE, 0.5, 1.0 - TOLERANCE, 1.0 - TOLERANCE]);
        let once = x.clone();
        project(&mut x, TOLERANCE);
        assert_eq!(x, once);
    }

    #[test]
    fn loss_gradient_is_weighted_sum() {
        let eval = Evaluation {
            distances: vec![1.0, 2.0],
            gradients: vec![Array3::from_elem((1, 1, 3), 1.0), Array3::from_elem((1, 1, 3), -1.0)],
        };
        let (loss, grad) = barycenter_loss(&eval);
        assert_eq!(loss, 5.0);
        assert_eq!(grad.unwrap(), Array3::from_elem((1, 1, 3), -2.0));
    }
}
