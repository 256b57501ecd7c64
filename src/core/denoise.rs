use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::error::Cancelled;
use crate::core::image::ImageData;
use crate::core::pipeline::{ImageDecoder, NoisePredictor, TextEmbeddings, LATENT_SCALE};
use crate::core::scheduler::Scheduler;
use crate::core::tensor::{Shape, Tensor, TensorOps};
use crate::core::Result;

/// Cooperative cancellation flag, checked between steps. An in-flight
/// predictor call is never interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Where the loop currently stands.
#[derive(Debug, Clone)]
pub struct DenoiseState {
    pub latent: Tensor,
    pub step: usize,
    pub elapsed: Duration,
}

/// Outcome of one step.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub latent: Tensor,
    pub duration: Duration,
    pub preview: Option<ImageData>,
}

/// An intermediate decode surfaced to the caller mid-run.
#[derive(Debug, Clone)]
pub struct Preview {
    pub image: ImageData,
    pub step: usize,
    pub log: String,
}

#[derive(Debug, Clone)]
pub struct DenoiseOutput {
    pub images: Vec<ImageData>,
    pub log: String,
    pub total: Duration,
    pub steps_run: usize,
}

/// Progress hook. Previews already handed out are never retracted, even if
/// the run later fails.
pub trait StepObserver {
    fn on_step(&mut self, _result: &StepResult, _state: &DenoiseState) {}
    fn on_preview(&mut self, _preview: Preview) {}
}

pub struct NullObserver;

impl StepObserver for NullObserver {}

#[derive(Debug, Clone, Copy)]
pub struct DenoiseConfig {
    pub guidance_scale: f32,
    /// 0 disables intermediate previews.
    pub preview_interval: usize,
}

/// Drives the scheduler/predictor pair over the configured timesteps. One
/// predictor failure is fatal to the run; there are no retries.
pub struct DenoiseLoop<'a> {
    predictor: &'a mut dyn NoisePredictor,
    scheduler: &'a mut dyn Scheduler,
    decoder: &'a mut dyn ImageDecoder,
}

impl<'a> DenoiseLoop<'a> {
    pub fn new(
        predictor: &'a mut dyn NoisePredictor,
        scheduler: &'a mut dyn Scheduler,
        decoder: &'a mut dyn ImageDecoder,
    ) -> Self {
        Self {
            predictor,
            scheduler,
            decoder,
        }
    }

    pub fn run(
        &mut self,
        initial: Tensor,
        embeddings: &TextEmbeddings,
        config: &DenoiseConfig,
        cancel: &CancelToken,
        observer: &mut dyn StepObserver,
    ) -> Result<DenoiseOutput> {
        let timesteps = self.scheduler.timesteps().to_vec();
        let shape = initial.shape().clone();

        let mut state = DenoiseState {
            latent: initial,
            step: 0,
            elapsed: Duration::ZERO,
        };
        let mut log = String::new();
        let started = Instant::now();

        for (i, &t) in timesteps.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(Cancelled.into());
            }

            let step_start = Instant::now();
            log.push_str(&format!("\ni = {} t = {} ", i, t));

            let model_input = self.scheduler.scale_model_input(&state.latent, i);
            let noise_pred =
                self.predictor
                    .predict(&model_input, i, t, embeddings, config.guidance_scale)?;
            let next = self.scheduler.step(&noise_pred, i, &state.latent)?;
            if next.shape() != &shape {
                anyhow::bail!(
                    "scheduler changed latent shape at step {}: {:?} -> {:?}",
                    i,
                    shape.dims(),
                    next.shape().dims()
                );
            }

            let duration = step_start.elapsed();
            state.latent = next;
            state.step = i;
            state.elapsed += duration;
            log.push_str(&format!("time={}ms", duration.as_millis()));

            let preview = if config.preview_interval > 0 && i % config.preview_interval == 0 {
                let image = self.decode_current(&state.latent)?.into_iter().next();
                if let Some(image) = image.clone() {
                    observer.on_preview(Preview {
                        image,
                        step: i,
                        log: log.clone(),
                    });
                }
                image
            } else {
                None
            };

            observer.on_step(
                &StepResult {
                    latent: state.latent.clone(),
                    duration,
                    preview,
                },
                &state,
            );
        }

        let images = self.decode_current(&state.latent)?;

        if !timesteps.is_empty() {
            let avg_ms = state.elapsed.as_secs_f64() * 1000.0 / timesteps.len() as f64;
            log.push_str(&format!("\nAverage step time: {:.2}ms/it", avg_ms));
        }

        Ok(DenoiseOutput {
            images,
            log,
            total: started.elapsed(),
            steps_run: timesteps.len(),
        })
    }

    fn decode_current(&mut self, latent: &Tensor) -> Result<Vec<ImageData>> {
        let scaled = latent.scaled(1.0 / LATENT_SCALE);
        self.decoder.decode(&scaled)
    }
}

/// Fresh standard-normal latent for a seed, pre-scaled by the scheduler's
/// initial noise sigma. The seed fully determines the result.
pub fn initial_latent(dims: [usize; 4], seed: u32, init_noise_sigma: f32) -> Tensor {
    let mut rng = crate::rng::LatentRng::new(seed as u64);
    Tensor::randn(Shape::from_slice(&dims), &mut rng).scaled(init_noise_sigma)
}
