use super::{NoiseScheduleConfig, Scheduler};
use crate::core::{Result, Tensor, TensorOps};

/// Euler discrete update over the sigma parameterisation. The latent lives
/// at scale `sigma` and each step follows the probability-flow derivative to
/// the next (lower) sigma.
pub struct EulerScheduler {
    config: NoiseScheduleConfig,
    alphas_cumprod: Vec<f32>,
    timesteps: Vec<f32>,
    /// One entry per timestep plus a trailing 0.0.
    sigmas: Vec<f32>,
}

impl EulerScheduler {
    pub fn new(config: NoiseScheduleConfig) -> Self {
        Self {
            alphas_cumprod: config.alphas_cumprod(),
            config,
            timesteps: Vec::new(),
            sigmas: vec![0.0],
        }
    }

    fn sigma_for(&self, train_t: usize) -> f32 {
        let acp = self.alphas_cumprod[train_t];
        ((1.0 - acp) / acp).sqrt()
    }
}

impl Scheduler for EulerScheduler {
    fn name(&self) -> &'static str {
        "euler"
    }

    fn set_timesteps(&mut self, steps: usize) {
        if steps == 0 {
            self.timesteps.clear();
            self.sigmas = vec![0.0];
            return;
        }
        let step_ratio = self.config.train_timesteps / steps;
        self.timesteps = (0..steps)
            .map(|i| (i * step_ratio) as f32)
            .rev()
            .collect();
        let sigmas: Vec<f32> = self
            .timesteps
            .iter()
            .map(|&t| self.sigma_for(t as usize))
            .chain(std::iter::once(0.0))
            .collect();
        self.sigmas = sigmas;
    }

    fn timesteps(&self) -> &[f32] {
        &self.timesteps
    }

    fn init_noise_sigma(&self) -> f32 {
        if self.timesteps.is_empty() {
            1.0
        } else {
            self.sigmas[0]
        }
    }

    fn scale_model_input(&self, sample: &Tensor, step: usize) -> Tensor {
        let sigma = self.sigmas[step];
        sample.scaled(1.0 / (sigma * sigma + 1.0).sqrt())
    }

    fn step(&self, noise_pred: &Tensor, step: usize, sample: &Tensor) -> Result<Tensor> {
        let sigma = *self
            .sigmas
            .get(step)
            .ok_or_else(|| anyhow::anyhow!("step {} out of range", step))?;
        let sigma_next = self.sigmas[step + 1];

        // d/dsigma of the sample is the predicted noise itself
        Ok(sample.add_scaled(noise_pred, sigma_next - sigma))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Shape;

    #[test]
    fn test_sigmas_descend_to_zero() {
        let mut s = EulerScheduler::new(NoiseScheduleConfig::default());
        s.set_timesteps(10);
        assert_eq!(s.sigmas.len(), 11);
        assert!(s.sigmas.windows(2).all(|w| w[0] > w[1]));
        assert_eq!(*s.sigmas.last().unwrap(), 0.0);
        assert!(s.init_noise_sigma() > 1.0);
    }

    #[test]
    fn test_zero_steps_keeps_unit_sigma() {
        let mut s = EulerScheduler::new(NoiseScheduleConfig::default());
        s.set_timesteps(0);
        assert!(s.timesteps().is_empty());
        assert_eq!(s.init_noise_sigma(), 1.0);
    }

    #[test]
    fn test_step_moves_sample_down_in_scale() {
        let mut s = EulerScheduler::new(NoiseScheduleConfig::default());
        s.set_timesteps(10);
        let sample = Tensor::filled(Shape::new(vec![4]), 10.0);
        let noise = Tensor::filled(Shape::new(vec![4]), 1.0);
        let next = s.step(&noise, 0, &sample).unwrap();
        // sigma decreases, so adding noise * (sigma_next - sigma) shrinks it
        assert!(next.data()[0] < sample.data()[0]);
    }

    #[test]
    fn test_scale_model_input_normalises() {
        let mut s = EulerScheduler::new(NoiseScheduleConfig::default());
        s.set_timesteps(10);
        let sample = Tensor::filled(Shape::new(vec![4]), 2.0);
        let scaled = s.scale_model_input(&sample, 0);
        assert!(scaled.data()[0] < sample.data()[0]);
    }
}
