use super::{NoiseScheduleConfig, Scheduler};
use crate::core::{Result, Tensor, TensorOps};

/// Deterministic DDIM update (eta = 0). Sample is stepped toward the
/// predicted denoised image along the schedule's alpha trajectory.
pub struct DdimScheduler {
    config: NoiseScheduleConfig,
    alphas_cumprod: Vec<f32>,
    timesteps: Vec<f32>,
    step_ratio: usize,
}

impl DdimScheduler {
    pub fn new(config: NoiseScheduleConfig) -> Self {
        Self {
            alphas_cumprod: config.alphas_cumprod(),
            config,
            timesteps: Vec::new(),
            step_ratio: 0,
        }
    }
}

impl Scheduler for DdimScheduler {
    fn name(&self) -> &'static str {
        "ddim"
    }

    fn set_timesteps(&mut self, steps: usize) {
        if steps == 0 {
            self.timesteps.clear();
            self.step_ratio = 0;
            return;
        }
        self.step_ratio = self.config.train_timesteps / steps;
        self.timesteps = (0..steps)
            .map(|i| (i * self.step_ratio) as f32)
            .rev()
            .collect();
    }

    fn timesteps(&self) -> &[f32] {
        &self.timesteps
    }

    fn init_noise_sigma(&self) -> f32 {
        1.0
    }

    fn scale_model_input(&self, sample: &Tensor, _step: usize) -> Tensor {
        sample.clone()
    }

    fn step(&self, noise_pred: &Tensor, step: usize, sample: &Tensor) -> Result<Tensor> {
        let t = *self
            .timesteps
            .get(step)
            .ok_or_else(|| anyhow::anyhow!("step {} out of range", step))? as usize;
        let prev_t = t as isize - self.step_ratio as isize;

        let alpha_t = self.alphas_cumprod[t];
        let alpha_prev = if prev_t >= 0 {
            self.alphas_cumprod[prev_t as usize]
        } else {
            self.alphas_cumprod[0]
        };

        // x0 estimate from the noise prediction
        let pred_x0 = sample
            .add_scaled(noise_pred, -(1.0 - alpha_t).sqrt())
            .scaled(1.0 / alpha_t.sqrt());

        // direction pointing back toward x_t-1
        let prev = pred_x0
            .scaled(alpha_prev.sqrt())
            .add_scaled(noise_pred, (1.0 - alpha_prev).sqrt());

        Ok(prev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Shape;

    #[test]
    fn test_timesteps_descend_without_repeats() {
        let mut s = DdimScheduler::new(NoiseScheduleConfig::default());
        s.set_timesteps(20);
        let ts = s.timesteps();
        assert_eq!(ts.len(), 20);
        assert!(ts.windows(2).all(|w| w[0] > w[1]));
        assert_eq!(ts[ts.len() - 1], 0.0);
    }

    #[test]
    fn test_zero_steps_is_empty() {
        let mut s = DdimScheduler::new(NoiseScheduleConfig::default());
        s.set_timesteps(0);
        assert!(s.timesteps().is_empty());
    }

    #[test]
    fn test_step_is_deterministic() {
        let mut s = DdimScheduler::new(NoiseScheduleConfig::default());
        s.set_timesteps(10);
        let sample = Tensor::filled(Shape::new(vec![1, 4, 2, 2]), 0.5);
        let noise = Tensor::filled(Shape::new(vec![1, 4, 2, 2]), 0.1);
        let a = s.step(&noise, 0, &sample).unwrap();
        let b = s.step(&noise, 0, &sample).unwrap();
        assert_eq!(a.data(), b.data());
    }

    #[test]
    fn test_perfect_noise_prediction_approaches_x0() {
        // If the model predicts exactly the noise that was mixed in, the
        // final step lands near the clean sample (up to the residual noise
        // weight at the first train timestep).
        let mut s = DdimScheduler::new(NoiseScheduleConfig::default());
        s.set_timesteps(10);
        let last = s.timesteps().len() - 1;

        let x0 = Tensor::filled(Shape::new(vec![4]), 0.7);
        let noise = Tensor::filled(Shape::new(vec![4]), 0.3);
        let alpha = s.alphas_cumprod[0];
        let noisy = x0
            .scaled(alpha.sqrt())
            .add_scaled(&noise, (1.0 - alpha).sqrt());

        let out = s.step(&noise, last, &noisy).unwrap();
        for (o, e) in out.data().iter().zip(x0.data()) {
            assert!((o - e).abs() < 0.02);
        }
    }
}
