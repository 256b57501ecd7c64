pub mod ddim;
pub mod euler;

pub use ddim::DdimScheduler;
pub use euler::EulerScheduler;

use crate::core::{Result, Tensor};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Training-time noise schedule shared by all step strategies. Defaults match
/// the scaled-linear schedule the supported checkpoints were trained with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseScheduleConfig {
    pub beta_start: f32,
    pub beta_end: f32,
    pub train_timesteps: usize,
}

impl Default for NoiseScheduleConfig {
    fn default() -> Self {
        Self {
            beta_start: 0.00085,
            beta_end: 0.012,
            train_timesteps: 1000,
        }
    }
}

impl NoiseScheduleConfig {
    /// Cumulative product of (1 - beta_t) over the scaled-linear schedule.
    pub fn alphas_cumprod(&self) -> Vec<f32> {
        let n = self.train_timesteps;
        let start = (self.beta_start as f64).sqrt();
        let end = (self.beta_end as f64).sqrt();
        let mut acc = 1.0f64;
        (0..n)
            .map(|i| {
                let frac = if n > 1 { i as f64 / (n - 1) as f64 } else { 0.0 };
                let beta = (start + (end - start) * frac).powi(2);
                acc *= 1.0 - beta;
                acc as f32
            })
            .collect()
    }
}

/// The numerical step-update rule turning a noise prediction into the next
/// latent estimate. Implementations are pure strategies; all state is fixed
/// by `set_timesteps`.
pub trait Scheduler: Send {
    fn name(&self) -> &'static str;

    fn set_timesteps(&mut self, steps: usize);

    /// Descending train-timestep values, one per inference step.
    fn timesteps(&self) -> &[f32];

    /// Scale applied to the freshly drawn initial noise latent.
    fn init_noise_sigma(&self) -> f32;

    fn scale_model_input(&self, sample: &Tensor, step: usize) -> Tensor;

    fn step(&self, noise_pred: &Tensor, step: usize, sample: &Tensor) -> Result<Tensor>;
}

pub type SchedulerCreator = Arc<dyn Fn(&NoiseScheduleConfig) -> Box<dyn Scheduler> + Send + Sync>;

pub struct SchedulerRegistry {
    strategies: RwLock<HashMap<String, SchedulerCreator>>,
    aliases: RwLock<HashMap<String, String>>,
}

impl SchedulerRegistry {
    pub fn new() -> Self {
        Self {
            strategies: RwLock::new(HashMap::new()),
            aliases: RwLock::new(HashMap::new()),
        }
    }

    pub fn register<N, F>(&self, name: N, creator: F)
    where
        N: Into<String>,
        F: Fn(&NoiseScheduleConfig) -> Box<dyn Scheduler> + Send + Sync + 'static,
    {
        let name = name.into().to_ascii_lowercase();
        let mut strategies = self.strategies.write().unwrap();
        strategies.insert(name, Arc::new(creator) as SchedulerCreator);
    }

    pub fn register_alias<A, T>(&self, alias: A, target: T)
    where
        A: Into<String>,
        T: Into<String>,
    {
        let mut aliases = self.aliases.write().unwrap();
        aliases.insert(
            alias.into().to_ascii_lowercase(),
            target.into().to_ascii_lowercase(),
        );
    }

    pub fn get(&self, name: &str) -> Option<SchedulerCreator> {
        let name = name.to_ascii_lowercase();
        let strategies = self.strategies.read().unwrap();

        if let Some(creator) = strategies.get(&name) {
            return Some(Arc::clone(creator));
        }

        let aliases = self.aliases.read().unwrap();
        if let Some(target) = aliases.get(&name) {
            return strategies.get(target).map(Arc::clone);
        }

        None
    }

    pub fn create(
        &self,
        name: &str,
        config: &NoiseScheduleConfig,
    ) -> Option<Box<dyn Scheduler>> {
        self.get(name).map(|creator| creator(config))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.strategies.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for SchedulerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub static REGISTRY: once_cell::sync::Lazy<SchedulerRegistry> = once_cell::sync::Lazy::new(|| {
    let registry = SchedulerRegistry::new();
    registry.register("ddim", |cfg| Box::new(DdimScheduler::new(*cfg)));
    registry.register("euler", |cfg| Box::new(EulerScheduler::new(*cfg)));
    registry.register_alias("euler_discrete", "euler");
    registry.register_alias("lms", "euler");
    registry
});

pub fn create(name: &str, config: &NoiseScheduleConfig) -> Option<Box<dyn Scheduler>> {
    REGISTRY.create(name, config)
}

pub fn names() -> Vec<String> {
    REGISTRY.names()
}
