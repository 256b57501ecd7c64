use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::core::error::ConfigError;
use crate::core::tensor::Device;

/// Latents are 8x smaller than the decoded image in each spatial dimension,
/// so requested sizes must be multiples of this.
pub const LATENT_STRIDE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Seed {
    Random,
    Fixed(i64),
}

impl Seed {
    pub fn from_i64(v: i64) -> Self {
        if v < 0 {
            Seed::Random
        } else {
            Seed::Fixed(v)
        }
    }

    /// Collapse to a concrete u32 seed. Fixed seeds wrap into u32 range so
    /// the same request always produces the same value; random seeds are
    /// drawn fresh each call.
    pub fn resolve(&self) -> u32 {
        match self {
            Seed::Fixed(v) => v.rem_euclid(1i64 << 32) as u32,
            Seed::Random => rand::random::<u32>(),
        }
    }
}

impl Default for Seed {
    fn default() -> Self {
        Seed::Random
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Half,
    Full,
}

impl Precision {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fp16" | "half" => Some(Precision::Half),
            "fp32" | "full" => Some(Precision::Full),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Precision::Half => "fp16",
            Precision::Full => "fp32",
        }
    }
}

/// One image-generation job as submitted by the CLI or the HTTP API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
    pub steps: usize,
    pub guidance_scale: f32,
    pub height: usize,
    pub width: usize,
    #[serde(default)]
    pub seed: Seed,
    pub precision: Precision,
    pub batch_size: usize,
    pub batch_count: usize,
    #[serde(default)]
    pub repeatable_seeds: bool,
    pub scheduler: String,
    #[serde(default)]
    pub model_id: String,
    #[serde(default)]
    pub custom_weights: Option<PathBuf>,
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    #[serde(default)]
    pub device: Device,
    /// 0 disables intermediate previews.
    #[serde(default)]
    pub preview_interval: usize,
    #[serde(default)]
    pub save_metadata: bool,
}

fn default_max_length() -> usize {
    77
}

impl Default for GenerationRequest {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            negative_prompt: String::new(),
            steps: 50,
            guidance_scale: 7.5,
            height: 512,
            width: 512,
            seed: Seed::Random,
            precision: Precision::Half,
            batch_size: 1,
            batch_count: 1,
            repeatable_seeds: false,
            scheduler: "ddim".to_string(),
            model_id: String::new(),
            custom_weights: None,
            max_length: default_max_length(),
            device: Device::Cpu,
            preview_interval: 0,
            save_metadata: false,
        }
    }
}

impl GenerationRequest {
    /// Checked before any pipeline work. Note that `steps == 0` is allowed:
    /// a zero-step request decodes the initial noise latent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model_id.is_empty() && self.custom_weights.is_none() {
            return Err(ConfigError::MissingModel);
        }
        if self.height == 0
            || self.width == 0
            || self.height % LATENT_STRIDE != 0
            || self.width % LATENT_STRIDE != 0
        {
            return Err(ConfigError::BadDimensions {
                width: self.width,
                height: self.height,
            });
        }
        if self.batch_size == 0 || self.batch_count == 0 {
            return Err(ConfigError::EmptyBatch);
        }
        if let Some(path) = &self.custom_weights {
            match path.extension().and_then(|e| e.to_str()) {
                Some("safetensors") => {}
                _ => return Err(ConfigError::UnsupportedWeights(path.clone())),
            }
        }
        Ok(())
    }

    /// Latent dimensions for this request: `[batch, 4, h/8, w/8]`.
    pub fn latent_dims(&self) -> [usize; 4] {
        [
            self.batch_size,
            4,
            self.height / LATENT_STRIDE,
            self.width / LATENT_STRIDE,
        ]
    }
}
