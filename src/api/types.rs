use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::core::{Device, GenerationRequest, Precision, Seed};

fn default_steps() -> usize {
    50
}
fn default_guidance() -> f32 {
    7.5
}
fn default_size() -> usize {
    512
}
fn default_seed() -> i64 {
    -1
}
fn default_precision() -> String {
    "fp16".to_string()
}
fn one() -> usize {
    1
}
fn default_scheduler() -> String {
    "ddim".to_string()
}
fn default_max_length() -> usize {
    77
}
fn default_device() -> String {
    "cpu".to_string()
}

#[derive(Debug, Deserialize)]
pub struct Txt2ImgRequest {
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
    #[serde(default = "default_steps")]
    pub steps: usize,
    #[serde(default = "default_guidance")]
    pub guidance_scale: f32,
    #[serde(default = "default_size")]
    pub height: usize,
    #[serde(default = "default_size")]
    pub width: usize,
    /// Negative means random.
    #[serde(default = "default_seed")]
    pub seed: i64,
    #[serde(default = "default_precision")]
    pub precision: String,
    #[serde(default = "one")]
    pub batch_size: usize,
    #[serde(default = "one")]
    pub batch_count: usize,
    #[serde(default)]
    pub repeatable_seeds: bool,
    #[serde(default = "default_scheduler")]
    pub scheduler: String,
    #[serde(default)]
    pub model_id: String,
    #[serde(default)]
    pub custom_weights: Option<PathBuf>,
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default)]
    pub preview_interval: usize,
    #[serde(default)]
    pub save_metadata: bool,
}

impl Txt2ImgRequest {
    pub fn into_request(self) -> anyhow::Result<GenerationRequest> {
        let precision = Precision::parse(&self.precision)
            .ok_or_else(|| anyhow::anyhow!("unknown precision: {}", self.precision))?;
        let device = Device::parse(&self.device)
            .ok_or_else(|| anyhow::anyhow!("unknown device: {}", self.device))?;

        Ok(GenerationRequest {
            prompt: self.prompt,
            negative_prompt: self.negative_prompt,
            steps: self.steps,
            guidance_scale: self.guidance_scale,
            height: self.height,
            width: self.width,
            seed: Seed::from_i64(self.seed),
            precision,
            batch_size: self.batch_size,
            batch_count: self.batch_count,
            repeatable_seeds: self.repeatable_seeds,
            scheduler: self.scheduler,
            model_id: self.model_id,
            custom_weights: self.custom_weights,
            max_length: self.max_length,
            device,
            preview_interval: self.preview_interval,
            save_metadata: self.save_metadata,
        })
    }
}

/// One NDJSON line per finished batch; the last line has `done: true`.
#[derive(Debug, Serialize)]
pub struct Txt2ImgUpdate {
    /// Base64-encoded PNGs, all images generated so far.
    pub images: Vec<String>,
    pub log: String,
    pub status: String,
    pub seeds: Vec<u32>,
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_duration_ms: Option<u128>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub prompt: String,
    #[serde(default)]
    pub max_tokens: Option<usize>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ChatChunk {
    pub id: String,
    pub created_at: String,
    pub response: String,
    pub done: bool,
}

#[derive(Debug, Serialize)]
pub struct ArtifactInfo {
    pub name: String,
    pub tag: String,
    pub size: u64,
    pub modules: usize,
    pub modified_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_request_fills_defaults() {
        let req: Txt2ImgRequest =
            serde_json::from_str(r#"{"prompt": "a fox", "model_id": "org/m"}"#).unwrap();
        let req = req.into_request().unwrap();
        assert_eq!(req.steps, 50);
        assert_eq!(req.seed, Seed::Random);
        assert_eq!(req.precision, Precision::Half);
        assert_eq!(req.scheduler, "ddim");
    }

    #[test]
    fn test_explicit_seed_is_fixed() {
        let req: Txt2ImgRequest =
            serde_json::from_str(r#"{"prompt": "a fox", "seed": 12}"#).unwrap();
        assert_eq!(req.into_request().unwrap().seed, Seed::Fixed(12));
    }

    #[test]
    fn test_bad_precision_rejected() {
        let req: Txt2ImgRequest =
            serde_json::from_str(r#"{"prompt": "a fox", "precision": "fp8"}"#).unwrap();
        assert!(req.into_request().is_err());
    }
}
