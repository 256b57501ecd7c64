use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::core::image::ImageData;
use crate::core::request::{GenerationRequest, Precision};
use crate::core::tensor::{Device, Tensor};
use crate::core::Result;

/// VAE latent scaling factor; latents are divided by this before decoding.
pub const LATENT_SCALE: f32 = 0.18215;

/// Conditional and unconditional prompt embeddings, kept separate so the
/// predictor can apply classifier-free guidance.
#[derive(Debug, Clone)]
pub struct TextEmbeddings {
    pub cond: Tensor,
    pub uncond: Tensor,
}

/// Tokenizer + text-encoder collaborator.
pub trait TextEncoder: Send {
    fn encode(&mut self, prompt: &str, negative_prompt: &str, max_length: usize)
        -> Result<TextEmbeddings>;
}

/// The compiled denoising model, invoked once per step.
pub trait NoisePredictor: Send {
    fn predict(
        &mut self,
        latent: &Tensor,
        step: usize,
        timestep: f32,
        embeddings: &TextEmbeddings,
        guidance_scale: f32,
    ) -> Result<Tensor>;
}

/// Latent-to-image collaborator (VAE-equivalent). Returns one image per
/// batch entry.
pub trait ImageDecoder: Send {
    fn decode(&mut self, latent: &Tensor) -> Result<Vec<ImageData>>;
}

/// Generic invokable compiled module, addressed by entry point. The LLM chat
/// path drives one of these directly.
pub trait CompiledModule: Send {
    fn entry_points(&self) -> Vec<String>;
    fn invoke(&mut self, entry: &str, inputs: &[Tensor]) -> Result<Vec<Tensor>>;
}

/// Token mapping for the chat path.
pub trait ChatTokenizer: Send {
    fn encode(&self, text: &str) -> Result<Vec<u32>>;
    fn decode(&self, tokens: &[u32]) -> Result<String>;
    fn stop_token(&self) -> u32;
}

/// Everything the pipeline identity depends on. Two requests that map to the
/// same `PipelineConfig` can share a compiled pipeline; the scheduler choice
/// deliberately is not part of it and is swapped per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub model_id: String,
    pub custom_weights: Option<PathBuf>,
    pub precision: Precision,
    pub batch_size: usize,
    pub max_length: usize,
    pub height: usize,
    pub width: usize,
    pub device: Device,
}

impl PipelineConfig {
    pub fn from_request(req: &GenerationRequest) -> Self {
        Self {
            model_id: req.model_id.clone(),
            custom_weights: req.custom_weights.clone(),
            precision: req.precision,
            batch_size: req.batch_size,
            max_length: req.max_length,
            height: req.height,
            width: req.width,
            device: req.device,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineMeta {
    pub backend: String,
    pub embedding_dim: usize,
    pub vocab_size: u32,
}

/// The bundle of compiled sub-models needed for one generation request.
pub struct Pipeline {
    pub text_encoder: Box<dyn TextEncoder>,
    pub predictor: Box<dyn NoisePredictor>,
    pub decoder: Box<dyn ImageDecoder>,
    pub meta: PipelineMeta,
}

/// The model-export/compile collaborator: turns a pipeline config into a
/// ready-to-invoke pipeline. Building is synchronous and may be expensive.
pub trait PipelineBuilder: Send {
    fn name(&self) -> &'static str;
    fn build(&self, config: &PipelineConfig) -> Result<Pipeline>;
}
