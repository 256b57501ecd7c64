use half::f16;
use rayon::prelude::*;

use crate::core::pipeline::{
    ChatTokenizer, CompiledModule, ImageDecoder, NoisePredictor, Pipeline, PipelineBuilder,
    PipelineConfig, PipelineMeta, TextEmbeddings, TextEncoder,
};
use crate::core::request::Precision;
use crate::core::text::{PromptTokenizer, PAD_TOKEN};
use crate::core::{ImageData, Result, Shape, Tensor, TensorOps};
use crate::rng::LatentRng;

const EMBEDDING_DIM: usize = 64;
const VOCAB_SIZE: u32 = 49408;
const CHAT_VOCAB: u32 = 32000;
const CHAT_STOP_TOKEN: u32 = 2;

/// Pure-Rust reference backend. Every component is a cheap deterministic
/// stand-in with the same shapes and seams as a compiled pipeline, so the
/// application layer runs end-to-end without an external engine.
pub struct DevPipelineBuilder;

impl PipelineBuilder for DevPipelineBuilder {
    fn name(&self) -> &'static str {
        "dev"
    }

    fn build(&self, config: &PipelineConfig) -> Result<Pipeline> {
        let model_seed = fold_str(&config.model_id);
        Ok(Pipeline {
            text_encoder: Box::new(DevTextEncoder::new(model_seed)),
            predictor: Box::new(DevNoisePredictor::new(model_seed, config.precision)),
            decoder: Box::new(DevImageDecoder),
            meta: PipelineMeta {
                backend: "dev".to_string(),
                embedding_dim: EMBEDDING_DIM,
                vocab_size: VOCAB_SIZE,
            },
        })
    }
}

fn fold_str(s: &str) -> u64 {
    let mut h: u64 = 1469598103934665603;
    for b in s.bytes() {
        h ^= b as u64;
        h = h.wrapping_mul(1099511628211);
    }
    h
}

pub struct DevTextEncoder {
    tokenizer: PromptTokenizer,
    model_seed: u64,
}

impl DevTextEncoder {
    pub fn new(model_seed: u64) -> Self {
        Self {
            tokenizer: PromptTokenizer::new(VOCAB_SIZE),
            model_seed,
        }
    }

    fn embed(&self, text: &str, max_length: usize) -> Tensor {
        let ids = self.tokenizer.encode(text, max_length);
        let mut data = Vec::with_capacity(max_length * EMBEDDING_DIM);
        for id in ids {
            if id == PAD_TOKEN {
                data.extend(std::iter::repeat(0.0).take(EMBEDDING_DIM));
            } else {
                let mut rng = LatentRng::new(self.model_seed ^ (id as u64).wrapping_mul(0x9e3779b9));
                let mut row = vec![0.0f32; EMBEDDING_DIM];
                rng.fill_normal(&mut row);
                data.extend(row);
            }
        }
        Tensor::new(data, Shape::new(vec![max_length, EMBEDDING_DIM]))
    }
}

impl TextEncoder for DevTextEncoder {
    fn encode(
        &mut self,
        prompt: &str,
        negative_prompt: &str,
        max_length: usize,
    ) -> Result<TextEmbeddings> {
        Ok(TextEmbeddings {
            cond: self.embed(prompt, max_length),
            uncond: self.embed(negative_prompt, max_length),
        })
    }
}

pub struct DevNoisePredictor {
    model_seed: u64,
    precision: Precision,
}

impl DevNoisePredictor {
    pub fn new(model_seed: u64, precision: Precision) -> Self {
        Self {
            model_seed,
            precision,
        }
    }

    /// Single (unconditional or conditional) noise estimate: mostly the
    /// latent itself, tilted by a spatial wave derived from the prompt
    /// embedding so different prompts denoise toward different images.
    fn eps(&self, latent: &Tensor, timestep: f32, embedding: &Tensor) -> Tensor {
        let e_mean = embedding.mean();
        let phase = (self.model_seed % 628) as f32 / 100.0;
        let t_term = timestep * 1e-3;
        let data: Vec<f32> = latent
            .data()
            .iter()
            .enumerate()
            .map(|(i, &x)| x * 0.92 + 0.08 * ((i as f32 * 0.37 + phase) * e_mean + t_term).sin())
            .collect();
        Tensor::new(data, latent.shape().clone())
    }
}

impl NoisePredictor for DevNoisePredictor {
    fn predict(
        &mut self,
        latent: &Tensor,
        _step: usize,
        timestep: f32,
        embeddings: &TextEmbeddings,
        guidance_scale: f32,
    ) -> Result<Tensor> {
        let uncond = self.eps(latent, timestep, &embeddings.uncond);
        let cond = self.eps(latent, timestep, &embeddings.cond);

        // classifier-free guidance
        let guided_data: Vec<f32> = uncond
            .data()
            .iter()
            .zip(cond.data())
            .map(|(&u, &c)| u + guidance_scale * (c - u))
            .collect();
        let mut guided = Tensor::new(guided_data, latent.shape().clone());

        if self.precision == Precision::Half {
            for v in guided.data_mut().iter_mut() {
                *v = f16::from_f32(*v).to_f32();
            }
        }
        Ok(guided)
    }
}

/// Cheap latent-to-RGB projection: the usual 3x4 approximation matrix with
/// nearest-neighbour upscaling to the requested output size.
pub struct DevImageDecoder;

const RGB_FROM_LATENT: [[f32; 4]; 3] = [
    [0.298, 0.187, -0.158, -0.184],
    [0.207, 0.286, 0.189, -0.271],
    [0.208, 0.173, 0.264, -0.473],
];

impl ImageDecoder for DevImageDecoder {
    fn decode(&mut self, latent: &Tensor) -> Result<Vec<ImageData>> {
        let dims = latent.shape().dims();
        if dims.len() != 4 || dims[1] != 4 {
            anyhow::bail!("expected latent of shape [batch, 4, h, w], got {:?}", dims);
        }
        let (batch, lh, lw) = (dims[0], dims[2], dims[3]);
        let (out_h, out_w) = (lh * 8, lw * 8);
        let plane = lh * lw;
        let per_image = 4 * plane;

        let mut images = Vec::with_capacity(batch);
        for b in 0..batch {
            let channels = &latent.data()[b * per_image..(b + 1) * per_image];
            let pixels: Vec<u8> = (0..out_h)
                .into_par_iter()
                .flat_map_iter(|y| {
                    let ly = y / 8;
                    (0..out_w).flat_map(move |x| {
                        let lx = x / 8;
                        let idx = ly * lw + lx;
                        (0..3).map(move |c| {
                            let v: f32 = (0..4)
                                .map(|ch| RGB_FROM_LATENT[c][ch] * channels[ch * plane + idx])
                                .sum();
                            (((v + 1.0) / 2.0).clamp(0.0, 1.0) * 255.0).round() as u8
                        })
                    })
                })
                .collect();
            images.push(ImageData::new(out_w as u32, out_h as u32, pixels)?);
        }
        Ok(images)
    }
}

/// Deterministic chat module with the two entry points the chat loop drives.
/// Tokens come from a seeded stream; the stop token appears after a bounded
/// number of steps.
pub struct DevChatModule {
    state: u64,
    emitted: usize,
    max_reply: usize,
}

impl DevChatModule {
    pub fn new() -> Self {
        Self {
            state: 0,
            emitted: 0,
            max_reply: 24,
        }
    }

    fn logits_for(&self, token: u32) -> Tensor {
        let mut data = vec![-10.0f32; CHAT_VOCAB as usize];
        data[token as usize] = 10.0;
        Tensor::new(data, Shape::new(vec![1, CHAT_VOCAB as usize]))
    }

    fn next_token(&mut self) -> u32 {
        self.emitted += 1;
        if self.emitted > self.max_reply {
            return CHAT_STOP_TOKEN;
        }
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        // keep clear of the reserved low ids
        3 + (self.state >> 33) as u32 % (CHAT_VOCAB - 3)
    }
}

impl Default for DevChatModule {
    fn default() -> Self {
        Self::new()
    }
}

impl CompiledModule for DevChatModule {
    fn entry_points(&self) -> Vec<String> {
        vec!["run_initialize".to_string(), "run_forward".to_string()]
    }

    fn invoke(&mut self, entry: &str, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let input = inputs
            .first()
            .ok_or_else(|| anyhow::anyhow!("chat module expects one input tensor"))?;
        match entry {
            "run_initialize" => {
                self.emitted = 0;
                self.state = input
                    .data()
                    .iter()
                    .fold(0u64, |acc, &v| acc.wrapping_mul(31).wrapping_add(v as u64));
            }
            "run_forward" => {}
            other => anyhow::bail!("unknown entry point: {}", other),
        }
        let token = self.next_token();
        Ok(vec![self.logits_for(token)])
    }
}

/// Word-list detokenizer paired with the dev chat module.
pub struct DevChatTokenizer {
    tokenizer: PromptTokenizer,
}

const CHAT_WORDS: &[&str] = &[
    "the", "latent", "model", "image", "prompt", "noise", "step", "sample", "light", "color",
    "shape", "line", "render", "scene", "detail", "drifts", "settles", "emerges", "slowly",
    "sharply", "softly", "and", "into", "over",
];

impl DevChatTokenizer {
    pub fn new() -> Self {
        Self {
            tokenizer: PromptTokenizer::new(CHAT_VOCAB),
        }
    }
}

impl Default for DevChatTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatTokenizer for DevChatTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let ids: Vec<u32> = self
            .tokenizer
            .encode(text, 256)
            .into_iter()
            .filter(|&id| id != PAD_TOKEN)
            .collect();
        Ok(ids)
    }

    fn decode(&self, tokens: &[u32]) -> Result<String> {
        let words: Vec<&str> = tokens
            .iter()
            .filter(|&&t| t != CHAT_STOP_TOKEN)
            .map(|&t| CHAT_WORDS[t as usize % CHAT_WORDS.len()])
            .collect();
        Ok(words.join(" "))
    }

    fn stop_token(&self) -> u32 {
        CHAT_STOP_TOKEN
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tensor::Device;

    fn config() -> PipelineConfig {
        PipelineConfig {
            model_id: "org/test-model".to_string(),
            custom_weights: None,
            precision: Precision::Full,
            batch_size: 1,
            max_length: 16,
            height: 64,
            width: 64,
            device: Device::Cpu,
        }
    }

    #[test]
    fn test_encoder_distinguishes_prompts() {
        let mut enc = DevTextEncoder::new(1);
        let a = enc.encode("a red fox", "", 16).unwrap();
        let b = enc.encode("a blue heron", "", 16).unwrap();
        assert_ne!(a.cond.data(), b.cond.data());
        assert_eq!(a.uncond.data(), b.uncond.data());
    }

    #[test]
    fn test_predictor_is_deterministic() {
        let mut enc = DevTextEncoder::new(1);
        let emb = enc.encode("a red fox", "", 16).unwrap();
        let latent = Tensor::filled(Shape::new(vec![1, 4, 8, 8]), 0.4);

        let mut p = DevNoisePredictor::new(1, Precision::Full);
        let a = p.predict(&latent, 0, 981.0, &emb, 7.5).unwrap();
        let b = p.predict(&latent, 0, 981.0, &emb, 7.5).unwrap();
        assert_eq!(a.data(), b.data());
    }

    #[test]
    fn test_half_precision_rounds_outputs() {
        let mut enc = DevTextEncoder::new(1);
        let emb = enc.encode("a red fox", "", 16).unwrap();
        let latent = Tensor::filled(Shape::new(vec![1, 4, 8, 8]), 0.4);

        let mut p = DevNoisePredictor::new(1, Precision::Half);
        let out = p.predict(&latent, 0, 981.0, &emb, 7.5).unwrap();
        for &v in out.data() {
            assert_eq!(v, f16::from_f32(v).to_f32());
        }
    }

    #[test]
    fn test_decoder_output_size() {
        let latent = Tensor::filled(Shape::new(vec![2, 4, 8, 8]), 0.1);
        let images = DevImageDecoder.decode(&latent).unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].width, 64);
        assert_eq!(images[0].height, 64);
        assert_eq!(images[0].pixels.len(), 64 * 64 * 3);
    }

    #[test]
    fn test_decoder_rejects_bad_shape() {
        let latent = Tensor::filled(Shape::new(vec![1, 3, 8, 8]), 0.1);
        assert!(DevImageDecoder.decode(&latent).is_err());
    }

    #[test]
    fn test_builder_produces_working_pipeline() {
        let mut pipeline = DevPipelineBuilder.build(&config()).unwrap();
        let emb = pipeline.text_encoder.encode("hills", "", 16).unwrap();
        let latent = Tensor::filled(Shape::new(vec![1, 4, 8, 8]), 0.2);
        let noise = pipeline.predictor.predict(&latent, 0, 1.0, &emb, 7.5).unwrap();
        assert_eq!(noise.shape().dims(), latent.shape().dims());
        assert_eq!(pipeline.meta.backend, "dev");
    }

    #[test]
    fn test_chat_module_stops() {
        let mut module = DevChatModule::new();
        let prompt = Tensor::new(vec![5.0, 9.0], Shape::new(vec![2]));
        let mut token = module.invoke("run_initialize", &[prompt]).unwrap()[0].argmax() as u32;
        let mut count = 0;
        while token != CHAT_STOP_TOKEN && count < 100 {
            let last = Tensor::new(vec![token as f32], Shape::new(vec![1]));
            token = module.invoke("run_forward", &[last]).unwrap()[0].argmax() as u32;
            count += 1;
        }
        assert_eq!(token, CHAT_STOP_TOKEN);
        assert!(count <= 25);
    }

    #[test]
    fn test_chat_tokenizer_roundtrip_shape() {
        let tok = DevChatTokenizer::new();
        let ids = tok.encode("hello there").unwrap();
        assert_eq!(ids.len(), 2);
        let text = tok.decode(&ids).unwrap();
        assert_eq!(text.split_whitespace().count(), 2);
    }
}
