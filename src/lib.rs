pub mod core;
pub mod infra;
pub mod app;
pub mod api;

pub mod envconfig;
pub mod format;
pub mod progress;
pub mod downloader;
pub mod rng;

pub use rng::LatentRng;

pub use crate::core::{
    CancelToken, Cancelled, ConfigError, DenoiseLoop, DenoiseOutput, DenoiseState, Device,
    GenerationRequest, ImageData, ImageDecoder, NoisePredictor, Pipeline, PipelineBuilder,
    PipelineConfig, Precision, Result, Scheduler, Seed, Shape, StepResult, Tensor, TensorOps,
    TextEmbeddings, TextEncoder,
};

pub use infra::{ArtifactFile, ArtifactStore, DevPipelineBuilder};

pub use app::{
    ChatOptions, ChatResult, EventBus, GenerationResult, GenerationStream, GenerationUpdate,
    LanguageModel, Studio,
};
