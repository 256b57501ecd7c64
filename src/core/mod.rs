pub mod tensor;
pub mod error;
pub mod request;
pub mod text;
pub mod scheduler;
pub mod pipeline;
pub mod denoise;
pub mod image;

pub use tensor::{Tensor, TensorOps, Shape, DType, Device};
pub use error::{ConfigError, Cancelled};
pub use request::{GenerationRequest, Seed, Precision, LATENT_STRIDE};
pub use scheduler::{Scheduler, SchedulerRegistry, NoiseScheduleConfig};
pub use pipeline::{
    ChatTokenizer, CompiledModule, ImageDecoder, NoisePredictor, Pipeline, PipelineBuilder,
    PipelineConfig, PipelineMeta, TextEmbeddings, TextEncoder, LATENT_SCALE,
};
pub use denoise::{
    initial_latent, CancelToken, DenoiseConfig, DenoiseLoop, DenoiseOutput, DenoiseState,
    NullObserver, Preview, StepObserver, StepResult,
};
pub use self::image::ImageData;

pub type Result<T> = anyhow::Result<T>;
