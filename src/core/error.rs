use std::path::PathBuf;

use crate::core::request::LATENT_STRIDE;

/// Request problems reported to the user before any compute starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("either a model id or a custom weights path must be provided, both must not be empty")]
    MissingModel,

    #[error(
        "image dimensions must be positive multiples of {LATENT_STRIDE}, got {width}x{height}"
    )]
    BadDimensions { width: usize, height: usize },

    #[error("batch size and batch count must be at least 1")]
    EmptyBatch,

    #[error("unknown scheduler: {0}")]
    UnknownScheduler(String),

    #[error("unsupported custom weights format: {0} (only .safetensors checkpoints are accepted)")]
    UnsupportedWeights(PathBuf),

    #[error("custom weights not found: {0}")]
    WeightsNotFound(PathBuf),

    #[error("unknown device: {0}")]
    UnknownDevice(String),
}

/// Raised when a cancel token fires between denoising steps. Results already
/// surfaced to the caller stand.
#[derive(Debug, thiserror::Error)]
#[error("generation cancelled")]
pub struct Cancelled;
