pub mod artifact;
pub mod store;
pub mod weights;
pub mod dev;

pub use artifact::{ArtifactFile, ArtifactValue};
pub use store::{ArtifactStore, LocalArtifact, Manifest, ModuleLayer};
pub use weights::{inspect_checkpoint, CheckpointInfo};
pub use dev::DevPipelineBuilder;
