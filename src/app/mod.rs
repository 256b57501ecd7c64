pub mod studio;
pub mod chat;
pub mod output;
pub mod events;

pub use studio::{GenerationResult, GenerationStream, GenerationUpdate, Studio};
pub use chat::{ChatOptions, ChatResult, LanguageModel};
pub use events::{Event, EventBus, EventHandler};

pub type Result<T> = anyhow::Result<T>;
