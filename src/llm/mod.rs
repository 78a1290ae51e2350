//! Language-model access: messages, the provider trait, the Ollama backend
//! and a small retry helper for flaky file I/O.

mod message;
mod ollama;
mod provider;
pub mod retry;

pub use message::{json_media_type, ChatMessage, Content, DataContent, Role};
pub use ollama::{sniff_image_type, OllamaConfig, OllamaProvider};
pub use provider::{
    complete_typed, complete_typed_or_default, parse_structured, Agent, CompletionOptions,
    ModelKind, ModelProvider, ResponseFormat,
};
pub use retry::{retry_transient, RetryPolicy};
