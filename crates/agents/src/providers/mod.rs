//! Model backends.

#[cfg(feature = "provider-ollama")]
pub mod ollama;

#[cfg(feature = "provider-ollama")]
pub use ollama::OllamaProvider;
