pub mod ollama;
pub mod openai;

use crate::ai::client::CompletionSource;
use crate::config::ProviderConfig;
use anyhow::Result;
use std::sync::Arc;

pub use ollama::OllamaSource;
pub use openai::OpenAiSource;

/// Builds the completion source selected by configuration.
pub fn from_config(config: &ProviderConfig) -> Result<Arc<dyn CompletionSource>> {
    let source: Arc<dyn CompletionSource> = match config {
        ProviderConfig::OpenAi(openai) => {
            tracing::info!(model = %openai.model, base_url = %openai.base_url, "using OpenAI-compatible provider");
            Arc::new(OpenAiSource::new(openai)?)
        }
        ProviderConfig::Ollama(ollama) => {
            tracing::info!(model = %ollama.model, endpoint = %ollama.endpoint, "using Ollama provider");
            Arc::new(OllamaSource::new(ollama)?)
        }
    };
    Ok(source)
}
