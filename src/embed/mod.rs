pub mod ollama;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use crate::config::{EmbedBackend, EmbedConfig};
use crate::error::ProviderError;

pub type Embedding = Vec<f32>;

/// A text embedding backend. One instance is bound to one model for its
/// whole lifetime, and every vector it returns has `dimensions()` entries.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Embedding, ProviderError>;
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>, ProviderError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
    fn dimensions(&self) -> usize;
    fn model_name(&self) -> &str;
}

/// Build the configured backend. The API key (if any) is read here so a
/// missing credential aborts before any work starts.
pub fn from_config(config: &EmbedConfig) -> Result<Arc<dyn Embedder>, ProviderError> {
    let timeout = Duration::from_secs(config.timeout_secs);
    let embedder: Arc<dyn Embedder> = match &config.backend {
        EmbedBackend::OpenAi {
            model,
            url,
            api_key_env,
        } => {
            let key = std::env::var(api_key_env)
                .map_err(|_| ProviderError::Config(format!("{api_key_env} is not set")))?;
            Arc::new(openai::OpenAiEmbedder::new(url, model, &key, timeout)?)
        }
        EmbedBackend::Ollama { model, url } => {
            Arc::new(ollama::OllamaEmbedder::new(url, model, timeout)?)
        }
    };
    Ok(embedder)
}

/// Shared HTTP agent with a global timeout, so an unresponsive provider
/// fails the call instead of hanging it.
pub(crate) fn http_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for i in 0..a.len() {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 { 0.0 } else { dot / denom }
}

/// Scale to unit length in place. Zero vectors are left alone.
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
