use serde::Deserialize;
use std::time::Duration;

use super::{Embedder, Embedding, http_agent};
use crate::error::ProviderError;

pub struct OllamaEmbedder {
    agent: ureq::Agent,
    base_url: String,
    model: String,
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self, ProviderError> {
        let mut embedder = Self {
            agent: http_agent(timeout),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dimensions: 0,
        };

        // Probe dimensions with a short test string
        let test = embedder.embed("test")?;
        embedder.dimensions = test.len();
        Ok(embedder)
    }

    fn request(&self, input: &[&str]) -> Result<Vec<Embedding>, ProviderError> {
        let url = format!("{}/api/embed", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "input": input,
        });

        let mut response = self.agent.post(&url).send_json(&body)?;
        let resp: EmbedResponse = response
            .body_mut()
            .read_json()
            .map_err(|e| ProviderError::Response(e.to_string()))?;

        if resp.embeddings.len() != input.len() {
            return Err(ProviderError::Response(format!(
                "asked for {} embeddings, got {}",
                input.len(),
                resp.embeddings.len()
            )));
        }
        Ok(resp.embeddings)
    }
}

impl Embedder for OllamaEmbedder {
    fn embed(&self, text: &str) -> Result<Embedding, ProviderError> {
        let text = if text.is_empty() { " " } else { text };
        let mut out = self.request(&[text])?;
        Ok(out.remove(0))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
