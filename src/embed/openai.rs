use serde::Deserialize;
use std::time::Duration;

use super::{Embedder, Embedding, http_agent};
use crate::error::ProviderError;

/// Client for OpenAI-compatible `/embeddings` endpoints. Batches go out as
/// a single request with an `input` array.
pub struct OpenAiEmbedder {
    agent: ureq::Agent,
    base_url: String,
    model: String,
    api_key: String,
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let mut embedder = Self {
            agent: http_agent(timeout),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
            dimensions: 0,
        };

        let test = embedder.embed("test")?;
        embedder.dimensions = test.len();
        Ok(embedder)
    }

    fn request(&self, input: &[&str]) -> Result<Vec<Embedding>, ProviderError> {
        let url = format!("{}/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "input": input,
        });

        let mut response = self
            .agent
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send_json(&body)?;

        let resp: EmbeddingsResponse = response
            .body_mut()
            .read_json()
            .map_err(|e| ProviderError::Response(e.to_string()))?;

        order_by_index(resp.data, input.len())
    }
}

/// The API may return items out of order; `index` ties each back to its input.
fn order_by_index(data: Vec<EmbeddingData>, expected: usize) -> Result<Vec<Embedding>, ProviderError> {
    if data.len() != expected {
        return Err(ProviderError::Response(format!(
            "asked for {expected} embeddings, got {}",
            data.len()
        )));
    }
    let mut slots: Vec<Option<Embedding>> = vec![None; expected];
    for item in data {
        match slots.get_mut(item.index) {
            Some(slot) if slot.is_none() => *slot = Some(item.embedding),
            _ => {
                return Err(ProviderError::Response(format!(
                    "unexpected embedding index {}",
                    item.index
                )));
            }
        }
    }
    Ok(slots.into_iter().flatten().collect())
}

impl Embedder for OpenAiEmbedder {
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
