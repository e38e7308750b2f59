use std::sync::Arc;

use crate::config::SearchConfig;
use crate::embed::Embedder;
use crate::error::SearchError;
use crate::store::{SearchResult, VectorStore};

#[derive(Debug, Clone, Copy)]
pub struct SearchLimits {
    pub default_limit: usize,
    pub max_limit: usize,
}

impl From<&SearchConfig> for SearchLimits {
    fn from(config: &SearchConfig) -> Self {
        Self {
            default_limit: config.default_limit,
            max_limit: config.max_limit,
        }
    }
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self::from(&SearchConfig::default())
    }
}

/// Answers "which movies are most like this text". Holds shared handles
/// only; every call is an independent read.
pub struct SearchService<S> {
    embedder: Arc<dyn Embedder>,
    store: S,
    limits: SearchLimits,
}

impl<S: VectorStore> SearchService<S> {
    /// Fails if the store was filled by a different model than `embedder`.
    pub fn new(embedder: Arc<dyn Embedder>, store: S, limits: SearchLimits) -> Result<Self, SearchError> {
        if let Some(binding) = store.binding()? {
            binding.check(embedder.model_name(), embedder.dimensions())?;
        }
        Ok(Self {
            embedder,
            store,
            limits,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn limits(&self) -> SearchLimits {
        self.limits
    }

    /// Trim the query and resolve the limit, rejecting anything unusable.
    pub fn validate<'q>(&self, query: &'q str, limit: Option<i64>) -> Result<(&'q str, usize), SearchError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(SearchError::Validation("query must not be empty".into()));
        }
        let limit = match limit {
            None => self.limits.default_limit,
            Some(n) if n < 1 => {
                return Err(SearchError::Validation(format!("limit must be positive, got {n}")));
            }
            Some(n) if n as u64 > self.limits.max_limit as u64 => {
                return Err(SearchError::Validation(format!(
                    "limit must be at most {}, got {n}",
                    self.limits.max_limit
                )));
            }
            Some(n) => n as usize,
        };
        Ok((query, limit))
    }

    /// Embed the query and return up to `limit` movies by descending
    /// cosine similarity, ties broken by ascending id. Either the full
    /// ranked list comes back or an error does.
    pub fn search(&self, query: &str, limit: Option<i64>) -> Result<Vec<SearchResult>, SearchError> {
        let (query, limit) = self.validate(query, limit)?;

        if self.store.embedded_count()? == 0 {
            return Ok(Vec::new());
        }

        let query_embedding = self.embedder.embed(query)?;
        if let Some(binding) = self.store.binding()? {
            binding.check(self.embedder.model_name(), query_embedding.len())?;
        }

        Ok(self.store.nearest(&query_embedding, limit)?)
    }
}
