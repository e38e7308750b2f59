pub mod memory;
pub mod schema;
pub mod sqlite;

use chrono::NaiveDate;
use serde::Serialize;
use std::cmp::Ordering;

use crate::catalog::MovieRecord;
use crate::embed::Embedding;
use crate::error::StoreError;

/// A movie ready to persist: metadata, its vector, and the hash of the
/// text the vector was computed from.
#[derive(Debug, Clone)]
pub struct EmbeddedMovie {
    pub movie: MovieRecord,
    pub embedding: Embedding,
    pub text_hash: String,
}

impl EmbeddedMovie {
    pub fn new(movie: MovieRecord, text: &str, embedding: Embedding) -> Self {
        Self {
            movie,
            embedding,
            text_hash: blake3::hash(text.as_bytes()).to_hex().to_string(),
        }
    }
}

/// The embedding model a store's vectors belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelBinding {
    pub model: String,
    pub dimensions: usize,
}

impl ModelBinding {
    /// Reject vectors from any other model or dimensionality.
    pub fn check(&self, model: &str, dimensions: usize) -> Result<(), StoreError> {
        if self.model != model {
            return Err(StoreError::ModelMismatch {
                stored: self.model.clone(),
                given: model.to_string(),
            });
        }
        if self.dimensions != dimensions {
            return Err(StoreError::DimensionMismatch {
                stored: self.dimensions,
                given: dimensions,
            });
        }
        Ok(())
    }
}

/// One ranked hit. Similarity is cosine similarity, i.e.
/// `1 - cosine_distance`: 1 for identical direction, 0 for orthogonal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub id: i64,
    pub title: String,
    pub overview: String,
    pub release_date: Option<NaiveDate>,
    pub poster_path: Option<String>,
    pub genres: Vec<String>,
    pub vote_average: Option<f64>,
    pub similarity: f32,
}

impl SearchResult {
    pub fn from_movie(movie: MovieRecord, similarity: f32) -> Self {
        Self {
            id: movie.id,
            title: movie.title,
            overview: movie.overview,
            release_date: movie.release_date,
            poster_path: movie.poster_path,
            genres: movie.genres,
            vote_average: movie.vote_average,
            similarity,
        }
    }
}

/// Persistence and nearest-neighbor lookup over embedded movies.
///
/// Every store is bound to one model on its first write; writes and
/// queries from any other model are rejected rather than compared.
pub trait VectorStore {
    fn binding(&self) -> Result<Option<ModelBinding>, StoreError>;

    /// Insert or replace rows by id, all in one unit of work.
    fn upsert(&mut self, rows: &[EmbeddedMovie], model: &str) -> Result<(), StoreError>;

    /// The `k` rows most similar to `query`, best first, ties by ascending
    /// id. Rows without a vector are never returned.
    fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>, StoreError>;

    /// Number of rows carrying a vector.
    fn embedded_count(&self) -> Result<usize, StoreError>;
}

/// Order `(id, similarity)` pairs best-first with ascending id as the tie
/// break, dropping non-finite scores, and keep the top `k`.
pub fn rank(mut scored: Vec<(i64, f32)>, k: usize) -> Vec<(i64, f32)> {
    scored.retain(|(_, s)| s.is_finite());
    scored.sort_by(|a, b| match b.1.total_cmp(&a.1) {
        Ordering::Equal => a.0.cmp(&b.0),
        other => other,
    });
    scored.truncate(k);
    scored
}

pub fn encode_vector(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

pub fn decode_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_orders_by_similarity_then_id() {
        let ranked = rank(vec![(5, 0.5), (2, 0.9), (9, 0.5), (1, 0.5)], 10);
        assert_eq!(ranked, vec![(2, 0.9), (1, 0.5), (5, 0.5), (9, 0.5)]);
    }

    #[test]
    fn rank_truncates_and_drops_nan() {
        let ranked = rank(vec![(1, f32::NAN), (2, 0.1), (3, 0.2)], 1);
        assert_eq!(ranked, vec![(3, 0.2)]);
    }

    #[test]
    fn vector_blob_layout() {
        let v = vec![1.0f32, -0.5, 3.25];
        let bytes = encode_vector(&v);
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[..4], &1.0f32.to_le_bytes());
        assert_eq!(decode_vector(&bytes), Some(v));
        assert_eq!(decode_vector(&bytes[..5]), None);
    }

    #[test]
    fn binding_check() {
        let binding = ModelBinding {
            model: "text-embedding-3-small".into(),
            dimensions: 1536,
        };
        assert!(binding.check("text-embedding-3-small", 1536).is_ok());
        assert!(matches!(
            binding.check("text-embedding-3-large", 1536),
            Err(StoreError::ModelMismatch { .. })
        ));
        assert!(matches!(
            binding.check("text-embedding-3-small", 768),
            Err(StoreError::DimensionMismatch { .. })
        ));
    }
}
