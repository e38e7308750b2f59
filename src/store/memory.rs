use std::collections::HashMap;

use super::{EmbeddedMovie, ModelBinding, SearchResult, VectorStore, rank};
use crate::catalog::MovieRecord;
use crate::embed::{dot, normalize};
use crate::error::StoreError;
use crate::store::sqlite::Store;

/// Read-mostly flat index held in memory. Vectors are normalized on the way
/// in so a query costs one dot product per movie; results are exact.
#[derive(Default)]
pub struct MemoryIndex {
    binding: Option<ModelBinding>,
    entries: Vec<Entry>,
    by_id: HashMap<i64, usize>,
}

struct Entry {
    movie: MovieRecord,
    unit: Vec<f32>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot every embedded row of a SQLite store.
    pub fn load(store: &Store) -> Result<Self, StoreError> {
        let mut index = Self {
            binding: store.binding()?,
            ..Default::default()
        };
        for (movie, vector) in store.all_embedded()? {
            if let Some(binding) = &index.binding {
                if vector.len() != binding.dimensions {
                    return Err(StoreError::DimensionMismatch {
                        stored: binding.dimensions,
                        given: vector.len(),
                    });
                }
            }
            index.insert(movie, vector);
        }
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, movie: MovieRecord, mut vector: Vec<f32>) {
        normalize(&mut vector);
        let entry = Entry { movie, unit: vector };
        match self.by_id.get(&entry.movie.id) {
            Some(&slot) => self.entries[slot] = entry,
            None => {
                self.by_id.insert(entry.movie.id, self.entries.len());
                self.entries.push(entry);
            }
        }
    }
}

impl VectorStore for MemoryIndex {
    fn binding(&self) -> Result<Option<ModelBinding>, StoreError> {
        Ok(self.binding.clone())
    }

    fn upsert(&mut self, rows: &[EmbeddedMovie], model: &str) -> Result<(), StoreError> {
        let Some(first) = rows.first() else {
            return Ok(());
        };
        let binding = match &self.binding {
            Some(binding) => binding.clone(),
            None => ModelBinding {
                model: model.to_string(),
                dimensions: first.embedding.len(),
            },
        };
        for row in rows {
            binding.check(model, row.embedding.len())?;
        }

        self.binding = Some(binding);
        for row in rows {
            self.insert(row.movie.clone(), row.embedding.clone());
        }
        Ok(())
    }

    fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>, StoreError> {
        let Some(binding) = &self.binding else {
            return Ok(Vec::new());
        };
        if binding.dimensions != query.len() {
            return Err(StoreError::DimensionMismatch {
                stored: binding.dimensions,
                given: query.len(),
            });
        }

        let mut q = query.to_vec();
        normalize(&mut q);
        let scored = self
            .entries
            .iter()
            .map(|e| (e.movie.id, dot(&q, &e.unit)))
            .collect();

        Ok(rank(scored, k)
            .into_iter()
            .map(|(id, similarity)| {
                let movie = self.entries[self.by_id[&id]].movie.clone();
                SearchResult::from_movie(movie, similarity)
            })
            .collect())
    }

    fn embedded_count(&self) -> Result<usize, StoreError> {
        Ok(self.entries.len())
    }
}
