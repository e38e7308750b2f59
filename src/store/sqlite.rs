use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use std::path::Path;

use super::{EmbeddedMovie, ModelBinding, SearchResult, VectorStore, decode_vector, encode_vector, rank, schema};
use crate::catalog::MovieRecord;
use crate::embed::cosine_similarity;
use crate::error::StoreError;

pub const DB_FILE: &str = "movies.db";

const MOVIE_COLUMNS: &str =
    "id, title, overview, release_date, poster_path, genres, keywords, vote_average, vote_count";

pub struct Store {
    conn: Connection,
}

#[derive(Debug, Serialize)]
pub struct StoreStats {
    pub movies: i64,
    pub embedded: i64,
    pub model: Option<String>,
    pub dimensions: Option<usize>,
    pub catalog_fingerprint: Option<String>,
    pub last_ingest_at: Option<String>,
    pub db_size_bytes: u64,
}

impl Store {
    pub fn open(storage_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(storage_dir)
            .with_context(|| format!("creating storage dir {}", storage_dir.display()))?;
        let db_path = storage_dir.join(DB_FILE);
        let conn = Connection::open(&db_path)
            .with_context(|| format!("opening database at {}", db_path.display()))?;
        schema::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Open only if a database already exists; never creates one.
    pub fn open_if_exists(storage_dir: &Path) -> Result<Option<Self>> {
        if storage_dir.join(DB_FILE).exists() {
            Self::open(storage_dir).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .conn
            .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |r| r.get(0))
            .optional()?)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Drop every movie and the model binding so a different model can be adopted.
    pub fn reset(&mut self) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM movies", [])?;
        tx.execute(
            "DELETE FROM meta WHERE key IN ('embedding_model', 'dimensions', 'catalog_fingerprint')",
            [],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn movie_by_id(&self, id: i64) -> Result<Option<MovieRecord>, StoreError> {
        let sql = format!("SELECT {MOVIE_COLUMNS} FROM movies WHERE id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![id], read_movie_row)
            .optional()?;
        row.map(|r| r.into_movie()).transpose()
    }

    /// Every embedded movie with its vector, in id order.
    pub fn all_embedded(&self) -> Result<Vec<(MovieRecord, Vec<f32>)>, StoreError> {
        let sql = format!("SELECT {MOVIE_COLUMNS}, embedding FROM movies WHERE embedding IS NOT NULL ORDER BY id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            let movie = read_movie_row(row)?;
            let blob: Vec<u8> = row.get(9)?;
            Ok((movie, blob))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (movie, blob) = row?;
            let id = movie.id;
            let vector = decode_vector(&blob).ok_or_else(|| StoreError::Corrupt {
                id,
                reason: format!("embedding blob of {} bytes", blob.len()),
            })?;
            out.push((movie.into_movie()?, vector));
        }
        Ok(out)
    }

    /// Replace poster paths for existing movies. Ids not in the store are
    /// ignored. Returns the number of rows changed.
    pub fn update_poster_paths(&mut self, updates: &[(i64, Option<String>)]) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        let mut changed = 0;
        {
            let mut stmt = tx.prepare("UPDATE movies SET poster_path = ?2 WHERE id = ?1")?;
            for (id, path) in updates {
                changed += stmt.execute(params![id, path])?;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    /// Collect store statistics.
    pub fn stats(&self, storage_dir: &Path) -> Result<StoreStats, StoreError> {
        let movies: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM movies", [], |r| r.get(0))?;
        let embedded: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM movies WHERE embedding IS NOT NULL",
            [],
            |r| r.get(0),
        )?;
        let binding = self.binding()?;

        let db_size_bytes = std::fs::metadata(storage_dir.join(DB_FILE))
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(StoreStats {
            movies,
            embedded,
            model: binding.as_ref().map(|b| b.model.clone()),
            dimensions: binding.map(|b| b.dimensions),
            catalog_fingerprint: self.get_meta("catalog_fingerprint")?,
            last_ingest_at: self.get_meta("last_ingest_at")?,
            db_size_bytes,
        })
    }
}

impl VectorStore for Store {
    fn binding(&self) -> Result<Option<ModelBinding>, StoreError> {
        let model = self.get_meta("embedding_model")?;
        let dimensions = self.get_meta("dimensions")?;
        match (model, dimensions) {
            (Some(model), Some(dims)) => {
                let dimensions = dims.parse().map_err(|_| StoreError::Corrupt {
                    id: 0,
                    reason: format!("dimensions meta value {dims:?}"),
                })?;
                Ok(Some(ModelBinding { model, dimensions }))
            }
            _ => Ok(None),
        }
    }

    fn upsert(&mut self, rows: &[EmbeddedMovie], model: &str) -> Result<(), StoreError> {
        let Some(first) = rows.first() else {
            return Ok(());
        };
        let dimensions = first.embedding.len();
        let bound = self.binding()?;
        if let Some(binding) = &bound {
            binding.check(model, dimensions)?;
        }
        if let Some(bad) = rows.iter().find(|r| r.embedding.len() != dimensions) {
            return Err(StoreError::DimensionMismatch {
                stored: dimensions,
                given: bad.embedding.len(),
            });
        }

        let tx = self.conn.transaction()?;
        if bound.is_none() {
            tx.execute(
                "INSERT INTO meta (key, value) VALUES ('embedding_model', ?1), ('dimensions', ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![model, dimensions.to_string()],
            )?;
        }
        {
            let mut stmt = tx.prepare(
                "INSERT INTO movies (id, title, overview, release_date, poster_path, genres, keywords,
                                     vote_average, vote_count, text_hash, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    overview = excluded.overview,
                    release_date = excluded.release_date,
                    poster_path = excluded.poster_path,
                    genres = excluded.genres,
                    keywords = excluded.keywords,
                    vote_average = excluded.vote_average,
                    vote_count = excluded.vote_count,
                    text_hash = excluded.text_hash,
                    embedding = excluded.embedding",
            )?;
            for row in rows {
                let m = &row.movie;
                stmt.execute(params![
                    m.id,
                    m.title,
                    m.overview,
                    m.release_date.map(|d| d.to_string()),
                    m.poster_path,
                    to_json(&m.genres),
                    to_json(&m.keywords),
                    m.vote_average,
                    m.vote_count,
                    row.text_hash,
                    encode_vector(&row.embedding),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Exact scan over every stored vector.
    fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>, StoreError> {
        let Some(binding) = self.binding()? else {
            return Ok(Vec::new());
        };
        if binding.dimensions != query.len() {
            return Err(StoreError::DimensionMismatch {
                stored: binding.dimensions,
                given: query.len(),
            });
        }

        let mut stmt = self
            .conn
            .prepare("SELECT id, embedding FROM movies WHERE embedding IS NOT NULL")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)))?;

        let mut scored = Vec::new();
        for row in rows {
            let (id, blob) = row?;
            let vector = decode_vector(&blob)
                .filter(|v| v.len() == query.len())
                .ok_or_else(|| StoreError::Corrupt {
                    id,
                    reason: format!("embedding blob of {} bytes", blob.len()),
                })?;
            scored.push((id, cosine_similarity(query, &vector)));
        }

        let mut results = Vec::new();
        for (id, similarity) in rank(scored, k) {
            let movie = self.movie_by_id(id)?.ok_or_else(|| StoreError::Corrupt {
                id,
                reason: "row vanished during search".into(),
            })?;
            results.push(SearchResult::from_movie(movie, similarity));
        }
        Ok(results)
    }

    fn embedded_count(&self) -> Result<usize, StoreError> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM movies WHERE embedding IS NOT NULL",
            [],
            |r| r.get(0),
        )?;
        Ok(n as usize)
    }
}

fn to_json(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".into())
}

/// Columns as stored, before JSON/date decoding.
struct MovieRow {
    id: i64,
    title: String,
    overview: String,
    release_date: Option<String>,
    poster_path: Option<String>,
    genres: String,
    keywords: String,
    vote_average: Option<f64>,
    vote_count: Option<i64>,
}

fn read_movie_row(row: &Row<'_>) -> rusqlite::Result<MovieRow> {
    Ok(MovieRow {
        id: row.get(0)?,
        title: row.get(1)?,
        overview: row.get(2)?,
        release_date: row.get(3)?,
        poster_path: row.get(4)?,
        genres: row.get(5)?,
        keywords: row.get(6)?,
        vote_average: row.get(7)?,
        vote_count: row.get(8)?,
    })
}

impl MovieRow {
    fn into_movie(self) -> Result<MovieRecord, StoreError> {
        let id = self.id;
        let corrupt = |reason: String| StoreError::Corrupt { id, reason };
        let release_date = self
            .release_date
            .map(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").map_err(|_| corrupt(format!("release_date {d:?}"))))
            .transpose()?;
        let genres = serde_json::from_str(&self.genres).map_err(|e| corrupt(format!("genres: {e}")))?;
        let keywords = serde_json::from_str(&self.keywords).map_err(|e| corrupt(format!("keywords: {e}")))?;
        Ok(MovieRecord {
            id,
            title: self.title,
            overview: self.overview,
            release_date,
            poster_path: self.poster_path,
            genres,
            keywords,
            vote_average: self.vote_average,
            vote_count: self.vote_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movie(id: i64, title: &str) -> MovieRecord {
        MovieRecord {
            id,
            title: title.into(),
            overview: format!("{title} is a movie with an overview"),
            release_date: NaiveDate::from_ymd_opt(1997, 12, 19),
            poster_path: Some(format!("/{id}.jpg")),
            genres: vec!["Drama".into(), "Romance".into()],
            keywords: vec!["ship".into()],
            vote_average: Some(7.5),
            vote_count: Some(100),
        }
    }

    fn row(id: i64, title: &str, embedding: Vec<f32>) -> EmbeddedMovie {
        EmbeddedMovie::new(movie(id, title), title, embedding)
    }

    fn open() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn open_if_exists_does_not_create() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Store::open_if_exists(dir.path()).unwrap().is_none());
        Store::open(dir.path()).unwrap();
        assert!(Store::open_if_exists(dir.path()).unwrap().is_some());
    }

    #[test]
    fn upsert_round_trips_metadata() {
        let (_dir, mut store) = open();
        store.upsert(&[row(597, "Titanic", vec![1.0, 0.0])], "m").unwrap();
        let loaded = store.movie_by_id(597).unwrap().unwrap();
        assert_eq!(loaded, movie(597, "Titanic"));
        assert!(store.movie_by_id(1).unwrap().is_none());
    }

    #[test]
    fn upsert_is_keyed_by_id() {
        let (_dir, mut store) = open();
        store.upsert(&[row(1, "Old", vec![1.0, 0.0])], "m").unwrap();
        store.upsert(&[row(1, "New", vec![0.0, 1.0])], "m").unwrap();
        let stats = store.stats(Path::new("/nonexistent")).unwrap();
        assert_eq!(stats.movies, 1);
        assert_eq!(store.movie_by_id(1).unwrap().unwrap().title, "New");
    }

    #[test]
    fn first_upsert_binds_model() {
        let (_dir, mut store) = open();
        assert!(store.binding().unwrap().is_none());
        store.upsert(&[row(1, "A", vec![1.0, 0.0, 0.0])], "model-a").unwrap();
        assert_eq!(
            store.binding().unwrap(),
            Some(ModelBinding {
                model: "model-a".into(),
                dimensions: 3
            })
        );

        let err = store.upsert(&[row(2, "B", vec![1.0, 0.0, 0.0])], "model-b").unwrap_err();
        assert!(matches!(err, StoreError::ModelMismatch { .. }));
        let err = store.upsert(&[row(2, "B", vec![1.0, 0.0])], "model-a").unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { .. }));
        assert_eq!(store.embedded_count().unwrap(), 1);
    }

    #[test]
    fn mixed_dimensions_within_batch_rejected() {
        let (_dir, mut store) = open();
        let err = store
            .upsert(&[row(1, "A", vec![1.0, 0.0]), row(2, "B", vec![1.0])], "m")
            .unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { .. }));
        assert_eq!(store.embedded_count().unwrap(), 0);
    }

    #[test]
    fn nearest_ranks_and_skips_null_vectors() {
        let (_dir, mut store) = open();
        store
            .upsert(
                &[
                    row(1, "East", vec![1.0, 0.0]),
                    row(2, "North", vec![0.0, 1.0]),
                    row(3, "NorthEast", vec![1.0, 1.0]),
                ],
                "m",
            )
            .unwrap();
        store
            .conn
            .execute(
                "INSERT INTO movies (id, title, overview, text_hash) VALUES (4, 'Pending', 'not embedded yet', '')",
                [],
            )
            .unwrap();

        let results = store.nearest(&[1.0, 0.1], 10).unwrap();
        let ids: Vec<i64> = results.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 3, 2]);
        assert!(results.windows(2).all(|w| w[0].similarity >= w[1].similarity));

        let top = store.nearest(&[1.0, 0.1], 1).unwrap();
        assert_eq!(top.len(), 1);
    }

    #[test]
    fn nearest_rejects_wrong_dimensions() {
        let (_dir, mut store) = open();
        store.upsert(&[row(1, "A", vec![1.0, 0.0])], "m").unwrap();
        assert!(matches!(
            store.nearest(&[1.0, 0.0, 0.0], 5),
            Err(StoreError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn nearest_on_empty_store() {
        let (_dir, store) = open();
        assert!(store.nearest(&[1.0], 5).unwrap().is_empty());
    }

    #[test]
    fn reset_clears_rows_and_binding() {
        let (_dir, mut store) = open();
        store.upsert(&[row(1, "A", vec![1.0])], "m").unwrap();
        store.set_meta("catalog_fingerprint", "abc").unwrap();
        store.reset().unwrap();
        assert_eq!(store.embedded_count().unwrap(), 0);
        assert!(store.binding().unwrap().is_none());
        assert!(store.get_meta("catalog_fingerprint").unwrap().is_none());
        store.upsert(&[row(1, "A", vec![1.0, 2.0])], "other").unwrap();
    }

    #[test]
    fn poster_updates_touch_only_known_ids() {
        let (_dir, mut store) = open();
        store.upsert(&[row(1, "A", vec![1.0])], "m").unwrap();
        let changed = store
            .update_poster_paths(&[(1, Some("/fresh.jpg".into())), (99, Some("/ghost.jpg".into()))])
            .unwrap();
        assert_eq!(changed, 1);
        let loaded = store.movie_by_id(1).unwrap().unwrap();
        assert_eq!(loaded.poster_path.as_deref(), Some("/fresh.jpg"));
        assert_eq!(store.all_embedded().unwrap()[0].1, vec![1.0]);
    }

    #[test]
    fn all_embedded_in_id_order() {
        let (_dir, mut store) = open();
        store
            .upsert(&[row(9, "Nine", vec![0.0, 1.0]), row(3, "Three", vec![1.0, 0.0])], "m")
            .unwrap();
        let all = store.all_embedded().unwrap();
        assert_eq!(all.iter().map(|(m, _)| m.id).collect::<Vec<_>>(), vec![3, 9]);
        assert_eq!(all[1].1, vec![0.0, 1.0]);
    }
}
