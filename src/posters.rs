//! Poster path refresh from TMDB.
//!
//! `fetch` looks up the current `poster_path` for every catalog id and
//! checkpoints results to a JSON file, resuming from it on the next run.
//! `apply` copies those paths into the store without touching embeddings.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Mutex, mpsc};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::catalog::source::{self, parse_id};
use crate::config::TmdbConfig;
use crate::error::ProviderError;
use crate::store::sqlite::Store;

pub const CHECKPOINT_EVERY: usize = 2000;
pub const PROGRESS_EVERY: usize = 500;
pub const APPLY_BATCH: usize = 500;
/// Toy Story; used to check the API key before a long run.
const PROBE_ID: i64 = 862;
const ATTEMPTS: u32 = 3;

/// Where a movie's poster lives now. `Ok(None)` means TMDB has no such movie
/// or no poster for it.
pub trait PosterSource: Sync {
    fn poster_path(&self, id: i64) -> Result<Option<String>, ProviderError>;
}

pub struct TmdbClient {
    agent: ureq::Agent,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct MovieDetails {
    poster_path: Option<String>,
}

impl TmdbClient {
    pub fn from_config(config: &TmdbConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .with_context(|| format!("{} is not set", config.api_key_env))?;
        Ok(Self::new(&config.url, &api_key))
    }

    pub fn new(base_url: &str, api_key: &str) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(10)))
            .http_status_as_error(false)
            .build()
            .into();
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }
}

impl PosterSource for TmdbClient {
    fn poster_path(&self, id: i64) -> Result<Option<String>, ProviderError> {
        let url = format!("{}/movie/{id}", self.base_url);
        let mut last = ProviderError::Transport("no attempt made".into());
        for attempt in 1..=ATTEMPTS {
            let mut response = match self
                .agent
                .get(&url)
                .query("api_key", &self.api_key)
                .header("Accept", "application/json")
                .call()
            {
                Ok(r) => r,
                Err(e) => {
                    last = e.into();
                    if attempt < ATTEMPTS {
                        std::thread::sleep(Duration::from_secs(1));
                    }
                    continue;
                }
            };

            match response.status().as_u16() {
                200..=299 => {
                    let details: MovieDetails = response
                        .body_mut()
                        .read_json()
                        .map_err(|e| ProviderError::Response(e.to_string()))?;
                    return Ok(details.poster_path);
                }
                404 => return Ok(None),
                429 => {
                    let wait = response
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.trim().parse().ok())
                        .unwrap_or(2);
                    debug!(id, wait, "rate limited");
                    last = ProviderError::Status(429);
                    std::thread::sleep(Duration::from_secs(wait));
                }
                code => {
                    last = ProviderError::Status(code);
                    if !last.is_transient() {
                        return Err(last);
                    }
                    if attempt < ATTEMPTS {
                        std::thread::sleep(Duration::from_secs(1));
                    }
                }
            }
        }
        Err(last)
    }
}

/// Spaces calls evenly so no more than `per_second` start in any second.
pub struct RateLimiter {
    interval: Duration,
    next: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(per_second: u32) -> Self {
        Self {
            interval: Duration::from_secs(1) / per_second.max(1),
            next: Mutex::new(Instant::now()),
        }
    }

    pub fn acquire(&self) {
        let wait = {
            let mut next = match self.next.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let now = Instant::now();
            let slot = (*next).max(now);
            *next = slot + self.interval;
            slot - now
        };
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
    }
}

/// On-disk checkpoint. Layout is stable so interrupted runs can resume.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Checkpoint {
    pub poster_paths: BTreeMap<String, String>,
    pub not_found_ids: Vec<i64>,
    pub fetched_at: String,
    pub total_fetched: usize,
}

impl Checkpoint {
    pub fn from_results(results: &HashMap<i64, Option<String>>) -> Self {
        let mut checkpoint = Self {
            fetched_at: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            total_fetched: results.len(),
            ..Default::default()
        };
        for (id, path) in results {
            match path {
                Some(p) => {
                    checkpoint.poster_paths.insert(id.to_string(), p.clone());
                }
                None => checkpoint.not_found_ids.push(*id),
            }
        }
        checkpoint.not_found_ids.sort_unstable();
        checkpoint
    }

    pub fn into_results(self) -> HashMap<i64, Option<String>> {
        let mut results: HashMap<i64, Option<String>> =
            self.not_found_ids.into_iter().map(|id| (id, None)).collect();
        for (id, path) in self.poster_paths {
            if let Some(id) = parse_id(&id) {
                results.insert(id, Some(path));
            }
        }
        results
    }

    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading checkpoint {}", path.display()))?;
        let checkpoint = serde_json::from_str(&contents)
            .with_context(|| format!("parsing checkpoint {}", path.display()))?;
        Ok(Some(checkpoint))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(self)?)
            .with_context(|| format!("writing checkpoint {}", tmp.display()))?;
        std::fs::rename(&tmp, path).with_context(|| format!("replacing checkpoint {}", path.display()))?;
        Ok(())
    }
}

/// Every distinct integer id in the metadata CSV, ascending.
pub fn catalog_ids(movies_csv: &Path) -> Result<Vec<i64>> {
    let (rows, _) = source::read_movies_file(movies_csv)?;
    let ids: BTreeSet<i64> = rows
        .iter()
        .filter_map(|r| r.id.as_deref().and_then(parse_id))
        .collect();
    Ok(ids.into_iter().collect())
}

#[derive(Debug, Default, Serialize)]
pub struct FetchReport {
    pub already_fetched: usize,
    pub fetched: usize,
    pub found: usize,
    pub not_found: usize,
    pub failed: usize,
}

/// Fail fast on a bad key instead of recording 45k failures.
pub fn check_access(source: &dyn PosterSource) -> Result<()> {
    match source.poster_path(PROBE_ID) {
        Ok(path) => {
            info!(poster = ?path, "TMDB key works");
            Ok(())
        }
        Err(e) => bail!("TMDB probe failed: {e}"),
    }
}

/// Look up posters for `ids` not already in the checkpoint, on up to
/// `max_workers` threads. Failed ids stay out of the checkpoint so a rerun
/// tries them again.
pub fn fetch(
    source: &dyn PosterSource,
    ids: &[i64],
    checkpoint_path: &Path,
    max_workers: usize,
    requests_per_second: u32,
) -> Result<FetchReport> {
    let mut results = Checkpoint::load(checkpoint_path)?
        .map(Checkpoint::into_results)
        .unwrap_or_default();
    let pending: Vec<i64> = ids.iter().copied().filter(|id| !results.contains_key(id)).collect();
    let mut report = FetchReport {
        already_fetched: results.len(),
        ..Default::default()
    };
    if pending.is_empty() {
        info!("all movies already fetched");
        return Ok(report);
    }
    info!(remaining = pending.len(), resumed = report.already_fetched, "fetching posters");

    let limiter = RateLimiter::new(requests_per_second);
    let queue = Mutex::new(pending.iter().copied());
    let total = pending.len();
    let started = Instant::now();

    std::thread::scope(|scope| -> Result<()> {
        let (tx, rx) = mpsc::channel();
        for _ in 0..max_workers.clamp(1, total) {
            let tx = tx.clone();
            let (queue, limiter) = (&queue, &limiter);
            scope.spawn(move || {
                loop {
                    let next = queue.lock().map(|mut q| q.next()).unwrap_or(None);
                    let Some(id) = next else { break };
                    limiter.acquire();
                    if tx.send((id, source.poster_path(id))).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        for (id, outcome) in rx {
            report.fetched += 1;
            match outcome {
                Ok(path) => {
                    if path.is_some() {
                        report.found += 1;
                    } else {
                        report.not_found += 1;
                    }
                    results.insert(id, path);
                }
                Err(e) => {
                    warn!(id, error = %e, "poster lookup failed");
                    report.failed += 1;
                }
            }

            if report.fetched % PROGRESS_EVERY == 0 || report.fetched == total {
                let rate = report.fetched as f64 / started.elapsed().as_secs_f64().max(1e-3);
                info!(
                    found = report.found,
                    "{}/{total} fetched ({rate:.1}/sec)",
                    report.fetched
                );
            }
            if report.fetched % CHECKPOINT_EVERY == 0 {
                Checkpoint::from_results(&results).save(checkpoint_path)?;
            }
        }
        Ok(())
    })?;

    Checkpoint::from_results(&results).save(checkpoint_path)?;
    Ok(report)
}

/// Write checkpointed poster paths into the store in fixed-size transactions.
pub fn apply(store: &mut Store, checkpoint_path: &Path) -> Result<usize> {
    let Some(checkpoint) = Checkpoint::load(checkpoint_path)? else {
        bail!("{} not found; run `posters fetch` first", checkpoint_path.display());
    };
    info!(fetched_at = %checkpoint.fetched_at, "applying poster checkpoint");

    let mut updates: Vec<(i64, Option<String>)> = checkpoint
        .poster_paths
        .into_iter()
        .filter_map(|(id, path)| parse_id(&id).map(|id| (id, Some(path))))
        .collect();
    updates.sort_by_key(|(id, _)| *id);

    let total = updates.len();
    let mut updated = 0;
    for chunk in updates.chunks(APPLY_BATCH) {
        updated += store.update_poster_paths(chunk)?;
        info!("updated {updated}/{total}");
    }
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MovieRecord;
    use crate::store::{EmbeddedMovie, VectorStore};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeTmdb {
        calls: AtomicUsize,
    }

    impl PosterSource for FakeTmdb {
        fn poster_path(&self, id: i64) -> Result<Option<String>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match id % 3 {
                0 => Ok(Some(format!("/p{id}.jpg"))),
                1 => Ok(None),
                _ => Err(ProviderError::Status(500)),
            }
        }
    }

    #[test]
    fn checkpoint_round_trip() {
        let mut results = HashMap::new();
        results.insert(3, Some("/a.jpg".to_string()));
        results.insert(4, None);
        let checkpoint = Checkpoint::from_results(&results);
        assert_eq!(checkpoint.total_fetched, 2);
        assert_eq!(checkpoint.not_found_ids, vec![4]);
        assert_eq!(checkpoint.into_results(), results);
    }

    #[test]
    fn fetch_records_found_and_missing_and_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("poster_updates.json");
        let source = FakeTmdb {
            calls: AtomicUsize::new(0),
        };
        let ids: Vec<i64> = (1..=9).collect();

        let report = fetch(&source, &ids, &path, 3, 1000).unwrap();
        assert_eq!(report.fetched, 9);
        assert_eq!(report.found, 3);
        assert_eq!(report.not_found, 3);
        assert_eq!(report.failed, 3);

        let saved = Checkpoint::load(&path).unwrap().unwrap();
        assert_eq!(saved.poster_paths.len(), 3);
        assert_eq!(saved.poster_paths["6"], "/p6.jpg");

        // Only the failed ids are retried.
        let again = fetch(&source, &ids, &path, 2, 1000).unwrap();
        assert_eq!(again.already_fetched, 6);
        assert_eq!(again.fetched, 3);
        assert_eq!(source.calls.load(Ordering::SeqCst), 12);
    }

    #[test]
    fn apply_updates_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open(dir.path()).unwrap();
        let movie = MovieRecord {
            id: 862,
            title: "Toy Story".into(),
            overview: "Andy's toys come alive.".into(),
            release_date: None,
            poster_path: Some("/old.jpg".into()),
            genres: vec![],
            keywords: vec![],
            vote_average: None,
            vote_count: None,
        };
        store
            .upsert(&[EmbeddedMovie::new(movie, "Toy Story", vec![1.0, 0.0])], "m")
            .unwrap();

        let path = dir.path().join("poster_updates.json");
        let mut results = HashMap::new();
        results.insert(862, Some("/new.jpg".to_string()));
        results.insert(1, Some("/unknown.jpg".to_string()));
        Checkpoint::from_results(&results).save(&path).unwrap();

        assert_eq!(apply(&mut store, &path).unwrap(), 1);
        assert_eq!(store.movie_by_id(862).unwrap().unwrap().poster_path.as_deref(), Some("/new.jpg"));
    }

    #[test]
    fn apply_without_checkpoint_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open(dir.path()).unwrap();
        assert!(apply(&mut store, &dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn rate_limiter_spaces_calls() {
        let limiter = RateLimiter::new(100);
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire();
        }
        assert!(start.elapsed() >= Duration::from_millis(35));
    }

    #[test]
    fn catalog_ids_are_unique_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("movies_metadata.csv");
        std::fs::write(&path, "id,title\n30,A\n2,B\nnope,C\n30,D\n").unwrap();
        assert_eq!(catalog_ids(&path).unwrap(), vec![2, 30]);
    }
}
