pub mod batches;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, mpsc};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::catalog::{self, Catalog, MovieRecord};
use crate::config::{Config, FailurePolicy};
use crate::embed::{self, Embedder, Embedding};
use crate::error::ProviderError;
use crate::store::sqlite::Store;
use crate::store::{EmbeddedMovie, VectorStore};
use batches::{Batch, Batches};

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub batch_size: usize,
    pub max_concurrent: usize,
    pub keyword_limit: usize,
    /// Attempts per batch, counting the first
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub on_failure: FailurePolicy,
    /// Batches before this index are assumed committed by an earlier run
    pub resume_from: usize,
}

impl IngestOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.ingest.batch_size.max(1),
            max_concurrent: config.ingest.max_concurrent.max(1),
            keyword_limit: config.ingest.keyword_limit,
            max_retries: config.embed.max_retries.max(1),
            retry_backoff: Duration::from_secs(config.embed.retry_backoff_secs),
            on_failure: config.ingest.on_batch_failure,
            resume_from: 0,
        }
    }
}

/// Reported after every committed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub batch: usize,
    pub batches: usize,
    pub processed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub batch: usize,
    pub error: String,
}

#[derive(Debug, Default, Serialize)]
pub struct IngestReport {
    pub total_movies: usize,
    pub total_batches: usize,
    pub resumed_from: usize,
    /// Committed batch indices, ascending
    pub committed: Vec<usize>,
    pub failed: Vec<BatchFailure>,
    pub upserted: usize,
}

impl IngestReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.resumed_from + self.committed.len() == self.total_batches
    }

    /// Where a follow-up `--resume-from` should start: the first batch this
    /// run did not commit. Re-running committed batches after it is harmless.
    pub fn resume_point(&self) -> Option<usize> {
        if self.is_complete() {
            return None;
        }
        (self.resumed_from..self.total_batches).find(|b| self.committed.binary_search(b).is_err())
    }

    /// Highest batch index such that it and every batch before it are committed.
    pub fn last_contiguous_commit(&self) -> Option<usize> {
        self.resume_point()
            .unwrap_or(self.total_batches)
            .checked_sub(1)
    }
}

type BatchOutcome = (usize, Result<Vec<EmbeddedMovie>, ProviderError>);

/// Embed and upsert every movie in `catalog`, batch by batch.
///
/// Embedding calls for different batches run on up to `max_concurrent`
/// threads; upserts happen one at a time on the calling thread, so the
/// store never needs to be shared. Each batch commits independently.
pub fn run<S: VectorStore + ?Sized>(
    catalog: &Catalog,
    embedder: &dyn Embedder,
    store: &mut S,
    opts: &IngestOptions,
    progress: &mut dyn FnMut(Progress),
) -> IngestReport {
    let movies = &catalog.movies;
    let sequence = Batches::new(movies, opts.batch_size).starting_at(opts.resume_from);
    let mut report = IngestReport {
        total_movies: movies.len(),
        total_batches: sequence.total(),
        resumed_from: opts.resume_from.min(sequence.total()),
        ..Default::default()
    };
    let mut processed = movies.len().min(report.resumed_from * opts.batch_size);

    let queue = Mutex::new(sequence);
    let stop = AtomicBool::new(false);
    let workers = opts.max_concurrent.min(report.total_batches.max(1));
    let model = embedder.model_name();

    std::thread::scope(|scope| {
        let (tx, rx) = mpsc::channel::<BatchOutcome>();
        for _ in 0..workers {
            let tx = tx.clone();
            let (queue, stop) = (&queue, &stop);
            scope.spawn(move || {
                loop {
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }
                    let next = queue.lock().map(|mut q| q.next()).unwrap_or(None);
                    let Some(batch) = next else { break };
                    let outcome = embed_batch(embedder, &batch, opts);
                    if tx.send((batch.index, outcome)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        for (index, outcome) in rx {
            if stop.load(Ordering::SeqCst) {
                warn!(batch = index + 1, "run aborted; discarding batch");
                continue;
            }
            let result = outcome
                .map_err(|e| e.to_string())
                .and_then(|rows| {
                    let n = rows.len();
                    store.upsert(&rows, model).map(|_| n).map_err(|e| e.to_string())
                });
            match result {
                Ok(n) => {
                    processed += n;
                    report.upserted += n;
                    report.committed.push(index);
                    info!(
                        batch = index + 1,
                        batches = report.total_batches,
                        "committed {processed}/{} movies",
                        report.total_movies
                    );
                    progress(Progress {
                        batch: index,
                        batches: report.total_batches,
                        processed,
                        total: report.total_movies,
                    });
                }
                Err(e) => {
                    error!(batch = index + 1, error = %e, "batch failed");
                    report.failed.push(BatchFailure { batch: index, error: e });
                    if opts.on_failure == FailurePolicy::Abort {
                        stop.store(true, Ordering::SeqCst);
                    }
                }
            }
        }
    });

    report.committed.sort_unstable();
    report.failed.sort_by_key(|f| f.batch);
    report
}

fn embed_batch(
    embedder: &dyn Embedder,
    batch: &Batch<'_, MovieRecord>,
    opts: &IngestOptions,
) -> Result<Vec<EmbeddedMovie>, ProviderError> {
    let texts: Vec<String> = batch
        .items
        .iter()
        .map(|m| m.embedding_text(opts.keyword_limit))
        .collect();
    let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
    let vectors = embed_with_retry(embedder, &refs, opts, batch.index)?;
    if vectors.len() != batch.items.len() {
        return Err(ProviderError::Response(format!(
            "asked for {} embeddings, got {}",
            batch.items.len(),
            vectors.len()
        )));
    }

    Ok(batch
        .items
        .iter()
        .zip(texts.iter())
        .zip(vectors)
        .map(|((movie, text), vector)| EmbeddedMovie::new(movie.clone(), text, vector))
        .collect())
}

/// Retry transient failures with linear backoff (`backoff`, `2*backoff`, ...).
pub fn embed_with_retry(
    embedder: &dyn Embedder,
    texts: &[&str],
    opts: &IngestOptions,
    batch: usize,
) -> Result<Vec<Embedding>, ProviderError> {
    let mut attempt = 1;
    loop {
        match embedder.embed_batch(texts) {
            Ok(vectors) => return Ok(vectors),
            Err(e) if e.is_transient() && attempt < opts.max_retries => {
                let wait = opts.retry_backoff * attempt;
                warn!(
                    batch = batch + 1,
                    attempt,
                    max = opts.max_retries,
                    error = %e,
                    "retrying in {}s",
                    wait.as_secs()
                );
                std::thread::sleep(wait);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

pub struct IngestArgs<'a> {
    pub movies: &'a Path,
    pub keywords: Option<&'a Path>,
    pub resume_from: usize,
    pub reset: bool,
}

/// Full ingestion run against the project's SQLite store. The provider is
/// reached (credentials and dimension probe) before the store is touched.
pub fn ingest_catalog(root: &Path, config: &Config, args: &IngestArgs<'_>) -> Result<(Catalog, IngestReport)> {
    let embedder = embed::from_config(&config.embed).context("connecting to embedding provider")?;
    ingest_catalog_with(root, config, args, embedder.as_ref())
}

/// [`ingest_catalog`] with an already-connected embedder.
pub fn ingest_catalog_with(
    root: &Path,
    config: &Config,
    args: &IngestArgs<'_>,
    embedder: &dyn Embedder,
) -> Result<(Catalog, IngestReport)> {
    let mut opts = IngestOptions::from_config(config);
    opts.resume_from = args.resume_from;
    if args.reset && opts.resume_from > 0 {
        bail!("--reset clears every committed batch; it cannot be combined with --resume-from");
    }

    let catalog = catalog::load(args.movies, args.keywords, opts.keyword_limit)?;
    info!(
        rows = catalog.rows_read,
        movies = catalog.movies.len(),
        skipped = catalog.skipped(),
        "catalog loaded"
    );
    for (kind, count) in catalog.issue_counts() {
        info!(kind, count, "data quality");
    }

    let storage_dir = config.storage_dir(root);
    let mut store = Store::open(&storage_dir)?;

    let fingerprint = catalog.fingerprint(opts.keyword_limit, opts.batch_size);
    if opts.resume_from > 0 {
        let stored = store.get_meta("catalog_fingerprint")?;
        if stored.as_deref() != Some(fingerprint.as_str()) {
            bail!(
                "catalog or batch size changed since the interrupted run; batch boundaries no longer line up, rerun without --resume-from"
            );
        }
    }

    if args.reset {
        warn!("clearing store before ingest");
        store.reset()?;
    } else if let Some(binding) = store.binding()? {
        binding
            .check(embedder.model_name(), embedder.dimensions())
            .context("store was built with a different model; rerun with --reset to re-embed everything")?;
    }

    store.set_meta("catalog_fingerprint", &fingerprint)?;
    let report = run(&catalog, embedder, &mut store, &opts, &mut |_| {});
    store.set_meta("last_ingest_at", &chrono::Utc::now().to_rfc3339())?;

    Ok((catalog, report))
}
