use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cinesearch::config::Config;
use cinesearch::embed;
use cinesearch::ingest::{self, IngestArgs};
use cinesearch::posters::{self, TmdbClient};
use cinesearch::search::semantic::{SearchLimits, SearchService};
use cinesearch::server::{self, AppState};
use cinesearch::store::memory::MemoryIndex;
use cinesearch::store::sqlite::Store;

#[derive(Parser)]
#[command(name = "cinesearch", version, about = "Find movies by describing them")]
struct Cli {
    /// Project root holding the `.cinesearch` directory
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Explicit config file (default: <root>/.cinesearch/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default config file
    Init,
    /// Embed the movie catalog into the store
    Ingest {
        /// Path to movies_metadata.csv
        #[arg(long)]
        movies: PathBuf,
        /// Path to keywords.csv
        #[arg(long)]
        keywords: Option<PathBuf>,
        /// Skip batches already committed by an interrupted run
        #[arg(long, default_value_t = 0)]
        resume_from: usize,
        /// Clear the store and its model binding first
        #[arg(long)]
        reset: bool,
    },
    /// Search the embedded catalog
    Search {
        /// Natural-language description
        query: String,
        #[arg(short, long)]
        limit: Option<i64>,
    },
    /// Serve the HTTP search API
    Serve {
        /// Override server.bind
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Show store statistics
    Status,
    /// Refresh poster paths from TMDB
    Posters {
        #[command(subcommand)]
        action: PosterAction,
    },
}

#[derive(Subcommand)]
enum PosterAction {
    /// Look up current poster paths and checkpoint them to a JSON file
    Fetch {
        #[arg(long)]
        movies: PathBuf,
        #[arg(long, default_value = "poster_updates.json")]
        output: PathBuf,
    },
    /// Write checkpointed poster paths into the store
    Apply {
        #[arg(long, default_value = "poster_updates.json")]
        input: PathBuf,
    },
}

fn main() {
    init_tracing();

    if let Err(err) = run() {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_file(path)?,
        None => Config::load(&cli.root)?,
    };
    let root = cli.root.as_path();

    match cli.command {
        Commands::Init => {
            let path = config.save(root)?;
            println!("Wrote {}", path.display());
            Ok(())
        }
        Commands::Ingest {
            movies,
            keywords,
            resume_from,
            reset,
        } => cmd_ingest(root, &config, &movies, keywords.as_deref(), resume_from, reset),
        Commands::Search { query, limit } => cmd_search(root, &config, &query, limit),
        Commands::Serve { bind } => cmd_serve(root, &config, bind),
        Commands::Status => cmd_status(root, &config),
        Commands::Posters { action } => match action {
            PosterAction::Fetch { movies, output } => {
                let client = TmdbClient::from_config(&config.tmdb)?;
                posters::check_access(&client)?;
                let ids = posters::catalog_ids(&movies)?;
                let report = posters::fetch(
                    &client,
                    &ids,
                    &output,
                    config.tmdb.max_workers,
                    config.tmdb.requests_per_second,
                )?;
                println!(
                    "Fetched {} ({} found, {} not found, {} failed); {} from earlier runs",
                    report.fetched, report.found, report.not_found, report.failed, report.already_fetched
                );
                if report.failed > 0 {
                    println!("Rerun to retry the failed ids.");
                }
                Ok(())
            }
            PosterAction::Apply { input } => {
                let mut store = open_store(root, &config)?;
                let updated = posters::apply(&mut store, &input)?;
                println!("Updated {updated} poster paths");
                Ok(())
            }
        },
    }
}

fn open_store(root: &Path, config: &Config) -> Result<Store> {
    let dir = config.storage_dir(root);
    Store::open_if_exists(&dir)?
        .with_context(|| format!("no store at {}; run `cinesearch ingest` first", dir.display()))
}

fn cmd_ingest(
    root: &Path,
    config: &Config,
    movies: &Path,
    keywords: Option<&Path>,
    resume_from: usize,
    reset: bool,
) -> Result<()> {
    let args = IngestArgs {
        movies,
        keywords,
        resume_from,
        reset,
    };
    let (catalog, report) = ingest::ingest_catalog(root, config, &args)?;

    println!(
        "Read {} rows: {} movies kept, {} skipped",
        catalog.rows_read,
        catalog.movies.len(),
        catalog.skipped()
    );
    for (kind, count) in catalog.issue_counts() {
        println!("  {kind}: {count}");
    }
    println!(
        "Upserted {} movies in {}/{} batches",
        report.upserted,
        report.committed.len(),
        report.total_batches.saturating_sub(report.resumed_from)
    );

    if report.is_complete() {
        return Ok(());
    }
    for failure in &report.failed {
        warn!(batch = failure.batch, error = %failure.error, "batch not committed");
    }
    match report.last_contiguous_commit() {
        Some(last) => println!("Last batch committed in order: {last}"),
        None => println!("No batch committed in order"),
    }
    if let Some(next) = report.resume_point() {
        println!("Resume with: cinesearch ingest --movies {} --resume-from {next}", movies.display());
    }
    anyhow::bail!("{} batch(es) failed", report.failed.len().max(1))
}

fn cmd_search(root: &Path, config: &Config, query: &str, limit: Option<i64>) -> Result<()> {
    let store = open_store(root, config)?;
    let embedder = embed::from_config(&config.embed)?;
    let service = SearchService::new(embedder, store, SearchLimits::from(&config.search))?;

    let results = service.search(query, limit)?;
    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (rank, r) in results.iter().enumerate() {
        let year = r.release_date.map(|d| d.format(" (%Y)").to_string()).unwrap_or_default();
        println!("{:>2}. [{:.3}] {}{year}  #{}", rank + 1, r.similarity, r.title, r.id);
        if !r.genres.is_empty() {
            println!("    {}", r.genres.join(", "));
        }
    }
    Ok(())
}

fn cmd_serve(root: &Path, config: &Config, bind: Option<SocketAddr>) -> Result<()> {
    let addr = match bind {
        Some(addr) => addr,
        None => config
            .server
            .bind
            .parse()
            .with_context(|| format!("invalid server.bind {:?}", config.server.bind))?,
    };

    let store = open_store(root, config)?;
    let stored_movies = store.stats(&config.storage_dir(root))?.movies.max(0) as u64;
    let index = MemoryIndex::load(&store)?;
    drop(store);
    info!(movies = index.len(), "index loaded");

    let embedder = embed::from_config(&config.embed).context("connecting to embedding provider")?;
    let service = SearchService::new(embedder, index, SearchLimits::from(&config.search))?;
    let state = Arc::new(AppState {
        service,
        stored_movies,
        timeout: Duration::from_secs(config.search.timeout_secs),
    });

    let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
    runtime.block_on(server::serve(addr, state, &config.server.allowed_origins))
}

fn cmd_status(root: &Path, config: &Config) -> Result<()> {
    let dir = config.storage_dir(root);
    let Some(store) = Store::open_if_exists(&dir)? else {
        println!("No store at {}", dir.display());
        return Ok(());
    };
    let stats = store.stats(&dir)?;

    println!("Store:       {}", dir.display());
    println!("Movies:      {}", stats.movies);
    println!("Embedded:    {}", stats.embedded);
    println!("Model:       {}", stats.model.as_deref().unwrap_or("-"));
    println!(
        "Dimensions:  {}",
        stats.dimensions.map(|d| d.to_string()).unwrap_or_else(|| "-".into())
    );
    println!("Size:        {:.1} MB", stats.db_size_bytes as f64 / 1_048_576.0);
    println!("Fingerprint: {}", stats.catalog_fingerprint.as_deref().unwrap_or("-"));
    println!("Last ingest: {}", stats.last_ingest_at.as_deref().unwrap_or("-"));
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
