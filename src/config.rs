use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const STORAGE_DIR: &str = ".cinesearch";

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub embed: EmbedConfig,
    pub ingest: IngestConfig,
    pub search: SearchConfig,
    pub server: ServerConfig,
    pub tmdb: TmdbConfig,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Where the storage directory lives (default: `.cinesearch` under the project root)
    pub path: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedConfig {
    pub backend: EmbedBackend,
    /// Per-request timeout for the embedding provider
    pub timeout_secs: u64,
    /// Attempts per batch before the batch counts as failed
    pub max_retries: u32,
    /// Linear backoff step between attempts
    pub retry_backoff_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EmbedBackend {
    #[serde(rename = "openai")]
    OpenAi {
        model: String,
        url: String,
        /// Name of the environment variable holding the API key
        api_key_env: String,
    },
    #[serde(rename = "ollama")]
    Ollama { model: String, url: String },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Movies per embedding call and per upsert transaction
    pub batch_size: usize,
    /// Batches embedding concurrently
    pub max_concurrent: usize,
    /// Keywords kept per movie
    pub keyword_limit: usize,
    pub on_batch_failure: FailurePolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop scheduling new batches after the first failure
    Abort,
    /// Record the failed batch and keep going
    Skip,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub default_limit: usize,
    pub max_limit: usize,
    pub timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TmdbConfig {
    pub url: String,
    pub api_key_env: String,
    pub max_workers: usize,
    pub requests_per_second: u32,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            backend: EmbedBackend::OpenAi {
                model: "text-embedding-3-small".into(),
                url: "https://api.openai.com/v1".into(),
                api_key_env: "OPENAI_API_KEY".into(),
            },
            timeout_secs: 60,
            max_retries: 3,
            retry_backoff_secs: 5,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_concurrent: 5,
            keyword_limit: 20,
            on_batch_failure: FailurePolicy::Abort,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            max_limit: 100,
            timeout_secs: 30,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".into(),
            allowed_origins: vec!["http://localhost:3000".into()],
        }
    }
}

impl Default for TmdbConfig {
    fn default() -> Self {
        Self {
            url: "https://api.themoviedb.org/3".into(),
            api_key_env: "TMDB_API_KEY".into(),
            max_workers: 20,
            requests_per_second: 35,
        }
    }
}

impl Config {
    /// Where `init` writes and `load` reads. Always under the project root,
    /// even when `storage.path` moves the database elsewhere.
    pub fn config_path(project_root: &Path) -> PathBuf {
        project_root.join(STORAGE_DIR).join("config.toml")
    }

    /// Load config from `.cinesearch/config.toml`, falling back to defaults.
    pub fn load(project_root: &Path) -> Result<Self> {
        let config_path = Self::config_path(project_root);
        if config_path.exists() {
            Self::load_file(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from an explicit path. Missing keys take their defaults.
    pub fn load_file(config_path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(config_path)
            .with_context(|| format!("reading config from {}", config_path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("parsing config from {}", config_path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config in {}", config_path.display()))?;
        Ok(config)
    }

    /// Reject settings no run could use.
    pub fn validate(&self) -> Result<()> {
        let search = &self.search;
        if search.max_limit == 0 {
            bail!("search.max_limit must be at least 1");
        }
        if search.default_limit == 0 || search.default_limit > search.max_limit {
            bail!(
                "search.default_limit must be between 1 and search.max_limit ({}), got {}",
                search.max_limit,
                search.default_limit
            );
        }
        if self.ingest.batch_size == 0 {
            bail!("ingest.batch_size must be at least 1");
        }
        Ok(())
    }

    /// Resolve the actual storage directory path.
    pub fn storage_dir(&self, project_root: &Path) -> PathBuf {
        self.storage
            .path
            .clone()
            .unwrap_or_else(|| project_root.join(STORAGE_DIR))
    }

    /// Write current config to disk (for `cinesearch init`).
    pub fn save(&self, project_root: &Path) -> Result<PathBuf> {
        let config_path = Self::config_path(project_root);
        if let Some(dir) = config_path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating config dir {}", dir.display()))?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, contents)
            .with_context(|| format!("writing config to {}", config_path.display()))?;
        Ok(config_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_catalog_pipeline() {
        let config = Config::default();
        assert_eq!(config.ingest.batch_size, 100);
        assert_eq!(config.ingest.keyword_limit, 20);
        assert_eq!(config.search.default_limit, 10);
        assert_eq!(config.ingest.on_batch_failure, FailurePolicy::Abort);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [ingest]
            batch_size = 25
            on_batch_failure = "skip"

            [embed.backend]
            type = "ollama"
            model = "nomic-embed-text"
            url = "http://localhost:11434"
            "#,
        )
        .unwrap();
        assert_eq!(config.ingest.batch_size, 25);
        assert_eq!(config.ingest.max_concurrent, 5);
        assert_eq!(config.ingest.on_batch_failure, FailurePolicy::Skip);
        assert_eq!(config.embed.max_retries, 3);
        assert!(matches!(config.embed.backend, EmbedBackend::Ollama { .. }));
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.search.max_limit = 42;
        let path = config.save(dir.path()).unwrap();
        assert!(path.ends_with("config.toml"));

        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded.search.max_limit, 42);
    }

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:8000");
    }

    #[test]
    fn custom_storage_path_round_trips() {
        let root = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.path = Some(elsewhere.path().to_path_buf());
        config.save(root.path()).unwrap();

        let loaded = Config::load(root.path()).unwrap();
        assert_eq!(loaded.storage_dir(root.path()), elsewhere.path());
    }

    #[test]
    fn unusable_default_limit_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        std::fs::write(&path, "[search]\ndefault_limit = 0\n").unwrap();
        assert!(Config::load_file(&path).is_err());

        std::fs::write(&path, "[search]\ndefault_limit = 200\nmax_limit = 100\n").unwrap();
        assert!(Config::load_file(&path).is_err());

        std::fs::write(&path, "[search]\ndefault_limit = 20\nmax_limit = 50\n").unwrap();
        assert_eq!(Config::load_file(&path).unwrap().search.default_limit, 20);
    }

    #[test]
    fn defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }
}
