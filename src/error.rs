use thiserror::Error;

/// Failure talking to a remote provider (embeddings or TMDB).
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request timed out")]
    Timeout,
    #[error("provider returned HTTP {0}")]
    Status(u16),
    #[error("provider request failed: {0}")]
    Transport(String),
    #[error("malformed provider response: {0}")]
    Response(String),
    #[error("provider is not configured: {0}")]
    Config(String),
}

impl ProviderError {
    /// Whether retrying the same request later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Transport(_) => true,
            Self::Status(code) => *code == 429 || *code >= 500,
            Self::Response(_) | Self::Config(_) => false,
        }
    }
}

impl From<ureq::Error> for ProviderError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::StatusCode(code) => Self::Status(code),
            ureq::Error::Timeout(_) => Self::Timeout,
            other => Self::Transport(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("store holds {stored} embeddings; refusing {given}")]
    ModelMismatch { stored: String, given: String },
    #[error("store vectors have {stored} dimensions, got {given}")]
    DimensionMismatch { stored: usize, given: usize },
    #[error("corrupt row {id}: {reason}")]
    Corrupt { id: i64, reason: String },
}

/// Errors surfaced by the query path.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("search timed out after {0}s")]
    Timeout(u64),
}

/// Why a source row was not ingested (or was altered on the way in).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataQuality {
    #[error("unparseable id {0:?}")]
    InvalidId(String),
    #[error("movie {0} has no title")]
    MissingTitle(i64),
    #[error("movie {0} has no usable overview")]
    ShortOverview(i64),
    #[error("movie {0} appears more than once; keeping the first row")]
    DuplicateId(i64),
    #[error("malformed row at line {line}: {reason}")]
    MalformedRow { line: u64, reason: String },
    #[error("movie {id} has unparseable release date {raw:?}")]
    InvalidDate { id: i64, raw: String },
    #[error("movie {id} has {count} keywords; truncated")]
    KeywordsTruncated { id: i64, count: usize },
}

impl DataQuality {
    /// Stable label used to group issues in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidId(_) => "invalid_id",
            Self::MissingTitle(_) => "missing_title",
            Self::ShortOverview(_) => "short_overview",
            Self::DuplicateId(_) => "duplicate_id",
            Self::MalformedRow { .. } => "malformed_row",
            Self::InvalidDate { .. } => "invalid_date",
            Self::KeywordsTruncated { .. } => "keywords_truncated",
        }
    }

    /// Skips drop the row; the rest only normalize a field.
    pub fn is_skip(&self) -> bool {
        !matches!(self, Self::InvalidDate { .. } | Self::KeywordsTruncated { .. })
    }
}
