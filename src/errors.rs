use std::path::PathBuf;
use thiserror::Error;

/// Top-level error for the pipeline.
///
/// Only configuration and setup failures surface as `AppError` to the
/// binary. Per-URL and per-archive failures are counted in the stage
/// reports instead.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration or template file is missing or malformed
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// HTTP client could not be set up
    #[error("Network error: {0}")]
    NetworkError(String),
    /// Invalid input format
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// IO operation failed
    #[error("IO error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::IoError(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::NetworkError(err.to_string())
    }
}

/// Custom type alias for Results in this application
pub type AppResult<T> = Result<T, AppError>;

/// Setting or template file missing or malformed. Fatal before any network activity.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Template file {} has no category '{category}'", .path.display())]
    UnknownCategory { path: PathBuf, category: String },
    #[error("Unknown source '{name}'. Configured sources: {available}")]
    UnknownSource { name: String, available: String },
}

/// Failure to fetch a single URL. Recovered at the item boundary.
#[derive(Debug, Error)]
#[error("Failed to fetch {url}: {kind}")]
pub struct FetchError {
    pub url: String,
    pub kind: FetchErrorKind,
}

impl FetchError {
    pub fn new(url: impl Into<String>, kind: FetchErrorKind) -> Self {
        Self {
            url: url.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchErrorKind {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request timed out")]
    Timeout,
    #[error("TLS negotiation failed: {0}")]
    Tls(String),
    #[error("HTTP {0}")]
    Status(u16),
    #[error("failed to read response body: {0}")]
    Body(String),
    #[error("failed to store response: {0}")]
    Io(String),
    #[error("cancelled")]
    Cancelled,
}

impl FetchErrorKind {
    /// Connection problems, timeouts and 5xx responses are worth another attempt.
    /// Client errors, TLS failures and local errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchErrorKind::Connect(_) | FetchErrorKind::Timeout | FetchErrorKind::Body(_) => true,
            FetchErrorKind::Status(code) => *code >= 500,
            FetchErrorKind::InvalidUrl(_)
            | FetchErrorKind::Tls(_)
            | FetchErrorKind::Io(_)
            | FetchErrorKind::Cancelled => false,
        }
    }
}

/// Archive stage errors.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Directory does not exist: {}", .0.display())]
    MissingDirectory(PathBuf),
    #[error("Failed to read directory {}: {source}", .path.display())]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to open archive {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to read archive {}: {message}", .path.display())]
    Archive { path: PathBuf, message: String },
    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Extraction task failed: {0}")]
    Task(String),
}

/// Merge and move errors.
#[derive(Debug, Error)]
pub enum ConsolidationError {
    #[error("Source directory {} does not exist", .0.display())]
    MissingSource(PathBuf),
    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConsolidationError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConsolidationError::Io {
            path: path.into(),
            source,
        }
    }
}
