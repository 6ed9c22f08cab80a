//! Error types for pomocache

use thiserror::Error;

/// Result type alias for pomocache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for the application
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Operation failed: {0}")]
    Other(String),
}

/// Durable store errors
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Could not determine cache directory")]
    NoHome,

    #[error("Cache I/O error: {0}")]
    Io(String),

    #[error("Cache database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to encode cache entry: {0}")]
    Serialization(String),
}

/// Network errors raised while fetching a request.
///
/// Cloneable so a single failure can be handed to every waiter of a
/// deduplicated load.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Request timed out")]
    Timeout,
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if err.is_connect() {
            FetchError::Network("Failed to connect".to_string())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

/// Per-image failures of the in-memory decode cache
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    #[error("Failed to load image: {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("Failed to load image: {url}: HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Failed to decode image: {url}: {reason}")]
    Decode { url: String, reason: String },
}

impl LoadError {
    /// URL of the image that failed
    pub fn url(&self) -> &str {
        match self {
            LoadError::Fetch { url, .. }
            | LoadError::Status { url, .. }
            | LoadError::Decode { url, .. } => url,
        }
    }
}

/// Cache controller registration errors
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("Cache controllers are not supported in this environment")]
    Unsupported,

    #[error("Failed to start cache controller: {0}")]
    Spawn(String),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to save configuration: {0}")]
    SaveError(String),
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
