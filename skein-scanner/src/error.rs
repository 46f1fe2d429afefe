use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Seed URL {url} denied by domain policy: {reason}")]
    PolicyDenied { url: String, reason: String },

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Task join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    #[error("Other error: {0}")]
    Other(String),
}

/// Configuration-time errors raised by the domain policy engine.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("Invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid rule for {domain}: {reason}")]
    InvalidRule { domain: String, reason: String },

    #[error("Invalid domain: '{0}'")]
    InvalidDomain(String),

    #[error("Policy serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Corrupt cache entry {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Cache IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ScanError>;
