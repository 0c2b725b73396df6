//! Error types for bovine-core

use std::path::PathBuf;
use thiserror::Error;

/// Result type for bovine-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for bovine-core
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("Forge API error: {0}")]
    Upstream(String),

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Registration rejected: {0}")]
    RegistrationRejected(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Config not found. Searched: {searched:?}")]
    ConfigNotFound { searched: Vec<PathBuf> },

    #[error("Failed to parse config at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for errors that mean "the thing does not exist", as opposed to
    /// transport or server failures. The serving loop uses this to pick
    /// between the index.html fallback and a hard error page.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
