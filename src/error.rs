//! Error types for the retrieval engine and agent loop

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("{provider} completion error: {message}")]
    Completion { provider: String, message: String },

    #[error("{0} rejected the credentials")]
    Unauthorized(String),

    #[error("{0} is unreachable")]
    Unavailable(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Entity extraction error: {0}")]
    Extraction(String),

    #[error("{0} timed out")]
    Timeout(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Sync error: {0}")]
    Sync(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for provider-tagged completion failures.
    pub fn completion(provider: &str, message: impl Into<String>) -> Self {
        Error::Completion {
            provider: provider.to_string(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Http(err.to_string())
    }
}
