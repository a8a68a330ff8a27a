//! Error types for the chat client engine

use thiserror::Error;

/// Main error type for the chat client
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Registration error: {0}")]
    Registration(String),

    #[error("Message parsing error: {0}")]
    MessageParse(String),

    #[error("Rate limit: {0}")]
    RateLimited(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("User error: {0}")]
    User(String),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Generic error: {0}")]
    Generic(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Generic(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Generic(s)
    }
}
