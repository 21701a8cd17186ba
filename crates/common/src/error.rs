//! Error types for Steadfast

use thiserror::Error;

/// Result type alias using Steadfast Error
pub type Result<T> = std::result::Result<T, Error>;

/// Steadfast error types
///
/// Only contract violations and I/O live here. Expected absence, timeouts
/// and environment hiccups are reported as [`crate::Outcome`] values.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Config write error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
