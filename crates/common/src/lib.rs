//! Steadfast Common Library
//!
//! Shared result schema, engine configuration, and error types used by the
//! engine, its reporters, and the CLI.

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{BackoffStrategy, EngineConfig, ProbeConfig, RetryConfig};
pub use error::{Error, Result};
pub use types::*;

/// Steadfast version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration file path, relative to the working directory
pub fn default_config_path() -> std::path::PathBuf {
    std::path::PathBuf::from("steadfast.toml")
}

/// Default output directory for scenario reports
pub fn default_output_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("scenario-results")
}
