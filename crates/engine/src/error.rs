//! Error types for the engine
//!
//! These are contract violations and loading failures. Anything the engine
//! can recover from or report is an [`steadfast_common::Outcome`] instead.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] steadfast_common::Error),

    #[error("Scenario spec parse error: {0}")]
    SpecParse(String),

    #[error("Unresolved placeholder in '{template}': {name}")]
    Placeholder { template: String, name: String },

    #[error("Site model error: {0}")]
    SiteModel(String),

    #[error("Environment error: {0}")]
    Environment(#[from] EnvironmentError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Errors an [`crate::Environment`] implementation may report
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentError {
    #[error("target vanished before the mutation landed: {0}")]
    TargetVanished(String),

    #[error("environment unavailable: {0}")]
    Unavailable(String),

    #[error("no known location for: {0}")]
    UnknownLocation(String),

    #[error("environment already released")]
    Closed,
}
