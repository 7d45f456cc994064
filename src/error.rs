//! Error types for the load-test runner.

use thiserror::Error;

/// Result type alias using the crate error.
pub type Result<T> = std::result::Result<T, Error>;

/// Primary error type for scenario loading and execution.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid duration '{0}': expected a span like \"10s\", \"500ms\" or \"1m30s\"")]
    InvalidDuration(String),

    #[error("invalid threshold expression '{expr}': {reason}")]
    InvalidThreshold { expr: String, reason: String },

    #[error("invalid metric selector '{0}'")]
    InvalidSelector(String),

    #[error("unknown metric '{0}' in threshold selector")]
    UnknownMetric(String),

    #[error("invalid scenario: {0}")]
    InvalidScenario(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
