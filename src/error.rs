//! Error types for the benchmark harness

use std::time::Duration;

use thiserror::Error;

use crate::dialect::{Dialect, SqlFeature};

/// Error type for benchmark operations
#[derive(Error, Debug)]
pub enum BenchError {
    /// Engine unreachable, handshake rejected or connect timed out
    #[error("Connection error ({engine}): {message}")]
    Connection { engine: String, message: String },

    /// Engine rejected or faulted on the SQL
    #[error("Query error: {0}")]
    Query(String),

    /// Operation exceeded its configured bound
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// No SQL registered for the requested dialect
    #[error("Missing variant: query '{query}' has no SQL for dialect '{dialect}'")]
    MissingVariant { query: String, dialect: Dialect },

    /// A SQL variant uses a construct its target does not support
    #[error("Unsupported construct: query '{query}' uses {feature} which {target} does not support")]
    UnsupportedConstruct {
        query: String,
        feature: SqlFeature,
        target: String,
    },

    /// Invalid benchmark configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV serialization error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl BenchError {
    pub fn connection(engine: &str, err: impl std::fmt::Display) -> Self {
        BenchError::Connection {
            engine: engine.to_string(),
            message: err.to_string(),
        }
    }

    /// True for errors raised while validating configuration, before any engine is touched.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            BenchError::MissingVariant { .. }
                | BenchError::UnsupportedConstruct { .. }
                | BenchError::InvalidConfig(_)
        )
    }
}

impl From<sqlx::Error> for BenchError {
    fn from(err: sqlx::Error) -> Self {
        // Connection-level faults after a successful connect still belong to the run
        BenchError::Query(err.to_string())
    }
}

impl From<config::ConfigError> for BenchError {
    fn from(err: config::ConfigError) -> Self {
        BenchError::InvalidConfig(err.to_string())
    }
}

impl From<reqwest::Error> for BenchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BenchError::Query(format!("request timed out: {}", err))
        } else {
            BenchError::Query(format!("request failed: {}", err))
        }
    }
}
