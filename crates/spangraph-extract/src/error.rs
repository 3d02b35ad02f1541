//! Error types for edge extraction

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ExtractError>;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("{operation} timed out after {}ms", .timeout.as_millis())]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    #[error("Extractor not supported: {0}")]
    Unsupported(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    ProcessFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Language server error {code}: {message}")]
    Server { code: i64, message: String },

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl ExtractError {
    /// JSON-RPC "method not found"; optional requests treat it as absence.
    pub fn is_method_not_found(&self) -> bool {
        matches!(self, ExtractError::Server { code: -32601, .. })
    }
}
