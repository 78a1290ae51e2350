//! Error types shared by the library.
//!
//! Node executors, storage, and the model provider all report through
//! [`Error`]; the host binary wraps it in `anyhow` for context.

use std::io;
use thiserror::Error;

/// Errors produced by the orchestration core.
#[derive(Debug, Error)]
pub enum Error {
    /// Plain I/O failure that is not worth retrying.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A transient I/O failure (locked or busy file) that persisted across
    /// every retry attempt.
    #[error("{operation} still failing after {attempts} attempts: {source}")]
    Transient {
        operation: String,
        attempts: usize,
        #[source]
        source: io::Error,
    },

    /// Data a node or branch depends on was never produced upstream.
    #[error("Missing upstream data: {0}")]
    MissingData(String),

    /// The model returned something that does not match the requested shape.
    #[error("Malformed {expected} response from model: {reason}")]
    MalformedResponse { expected: String, reason: String },

    /// The model provider rejected the request or could not be reached.
    #[error("Model provider error: {0}")]
    Provider(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The task graph description is invalid (unknown node, cycle, ...).
    #[error("Invalid task graph: {0}")]
    Graph(String),

    /// A node failed while the graph was running.
    #[error("Node '{node}' failed: {reason}")]
    Node { node: String, reason: String },

    #[error("Photo '{0}' not found")]
    PhotoNotFound(String),

    #[error("Report asset '{0}' not found")]
    AssetNotFound(String),

    /// A job id or asset name that is not a single plain path component.
    #[error("Invalid storage name '{0}'")]
    InvalidName(String),
}

impl Error {
    /// Shorthand for a [`Error::MissingData`] error.
    pub fn missing(what: impl Into<String>) -> Self {
        Error::MissingData(what.into())
    }

    /// Shorthand for a [`Error::MalformedResponse`] error.
    pub fn malformed(expected: impl Into<String>, reason: impl ToString) -> Self {
        Error::MalformedResponse {
            expected: expected.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
