//! Error types for the logging system.

use thiserror::Error;

/// Errors that can occur while configuring or building the logging system.
///
/// The logging path itself never returns these; emit, clear and remove
/// suppress failures on the node worker.
#[derive(Debug, Error)]
pub enum LogError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The same node name was given twice to one chain.
    #[error("duplicate node in chain: {0}")]
    DuplicateNode(String),

    /// No tokio runtime was available to host a background queue.
    #[error("no tokio runtime available")]
    RuntimeUnavailable,

    /// A resource sample could not be taken.
    #[error("sampling error: {0}")]
    Sampling(String),

    /// Parse error for log lines or sampler input.
    #[error("parse error: {0}")]
    ParseError(String),
}

/// Result type alias for log operations.
pub type Result<T> = std::result::Result<T, LogError>;
