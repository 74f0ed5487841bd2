//! Error types for Wellbeing Flux
//!
//! The real-time path never fails: missing fields and degenerate inputs fall back
//! to safe defaults. These errors surface only where data crosses a boundary
//! (config files, JSON input, history timestamps, the session worker).

use thiserror::Error;

/// Errors that can occur at the pipeline boundaries
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Degenerate input: {0}")]
    DegenerateInput(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Date parse error: {0}")]
    DateParseError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Session worker is no longer running")]
    SessionClosed,
}
