//! Error types for catalog-scribe.
//!
//! Taxonomy:
//! - Fatal before processing: the source table cannot be read
//! - Degraded: checkpoint load failures fall back to empty state
//! - Non-fatal: checkpoint persist failures and per-product generation failures
//!
//! Interruption is not an error: the run reports it through
//! `RunStats::interrupted` after the graceful shutdown.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level error type for catalog-scribe.
#[derive(Debug, Error)]
pub enum ScribeError {
    // ═══════════════════════════════════════════════════════════════════
    // FATAL: abort before any product is processed
    // ═══════════════════════════════════════════════════════════════════

    #[error("Failed to read source table {path}: {source}")]
    SourceRead {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Source table {path} has no '{column}' column")]
    MissingColumn { path: PathBuf, column: String },

    // ═══════════════════════════════════════════════════════════════════
    // CHECKPOINT: degraded or non-fatal
    // ═══════════════════════════════════════════════════════════════════

    #[error("Failed to load checkpoint {path}: {reason}")]
    CheckpointLoad { path: PathBuf, reason: String },

    #[error("Failed to persist checkpoint {path}: {source}")]
    CheckpointPersist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ═══════════════════════════════════════════════════════════════════
    // PER PRODUCT: logged, product skipped
    // ═══════════════════════════════════════════════════════════════════

    #[error("Generation failed for '{key}': {source}")]
    Generation {
        key: String,
        #[source]
        source: GenerationError,
    },

    // ═══════════════════════════════════════════════════════════════════
    // OTHER
    // ═══════════════════════════════════════════════════════════════════

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Faults raised by the generation collaborator for a single product.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("LLM API error: {0}")]
    Api(#[from] LlmApiError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: f64 },

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Generated content was empty")]
    EmptyContent,
}

/// Chat-completions API specific errors.
#[derive(Debug, Error)]
pub enum LlmApiError {
    #[error("Authentication failed: invalid API key")]
    AuthenticationFailed,

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Request failed after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },
}

impl ScribeError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a source read error for `path`.
    pub fn source_read(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        Self::SourceRead {
            path: path.into(),
            source,
        }
    }
}

impl GenerationError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_)
                | Self::RateLimited { .. }
                | Self::Network(_)
                | Self::Api(LlmApiError::ApiError {
                    status: 500..=599,
                    ..
                })
        )
    }

    /// Get retry delay hint in seconds, if applicable.
    pub fn retry_after(&self) -> Option<f64> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

/// Result type alias for catalog-scribe.
pub type Result<T> = std::result::Result<T, ScribeError>;
