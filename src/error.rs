//! Error types for the microbatch engine.

use thiserror::Error;

use crate::processor::BatchError;

/// The main error type for the microbatch library.
///
/// Cloneable so the dispatcher's terminal outcome can be handed to every
/// caller of `shutdown`.
#[derive(Error, Debug, Clone)]
pub enum MicroBatchError {
    /// A construction parameter is missing or out of range.
    #[error("Invalid configuration for '{parameter}': {message}")]
    InvalidConfiguration {
        /// Name of the offending parameter.
        parameter: &'static str,
        /// What the valid range or requirement is.
        message: String,
    },

    /// A job was built with a blank id or without a payload.
    #[error("Invalid job '{field}': {message}")]
    InvalidJob {
        /// Name of the offending job field.
        field: &'static str,
        /// Why the value was rejected.
        message: String,
    },

    /// The injected batch processor failed; the dispatcher has stopped.
    #[error("ProcessBatch() on BatchProcessor failed: {0}")]
    ExternalProcessing(BatchError),

    /// The dispatcher task panicked or was aborted.
    #[error("Dispatcher error: {0}")]
    Dispatcher(String),
}

impl MicroBatchError {
    pub(crate) fn invalid_config(parameter: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            parameter,
            message: message.into(),
        }
    }

    pub(crate) fn invalid_job(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidJob {
            field,
            message: message.into(),
        }
    }
}

/// Result type alias using MicroBatchError.
pub type Result<T> = std::result::Result<T, MicroBatchError>;
