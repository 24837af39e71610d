//! Error types for the phishing detection pipeline.

use thiserror::Error;

/// Errors produced anywhere in the scan pipeline or persistence layer.
#[derive(Error, Debug)]
pub enum ScreenError {
    /// The inbound email payload was missing a required field or failed validation.
    #[error("invalid input: {0}")]
    InputError(String),

    /// A persistence operation failed or referenced a record that doesn't exist.
    #[error("store error: {0}")]
    StoreError(String),

    /// A pipeline stage raised an unexpected error while classifying.
    #[error("stage {stage} failed: {reason}")]
    StageError { stage: u8, reason: String },

    /// The external LLM client could not be reached or exhausted its retry budget.
    #[error("llm unavailable: {0}")]
    LlmUnavailable(String),

    /// A stage or the whole scan exceeded its deadline.
    #[error("timeout after {0}ms")]
    Timeout(u64),

    /// A training precondition was not satisfied.
    #[error("precondition not met: {0}")]
    PreconditionNotMet(String),

    /// Training was requested while a training run was already in progress.
    #[error("training already in progress")]
    TrainingInProgress,

    /// A referenced scan, user, or sample could not be found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Serialization/deserialization failure at a store or wire boundary.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Underlying HTTP client failure, not yet classified as LlmUnavailable.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type used throughout the pipeline.
pub type ScreenResult<T> = Result<T, ScreenError>;
