//! Error types for model operations.

use thiserror::Error;

/// Result type for model operations.
pub type Result<T> = std::result::Result<T, ModelError>;

/// Errors that can occur while building or evaluating a model.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Array shapes are inconsistent
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Both `D` and `Di` were supplied
    #[error("Model data cannot contain both D and Di")]
    ConflictingCovariance,

    /// Neither `D` nor `Di` was supplied
    #[error("Model data must contain either D or Di")]
    MissingCovariance,

    /// Matrix could not be inverted
    #[error("Matrix is singular or numerically ill-conditioned")]
    Singular,

    /// Two models share a range label
    #[error("Duplicate range label: {0}")]
    DuplicateLabel(String),

    /// No sub-models are available for combination
    #[error("Models have not yet been retrieved")]
    NoModels,

    /// Weight labels differ from the stored model labels
    #[error("Weights must have the same keys as models: expected {expected:?}, got {actual:?}")]
    WeightKeyMismatch {
        /// Labels of the stored models
        expected: Vec<String>,
        /// Labels of the supplied weights
        actual: Vec<String>,
    },

    /// A weight is negative or not a number
    #[error("Weights must be non-negative: {label} = {weight}")]
    NegativeWeight {
        /// Range label
        label: String,
        /// Offending weight
        weight: f64,
    },

    /// Allocation sums to zero, so return and risk cannot be normalized
    #[error("Allocation sums to zero")]
    ZeroAllocation,

    /// Model data could not be decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
