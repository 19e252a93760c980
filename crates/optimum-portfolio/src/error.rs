//! Error types for portfolio operations.

use optimum_client::ClientError;
use optimum_model::ModelError;
use thiserror::Error;

/// Result type for portfolio operations.
pub type Result<T> = std::result::Result<T, PortfolioError>;

/// Errors that can occur during portfolio operations.
#[derive(Debug, Error)]
pub enum PortfolioError {
    /// No holdings have been imported
    #[error("Portfolio has not been imported")]
    NoHoldings,

    /// Prices are required but have not been retrieved
    #[error("Prices have not been retrieved")]
    MissingPrices,

    /// Models are required but have not been retrieved
    #[error("Models have not yet been retrieved")]
    MissingModels,

    /// A frontier is required but has not been retrieved
    #[error("Frontier has not been retrieved")]
    MissingFrontier,

    /// Total portfolio value is zero
    #[error("Portfolio value is zero")]
    ZeroValue,

    /// Solver returned no optimal point
    #[error("Could not calculate optimal frontier; constraints likely make the problem infeasible")]
    Infeasible,

    /// Ticker is not part of the portfolio
    #[error("Unknown ticker: {0}")]
    UnknownTicker(String),

    /// Ticker appears more than once
    #[error("Duplicate ticker: {0}")]
    DuplicateTicker(String),

    /// Required column is missing from imported data
    #[error("Portfolio must contain a column named '{0}'")]
    MissingColumn(String),

    /// Per-ticker values do not match the number of tickers
    #[error("Length mismatch: expected {expected} values, got {actual}")]
    LengthMismatch {
        /// Number of tickers
        expected: usize,
        /// Number of values supplied
        actual: usize,
    },

    /// No price was returned for a ticker
    #[error("Missing price for {0}")]
    MissingPrice(String),

    /// Imported field could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Service response did not have the expected shape
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Model error
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// Client error
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Polars error
    #[error("Polars error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),
}

impl PortfolioError {
    /// Is this a violated precondition (missing state or invalid weights)
    ///
    /// Precondition errors are raised before any service call and are not
    /// worth retrying without changing the portfolio state first.
    pub const fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::NoHoldings
                | Self::MissingPrices
                | Self::MissingModels
                | Self::MissingFrontier
                | Self::ZeroValue
                | Self::Model(
                    ModelError::NoModels
                        | ModelError::WeightKeyMismatch { .. }
                        | ModelError::NegativeWeight { .. }
                )
        )
    }
}
