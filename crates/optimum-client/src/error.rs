//! Error types for client operations.

use thiserror::Error;

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur while calling the remote services.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Request rejected by the service with a detail message
    #[error("{0}")]
    Api(String),

    /// Non-success HTTP status without a usable detail message
    #[error("HTTP error {status}: {body}")]
    Http {
        /// Status code
        status: u16,
        /// Response body
        body: String,
    },

    /// Network error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Neither a token nor a username/password pair was configured
    #[error("Token or username/password have not been provided")]
    MissingCredentials,

    /// No token is available and automatic renewal is disabled
    #[error("No token available, call get_token first")]
    MissingToken,

    /// Token endpoint answered without a token
    #[error("Token response did not contain a token")]
    InvalidToken,

    /// No canned response left for an entry point
    #[cfg(any(test, feature = "test-utils"))]
    #[error("No scripted response for entry point {0}")]
    NoScriptedResponse(String),
}

impl ClientError {
    /// Detail message supplied by the service, if any
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Api(detail) => Some(detail),
            _ => None,
        }
    }
}
