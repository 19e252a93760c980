//! Service client seam and its HTTP implementation.

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;

/// Entry points exposed by the remote services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryPoint {
    /// Latest close per symbol
    Prices,
    /// Factor models per range
    Model,
    /// Efficient frontier for a query
    Frontier,
    /// Single optimal portfolio for a query and target return
    Portfolio,
}

impl EntryPoint {
    /// Path segment of the entry point
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Prices => "prices",
            Self::Model => "model",
            Self::Frontier => "frontier",
            Self::Portfolio => "portfolio",
        }
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request/response access to a remote service
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Call `entry_point` with a JSON payload and return the parsed response
    ///
    /// # Errors
    /// * `ClientError::Api` when the service rejects the request with a
    ///   detail message
    /// * transport and status errors otherwise
    async fn call(&self, entry_point: EntryPoint, payload: Value) -> Result<Value>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    detail: Option<Value>,
}

/// HTTPS client with token authentication
pub struct HttpClient {
    http: reqwest::Client,
    api_url: String,
    username: Option<String>,
    password: Option<String>,
    auto_token_renewal: bool,
    token: Mutex<Option<String>>,
    detail: Mutex<Option<String>>,
}

impl HttpClient {
    /// Create a client from its configuration
    ///
    /// # Errors
    /// * `ClientError::MissingCredentials` if neither a token nor a
    ///   username/password pair is configured
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.token.is_none() && !config.has_credentials() {
            return Err(ClientError::MissingCredentials);
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(ClientError::Network)?;

        Ok(Self {
            http,
            api_url: config.api_url(),
            username: config.username,
            password: config.password,
            auto_token_renewal: config.auto_token_renewal,
            token: Mutex::new(config.token),
            detail: Mutex::new(None),
        })
    }

    /// Root url of the api
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Detail message of the last rejected request
    pub async fn last_detail(&self) -> Option<String> {
        self.detail.lock().await.clone()
    }

    /// Retrieve a fresh authentication token
    pub async fn get_token(&self) -> Result<()> {
        let (Some(username), Some(password)) = (&self.username, &self.password) else {
            return Err(ClientError::MissingCredentials);
        };

        let url = format!("{}/get_token", self.api_url);
        tracing::debug!(%url, "requesting token");

        let response = self
            .http
            .get(&url)
            .basic_auth(username, Some(password))
            .header("Accept", "application/json")
            .send()
            .await?;
        *self.detail.lock().await = None;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let token = response
            .json::<TokenResponse>()
            .await?
            .token
            .ok_or(ClientError::InvalidToken)?;
        *self.token.lock().await = Some(token);
        Ok(())
    }

    async fn current_token(&self) -> Result<String> {
        let renew = self.auto_token_renewal && self.username.is_some() && self.password.is_some();
        if renew {
            self.get_token().await?;
        }
        self.token.lock().await.clone().ok_or(ClientError::MissingToken)
    }
}

#[async_trait]
impl ApiClient for HttpClient {
    async fn call(&self, entry_point: EntryPoint, payload: Value) -> Result<Value> {
        let token = self.current_token().await?;
        let url = format!("{}/{}", self.api_url, entry_point);
        tracing::debug!(%url, "calling entry point");

        let response = self
            .http
            .post(&url)
            .header("Accept", "application/json")
            .header("X-Api-Key", token)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            *self.detail.lock().await = None;
            return Ok(response.json::<Value>().await?);
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::BAD_REQUEST {
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .ok()
                .and_then(|e| e.detail)
                .map(|d| match d {
                    Value::String(s) => s,
                    other => other.to_string(),
                });
            *self.detail.lock().await = detail.clone();
            if let Some(detail) = detail {
                tracing::warn!(%entry_point, %detail, "request rejected");
                return Err(ClientError::Api(detail));
            }
        }

        Err(ClientError::Http {
            status: status.as_u16(),
            body,
        })
    }
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("api_url", &self.api_url)
            .field("username", &self.username)
            .field("auto_token_renewal", &self.auto_token_renewal)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MODELS_API;

    #[test]
    fn test_entry_point_names() {
        assert_eq!(EntryPoint::Prices.to_string(), "prices");
        assert_eq!(EntryPoint::Model.to_string(), "model");
        assert_eq!(EntryPoint::Frontier.to_string(), "frontier");
        assert_eq!(EntryPoint::Portfolio.to_string(), "portfolio");
    }

    #[test]
    fn test_requires_credentials() {
        let result = HttpClient::new(ClientConfig::default());
        assert!(matches!(result, Err(ClientError::MissingCredentials)));

        let only_user = ClientConfig {
            username: Some("user".to_string()),
            ..ClientConfig::default()
        };
        assert!(matches!(
            HttpClient::new(only_user),
            Err(ClientError::MissingCredentials)
        ));
    }

    #[test]
    fn test_token_only_client() {
        let client = HttpClient::new(ClientConfig::for_api(MODELS_API).with_token("abc")).unwrap();
        assert_eq!(client.api_url(), "https://optimize.vicbee.net/models/api");
    }

    #[tokio::test]
    async fn test_token_without_credentials_cannot_renew() {
        let config = ClientConfig::default().with_token("abc");
        let client = HttpClient::new(config).unwrap();
        assert!(matches!(
            client.get_token().await,
            Err(ClientError::MissingCredentials)
        ));
        // Falls back to the configured token
        assert_eq!(client.current_token().await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_missing_token_without_renewal() {
        let config = ClientConfig {
            auto_token_renewal: false,
            ..ClientConfig::default().with_credentials("user", "secret")
        };
        let client = HttpClient::new(config).unwrap();
        assert!(matches!(
            client.current_token().await,
            Err(ClientError::MissingToken)
        ));
        assert!(client.last_detail().await.is_none());
    }
}
