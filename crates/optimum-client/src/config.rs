//! Client configuration.

use serde::{Deserialize, Serialize};

/// Default service host
pub const DEFAULT_BASE_URL: &str = "https://optimize.vicbee.net";

/// Api serving the `frontier` and `portfolio` entry points
pub const OPTIMIZE_API: &str = "optimize";

/// Api serving the `prices` and `model` entry points
pub const MODELS_API: &str = "models";

/// Connection settings for one api of the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Service host, with or without trailing slashes
    pub base_url: String,

    /// Api name (`optimize` or `models`)
    pub api: String,

    /// Account username
    pub username: Option<String>,

    /// Account password
    pub password: Option<String>,

    /// Pre-issued authentication token
    pub token: Option<String>,

    /// Fetch a fresh token before every call
    pub auto_token_renewal: bool,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api: OPTIMIZE_API.to_string(),
            username: None,
            password: None,
            token: None,
            auto_token_renewal: true,
            timeout_secs: 30,
        }
    }
}

impl ClientConfig {
    /// Default settings for the given api
    pub fn for_api(api: &str) -> Self {
        Self {
            api: api.to_string(),
            ..Self::default()
        }
    }

    /// Settings for the given api read from the environment
    ///
    /// Reads `OPTIMUM_BASE_URL`, `OPTIMUM_USERNAME`, `OPTIMUM_PASSWORD` and
    /// `OPTIMUM_TOKEN`; unset variables keep their defaults.
    pub fn from_env(api: &str) -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        let mut config = Self::for_api(api);
        if let Some(base_url) = var("OPTIMUM_BASE_URL") {
            config.base_url = base_url;
        }
        config.username = var("OPTIMUM_USERNAME");
        config.password = var("OPTIMUM_PASSWORD");
        config.token = var("OPTIMUM_TOKEN");
        config
    }

    /// Use a username and password
    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        self
    }

    /// Use a pre-issued token
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    /// Has a username/password pair been configured
    pub const fn has_credentials(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    /// Root url of the api, without trailing slash
    pub fn api_url(&self) -> String {
        format!(
            "{}/{}/api",
            self.base_url.trim_end_matches('/'),
            self.api.trim_matches('/')
        )
    }
}
