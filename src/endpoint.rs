//! Base URL and credential resolution shared by every transport.

use std::time::Duration;

use crate::error::Error;

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "NEUPHONIC_API_KEY";

/// Environment variable overriding the API host.
pub const API_URL_ENV: &str = "NEUPHONIC_API_URL";

const API_KEY_HEADER: &str = "X-API-Key";
const AUTHORIZATION_HEADER: &str = "Authorization";
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Credentials sent with every request.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Raw API key, sent as `X-API-Key`.
    ApiKey(String),
    /// JWT obtained from the SSE auth endpoint, sent as a bearer token.
    Bearer(String),
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::ApiKey(_) => f.write_str("ApiKey(***)"),
            Credentials::Bearer(_) => f.write_str("Bearer(***)"),
        }
    }
}

/// Resolves HTTP and WebSocket base URLs and auth headers for a host.
#[derive(Debug, Clone)]
pub struct Endpoint {
    host: String,
    credentials: Credentials,
    timeout: Duration,
}

impl Endpoint {
    /// Creates an endpoint for `host` (e.g. `eu-west-1.api.neuphonic.com` or
    /// `localhost:8080`) authenticated with an API key.
    pub fn new(api_key: impl Into<String>, host: impl Into<String>) -> Self {
        let host = host.into();
        Self {
            host: host.trim().trim_end_matches('/').to_string(),
            credentials: Credentials::ApiKey(api_key.into()),
            timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }

    /// Builds an endpoint from `NEUPHONIC_API_KEY` and, when set,
    /// `NEUPHONIC_API_URL`.
    pub fn from_env() -> Result<Self, Error> {
        let api_key = std::env::var(API_KEY_ENV)
            .map_err(|_| Error::Config(format!("{API_KEY_ENV} is not set")))?;
        let host = std::env::var(API_URL_ENV).unwrap_or_else(|_| crate::DEFAULT_HOST.to_string());
        Ok(Self::new(api_key, host))
    }

    /// Sets the timeout applied to plain HTTP requests.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replaces the API key with a bearer token.
    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.credentials = Credentials::Bearer(token.into());
        self
    }

    /// The configured host, without scheme.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The credentials sent with each request.
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// HTTP request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Local hosts are reached without TLS.
    pub fn is_local(&self) -> bool {
        if self.host.starts_with("[::1]") {
            return true;
        }
        let name = self.host.split(':').next().unwrap_or_default();
        matches!(name, "localhost" | "127.0.0.1")
    }

    /// `http://` or `https://` base URL.
    pub fn http_url(&self) -> String {
        let scheme = if self.is_local() { "http" } else { "https" };
        format!("{scheme}://{}", self.host)
    }

    /// `ws://` or `wss://` base URL.
    pub fn ws_url(&self) -> String {
        let scheme = if self.is_local() { "ws" } else { "wss" };
        format!("{scheme}://{}", self.host)
    }

    /// Header name and value carrying the credentials.
    pub fn auth_header(&self) -> (&'static str, String) {
        match &self.credentials {
            Credentials::ApiKey(key) => (API_KEY_HEADER, key.clone()),
            Credentials::Bearer(token) => (AUTHORIZATION_HEADER, format!("Bearer {token}")),
        }
    }
}
