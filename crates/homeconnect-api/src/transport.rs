// Shared transport configuration for building reqwest::Client instances.
//
// REST calls, the event stream and the OAuth endpoints each need a slightly
// different client (total timeout, read timeout, redirect policy). The
// builder logic lives here so they stay consistent.

use std::time::Duration;

use reqwest::header::{ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use reqwest::redirect::Policy;

use crate::error::Error;

/// Media type the Home Connect REST API speaks.
pub const VENDOR_JSON: &str = "application/vnd.bsh.sdk.v1+json";

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Total timeout for a single REST request.
    pub timeout: Duration,
    /// Connect timeout for every client, including the event stream.
    pub connect_timeout: Duration,
    /// Event stream read timeout. The server sends `KEEP-ALIVE` roughly
    /// once a minute, so this must comfortably exceed that.
    pub stream_read_timeout: Duration,
    /// `Accept-Language` value, drives localised names in responses.
    pub language: String,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(30),
            stream_read_timeout: Duration::from_secs(3 * 60),
            language: "en-GB".into(),
            user_agent: concat!("homeconnect/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

impl TransportConfig {
    /// Client for REST and OAuth requests.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .user_agent(&self.user_agent)
            .default_headers(self.default_headers()?)
            .build()
            .map_err(|e| Error::ClientSetup(format!("failed to build HTTP client: {e}")))
    }

    /// Client for the long-lived event stream: no total timeout, only
    /// connect and per-read timeouts.
    pub fn build_stream_client(&self) -> Result<reqwest::Client, Error> {
        reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .read_timeout(self.stream_read_timeout)
            .user_agent(&self.user_agent)
            .default_headers(self.default_headers()?)
            .build()
            .map_err(|e| Error::ClientSetup(format!("failed to build stream client: {e}")))
    }

    /// Client that does not follow redirects. The simulator's code grant
    /// answers the authorize request with a redirect carrying the code.
    pub fn build_redirectless_client(&self) -> Result<reqwest::Client, Error> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .user_agent(&self.user_agent)
            .redirect(Policy::none())
            .build()
            .map_err(|e| Error::ClientSetup(format!("failed to build OAuth client: {e}")))
    }

    fn default_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        let language = HeaderValue::from_str(&self.language)
            .map_err(|e| Error::ClientSetup(format!("invalid language '{}': {e}", self.language)))?;
        headers.insert(ACCEPT_LANGUAGE, language);
        Ok(headers)
    }
}
