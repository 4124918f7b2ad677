use std::time::Duration;

use secrecy::SecretString;
use url::Url;

/// Which Home Connect deployment to talk to.
///
/// Determines the base URL and which OAuth grant obtains the first token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Server {
    /// Real appliances. Device Authorization Grant (user approves on another device).
    #[default]
    Production,
    /// Developer simulator. Authorization Code Grant, auto-approved.
    Simulator,
}

impl Server {
    /// The API root, shared by REST, event stream and OAuth endpoints.
    pub fn base_url(self) -> Url {
        let raw = match self {
            Self::Production => "https://api.home-connect.com/",
            Self::Simulator => "https://simulator.home-connect.com/",
        };
        // Both literals are valid absolute URLs.
        Url::parse(raw).unwrap_or_else(|_| unreachable!("static base URL"))
    }

    /// Whether the first token is obtained with the device flow.
    pub fn uses_device_flow(self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Everything the token authority needs to know about one OAuth client.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub server: Server,
    /// Replaces the server's base URL (proxies, tests).
    pub base_url: Option<Url>,
    /// Client ID from the Home Connect developer portal.
    pub client_id: String,
    /// Only required by the simulator's code grant.
    pub client_secret: Option<SecretString>,
    /// Requested scopes, e.g. `IdentifyAppliance Monitor Settings Control`.
    pub scopes: Vec<String>,
    /// Redirect URI registered for the code grant.
    pub redirect_uri: String,
    /// Refresh this long before the access token expires.
    pub refresh_window: Duration,
    /// Delay after an unexpected failure when a refresh token is known.
    pub retry_delay_refresh: Duration,
    /// Delay after an unexpected failure when starting from scratch.
    pub retry_delay_fresh: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            server: Server::Production,
            base_url: None,
            client_id: String::new(),
            client_secret: None,
            scopes: default_scopes(),
            redirect_uri: "https://apiclient.home-connect.com/o2c.html".into(),
            refresh_window: Duration::from_secs(60 * 60),
            retry_delay_refresh: Duration::from_secs(60),
            retry_delay_fresh: Duration::from_secs(5 * 60),
        }
    }
}

impl AuthConfig {
    /// Root for REST, event stream and OAuth requests.
    pub fn base_url(&self) -> Url {
        self.base_url
            .clone()
            .unwrap_or_else(|| self.server.base_url())
    }
}

/// Scopes requested when none are configured.
pub fn default_scopes() -> Vec<String> {
    ["IdentifyAppliance", "Monitor", "Settings", "Control"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Test a scope against a granted set.
///
/// Composite `Row-Column` names (e.g. `Oven-Control`) also match if
/// either half was granted on its own.
pub fn scope_granted(granted: &[String], scope: &str) -> bool {
    if granted.iter().any(|s| s == scope) {
        return true;
    }
    match scope.split_once('-') {
        Some((row, column)) => granted.iter().any(|s| s == row || s == column),
        None => false,
    }
}
