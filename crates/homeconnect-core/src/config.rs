// ── Runtime client configuration ──
//
// Describes *how* to talk to Home Connect: which server, which OAuth
// client, and the timing knobs for refresh, resync and caching. Never
// touches disk; the CLI builds a `ClientConfig` and hands it in.

use std::collections::HashMap;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use homeconnect_api::auth::default_scopes;
use homeconnect_api::{AuthConfig, EventStreamConfig, Server, TransportConfig};

/// Which event streams to keep open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StreamMode {
    /// One multiplexed stream for every appliance.
    #[default]
    All,
    /// One stream per appliance.
    PerAppliance,
    /// No streams; state only changes on explicit reads.
    Off,
}

/// Doubling retry delay for the post-reconnect resync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Backoff {
    /// Delay for the given zero-based attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(5),
            max: Duration::from_secs(10 * 60),
        }
    }
}

/// Scope adjustments for one appliance type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeOverride {
    /// Treated as granted even if the token lacks them.
    pub allow: Vec<String>,
    /// Treated as missing even if the token has them.
    pub deny: Vec<String>,
}

/// Configuration for one Home Connect OAuth client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server: Server,
    /// Replaces the server's base URL.
    pub base_url: Option<Url>,
    pub client_id: String,
    pub client_secret: Option<SecretString>,
    pub scopes: Vec<String>,
    /// `Accept-Language` for localised names.
    pub language: String,
    /// Per-request timeout.
    pub timeout: Duration,
    pub stream_mode: StreamMode,
    pub stream: EventStreamConfig,
    /// Refresh the access token this long before it expires.
    pub refresh_window: Duration,
    pub resync: Backoff,
    /// Lifetime of cached program definitions.
    pub cache_ttl: Duration,
    /// Consecutive rate-limited attempts before an `error!` log.
    pub rate_limit_escalation: u32,
    /// Resync on every reconnect. One-shot CLI commands turn this off.
    pub resync_on_connect: bool,
    /// Track selected/active programs during resync.
    pub poll_programs: bool,
    /// Keyed by appliance type, e.g. `Oven`.
    pub scope_overrides: HashMap<String, ScopeOverride>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: Server::Production,
            base_url: None,
            client_id: String::new(),
            client_secret: None,
            scopes: default_scopes(),
            language: "en-GB".into(),
            timeout: Duration::from_secs(30),
            stream_mode: StreamMode::default(),
            stream: EventStreamConfig::default(),
            refresh_window: Duration::from_secs(60 * 60),
            resync: Backoff::default(),
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            rate_limit_escalation: homeconnect_api::client::DEFAULT_ESCALATE_AFTER,
            resync_on_connect: true,
            poll_programs: true,
            scope_overrides: HashMap::new(),
        }
    }
}

impl ClientConfig {
    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig {
            server: self.server,
            base_url: self.base_url.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            scopes: self.scopes.clone(),
            refresh_window: self.refresh_window,
            ..AuthConfig::default()
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            timeout: self.timeout,
            language: self.language.clone(),
            ..TransportConfig::default()
        }
    }
}
