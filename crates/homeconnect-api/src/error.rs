use std::time::Duration;

use thiserror::Error;

/// Which part of the stored credentials the server rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invalidation {
    /// Only the access token. The refresh token can mint a new one.
    AccessToken,
    /// The refresh token as well. The authorisation flow starts over.
    Credentials,
}

/// Top-level error type for the `homeconnect-api` crate.
///
/// A closed taxonomy: every failure the vendor API, the OAuth endpoints
/// or the transport can produce maps onto exactly one variant.
/// `homeconnect-core` translates these into user-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// Timeout, connection reset, DNS failure, aborted body, etc.
    #[error("{method} {url} failed: {source}")]
    Transport {
        method: String,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// URL construction failed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The HTTP client could not be built.
    #[error("HTTP client setup failed: {0}")]
    ClientSetup(String),

    /// A response body was expected but none arrived.
    #[error("{method} {url} returned an empty response")]
    EmptyResponse { method: String, url: String },

    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    // ── Authorisation ───────────────────────────────────────────────
    /// No valid access token is cached.
    #[error("Not authorised -- no valid access token")]
    NotAuthorised,

    /// Device flow: the user has not approved the request yet.
    #[error("Authorisation pending -- waiting for the user to approve access")]
    AuthorisationPending,

    /// Device flow: the server asked us to poll less frequently.
    #[error("Authorisation polled too quickly -- slowing down")]
    SlowDown,

    /// The server rejected the access token or the refresh token.
    #[error("Authorisation rejected ({invalidation:?}): {message}")]
    AuthInvalid {
        invalidation: Invalidation,
        message: String,
    },

    /// The OAuth client registration does not match how it is being used.
    /// Only a human can fix this, so the error carries remediation text.
    #[error("Client misconfigured ({error}): {description}\n{help}\n(request: {method} {url})")]
    ClientMisconfigured {
        error: String,
        description: String,
        help: &'static str,
        method: String,
        url: String,
    },

    /// Any other OAuth error (`access_denied`, `expired_token`, ...).
    #[error("OAuth error ({error}): {description}")]
    OAuth { error: String, description: String },

    // ── Rate limiting ───────────────────────────────────────────────
    /// HTTP 429. The shared gate has already been advanced.
    #[error("Rate limited -- retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    // ── Vendor ──────────────────────────────────────────────────────
    /// Structured `{"error": {"key", "description"}}` rejection.
    #[error("Home Connect error (HTTP {status}) {key}: {description} (request: {method} {url})")]
    Vendor {
        status: u16,
        key: String,
        description: String,
        method: String,
        url: String,
    },

    // ── Event stream ────────────────────────────────────────────────
    /// Malformed server-sent event framing.
    #[error("Event stream protocol error: {0}")]
    StreamProtocol(String),

    // ── Storage ─────────────────────────────────────────────────────
    /// Persisting or loading the key/value store failed.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Returns `true` for the errors the request loop retries by itself:
    /// rate limiting and a rejected (but refreshable) access token.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::AuthInvalid {
                    invalidation: Invalidation::AccessToken,
                    ..
                }
        )
    }

    /// The credential invalidation this error demands, if any.
    pub fn invalidation(&self) -> Option<Invalidation> {
        match self {
            Self::AuthInvalid { invalidation, .. } => Some(*invalidation),
            _ => None,
        }
    }

    /// The vendor error key (e.g. `SDK.Error.NoProgramActive`), if available.
    pub fn vendor_key(&self) -> Option<&str> {
        match self {
            Self::Vendor { key, .. } => Some(key),
            _ => None,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport { source, .. } => source.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::Vendor { status: 404, .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(
            Error::RateLimited {
                retry_after: Duration::from_secs(5)
            }
            .is_retryable()
        );
        assert!(
            Error::AuthInvalid {
                invalidation: Invalidation::AccessToken,
                message: "expired".into(),
            }
            .is_retryable()
        );
    }

    #[test]
    fn fatal_errors() {
        assert!(
            !Error::AuthInvalid {
                invalidation: Invalidation::Credentials,
                message: "refresh token revoked".into(),
            }
            .is_retryable()
        );
        assert!(
            !Error::Vendor {
                status: 409,
                key: "SDK.Error.WrongOperationState".into(),
                description: "busy".into(),
                method: "PUT".into(),
                url: "https://example.invalid".into(),
            }
            .is_retryable()
        );
        assert!(!Error::NotAuthorised.is_retryable());
    }

    #[test]
    fn misconfiguration_message_carries_request() {
        let err = Error::ClientMisconfigured {
            error: "unauthorized_client".into(),
            description: "client not allowed".into(),
            help: "check the registration",
            method: "POST".into(),
            url: "https://api.home-connect.com/security/oauth/token".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("check the registration"));
        assert!(msg.contains("POST https://api.home-connect.com/security/oauth/token"));
    }
}
