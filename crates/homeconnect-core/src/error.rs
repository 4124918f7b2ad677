// ── Core error types ──
//
// User-facing errors from homeconnect-core. Callers never see raw HTTP
// payloads; the `From<homeconnect_api::Error>` impl translates transport
// and vendor failures into domain variants. Precondition variants are
// raised before any request is sent.

use thiserror::Error;

/// Unified error type for the core crate.
///
/// `Clone` so one outcome can be fanned out to every caller of a
/// coalesced operation.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach Home Connect at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Not authorised -- run `homeconnect auth login` first")]
    NotAuthorised,

    #[error("Rate limited -- retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("OAuth client misconfigured: {message}\n{help}")]
    ClientMisconfigured { message: String, help: String },

    #[error("Timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── Preconditions ────────────────────────────────────────────────
    #[error("{ha_id}: scope '{scope}' has not been authorised")]
    ScopeNotAuthorised { ha_id: String, scope: String },

    #[error("{ha_id}: appliance is disconnected")]
    Disconnected { ha_id: String },

    #[error("{ha_id}: appliance is under local control")]
    LocalControlActive { ha_id: String },

    #[error("{ha_id}: remote control is disabled on the appliance")]
    RemoteControlDisabled { ha_id: String },

    #[error("{ha_id}: remote start is disabled on the appliance")]
    RemoteStartDisabled { ha_id: String },

    #[error("{ha_id}: no program selected")]
    NoProgramSelected { ha_id: String },

    #[error("{ha_id}: no program active")]
    NoProgramActive { ha_id: String },

    #[error("Appliance not found: {ha_id}")]
    ApplianceNotFound { ha_id: String },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// Vendor error key, e.g. `SDK.Error.WrongOperationState`.
        code: Option<String>,
        status: Option<u16>,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// "Can't do this right now" rather than "the API is broken".
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::ScopeNotAuthorised { .. }
                | Self::Disconnected { .. }
                | Self::LocalControlActive { .. }
                | Self::RemoteControlDisabled { .. }
                | Self::RemoteStartDisabled { .. }
                | Self::NoProgramSelected { .. }
                | Self::NoProgramActive { .. }
        )
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<homeconnect_api::Error> for CoreError {
    fn from(err: homeconnect_api::Error) -> Self {
        use homeconnect_api::Error as Api;

        match err {
            Api::Transport {
                ref url,
                ref source,
                ..
            } => {
                if source.is_timeout() {
                    CoreError::Timeout { timeout_secs: 0 }
                } else {
                    CoreError::ConnectionFailed {
                        url: url.clone(),
                        reason: err.to_string(),
                    }
                }
            }
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            Api::ClientSetup(message) => CoreError::Config { message },
            Api::EmptyResponse { .. } | Api::Deserialization { .. } | Api::StreamProtocol(_) => {
                CoreError::Api {
                    message: err.to_string(),
                    code: None,
                    status: None,
                }
            }
            Api::NotAuthorised | Api::AuthorisationPending | Api::SlowDown => {
                CoreError::NotAuthorised
            }
            Api::AuthInvalid { message, .. } => CoreError::AuthenticationFailed { message },
            Api::ClientMisconfigured {
                error,
                description,
                help,
                method,
                url,
            } => CoreError::ClientMisconfigured {
                message: format!("{error}: {description} ({method} {url})"),
                help: help.to_owned(),
            },
            Api::OAuth { error, description } => CoreError::AuthenticationFailed {
                message: format!("{error}: {description}"),
            },
            Api::RateLimited { retry_after } => CoreError::RateLimited {
                retry_after_secs: retry_after.as_secs(),
            },
            Api::Vendor {
                status,
                key,
                description,
                ..
            } => CoreError::Api {
                message: description,
                code: (!key.is_empty()).then_some(key),
                status: Some(status),
            },
            Api::Storage(message) => CoreError::Storage { message },
        }
    }
}
