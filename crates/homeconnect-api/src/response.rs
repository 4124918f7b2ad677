// Translation of non-success HTTP responses into the error taxonomy.
//
// Two payload shapes exist: the OAuth endpoints answer
// `{"error": "...", "error_description": "..."}` while the REST API answers
// `{"error": {"key": "...", "description": "..."}}`.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde_json::Value;

use crate::error::{Error, Invalidation};

/// Used when a 429 arrives without a parseable `Retry-After`.
pub(crate) const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

const HELP_UNAUTHORIZED_CLIENT: &str = "The client ID is not allowed to use this grant type. \
     In the Home Connect developer portal, set the application's OAuth flow to \
     \"Device Flow\" (or \"Authorization Code Grant Flow\" for the simulator).";
const HELP_INVALID_CLIENT: &str = "The client ID was not recognised. Copy it again from the \
     Home Connect developer portal; simulator and production use different IDs.";
const HELP_INVALID_SCOPE: &str = "One of the requested scopes is not permitted for this \
     application. Remove it from the configured scopes or enable it in the developer portal.";
const HELP_REDIRECT: &str = "The redirect URI does not match the application registration. \
     Set the registered redirect URI in the developer portal to the configured one.";

/// Truncated body for error messages.
pub(crate) fn preview(body: &str) -> &str {
    let mut end = body.len().min(200);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

/// Seconds from a `Retry-After` header. HTTP-date values are not used by
/// the vendor and fall back to the default.
pub(crate) fn retry_after(headers: &HeaderMap) -> Duration {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(DEFAULT_RETRY_AFTER, Duration::from_secs)
}

/// Map an error response onto exactly one [`Error`] variant.
pub(crate) fn interpret_error(
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
    method: &str,
    url: &str,
) -> Error {
    let payload: Option<Value> = serde_json::from_str(body).ok();
    let error = payload.as_ref().and_then(|p| p.get("error"));

    match error {
        Some(Value::String(code)) => {
            let description = payload
                .as_ref()
                .and_then(|p| p.get("error_description"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            map_oauth(code, description, method, url)
        }
        Some(Value::Object(detail)) => {
            let key = detail.get("key").and_then(Value::as_str).unwrap_or_default();
            let description = detail
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default();
            map_vendor(status, headers, key, description, method, url)
        }
        _ => map_status(status, headers, body, method, url),
    }
}

fn map_oauth(code: &str, description: &str, method: &str, url: &str) -> Error {
    let misconfigured = |help: &'static str| Error::ClientMisconfigured {
        error: code.to_owned(),
        description: description.to_owned(),
        help,
        method: method.to_owned(),
        url: url.to_owned(),
    };

    match code {
        "authorization_pending" => Error::AuthorisationPending,
        "slow_down" => Error::SlowDown,
        "invalid_token" => Error::AuthInvalid {
            invalidation: Invalidation::AccessToken,
            message: description.to_owned(),
        },
        "invalid_grant" => Error::AuthInvalid {
            invalidation: Invalidation::Credentials,
            message: description.to_owned(),
        },
        "unauthorized_client" => misconfigured(HELP_UNAUTHORIZED_CLIENT),
        "invalid_client" => misconfigured(HELP_INVALID_CLIENT),
        "invalid_scope" => misconfigured(HELP_INVALID_SCOPE),
        "invalid_request" if description.to_lowercase().contains("redirect") => {
            misconfigured(HELP_REDIRECT)
        }
        _ => Error::OAuth {
            error: code.to_owned(),
            description: description.to_owned(),
        },
    }
}

fn map_vendor(
    status: StatusCode,
    headers: &HeaderMap,
    key: &str,
    description: &str,
    method: &str,
    url: &str,
) -> Error {
    if key == "invalid_token" {
        return Error::AuthInvalid {
            invalidation: Invalidation::AccessToken,
            message: description.to_owned(),
        };
    }
    if key == "429" || status == StatusCode::TOO_MANY_REQUESTS {
        return Error::RateLimited {
            retry_after: retry_after(headers),
        };
    }
    Error::Vendor {
        status: status.as_u16(),
        key: key.to_owned(),
        description: description.to_owned(),
        method: method.to_owned(),
        url: url.to_owned(),
    }
}

fn map_status(status: StatusCode, headers: &HeaderMap, body: &str, method: &str, url: &str) -> Error {
    match status {
        StatusCode::UNAUTHORIZED => Error::AuthInvalid {
            invalidation: Invalidation::AccessToken,
            message: status.to_string(),
        },
        StatusCode::TOO_MANY_REQUESTS => Error::RateLimited {
            retry_after: retry_after(headers),
        },
        _ => Error::Vendor {
            status: status.as_u16(),
            key: String::new(),
            description: if body.is_empty() {
                status.to_string()
            } else {
                preview(body).to_owned()
            },
            method: method.to_owned(),
            url: url.to_owned(),
        },
    }
}
