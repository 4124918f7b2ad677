// Raw OAuth2 endpoint calls.
//
// Stateless: the token authority decides which grant to use and what to
// do with the result. Rate limiting is honoured here so every flow waits
// on the same gate as the REST client.

use reqwest::header::LOCATION;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};
use url::Url;

use crate::error::Error;
use crate::gate::RateGate;
use crate::response::{interpret_error, preview};
use crate::transport::TransportConfig;

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Response of `POST /security/oauth/device_authorization`.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceAuthorisation {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default)]
    pub verification_uri_complete: Option<String>,
    /// Seconds until `device_code` expires.
    pub expires_in: u64,
    /// Minimum polling interval in seconds.
    #[serde(default)]
    pub interval: Option<u64>,
}

/// Response of `POST /security/oauth/token`, any grant.
#[derive(Clone, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: u64,
    /// Space-separated granted scopes.
    #[serde(default)]
    pub scope: Option<String>,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct OAuthClient {
    http: reqwest::Client,
    redirectless: reqwest::Client,
    base_url: Url,
    gate: RateGate,
}

impl OAuthClient {
    pub fn new(base_url: Url, gate: RateGate, transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            redirectless: transport.build_redirectless_client()?,
            base_url,
            gate,
        })
    }

    fn endpoint(&self, name: &str) -> Result<Url, Error> {
        Ok(self.base_url.join("security/oauth/")?.join(name)?)
    }

    /// Start a device flow.
    pub async fn device_authorization(
        &self,
        client_id: &str,
        scopes: &[String],
    ) -> Result<DeviceAuthorisation, Error> {
        let scope = scopes.join(" ");
        self.post_form(
            "device_authorization",
            &[("client_id", client_id), ("scope", &scope)],
        )
        .await
    }

    /// Poll once for the device flow result. `AuthorisationPending` and
    /// `SlowDown` surface as errors for the caller to act on.
    pub async fn poll_device_token(
        &self,
        client_id: &str,
        client_secret: Option<&SecretString>,
        device_code: &str,
    ) -> Result<TokenResponse, Error> {
        let mut form = vec![
            ("grant_type", DEVICE_CODE_GRANT),
            ("client_id", client_id),
            ("device_code", device_code),
        ];
        if let Some(secret) = client_secret {
            form.push(("client_secret", secret.expose_secret()));
        }
        self.post_form("token", &form).await
    }

    /// Simulator code grant, step one: the simulator approves immediately
    /// and redirects to `redirect_uri?code=...`.
    pub async fn authorize_code(
        &self,
        client_id: &str,
        redirect_uri: &str,
        scopes: &[String],
    ) -> Result<String, Error> {
        let mut url = self.endpoint("authorize")?;
        url.query_pairs_mut()
            .append_pair("client_id", client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &scopes.join(" "));

        self.gate.wait().await;
        let resp = self
            .redirectless
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::Transport {
                method: "GET".into(),
                url: url.to_string(),
                source: e,
            })?;

        let status = resp.status();
        if !status.is_redirection() {
            let headers = resp.headers().clone();
            let body = resp.text().await.unwrap_or_default();
            return Err(self.reject(status, &headers, &body, "GET", &url));
        }

        let location = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Error::OAuth {
                error: "missing_redirect".into(),
                description: format!("authorize returned {status} without a Location header"),
            })?;
        let location = url.join(location)?;
        debug!(location = %location.path(), "authorize redirected");

        let mut code = None;
        for (name, value) in location.query_pairs() {
            match name.as_ref() {
                "code" => code = Some(value.into_owned()),
                "error" => {
                    return Err(Error::OAuth {
                        error: value.into_owned(),
                        description: "authorize request rejected".into(),
                    });
                }
                _ => {}
            }
        }
        code.ok_or_else(|| Error::OAuth {
            error: "missing_code".into(),
            description: "authorize redirect did not carry a code".into(),
        })
    }

    /// Simulator code grant, step two.
    pub async fn exchange_code(
        &self,
        client_id: &str,
        client_secret: Option<&SecretString>,
        redirect_uri: &str,
        code: &str,
    ) -> Result<TokenResponse, Error> {
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("client_id", client_id),
            ("redirect_uri", redirect_uri),
            ("code", code),
        ];
        if let Some(secret) = client_secret {
            form.push(("client_secret", secret.expose_secret()));
        }
        self.post_form("token", &form).await
    }

    pub async fn refresh(
        &self,
        client_secret: Option<&SecretString>,
        refresh_token: &str,
    ) -> Result<TokenResponse, Error> {
        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        if let Some(secret) = client_secret {
            form.push(("client_secret", secret.expose_secret()));
        }
        self.post_form("token", &form).await
    }

    /// POST a form, retrying for as long as the server rate-limits us.
    async fn post_form<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        form: &[(&str, &str)],
    ) -> Result<T, Error> {
        let url = self.endpoint(endpoint)?;
        loop {
            self.gate.wait().await;
            trace!(url = %url, "POST");
            let resp = self
                .http
                .post(url.clone())
                .form(form)
                .send()
                .await
                .map_err(|e| Error::Transport {
                    method: "POST".into(),
                    url: url.to_string(),
                    source: e,
                })?;

            let status = resp.status();
            let headers = resp.headers().clone();
            let body = resp.text().await.map_err(|e| Error::Transport {
                method: "POST".into(),
                url: url.to_string(),
                source: e,
            })?;

            if status.is_success() {
                return serde_json::from_str(&body).map_err(|e| Error::Deserialization {
                    message: format!("{e} (body preview: {:?})", preview(&body)),
                    body,
                });
            }

            match self.reject(status, &headers, &body, "POST", &url) {
                Error::RateLimited { retry_after } => {
                    debug!(
                        endpoint,
                        delay_ms = retry_after.as_millis(),
                        "OAuth endpoint rate limited"
                    );
                }
                other => return Err(other),
            }
        }
    }

    /// Interpret an error response, advancing the gate on a rate limit.
    fn reject(
        &self,
        status: reqwest::StatusCode,
        headers: &reqwest::header::HeaderMap,
        body: &str,
        method: &str,
        url: &Url,
    ) -> Error {
        let err = interpret_error(status, headers, body, method, url.as_str());
        if let Error::RateLimited { retry_after } = &err {
            self.gate.defer(*retry_after);
        }
        err
    }
}
