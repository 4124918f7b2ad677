// Rate-gated REST client for the Home Connect API.
//
// Every request waits for authorisation, then for the shared rate gate,
// attaches the bearer token read at send time, and retries by itself only
// the errors the taxonomy marks retryable (rate limiting and a rejected
// access token). Everything else is returned to the caller.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use reqwest::Method;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, trace, warn};
use url::Url;

use crate::error::{Error, Invalidation};
use crate::gate::RateGate;
use crate::response::{interpret_error, preview};
use crate::token::TokenAuthority;
use crate::transport::{TransportConfig, VENDOR_JSON};
use crate::types::DataEnvelope;

/// Consecutive rate-limited attempts before the client complains loudly.
pub const DEFAULT_ESCALATE_AFTER: u32 = 10;

/// Cheaply cloneable handle; clones share the gate and connection pool.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http: reqwest::Client,
    stream_http: reqwest::Client,
    base_url: Url,
    auth: TokenAuthority,
    gate: RateGate,
    rate_limited_streak: AtomicU32,
    escalate_after: u32,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.inner.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Build a client sharing `gate` with the token authority.
    ///
    /// `escalate_after` consecutive rate-limited attempts are logged at
    /// `error` once per streak; retries continue regardless.
    pub fn new(
        auth: TokenAuthority,
        gate: RateGate,
        transport: &TransportConfig,
        escalate_after: u32,
    ) -> Result<Self, Error> {
        Ok(Self {
            inner: Arc::new(ClientInner {
                http: transport.build_client()?,
                stream_http: transport.build_stream_client()?,
                base_url: auth.base_url().clone(),
                auth,
                gate,
                rate_limited_streak: AtomicU32::new(0),
                escalate_after: escalate_after.max(1),
            }),
        })
    }

    pub fn auth(&self) -> &TokenAuthority {
        &self.inner.auth
    }

    pub fn gate(&self) -> &RateGate {
        &self.inner.gate
    }

    /// `{base}/api/{segments...}`, each segment percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url, Error> {
        let mut url = self.inner.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::ClientSetup(format!("base URL {} cannot hold a path", self.inner.base_url)))?
            .pop_if_empty()
            .push("api")
            .extend(segments);
        Ok(url)
    }

    /// Issue one logical request. Returns the parsed body, or `None` for
    /// an empty success response (e.g. `204 No Content`).
    pub async fn request(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<&Value>,
    ) -> Result<Option<Value>, Error> {
        let url = self.url(segments)?;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.inner.auth.wait_until_authorised().await;
            self.inner.gate.wait().await;

            // Read the token now so a concurrent refresh is always used.
            let token = match self.inner.auth.get_authorisation() {
                Ok(token) => token,
                Err(Error::NotAuthorised) => continue,
                Err(e) => return Err(e),
            };

            debug!(%method, url = %url, attempt, "request");
            let mut req = self
                .inner
                .http
                .request(method.clone(), url.clone())
                .bearer_auth(token.expose_secret())
                .header(ACCEPT, VENDOR_JSON);
            if let Some(body) = body {
                req = req.header(CONTENT_TYPE, VENDOR_JSON).json(body);
            }

            let transport = |source| Error::Transport {
                method: method.to_string(),
                url: url.to_string(),
                source,
            };
            let resp = req.send().await.map_err(transport)?;
            let status = resp.status();
            let headers = resp.headers().clone();
            let text = resp.text().await.map_err(transport)?;

            if status.is_success() {
                self.inner.rate_limited_streak.store(0, Ordering::Relaxed);
                trace!(%status, body = %preview(&text), "response");
                if text.trim().is_empty() {
                    return Ok(None);
                }
                return serde_json::from_str(&text)
                    .map(Some)
                    .map_err(|e| Error::Deserialization {
                        message: format!("{e} (body preview: {:?})", preview(&text)),
                        body: text,
                    });
            }

            let err = interpret_error(status, &headers, &text, method.as_str(), url.as_str());
            match &err {
                Error::AuthInvalid { invalidation, .. } => {
                    self.inner.auth.invalidate(*invalidation);
                    if *invalidation == Invalidation::Credentials {
                        return Err(err);
                    }
                    debug!(url = %url, "access token rejected, retrying after refresh");
                }
                Error::RateLimited { retry_after } => {
                    self.inner.gate.defer(*retry_after);
                    let streak = self.inner.rate_limited_streak.fetch_add(1, Ordering::Relaxed) + 1;
                    if streak == self.inner.escalate_after {
                        error!(
                            streak,
                            retry_after_secs = retry_after.as_secs(),
                            "requests have been rate limited {streak} times in a row; \
                             the account quota may be exhausted, still retrying"
                        );
                    } else {
                        warn!(
                            url = %url,
                            retry_after_secs = retry_after.as_secs(),
                            "rate limited"
                        );
                    }
                }
                _ => return Err(err),
            }
        }
    }

    /// GET and unwrap the `{"data": ...}` envelope.
    pub(crate) async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, Error> {
        let Some(body) = self.request(Method::GET, segments, None).await? else {
            return Err(Error::EmptyResponse {
                method: "GET".into(),
                url: self.url(segments)?.to_string(),
            });
        };
        serde_json::from_value::<DataEnvelope<T>>(body)
            .map(|envelope| envelope.data)
            .map_err(|e| Error::Deserialization {
                message: format!("{e} (GET /{})", segments.join("/")),
                body: String::new(),
            })
    }

    /// PUT `{"data": data}`.
    pub(crate) async fn put(&self, segments: &[&str], data: Value) -> Result<(), Error> {
        let body = serde_json::json!({ "data": data });
        self.request(Method::PUT, segments, Some(&body)).await?;
        Ok(())
    }

    pub(crate) async fn delete(&self, segments: &[&str]) -> Result<(), Error> {
        self.request(Method::DELETE, segments, None).await?;
        Ok(())
    }

    /// Open the event stream for one appliance or, with `None`, for all.
    ///
    /// Single attempt: the caller owns waiting and restarting. A 429
    /// still advances the shared gate.
    pub async fn open_stream(&self, ha_id: Option<&str>) -> Result<reqwest::Response, Error> {
        let url = match ha_id {
            Some(id) => self.url(&["homeappliances", id, "events"])?,
            None => self.url(&["homeappliances", "events"])?,
        };
        let token = self.inner.auth.get_authorisation()?;

        debug!(url = %url, "opening event stream");
        let resp = self
            .inner
            .stream_http
            .get(url.clone())
            .bearer_auth(token.expose_secret())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|source| Error::Transport {
                method: "GET".into(),
                url: url.to_string(),
                source,
            })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let headers = resp.headers().clone();
        let text = resp.text().await.unwrap_or_default();
        let err = interpret_error(status, &headers, &text, "GET", url.as_str());
        if let Error::RateLimited { retry_after } = &err {
            self.inner.gate.defer(*retry_after);
        }
        Err(err)
    }
}
