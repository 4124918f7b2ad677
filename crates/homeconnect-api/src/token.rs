//! OAuth token authority.
//!
//! Owns the credential record for one client ID and keeps a valid access
//! token available for the REST client and the event stream:
//!
//! ```text
//! Unauthorised ──device/code grant──▶ PendingUserAction ──▶ Authorised
//!      ▲                                                      │
//!      │ invalid_grant                    access_expires - window
//!      │                                                      ▼
//!      └──────────────────────────────────────────────── Refreshing
//! ```
//!
//! [`TokenAuthority::run`] is the supervised background loop that drives
//! the transitions. Everything else is non-blocking state access.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::auth::{AuthConfig, scope_granted};
use crate::error::{Error, Invalidation};
use crate::gate::RateGate;
use crate::oauth::{OAuthClient, TokenResponse};
use crate::report::ErrorReporter;
use crate::store::KeyValueStore;
use crate::transport::TransportConfig;

/// Poll interval when the server does not advertise one.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Added to the poll interval on every `slow_down`.
const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

/// Observable authorisation state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Unauthorised,
    /// Waiting for the user to approve access on another device.
    PendingUserAction(UserAction),
    Authorised { expires: DateTime<Utc> },
    Refreshing,
}

/// What the user has to do to finish a device flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAction {
    /// Ideally the `verification_uri_complete` with the code embedded.
    pub verification_uri: String,
    pub user_code: String,
    pub expires: DateTime<Utc>,
}

/// Persisted tokens for one client ID.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub refresh_token: String,
    /// Cleared when the server rejects it.
    pub access_token: Option<String>,
    pub access_expires: DateTime<Utc>,
    pub scopes: Vec<String>,
}

impl CredentialRecord {
    fn access_valid_at(&self, now: DateTime<Utc>) -> Option<&str> {
        self.access_token
            .as_deref()
            .filter(|_| self.access_expires > now)
    }
}

impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("refresh_token", &"[REDACTED]")
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("access_expires", &self.access_expires)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// How long to sleep before refreshing.
///
/// Zero if there is no access token or `expires` is already inside
/// `window`; otherwise the time until `expires - window`.
pub fn refresh_delay(
    has_access_token: bool,
    expires: DateTime<Utc>,
    now: DateTime<Utc>,
    window: Duration,
) -> Duration {
    if !has_access_token {
        return Duration::ZERO;
    }
    TimeDelta::from_std(window)
        .ok()
        .and_then(|window| expires.checked_sub_signed(window))
        .and_then(|at| (at - now).to_std().ok())
        .unwrap_or(Duration::ZERO)
}

fn expires_after(now: DateTime<Utc>, secs: u64) -> DateTime<Utc> {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Continuously-valid bearer token source for one OAuth client.
///
/// Cheaply cloneable; all clones share state.
#[derive(Clone)]
pub struct TokenAuthority {
    inner: Arc<AuthInner>,
}

struct AuthInner {
    config: AuthConfig,
    base_url: Url,
    oauth: OAuthClient,
    store: Arc<dyn KeyValueStore>,
    record: RwLock<Option<CredentialRecord>>,
    state: watch::Sender<AuthState>,
    /// Interrupts the refresh sleep after an invalidation.
    wake: Notify,
    reporter: ErrorReporter,
}

impl std::fmt::Debug for TokenAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthority")
            .field("client_id", &self.inner.config.client_id)
            .field("state", &*self.inner.state.borrow())
            .finish_non_exhaustive()
    }
}

impl TokenAuthority {
    /// Create the authority and load any persisted credentials.
    pub fn new(
        config: AuthConfig,
        store: Arc<dyn KeyValueStore>,
        gate: RateGate,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let base_url = config.base_url();
        let oauth = OAuthClient::new(base_url.clone(), gate, transport)?;

        let key = store_key(&config.client_id);
        let record = store.get(&key).and_then(|raw| {
            serde_json::from_value::<CredentialRecord>(raw)
                .inspect_err(|e| warn!(error = %e, "ignoring unreadable credential record"))
                .ok()
        });
        if record.is_some() {
            debug!(client_id = %config.client_id, "loaded persisted credentials");
        }

        let (state, _) = watch::channel(state_for(record.as_ref()));

        Ok(Self {
            inner: Arc::new(AuthInner {
                config,
                base_url,
                oauth,
                store,
                record: RwLock::new(record),
                state,
                wake: Notify::new(),
                reporter: ErrorReporter::new(),
            }),
        })
    }

    pub fn config(&self) -> &AuthConfig {
        &self.inner.config
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    pub fn state(&self) -> AuthState {
        self.inner.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<AuthState> {
        self.inner.state.subscribe()
    }

    /// `true` once a refresh token is known, valid access token or not.
    pub fn has_credentials(&self) -> bool {
        self.read_record().is_some()
    }

    /// `true` if a non-expired access token is cached.
    pub fn is_authorised(&self) -> bool {
        self.read_record()
            .as_ref()
            .and_then(|r| r.access_valid_at(Utc::now()))
            .is_some()
    }

    /// Resolve once a valid access token is available.
    pub async fn wait_until_authorised(&self) {
        let mut rx = self.inner.state.subscribe();
        loop {
            if self.is_authorised() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender lives in `inner`, which we hold.
                return;
            }
        }
    }

    /// The current access token, read at call time.
    pub fn get_authorisation(&self) -> Result<SecretString, Error> {
        self.read_record()
            .as_ref()
            .and_then(|r| r.access_valid_at(Utc::now()))
            .map(|token| SecretString::from(token.to_owned()))
            .ok_or(Error::NotAuthorised)
    }

    /// Scopes granted with the current credentials.
    pub fn scopes(&self) -> Vec<String> {
        self.read_record()
            .as_ref()
            .map(|r| r.scopes.clone())
            .unwrap_or_default()
    }

    /// Test a scope, accepting either half of a `Row-Column` scope.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.read_record()
            .as_ref()
            .is_some_and(|r| scope_granted(&r.scopes, scope))
    }

    pub fn invalidate(&self, invalidation: Invalidation) {
        match invalidation {
            Invalidation::AccessToken => self.invalidate_access_token(),
            Invalidation::Credentials => self.invalidate_credentials(),
        }
    }

    /// Forget the access token; the refresh token obtains a new one.
    pub fn invalidate_access_token(&self) {
        let updated = {
            let mut record = self.write_record();
            match record.as_mut() {
                Some(r) if r.access_token.is_some() => {
                    r.access_token = None;
                    Some(r.clone())
                }
                _ => None,
            }
        };
        if let Some(record) = updated {
            warn!("access token rejected, refreshing");
            self.persist(Some(&record));
            self.publish(AuthState::Unauthorised);
        }
        self.inner.wake.notify_one();
    }

    /// Forget everything; the authorisation flow starts over.
    pub fn invalidate_credentials(&self) {
        let had_record = self.write_record().take().is_some();
        if had_record {
            warn!("credentials rejected, authorisation required");
            self.persist(None);
            self.publish(AuthState::Unauthorised);
        }
        self.inner.wake.notify_one();
    }

    /// Supervised loop keeping the token fresh. Never returns an error;
    /// failures are logged and retried until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(client_id = %self.inner.config.client_id, "token authority started");
        loop {
            let had_record = self.read_record().is_some();
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                result = self.step() => result,
            };

            match result {
                Ok(()) => self.inner.reporter.clear(),
                Err(e) => {
                    // A rejected refresh token restarts the grant at once; a
                    // rejected grant waits like any other failure.
                    if let Some(invalidation) = e.invalidation() {
                        self.invalidate(invalidation);
                        if had_record {
                            continue;
                        }
                    }
                    self.inner.reporter.report("authorisation", &e);
                    let delay = if self.read_record().is_some() {
                        self.inner.config.retry_delay_refresh
                    } else {
                        self.inner.config.retry_delay_fresh
                    };
                    debug!(delay_ms = delay.as_millis(), "retrying authorisation");
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
        info!("token authority stopped");
    }

    /// One state transition.
    async fn step(&self) -> Result<(), Error> {
        let record = self.read_record().clone();
        let Some(record) = record else {
            return if self.inner.config.server.uses_device_flow() {
                self.device_flow().await
            } else {
                self.code_flow().await
            };
        };

        let delay = refresh_delay(
            record.access_token.is_some(),
            record.access_expires,
            Utc::now(),
            self.inner.config.refresh_window,
        );
        if !delay.is_zero() {
            debug!(delay_secs = delay.as_secs(), "refresh scheduled");
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.inner.wake.notified() => {
                    debug!("refresh sleep interrupted");
                    return Ok(());
                }
            }
        }
        self.refresh(&record.refresh_token).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<(), Error> {
        self.publish(AuthState::Refreshing);
        let result = self
            .inner
            .oauth
            .refresh(self.inner.config.client_secret.as_ref(), refresh_token)
            .await;
        match result {
            Ok(resp) => self.store_tokens(resp, Some(refresh_token)),
            Err(e) => {
                let updated = {
                    let mut record = self.write_record();
                    record.as_mut().map(|r| {
                        r.access_token = None;
                        r.clone()
                    })
                };
                if let Some(record) = updated {
                    self.persist(Some(&record));
                }
                self.publish(AuthState::Unauthorised);
                Err(e)
            }
        }
    }

    async fn device_flow(&self) -> Result<(), Error> {
        let config = &self.inner.config;
        let auth = self
            .inner
            .oauth
            .device_authorization(&config.client_id, &config.scopes)
            .await?;

        let expires = expires_after(Utc::now(), auth.expires_in);
        let action = UserAction {
            verification_uri: auth
                .verification_uri_complete
                .clone()
                .unwrap_or_else(|| auth.verification_uri.clone()),
            user_code: auth.user_code.clone(),
            expires,
        };
        info!(
            uri = %action.verification_uri,
            user_code = %action.user_code,
            "authorisation required, approve access in a browser"
        );
        self.publish(AuthState::PendingUserAction(action));

        let mut interval = auth.interval.map_or(DEFAULT_POLL_INTERVAL, Duration::from_secs);
        loop {
            tokio::time::sleep(interval).await;
            if Utc::now() >= expires {
                info!("device code expired before approval, requesting a new one");
                self.publish(AuthState::Unauthorised);
                return Ok(());
            }
            match self
                .inner
                .oauth
                .poll_device_token(
                    &config.client_id,
                    config.client_secret.as_ref(),
                    &auth.device_code,
                )
                .await
            {
                Ok(resp) => return self.store_tokens(resp, None),
                Err(Error::AuthorisationPending) => {}
                Err(Error::SlowDown) => {
                    interval += SLOW_DOWN_STEP;
                    debug!(interval_secs = interval.as_secs(), "device flow slowing down");
                }
                Err(e) => {
                    self.publish(AuthState::Unauthorised);
                    return Err(e);
                }
            }
        }
    }

    /// Simulator only: the authorize endpoint approves without a user.
    async fn code_flow(&self) -> Result<(), Error> {
        let config = &self.inner.config;
        let code = self
            .inner
            .oauth
            .authorize_code(&config.client_id, &config.redirect_uri, &config.scopes)
            .await?;
        let resp = self
            .inner
            .oauth
            .exchange_code(
                &config.client_id,
                config.client_secret.as_ref(),
                &config.redirect_uri,
                &code,
            )
            .await?;
        self.store_tokens(resp, None)
    }

    fn store_tokens(&self, resp: TokenResponse, previous_refresh: Option<&str>) -> Result<(), Error> {
        let refresh_token = resp
            .refresh_token
            .or_else(|| previous_refresh.map(str::to_owned))
            .ok_or_else(|| Error::OAuth {
                error: "missing_refresh_token".into(),
                description: "token response did not include a refresh token".into(),
            })?;
        let scopes = match resp.scope {
            Some(scope) => scope.split_whitespace().map(str::to_owned).collect(),
            None => self
                .read_record()
                .as_ref()
                .map_or_else(|| self.inner.config.scopes.clone(), |r| r.scopes.clone()),
        };
        let access_expires = expires_after(Utc::now(), resp.expires_in);

        let record = CredentialRecord {
            refresh_token,
            access_token: Some(resp.access_token),
            access_expires,
            scopes,
        };
        info!(expires = %access_expires, scopes = ?record.scopes, "access token obtained");

        self.persist(Some(&record));
        *self.write_record() = Some(record);
        self.publish(AuthState::Authorised {
            expires: access_expires,
        });
        Ok(())
    }

    fn persist(&self, record: Option<&CredentialRecord>) {
        let key = store_key(&self.inner.config.client_id);
        let result = match record {
            Some(record) => serde_json::to_value(record)
                .map_err(|e| Error::Storage(format!("failed to encode credentials: {e}")))
                .and_then(|value| self.inner.store.set(&key, value, None)),
            None => self.inner.store.remove(&key),
        };
        if let Err(e) = result {
            self.inner.reporter.report("persisting credentials", &e);
        }
    }

    fn publish(&self, state: AuthState) {
        self.inner.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                debug!(?state, "authorisation state");
                *current = state;
                true
            }
        });
    }

    fn read_record(&self) -> RwLockReadGuard<'_, Option<CredentialRecord>> {
        self.inner
            .record
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_record(&self) -> RwLockWriteGuard<'_, Option<CredentialRecord>> {
        self.inner
            .record
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn store_key(client_id: &str) -> String {
    format!("token {client_id}")
}

fn state_for(record: Option<&CredentialRecord>) -> AuthState {
    match record {
        Some(r) if r.access_valid_at(Utc::now()).is_some() => AuthState::Authorised {
            expires: r.access_expires,
        },
        _ => AuthState::Unauthorised,
    }
}
