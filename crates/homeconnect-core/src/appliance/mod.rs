// ── Appliance device model ──
//
// One `Appliance` per haId. Owns the item cache and the `connected`
// flag, serialises writes, and resynchronises state after reconnects.
// Stream events arrive through `attach()`; collaborators read through
// the cache and write through the operations in `operations.rs`.

mod cache;
mod operations;
mod scope;
mod serialise;
mod sync;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use homeconnect_api::{ApiClient, ApplianceInfo, EventKind, Item, KeyValueStore, StreamEvent};
use homeconnect_api::{ErrorReporter, types::keys};

use crate::config::{Backoff, ClientConfig, ScopeOverride};
use crate::error::CoreError;

pub use cache::{ApplianceEvent, ItemListener};
pub use scope::Scope;
pub use serialise::{Options, options};

use cache::ItemCache;
use serialise::Serialiser;
use sync::ResyncState;

/// Per-appliance knobs derived from [`ClientConfig`].
#[derive(Debug, Clone)]
pub struct ApplianceSettings {
    pub resync: Backoff,
    pub cache_ttl: Duration,
    pub resync_on_connect: bool,
    pub poll_programs: bool,
    pub scope_override: ScopeOverride,
}

impl Default for ApplianceSettings {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default(), "")
    }
}

impl ApplianceSettings {
    /// Settings for an appliance of type `kind`.
    pub fn from_config(config: &ClientConfig, kind: &str) -> Self {
        Self {
            resync: config.resync,
            cache_ttl: config.cache_ttl,
            resync_on_connect: config.resync_on_connect,
            poll_programs: config.poll_programs,
            scope_override: config.scope_overrides.get(kind).cloned().unwrap_or_default(),
        }
    }
}

// ── Appliance ────────────────────────────────────────────────────────

/// Handle to one appliance. Cheap to clone.
#[derive(Clone)]
pub struct Appliance {
    inner: Arc<ApplianceInner>,
}

struct ApplianceInner {
    ha_id: String,
    info: RwLock<ApplianceInfo>,
    client: ApiClient,
    store: Arc<dyn KeyValueStore>,
    settings: ApplianceSettings,
    cache: ItemCache,
    serialiser: Arc<Serialiser>,
    connected: watch::Sender<bool>,
    resync: Mutex<ResyncState>,
    poll_programs: AtomicBool,
    retired: AtomicBool,
    reporter: ErrorReporter,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Appliance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Appliance")
            .field("ha_id", &self.inner.ha_id)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl Appliance {
    /// Create the model for `info`. Spawns nothing until [`attach`](Self::attach).
    pub fn new(
        info: ApplianceInfo,
        client: ApiClient,
        store: Arc<dyn KeyValueStore>,
        settings: ApplianceSettings,
        cancel: CancellationToken,
    ) -> Self {
        let (connected, _) = watch::channel(info.connected);
        let poll_programs = AtomicBool::new(settings.poll_programs);
        Self {
            inner: Arc::new(ApplianceInner {
                ha_id: info.ha_id.clone(),
                info: RwLock::new(info),
                client,
                store,
                settings,
                cache: ItemCache::new(),
                serialiser: Arc::new(Serialiser::new()),
                connected,
                resync: Mutex::new(ResyncState::default()),
                poll_programs,
                retired: AtomicBool::new(false),
                reporter: ErrorReporter::new(),
                cancel,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn ha_id(&self) -> &str {
        &self.inner.ha_id
    }

    pub fn info(&self) -> ApplianceInfo {
        self.inner
            .info
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Appliance type, e.g. `Oven`.
    pub fn kind(&self) -> String {
        self.info().kind
    }

    pub fn client(&self) -> &ApiClient {
        &self.inner.client
    }

    pub fn settings(&self) -> &ApplianceSettings {
        &self.inner.settings
    }

    // ── Item cache ───────────────────────────────────────────────────

    /// Merge a batch of items into the cache, then notify listeners.
    pub fn update(&self, items: Vec<Item>) {
        self.inner.cache.update(items);
    }

    /// Last-known value of `key`.
    pub fn get_item(&self, key: &str) -> Option<Item> {
        self.inner.cache.get(key)
    }

    /// Every cached item, sorted by key.
    pub fn items(&self) -> Vec<Item> {
        self.inner.cache.snapshot()
    }

    /// All item changes and lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ApplianceEvent> {
        self.inner.cache.subscribe()
    }

    /// Changes of a single item.
    pub fn on_item(&self, key: impl Into<String>) -> ItemListener {
        ItemListener::new(key.into(), self.inner.cache.subscribe())
    }

    /// A persisted value, refreshed through `refresh` once its TTL has
    /// elapsed. A failed refresh falls back to the stale value if there
    /// is one.
    pub async fn get_cached<T, F, Fut>(&self, key: &str, refresh: F) -> Result<T, CoreError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let store_key = format!("{} {key}", self.inner.ha_id);
        let store = &self.inner.store;

        if !store.has_expired(&store_key) {
            if let Some(value) = store.get(&store_key) {
                match serde_json::from_value(value) {
                    Ok(cached) => return Ok(cached),
                    Err(e) => debug!(key, error = %e, "discarding unreadable cache entry"),
                }
            }
        }

        self.wait_connected(true).await?;
        match refresh().await {
            Ok(fresh) => {
                match serde_json::to_value(&fresh) {
                    Ok(json) => {
                        if let Err(e) = store.set(&store_key, json, Some(self.inner.settings.cache_ttl))
                        {
                            warn!(key, error = %e, "failed to persist cached value");
                        }
                    }
                    Err(e) => warn!(key, error = %e, "cached value is not serialisable"),
                }
                Ok(fresh)
            }
            Err(err) => {
                let stale = store
                    .get(&store_key)
                    .and_then(|value| serde_json::from_value(value).ok());
                match stale {
                    Some(stale) => {
                        warn!(
                            ha_id = %self.inner.ha_id,
                            key,
                            error = %err,
                            "refresh failed, using stale cached value"
                        );
                        Ok(stale)
                    }
                    None => Err(err),
                }
            }
        }
    }

    // ── Connection state ─────────────────────────────────────────────

    pub fn is_connected(&self) -> bool {
        *self.inner.connected.borrow()
    }

    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.inner.connected.subscribe()
    }

    /// Resolve on the next transition to connected, or at once if
    /// `immediate` is set and the appliance is already connected.
    pub async fn wait_connected(&self, immediate: bool) -> Result<(), CoreError> {
        let mut rx = self.inner.connected.subscribe();
        if immediate && *rx.borrow_and_update() {
            return Ok(());
        }
        rx.borrow_and_update();
        loop {
            tokio::select! {
                biased;
                () = self.inner.cancel.cancelled() => {
                    return Err(CoreError::ApplianceNotFound {
                        ha_id: self.inner.ha_id.clone(),
                    });
                }
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(CoreError::Internal("connection state dropped".into()));
                    }
                    if *rx.borrow_and_update() {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Wait until `OperationState` is one of `states`. Returns the state
    /// reached.
    pub async fn wait_operation_state(
        &self,
        states: &[&str],
        timeout: Duration,
    ) -> Result<String, CoreError> {
        let current = |item: &Item| {
            item.value
                .as_str()
                .filter(|state| states.contains(state))
                .map(str::to_owned)
        };

        let mut listener = self.on_item(keys::OPERATION_STATE);
        if let Some(state) = self.get_item(keys::OPERATION_STATE).as_ref().and_then(current) {
            return Ok(state);
        }

        let wait = async {
            while let Some(item) = listener.recv().await {
                if let Some(state) = current(&item) {
                    return Ok(state);
                }
            }
            Err(CoreError::ApplianceNotFound {
                ha_id: self.inner.ha_id.clone(),
            })
        };
        tokio::time::timeout(timeout, wait)
            .await
            .unwrap_or_else(|_| {
                Err(CoreError::Timeout {
                    timeout_secs: timeout.as_secs(),
                })
            })
    }

    /// Record the connected flag. A transition to connected schedules a
    /// resync.
    pub(crate) fn set_connected(&self, connected: bool) {
        let changed = self.inner.connected.send_if_modified(|current| {
            if *current == connected {
                false
            } else {
                *current = connected;
                true
            }
        });
        if !changed {
            return;
        }
        info!(ha_id = %self.inner.ha_id, connected, "appliance connection changed");
        self.inner.cache.emit(ApplianceEvent::Connected(connected));
        if connected {
            self.schedule_resync();
        }
    }

    /// Read the appliance info and take its `connected` flag.
    pub async fn refresh_connection(&self) -> Result<bool, CoreError> {
        let info = self.inner.client.get_appliance(&self.inner.ha_id).await?;
        let connected = info.connected;
        *self
            .inner
            .info
            .write()
            .unwrap_or_else(PoisonError::into_inner) = info;
        self.set_connected(connected);
        Ok(connected)
    }

    /// Track the selected and active programs during resync.
    pub fn poll_programs(&self, enable: bool) {
        let was = self.inner.poll_programs.swap(enable, Ordering::SeqCst);
        if enable && !was && self.is_connected() {
            self.schedule_resync();
        }
    }

    fn polling_programs(&self) -> bool {
        self.inner.poll_programs.load(Ordering::SeqCst)
    }

    // ── Stream events ────────────────────────────────────────────────

    /// Start consuming stream events for this appliance.
    pub fn attach(&self, mut events: broadcast::Receiver<Arc<StreamEvent>>) {
        let appliance = self.clone();
        let cancel = self.inner.cancel.clone();
        let handle = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(event) => appliance.handle_event(&event).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(ha_id = %appliance.ha_id(), skipped = n, "missed stream events, resyncing");
                        if appliance.is_connected() {
                            appliance.schedule_resync();
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!(ha_id = %appliance.ha_id(), "event pump stopped");
        });
        self.track(handle);

        if self.is_connected() {
            self.schedule_resync();
        }
    }

    pub(crate) async fn handle_event(&self, event: &StreamEvent) {
        debug!(ha_id = %self.inner.ha_id, kind = %event.kind, items = event.items.len(), "stream event");
        match event.kind {
            EventKind::Start => {
                if let Err(e) = self.refresh_connection().await {
                    self.report("appliance info read", e);
                }
            }
            EventKind::Stop | EventKind::Disconnected => self.set_connected(false),
            EventKind::Connected | EventKind::Paired => self.set_connected(true),
            EventKind::Depaired => self.retire(),
            EventKind::Status | EventKind::Event | EventKind::Notify => {
                self.update(event.items.clone());
            }
            EventKind::KeepAlive => {}
        }
    }

    /// Log a background failure once and pass it on to subscribers.
    fn report(&self, context: &str, err: CoreError) {
        if self.inner.reporter.report(context, &err) {
            self.inner.cache.emit(ApplianceEvent::Error(err));
        }
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.lock_tasks();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// Stop background tasks. Outstanding waits resolve with an error.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
        for handle in self.lock_tasks().drain(..) {
            handle.abort();
        }
    }

    /// The appliance left the account: announce it once and stop.
    pub(crate) fn retire(&self) {
        if self.inner.retired.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(ha_id = %self.inner.ha_id, "appliance depaired");
        self.set_connected(false);
        self.inner.cache.emit(ApplianceEvent::Depaired);
        self.shutdown();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }
}
