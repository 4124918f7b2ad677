// ── Platform orchestrator ──
//
// Owns the token authority loop, the event streams and one `Appliance`
// per discovered haId. Appliances come and go with PAIRED/DEPAIRED
// events and with what discovery reports.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use homeconnect_api::{
    ApiClient, ApplianceInfo, ErrorReporter, EventKind, EventRouter, EventStreamHandle,
    KeyValueStore, RateGate, StreamEvent, TokenAuthority,
};

use crate::appliance::{Appliance, ApplianceSettings};
use crate::config::{ClientConfig, StreamMode};
use crate::error::CoreError;

const EVENT_CHANNEL_SIZE: usize = 64;

/// Appliance set changes.
#[derive(Debug, Clone)]
pub enum PlatformEvent {
    Added(Appliance),
    Removed(String),
}

/// Entry point for consumers. Cheap to clone.
#[derive(Clone)]
pub struct Platform {
    inner: Arc<PlatformInner>,
}

struct PlatformInner {
    config: ClientConfig,
    client: ApiClient,
    store: Arc<dyn KeyValueStore>,
    router: EventRouter,
    appliances: DashMap<String, Appliance>,
    streams: DashMap<String, EventStreamHandle>,
    events: broadcast::Sender<PlatformEvent>,
    discovered: watch::Sender<bool>,
    /// One reconciliation at a time.
    discovering: tokio::sync::Mutex<()>,
    reporter: ErrorReporter,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Platform {
    /// Build the client stack. Does not touch the network; call
    /// [`start()`](Self::start).
    pub fn new(config: ClientConfig, store: Arc<dyn KeyValueStore>) -> Result<Self, CoreError> {
        let gate = RateGate::new();
        let transport = config.transport_config();
        let auth = TokenAuthority::new(
            config.auth_config(),
            Arc::clone(&store),
            gate.clone(),
            &transport,
        )?;
        let client = ApiClient::new(auth, gate, &transport, config.rate_limit_escalation)?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let (discovered, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(PlatformInner {
                config,
                client,
                store,
                router: EventRouter::new(),
                appliances: DashMap::new(),
                streams: DashMap::new(),
                events,
                discovered,
                discovering: tokio::sync::Mutex::new(()),
                reporter: ErrorReporter::new(),
                cancel: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn client(&self) -> &ApiClient {
        &self.inner.client
    }

    pub fn auth(&self) -> &TokenAuthority {
        self.inner.client.auth()
    }

    pub fn router(&self) -> &EventRouter {
        &self.inner.router
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Spawn the token loop, the event stream and background discovery.
    pub fn start(&self) {
        let cancel = &self.inner.cancel;
        let mut tasks = self.lock_tasks();

        let auth = self.auth().clone();
        let auth_cancel = cancel.child_token();
        tasks.push(tokio::spawn(async move { auth.run(auth_cancel).await }));

        if self.inner.config.stream_mode == StreamMode::All {
            self.inner.streams.insert(
                String::new(),
                EventStreamHandle::spawn(
                    self.inner.client.clone(),
                    None,
                    self.inner.router.clone(),
                    self.inner.config.stream.clone(),
                    cancel.child_token(),
                ),
            );
        }

        let platform = self.clone();
        let lifecycle = self.inner.router.subscribe_all();
        tasks.push(tokio::spawn(async move {
            platform.lifecycle_loop(lifecycle).await;
        }));

        let platform = self.clone();
        tasks.push(tokio::spawn(async move { platform.discovery_loop().await }));

        info!(mode = ?self.inner.config.stream_mode, "platform started");
    }

    /// Cancel every task and detach every appliance.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        for entry in &self.inner.appliances {
            entry.value().shutdown();
        }
        self.inner.appliances.clear();

        let streams: Vec<String> = self.inner.streams.iter().map(|e| e.key().clone()).collect();
        for key in streams {
            if let Some((_, stream)) = self.inner.streams.remove(&key) {
                stream.shutdown();
                stream.join().await;
            }
        }

        let handles: Vec<JoinHandle<()>> = self.lock_tasks().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        debug!("platform shut down");
    }

    // ── Appliances ───────────────────────────────────────────────────

    /// Read the appliance list and reconcile: add new appliances, update
    /// the connected flag of known ones, remove vanished ones.
    pub async fn discover(&self) -> Result<Vec<Appliance>, CoreError> {
        let _guard = self.inner.discovering.lock().await;
        let list = self.inner.client.list_appliances().await?;
        debug!(count = list.len(), "appliance list read");

        let stale: Vec<String> = self
            .inner
            .appliances
            .iter()
            .map(|e| e.key().clone())
            .filter(|ha_id| !list.iter().any(|info| &info.ha_id == ha_id))
            .collect();
        for ha_id in stale {
            self.remove(&ha_id);
        }

        for info in list {
            let known = self.inner.appliances.get(&info.ha_id).map(|e| e.value().clone());
            match known {
                Some(appliance) => appliance.set_connected(info.connected),
                None => self.add(info),
            }
        }

        self.inner.discovered.send_replace(true);
        Ok(self.appliances())
    }

    /// Resolve once the first discovery has succeeded.
    pub async fn wait_discovered(&self) {
        let mut rx = self.inner.discovered.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    pub fn appliance(&self, ha_id: &str) -> Result<Appliance, CoreError> {
        self.inner
            .appliances
            .get(ha_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| CoreError::ApplianceNotFound {
                ha_id: ha_id.to_owned(),
            })
    }

    /// Every known appliance, ordered by haId.
    pub fn appliances(&self) -> Vec<Appliance> {
        let mut appliances: Vec<Appliance> =
            self.inner.appliances.iter().map(|e| e.value().clone()).collect();
        appliances.sort_by(|a, b| a.ha_id().cmp(b.ha_id()));
        appliances
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlatformEvent> {
        self.inner.events.subscribe()
    }

    fn add(&self, info: ApplianceInfo) {
        let ha_id = info.ha_id.clone();
        let settings = ApplianceSettings::from_config(&self.inner.config, &info.kind);
        info!(ha_id = %ha_id, name = %info.name, kind = %info.kind, "appliance added");

        let appliance = Appliance::new(
            info,
            self.inner.client.clone(),
            Arc::clone(&self.inner.store),
            settings,
            self.inner.cancel.child_token(),
        );
        appliance.attach(self.inner.router.subscribe(&ha_id));

        if self.inner.config.stream_mode == StreamMode::PerAppliance {
            self.inner.streams.insert(
                ha_id.clone(),
                EventStreamHandle::spawn(
                    self.inner.client.clone(),
                    Some(ha_id.clone()),
                    self.inner.router.clone(),
                    self.inner.config.stream.clone(),
                    self.inner.cancel.child_token(),
                ),
            );
        }

        self.inner.appliances.insert(ha_id, appliance.clone());
        let _ = self.inner.events.send(PlatformEvent::Added(appliance));
    }

    fn remove(&self, ha_id: &str) {
        let Some((_, appliance)) = self.inner.appliances.remove(ha_id) else {
            return;
        };
        info!(ha_id, "appliance removed");
        appliance.retire();
        self.inner.router.remove(ha_id);
        if let Some((_, stream)) = self.inner.streams.remove(ha_id) {
            stream.shutdown();
        }
        let _ = self.inner.events.send(PlatformEvent::Removed(ha_id.to_owned()));
    }

    // ── Background loops ─────────────────────────────────────────────

    /// Discover until it succeeds once.
    async fn discovery_loop(&self) {
        let mut attempt = 0u32;
        loop {
            let result = tokio::select! {
                biased;
                () = self.inner.cancel.cancelled() => return,
                result = self.discover() => result,
            };
            match result {
                Ok(appliances) => {
                    self.inner.reporter.clear();
                    info!(count = appliances.len(), "appliance discovery complete");
                    return;
                }
                Err(e) => {
                    self.inner.reporter.report("appliance discovery", &e);
                    let delay = self.inner.config.resync.delay(attempt);
                    attempt = attempt.saturating_add(1);
                    tokio::select! {
                        biased;
                        () = self.inner.cancel.cancelled() => return,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// React to account-level events: new pairings and depairings.
    async fn lifecycle_loop(&self, mut events: broadcast::Receiver<Arc<StreamEvent>>) {
        loop {
            let event = tokio::select! {
                biased;
                () = self.inner.cancel.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(event) => self.handle_lifecycle(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "lifecycle events lagged, rediscovering");
                    self.spawn_discovery();
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    fn handle_lifecycle(&self, event: &StreamEvent) {
        let Some(ha_id) = event.ha_id.as_deref() else {
            return;
        };
        let known = self.inner.appliances.contains_key(ha_id);
        match event.kind {
            EventKind::Paired | EventKind::Connected if !known => {
                debug!(ha_id, kind = %event.kind, "event for unknown appliance, rediscovering");
                self.spawn_discovery();
            }
            EventKind::Depaired if known => self.remove(ha_id),
            _ => {}
        }
    }

    fn spawn_discovery(&self) {
        let platform = self.clone();
        let handle = tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                () = platform.inner.cancel.cancelled() => return,
                result = platform.discover() => result,
            };
            if let Err(e) = result {
                platform.inner.reporter.report("appliance rediscovery", &e);
            }
        });
        let mut tasks = self.lock_tasks();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
