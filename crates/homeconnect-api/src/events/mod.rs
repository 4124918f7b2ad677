//! Home Connect event stream with auto-restart.
//!
//! Opens `GET /api/homeappliances[/{haId}]/events`, decodes the SSE
//! framing and routes typed [`StreamEvent`]s to per-appliance broadcast
//! channels. The background task never gives up: any termination
//! (server close, transport error, corrupted framing) dispatches a
//! synthetic `STOP`, backs off and reconnects until cancelled.
//!
//! ```rust,ignore
//! let router = EventRouter::new();
//! let mut rx = router.subscribe("SIEMENS-HCS02DWH1-6BE58C26DCC1");
//! let handle = EventStreamHandle::spawn(client, None, router, EventStreamConfig::default(), cancel);
//! while let Ok(event) = rx.recv().await {
//!     println!("{} {:?}", event.kind, event.items);
//! }
//! ```

pub(crate) mod sse;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::client::ApiClient;
use crate::error::Error;
use crate::report::ErrorReporter;
use crate::types::Item;

use self::sse::Frame;

const EVENT_CHANNEL_CAPACITY: usize = 256;

// ── Event types ──────────────────────────────────────────────────────

/// Event names on the wire, plus the synthetic `START`/`STOP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize)]
#[strum(serialize_all = "SCREAMING-KEBAB-CASE")]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum EventKind {
    /// Stream opened.
    Start,
    /// Stream ended, for whatever reason.
    Stop,
    KeepAlive,
    Connected,
    Disconnected,
    Paired,
    Depaired,
    Status,
    Event,
    Notify,
}

impl EventKind {
    /// Kinds whose payload is a list of items.
    pub fn carries_items(self) -> bool {
        matches!(self, Self::Status | Self::Event | Self::Notify)
    }
}

/// A dispatched stream event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamEvent {
    pub kind: EventKind,
    /// Target appliance. `None` on the multiplexed stream's synthetic
    /// events, which concern every appliance.
    pub ha_id: Option<String>,
    pub items: Vec<Item>,
}

impl StreamEvent {
    pub fn new(kind: EventKind, ha_id: Option<String>) -> Self {
        Self {
            kind,
            ha_id,
            items: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ItemsPayload {
    #[serde(default)]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct LifecyclePayload {
    #[serde(rename = "haId")]
    ha_id: Option<String>,
}

/// Turn a frame into an event. `None` for frames that are dropped.
pub(crate) fn decode(frame: Frame, stream_ha_id: Option<&str>) -> Option<StreamEvent> {
    let name = frame.event.as_deref().unwrap_or("message");
    let Ok(kind) = name.parse::<EventKind>() else {
        debug!(event = name, "ignoring unknown event");
        return None;
    };
    match kind {
        EventKind::KeepAlive => {
            trace!("keep-alive");
            return None;
        }
        EventKind::Start | EventKind::Stop => {
            warn!(event = name, "server sent a reserved event name");
            return None;
        }
        _ => {}
    }

    let mut ha_id = frame.id.filter(|id| !id.is_empty());
    let mut items = Vec::new();
    if kind.carries_items() {
        match serde_json::from_str::<ItemsPayload>(&frame.data) {
            Ok(payload) => items = payload.items,
            Err(e) => {
                warn!(event = name, error = %e, data = %frame.data, "unreadable event payload");
                return None;
            }
        }
    } else if ha_id.is_none() {
        ha_id = serde_json::from_str::<LifecyclePayload>(&frame.data)
            .ok()
            .and_then(|p| p.ha_id);
    }

    Some(StreamEvent {
        kind,
        ha_id: ha_id.or_else(|| stream_ha_id.map(str::to_owned)),
        items,
    })
}

// ── Routing ──────────────────────────────────────────────────────────

/// Fan-out of stream events to per-appliance and global subscribers.
///
/// Events addressed to an appliance go to that appliance's channel;
/// unaddressed events go to every appliance. The global channel sees
/// everything.
#[derive(Clone)]
pub struct EventRouter {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    appliances: DashMap<String, broadcast::Sender<Arc<StreamEvent>>>,
    all: broadcast::Sender<Arc<StreamEvent>>,
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("appliances", &self.inner.appliances.len())
            .finish()
    }
}

impl EventRouter {
    pub fn new() -> Self {
        let (all, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(RouterInner {
                appliances: DashMap::new(),
                all,
            }),
        }
    }

    /// Events for one appliance, including unaddressed ones.
    pub fn subscribe(&self, ha_id: &str) -> broadcast::Receiver<Arc<StreamEvent>> {
        self.inner
            .appliances
            .entry(ha_id.to_owned())
            .or_insert_with(|| broadcast::channel(EVENT_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Every event.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Arc<StreamEvent>> {
        self.inner.all.subscribe()
    }

    /// Close an appliance's channel; its receivers see `Closed`.
    pub fn remove(&self, ha_id: &str) {
        self.inner.appliances.remove(ha_id);
    }

    pub fn dispatch(&self, event: StreamEvent) {
        let event = Arc::new(event);
        trace!(kind = %event.kind, ha_id = ?event.ha_id, items = event.items.len(), "dispatch");
        // Send errors only mean nobody is listening right now.
        let _ = self.inner.all.send(Arc::clone(&event));
        match &event.ha_id {
            Some(ha_id) => {
                if let Some(tx) = self.inner.appliances.get(ha_id) {
                    let _ = tx.send(Arc::clone(&event));
                }
            }
            None => {
                for tx in &self.inner.appliances {
                    let _ = tx.send(Arc::clone(&event));
                }
            }
        }
    }
}

// ── Configuration ────────────────────────────────────────────────────

/// Exponential backoff between reconnects. Retries forever.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay after a stream that had opened ends, and before the first
    /// retry of a failed open. Default: 1s.
    pub initial_delay: Duration,
    /// Upper bound on backoff delay. Default: 60s.
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventStreamConfig {
    pub reconnect: ReconnectConfig,
    /// Raw lines kept for the corruption report.
    pub history_lines: usize,
}

impl Default for EventStreamConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            history_lines: 20,
        }
    }
}

// ── Handle ───────────────────────────────────────────────────────────

/// Handle to a running event stream task.
pub struct EventStreamHandle {
    ha_id: Option<String>,
    router: EventRouter,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl EventStreamHandle {
    /// Spawn the stream task for one appliance, or all with `None`.
    ///
    /// Returns immediately; the first connection happens in the background.
    pub fn spawn(
        client: ApiClient,
        ha_id: Option<String>,
        router: EventRouter,
        config: EventStreamConfig,
        cancel: CancellationToken,
    ) -> Self {
        let ctx = StreamContext {
            client,
            ha_id: ha_id.clone(),
            router: router.clone(),
            config,
        };
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move { stream_loop(ctx, task_cancel).await });
        Self {
            ha_id,
            router,
            cancel,
            task,
        }
    }

    /// Events of the stream's appliance, or every event on the
    /// multiplexed stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<StreamEvent>> {
        match &self.ha_id {
            Some(ha_id) => self.router.subscribe(ha_id),
            None => self.router.subscribe_all(),
        }
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    /// Abort the connection and stop reconnecting.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Wait for the task to exit after [`shutdown`](Self::shutdown).
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!(error = %e, "event stream task failed");
        }
    }
}

// ── Background loop ──────────────────────────────────────────────────

struct StreamContext {
    client: ApiClient,
    ha_id: Option<String>,
    router: EventRouter,
    config: EventStreamConfig,
}

/// wait for auth → gate → open → read → STOP → back off → again.
async fn stream_loop(ctx: StreamContext, cancel: CancellationToken) {
    let reporter = ErrorReporter::new();
    let mut attempt: u32 = 0;

    loop {
        let mut started = false;
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            result = connect_and_read(&ctx, &mut started) => Some(result),
        };

        if started {
            ctx.router
                .dispatch(StreamEvent::new(EventKind::Stop, ctx.ha_id.clone()));
        }

        let Some(result) = result else { break };
        match result {
            Ok(()) => {
                info!(ha_id = ?ctx.ha_id, "event stream ended, reconnecting");
                reporter.clear();
            }
            Err(e) => {
                reporter.report("event stream", &e);
            }
        }

        let delay = if started {
            attempt = 0;
            ctx.config.reconnect.initial_delay
        } else {
            let delay = calculate_backoff(attempt, &ctx.config.reconnect);
            attempt = attempt.saturating_add(1);
            delay
        };
        debug!(delay_ms = delay.as_millis(), attempt, "waiting before reconnect");

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    debug!(ha_id = ?ctx.ha_id, "event stream loop exiting");
}

/// One connection: open, dispatch `START`, pump frames until the end.
async fn connect_and_read(ctx: &StreamContext, started: &mut bool) -> Result<(), Error> {
    let auth = ctx.client.auth();
    auth.wait_until_authorised().await;
    ctx.client.gate().wait().await;

    let resp = match ctx.client.open_stream(ctx.ha_id.as_deref()).await {
        Ok(resp) => resp,
        Err(e) => {
            if let Some(invalidation) = e.invalidation() {
                auth.invalidate(invalidation);
            }
            return Err(e);
        }
    };

    *started = true;
    info!(ha_id = ?ctx.ha_id, "event stream connected");
    ctx.router
        .dispatch(StreamEvent::new(EventKind::Start, ctx.ha_id.clone()));

    let url = resp.url().to_string();
    let bytes = resp.bytes_stream().map(move |chunk| {
        chunk.map_err(|source| Error::Transport {
            method: "GET".into(),
            url: url.clone(),
            source,
        })
    });
    let mut frames = std::pin::pin!(sse::frames(bytes, ctx.config.history_lines));
    while let Some(frame) = frames.next().await {
        if let Some(event) = decode(frame?, ctx.ha_id.as_deref()) {
            ctx.router.dispatch(event);
        }
    }
    Ok(())
}

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) * (1 ± 0.25)`
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic spread seeded from the attempt number.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    Duration::from_secs_f64((capped * jitter_factor).max(0.0))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn frame(event: &str, data: &str, id: Option<&str>) -> Frame {
        Frame {
            event: Some(event.into()),
            data: data.into(),
            id: id.map(str::to_owned),
        }
    }

    #[test]
    fn event_names_round_trip() {
        assert_eq!(EventKind::KeepAlive.to_string(), "KEEP-ALIVE");
        assert_eq!("DEPAIRED".parse::<EventKind>().ok(), Some(EventKind::Depaired));
        assert!("BOGUS".parse::<EventKind>().is_err());
    }

    #[test]
    fn keep_alive_is_dropped() {
        assert!(decode(frame("KEEP-ALIVE", "", None), Some("HA")).is_none());
    }

    #[test]
    fn status_items_use_event_id() {
        let event = decode(
            frame(
                "STATUS",
                r#"{"items":[{"key":"BSH.Common.Status.DoorState","value":"BSH.Common.EnumType.DoorState.Open"}]}"#,
                Some("HA-1"),
            ),
            None,
        )
        .unwrap_or_else(|| panic!("STATUS should decode"));
        assert_eq!(event.kind, EventKind::Status);
        assert_eq!(event.ha_id.as_deref(), Some("HA-1"));
        assert_eq!(event.items.len(), 1);
    }

    #[test]
    fn missing_id_falls_back_to_stream_appliance() {
        let event = decode(frame("NOTIFY", r#"{"items":[]}"#, None), Some("HA-2"))
            .unwrap_or_else(|| panic!("NOTIFY should decode"));
        assert_eq!(event.ha_id.as_deref(), Some("HA-2"));
    }

    #[test]
    fn lifecycle_event_reads_ha_id_from_payload() {
        let event = decode(frame("CONNECTED", r#"{"haId":"HA-3"}"#, None), None)
            .unwrap_or_else(|| panic!("CONNECTED should decode"));
        assert_eq!(event.kind, EventKind::Connected);
        assert_eq!(event.ha_id.as_deref(), Some("HA-3"));
    }

    #[tokio::test]
    async fn addressed_events_reach_one_appliance() {
        let router = EventRouter::new();
        let mut a = router.subscribe("A");
        let mut b = router.subscribe("B");
        let mut all = router.subscribe_all();

        router.dispatch(StreamEvent::new(EventKind::Connected, Some("A".into())));
        router.dispatch(StreamEvent::new(EventKind::Start, None));

        assert_eq!(a.recv().await.map(|e| e.kind).ok(), Some(EventKind::Connected));
        assert_eq!(a.recv().await.map(|e| e.kind).ok(), Some(EventKind::Start));
        assert_eq!(b.recv().await.map(|e| e.kind).ok(), Some(EventKind::Start));
        assert_eq!(all.recv().await.map(|e| e.kind).ok(), Some(EventKind::Connected));
        assert_eq!(all.recv().await.map(|e| e.kind).ok(), Some(EventKind::Start));
    }

    #[tokio::test]
    async fn removed_appliance_channel_closes() {
        let router = EventRouter::new();
        let mut rx = router.subscribe("A");
        router.remove("A");
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }

    #[test]
    fn backoff_is_capped() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        };
        assert!(calculate_backoff(0, &config) <= Duration::from_millis(1250));
        assert!(calculate_backoff(20, &config) <= Duration::from_millis(12_500));
        assert!(calculate_backoff(u32::MAX, &config) <= Duration::from_millis(12_500));
    }
}
