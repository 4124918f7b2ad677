// ── Per-appliance item cache ──
//
// Last-known value for every status, setting, option and event key.
// A batch is fully applied before any listener hears about it.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tracing::warn;

use homeconnect_api::Item;

use crate::error::CoreError;

const EVENT_CHANNEL_SIZE: usize = 256;

/// Everything an appliance announces to its collaborators.
#[derive(Debug, Clone)]
pub enum ApplianceEvent {
    /// One item changed. Emitted in batch order after the whole batch
    /// is in the cache.
    Item(Item),
    /// The `connected` flag flipped.
    Connected(bool),
    /// The appliance was removed from the account.
    Depaired,
    /// A background loop failed. Repeats of the same error are not sent.
    Error(CoreError),
}

pub(crate) struct ItemCache {
    items: Mutex<HashMap<String, Item>>,
    events: broadcast::Sender<ApplianceEvent>,
}

impl ItemCache {
    pub(crate) fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            items: Mutex::new(HashMap::new()),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Item>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Merge `items`, then notify once per item in input order.
    pub(crate) fn update(&self, items: Vec<Item>) {
        if items.is_empty() {
            return;
        }
        {
            let mut cache = self.lock();
            for item in &items {
                cache.insert(item.key.clone(), item.clone());
            }
        }
        for item in items {
            // No receivers is fine.
            let _ = self.events.send(ApplianceEvent::Item(item));
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<Item> {
        self.lock().get(key).cloned()
    }

    pub(crate) fn snapshot(&self) -> Vec<Item> {
        let mut items: Vec<Item> = self.lock().values().cloned().collect();
        items.sort_by(|a, b| a.key.cmp(&b.key));
        items
    }

    pub(crate) fn emit(&self, event: ApplianceEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ApplianceEvent> {
        self.events.subscribe()
    }
}

/// Receives the changes of a single item key.
pub struct ItemListener {
    key: String,
    rx: broadcast::Receiver<ApplianceEvent>,
}

impl ItemListener {
    pub(crate) fn new(key: String, rx: broadcast::Receiver<ApplianceEvent>) -> Self {
        Self { key, rx }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Next value for the key. `None` once the appliance is gone.
    pub async fn recv(&mut self) -> Option<Item> {
        loop {
            match self.rx.recv().await {
                Ok(ApplianceEvent::Item(item)) if item.key == self.key => return Some(item),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(key = %self.key, skipped = n, "item listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn listeners_observe_whole_batch() {
        let cache = Arc::new(ItemCache::new());
        let mut rx = cache.subscribe();

        cache.update(vec![
            Item::new("Status", "Run"),
            Item::new("Temperature", 80),
        ]);

        // The first notification already sees the second item.
        match rx.recv().await.unwrap() {
            ApplianceEvent::Item(item) => {
                assert_eq!(item.key, "Status");
                assert_eq!(cache.get("Temperature").unwrap().value, json!(80));
            }
            other => panic!("unexpected {other:?}"),
        }
        match rx.recv().await.unwrap() {
            ApplianceEvent::Item(item) => assert_eq!(item.key, "Temperature"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn item_listener_filters_by_key() {
        let cache = ItemCache::new();
        let mut listener = ItemListener::new("Door".into(), cache.subscribe());

        cache.emit(ApplianceEvent::Connected(true));
        cache.update(vec![Item::new("Light", true), Item::new("Door", "Open")]);

        let item = listener.recv().await.unwrap();
        assert_eq!(item.value, json!("Open"));
    }

    #[test]
    fn later_value_overwrites() {
        let cache = ItemCache::new();
        cache.update(vec![Item::new("A", 1)]);
        cache.update(vec![Item::new("A", 2), Item::new("B", 3)]);
        assert_eq!(cache.get("A").unwrap().value, json!(2));
        assert_eq!(cache.snapshot().len(), 2);
    }
}
