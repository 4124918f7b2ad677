// ── Write coalescing ──
//
// Writes to one logical operation (e.g. "set the selected program") are
// merged while they wait, and at most one call per operation is in
// flight. Every caller that joined a batch receives the batch's result.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::BoxFuture;
use indexmap::IndexMap;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use homeconnect_api::Item;

use crate::error::CoreError;

/// Merged option set, keyed by option key. Later writers win.
pub type Options = IndexMap<String, Item>;

type Operation = Box<dyn FnOnce(Options) -> BoxFuture<'static, Result<(), CoreError>> + Send>;
type Waiter = oneshot::Sender<Result<(), CoreError>>;

struct Batch {
    options: Options,
    waiters: Vec<Waiter>,
    op: Operation,
}

#[derive(Default)]
struct Slot {
    pending: Option<Batch>,
    running: bool,
}

#[derive(Default)]
pub(crate) struct Serialiser {
    slots: Mutex<HashMap<String, Slot>>,
}

impl Serialiser {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `options` for the operation named `key` and wait for the
    /// call that carries them.
    ///
    /// `op` replaces any operation already queued for `key`; it runs
    /// with the union of every queued caller's options.
    pub(crate) async fn run<F, Fut>(
        self: &Arc<Self>,
        key: &str,
        options: Options,
        op: F,
    ) -> Result<(), CoreError>
    where
        F: FnOnce(Options) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), CoreError>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let op: Operation = Box::new(move |options| Box::pin(op(options)));

        let start = {
            let mut slots = self.lock();
            let slot = slots.entry(key.to_owned()).or_default();
            match slot.pending.as_mut() {
                Some(batch) => {
                    trace!(key, "coalescing write");
                    batch.options.extend(options);
                    batch.waiters.push(tx);
                    batch.op = op;
                }
                None => {
                    slot.pending = Some(Batch {
                        options,
                        waiters: vec![tx],
                        op,
                    });
                }
            }
            let start = !slot.running;
            slot.running = true;
            start
        };

        if start {
            tokio::spawn(Arc::clone(self).drive(key.to_owned()));
        }

        rx.await
            .unwrap_or_else(|_| Err(CoreError::Internal(format!("operation '{key}' abandoned"))))
    }

    /// Run queued batches for `key` one after another until none remain.
    async fn drive(self: Arc<Self>, key: String) {
        loop {
            // Let callers issued in the same tick join this batch.
            tokio::task::yield_now().await;

            let batch = {
                let mut slots = self.lock();
                let next = slots.get_mut(&key).and_then(|slot| slot.pending.take());
                if next.is_none() {
                    slots.remove(&key);
                }
                next
            };
            let Some(batch) = batch else {
                return;
            };

            debug!(
                key = %key,
                callers = batch.waiters.len(),
                options = batch.options.len(),
                "running serialised write"
            );
            let result = (batch.op)(batch.options).await;
            for waiter in batch.waiters {
                let _ = waiter.send(result.clone());
            }
        }
    }
}

/// Build an option set from items.
pub fn options<I>(items: I) -> Options
where
    I: IntoIterator<Item = Item>,
{
    items
        .into_iter()
        .map(|item| (item.key.clone(), item))
        .collect()
}
