//! Process-wide rate-limit gate.
//!
//! The vendor's rate limit is account-wide, so a single "earliest allowed
//! time" is shared by every REST request and every event stream
//! (re)connect. A 429 advances it; everybody waits it out together.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Shared earliest-retry gate. Cheap to clone; clones share state.
#[derive(Debug, Clone, Default)]
pub struct RateGate {
    earliest: Arc<Mutex<Option<Instant>>>,
}

impl RateGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push the gate out to `now + delay`. Never moves it earlier.
    pub fn defer(&self, delay: Duration) {
        let until = Instant::now() + delay;
        let mut earliest = self.lock();
        if earliest.is_none_or(|current| until > current) {
            debug!(delay_ms = delay.as_millis(), "rate gate deferred");
            *earliest = Some(until);
        }
    }

    /// The instant before which no request may be sent, if in the future.
    pub fn earliest(&self) -> Option<Instant> {
        let earliest = *self.lock();
        earliest.filter(|t| *t > Instant::now())
    }

    /// Sleep until the gate is open. Concurrent waiters share the same
    /// deadline rather than queueing behind each other.
    pub async fn wait(&self) {
        // Re-check after each sleep: the gate may have moved meanwhile.
        while let Some(until) = self.earliest() {
            tokio::time::sleep_until(until).await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        self.earliest
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
