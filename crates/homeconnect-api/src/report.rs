use std::fmt::Display;
use std::sync::Mutex;

use tracing::{debug, warn};

/// Log sink for background loops that retry forever.
///
/// A loop that fails the same way on every attempt would otherwise flood
/// the log. Consecutive identical messages are logged once at `warn` and
/// then only at `debug` until a different error (or a success) occurs.
#[derive(Debug, Default)]
pub struct ErrorReporter {
    last: Mutex<Option<String>>,
}

impl ErrorReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report an error. Returns `true` if it was logged at `warn`.
    pub fn report(&self, context: &str, error: &dyn Display) -> bool {
        let message = error.to_string();
        let mut last = self
            .last
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if last.as_deref() == Some(message.as_str()) {
            debug!(context, error = %message, "suppressed repeated error");
            return false;
        }
        warn!(context, error = %message, "{context} failed");
        *last = Some(message);
        true
    }

    /// Forget the last error so the next one is logged again.
    pub fn clear(&self) {
        *self
            .last
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
    }
}
