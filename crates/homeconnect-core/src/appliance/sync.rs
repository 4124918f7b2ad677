// ── Resync after reconnect ──
//
// Reads status, settings and (when tracked) programs back into the cache
// whenever the appliance comes online. Only one resync runs at a time; a
// reconnect during a resync makes it start over once it finishes.

use std::sync::{MutexGuard, PoisonError};

use tracing::{debug, info};

use homeconnect_api::types::keys;
use homeconnect_api::{Item, Program};

use super::{Appliance, Scope};
use crate::error::CoreError;

#[derive(Debug, Default)]
pub(crate) struct ResyncState {
    /// A resync task exists.
    pending: bool,
    /// Bumped on every scheduling request.
    generation: u64,
}

impl Appliance {
    fn lock_resync(&self) -> MutexGuard<'_, ResyncState> {
        self.inner
            .resync
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a resync unless one is already pending.
    pub(crate) fn schedule_resync(&self) {
        if !self.settings().resync_on_connect || self.is_cancelled() {
            return;
        }
        {
            let mut state = self.lock_resync();
            state.generation = state.generation.wrapping_add(1);
            if state.pending {
                debug!(ha_id = %self.ha_id(), "resync still pending");
                return;
            }
            state.pending = true;
        }
        let appliance = self.clone();
        let handle = tokio::spawn(async move { appliance.resync_loop().await });
        self.track(handle);
    }

    async fn resync_loop(&self) {
        let mut attempt = 0u32;
        loop {
            let generation = {
                let mut state = self.lock_resync();
                if !self.is_connected() || self.is_cancelled() {
                    state.pending = false;
                    debug!(ha_id = %self.ha_id(), "resync abandoned");
                    return;
                }
                state.generation
            };

            match self.resync_once().await {
                Ok(()) => {
                    self.inner.reporter.clear();
                    let mut state = self.lock_resync();
                    if state.generation == generation {
                        state.pending = false;
                        info!(ha_id = %self.ha_id(), "appliance state resynchronised");
                        return;
                    }
                    attempt = 0;
                    debug!(ha_id = %self.ha_id(), "reconnected during resync, repeating");
                }
                Err(e) => {
                    self.report("resync", e);
                    let delay = self.settings().resync.delay(attempt);
                    attempt = attempt.saturating_add(1);
                    debug!(ha_id = %self.ha_id(), attempt, ?delay, "resync retry scheduled");

                    let mut connected = self.watch_connected();
                    let disconnected = async {
                        let _ = connected.wait_for(|c| !*c).await;
                    };
                    tokio::select! {
                        biased;
                        () = self.inner.cancel.cancelled() => {}
                        () = disconnected => {}
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// One pass over every readable resource.
    async fn resync_once(&self) -> Result<(), CoreError> {
        let client = self.client();
        let ha_id = self.ha_id();

        if self.has_scope(Scope::Monitor) {
            let status = client.get_status(ha_id).await?;
            self.update(status);
        }
        if self.has_scope(Scope::Settings) {
            let settings = client.get_settings(ha_id).await?;
            self.update(settings);
        }
        if self.polling_programs() && self.has_scope(Scope::Control) {
            let selected = client.get_selected_program(ha_id).await?;
            self.update(program_items(keys::SELECTED_PROGRAM, selected));
            let active = client.get_active_program(ha_id).await?;
            self.update(program_items(keys::ACTIVE_PROGRAM, active));
        }
        Ok(())
    }
}

/// The program key under `root` followed by its options. No program
/// yields a null root item.
pub(crate) fn program_items(root: &str, program: Option<Program>) -> Vec<Item> {
    match program {
        Some(program) => {
            let mut items = Vec::with_capacity(program.options.len() + 1);
            let mut root_item = Item::new(root, program.key);
            root_item.name = program.name;
            items.push(root_item);
            items.extend(program.options);
            items
        }
        None => vec![Item::new(root, serde_json::Value::Null)],
    }
}
