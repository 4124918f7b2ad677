// ── Appliance reads and writes ──
//
// Every operation checks its scope and preconditions first. Writes run
// through the serialiser and update the cache with what was sent once
// the vendor accepts it.

use serde_json::Value;

use homeconnect_api::types::keys;
use homeconnect_api::{CommandInfo, Item, Program, ProgramDefinition, ProgramSummary};

use super::serialise::{Options, options};
use super::sync::program_items;
use super::Appliance;
use crate::error::CoreError;

impl Appliance {
    // ── Status ───────────────────────────────────────────────────────

    pub async fn get_status(&self) -> Result<Vec<Item>, CoreError> {
        self.require_monitor()?;
        let items = self.client().get_status(self.ha_id()).await?;
        self.update(items.clone());
        Ok(items)
    }

    // ── Settings ─────────────────────────────────────────────────────

    pub async fn get_settings(&self) -> Result<Vec<Item>, CoreError> {
        self.require_settings()?;
        self.require_connected()?;
        let items = self.client().get_settings(self.ha_id()).await?;
        self.update(items.clone());
        Ok(items)
    }

    pub async fn get_setting(&self, key: &str) -> Result<Item, CoreError> {
        self.require_settings()?;
        self.require_connected()?;
        let item = self.client().get_setting(self.ha_id(), key).await?;
        self.update(vec![item.clone()]);
        Ok(item)
    }

    pub async fn set_setting(&self, key: &str, value: Value) -> Result<(), CoreError> {
        self.require_settings()?;
        self.require_connected()?;
        let appliance = self.clone();
        self.serialise(
            &format!("setting {key}"),
            options([Item::new(key, value)]),
            move |merged| async move {
                for item in merged.values() {
                    appliance
                        .client()
                        .set_setting(appliance.ha_id(), &item.key, item.value.clone())
                        .await?;
                }
                appliance.update(merged.into_values().collect());
                Ok::<(), CoreError>(())
            },
        )
        .await
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub async fn get_commands(&self) -> Result<Vec<CommandInfo>, CoreError> {
        self.require_control()?;
        Ok(self.client().get_commands(self.ha_id()).await?)
    }

    pub async fn execute_command(&self, command: &str) -> Result<(), CoreError> {
        self.require_remote_control()?;
        let appliance = self.clone();
        let command = command.to_owned();
        self.serialise(
            &format!("command {command}"),
            Options::new(),
            move |_| async move {
                appliance
                    .client()
                    .put_command(appliance.ha_id(), &command)
                    .await?;
                Ok::<(), CoreError>(())
            },
        )
        .await
    }

    pub async fn pause_program(&self) -> Result<(), CoreError> {
        self.execute_command(keys::PAUSE_PROGRAM).await
    }

    pub async fn resume_program(&self) -> Result<(), CoreError> {
        self.execute_command(keys::RESUME_PROGRAM).await
    }

    // ── Program definitions ──────────────────────────────────────────

    /// Every program the appliance knows. Cached.
    pub async fn get_all_programs(&self) -> Result<Vec<ProgramSummary>, CoreError> {
        self.require_control()?;
        let client = self.client().clone();
        let ha_id = self.ha_id().to_owned();
        self.get_cached("programs", || async move {
            client.get_all_programs(&ha_id).await.map_err(CoreError::from)
        })
        .await
    }

    /// Programs that can be selected right now.
    pub async fn get_available_programs(&self) -> Result<Vec<ProgramSummary>, CoreError> {
        self.require_control()?;
        self.require_connected()?;
        Ok(self.client().get_available_programs(self.ha_id()).await?)
    }

    /// Option metadata for one program. Cached.
    pub async fn get_available_program(
        &self,
        program: &str,
    ) -> Result<ProgramDefinition, CoreError> {
        self.require_control()?;
        let client = self.client().clone();
        let ha_id = self.ha_id().to_owned();
        let key = program.to_owned();
        self.get_cached(&format!("program {program}"), || async move {
            client
                .get_available_program(&ha_id, &key)
                .await
                .map_err(CoreError::from)
        })
        .await
    }

    // ── Selected program ─────────────────────────────────────────────

    pub async fn get_selected_program(&self) -> Result<Option<Program>, CoreError> {
        self.require_control()?;
        let program = self.client().get_selected_program(self.ha_id()).await?;
        self.update(program_items(keys::SELECTED_PROGRAM, program.clone()));
        Ok(program)
    }

    /// Select `program` with `options`. Concurrent selections merge;
    /// the last program named wins.
    pub async fn set_selected_program(
        &self,
        program: &str,
        program_options: Vec<Item>,
    ) -> Result<(), CoreError> {
        self.require_remote_control()?;
        let mut merged = options([Item::new(keys::SELECTED_PROGRAM, program)]);
        merged.extend(options(program_options));
        let appliance = self.clone();
        self.serialise("selected program", merged, move |mut merged| async move {
            let program = take_program(&mut merged, keys::SELECTED_PROGRAM)
                .ok_or_else(|| CoreError::Internal("selected program key missing".into()))?;
            let items: Vec<Item> = merged.into_values().collect();
            appliance
                .client()
                .set_selected_program(appliance.ha_id(), &program, &items)
                .await?;
            let mut cached = vec![Item::new(keys::SELECTED_PROGRAM, program)];
            cached.extend(items);
            appliance.update(cached);
            Ok::<(), CoreError>(())
        })
        .await
    }

    pub async fn set_selected_program_option(&self, option: Item) -> Result<(), CoreError> {
        self.require_remote_control()?;
        let appliance = self.clone();
        self.serialise("selected options", options([option]), move |merged| async move {
            for item in merged.values() {
                appliance
                    .client()
                    .set_selected_program_option(appliance.ha_id(), item)
                    .await?;
            }
            appliance.update(merged.into_values().collect());
            Ok::<(), CoreError>(())
        })
        .await
    }

    // ── Active program ───────────────────────────────────────────────

    pub async fn get_active_program(&self) -> Result<Option<Program>, CoreError> {
        self.require_control()?;
        let program = self.client().get_active_program(self.ha_id()).await?;
        self.update(program_items(keys::ACTIVE_PROGRAM, program.clone()));
        Ok(program)
    }

    /// Start `program`, or the selected program if `None`.
    pub async fn start_program(
        &self,
        program: Option<&str>,
        program_options: Vec<Item>,
    ) -> Result<(), CoreError> {
        self.require_remote_start()?;
        let program = match program {
            Some(program) => program.to_owned(),
            None => self.selected_program_key().await?,
        };

        let mut merged = options([Item::new(keys::ACTIVE_PROGRAM, program)]);
        merged.extend(options(program_options));
        let appliance = self.clone();
        self.serialise("start program", merged, move |mut merged| async move {
            let program = take_program(&mut merged, keys::ACTIVE_PROGRAM)
                .ok_or_else(|| CoreError::Internal("program key missing".into()))?;
            let items: Vec<Item> = merged.into_values().collect();
            appliance
                .client()
                .start_program(appliance.ha_id(), &program, &items)
                .await?;
            let mut cached = vec![Item::new(keys::ACTIVE_PROGRAM, program)];
            cached.extend(items);
            appliance.update(cached);
            Ok::<(), CoreError>(())
        })
        .await
    }

    pub async fn stop_program(&self) -> Result<(), CoreError> {
        self.require_remote_control()?;
        let appliance = self.clone();
        self.serialise("stop program", Options::new(), move |_| async move {
            appliance
                .client()
                .stop_program(appliance.ha_id())
                .await
                .map_err(|e| appliance.no_active_program(e))?;
            appliance.update(vec![Item::new(keys::ACTIVE_PROGRAM, Value::Null)]);
            Ok::<(), CoreError>(())
        })
        .await
    }

    /// Change one option of the running program. Near-simultaneous
    /// changes go out in a single request.
    pub async fn set_active_program_option(&self, option: Item) -> Result<(), CoreError> {
        self.require_remote_control()?;
        let appliance = self.clone();
        self.serialise("active options", options([option]), move |merged| async move {
            let items: Vec<Item> = merged.into_values().collect();
            let client = appliance.client();
            let result = match items.as_slice() {
                [single] => client.set_active_program_option(appliance.ha_id(), single).await,
                _ => client.set_active_program_options(appliance.ha_id(), &items).await,
            };
            result.map_err(|e| appliance.no_active_program(e))?;
            appliance.update(items);
            Ok::<(), CoreError>(())
        })
        .await
    }

    // ── Helpers ──────────────────────────────────────────────────────

    async fn serialise<F, Fut>(&self, key: &str, options: Options, op: F) -> Result<(), CoreError>
    where
        F: FnOnce(Options) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<(), CoreError>> + Send + 'static,
    {
        self.inner.serialiser.run(key, options, op).await
    }

    /// The selected program from the cache, read from the appliance if
    /// the cache has none.
    async fn selected_program_key(&self) -> Result<String, CoreError> {
        let cached = self
            .get_item(keys::SELECTED_PROGRAM)
            .and_then(|item| item.value.as_str().map(str::to_owned));
        if let Some(program) = cached {
            return Ok(program);
        }
        self.get_selected_program()
            .await?
            .map(|program| program.key)
            .ok_or_else(|| CoreError::NoProgramSelected {
                ha_id: self.ha_id().to_owned(),
            })
    }

    /// Name the vendor's "no active program" rejection as a precondition.
    fn no_active_program(&self, err: homeconnect_api::Error) -> CoreError {
        if err.vendor_key() == Some(keys::NO_PROGRAM_ACTIVE) {
            CoreError::NoProgramActive {
                ha_id: self.ha_id().to_owned(),
            }
        } else {
            err.into()
        }
    }
}

/// Remove the program key stored under `root`.
fn take_program(merged: &mut Options, root: &str) -> Option<String> {
    merged
        .shift_remove(root)
        .and_then(|item| item.value.as_str().map(str::to_owned))
}
