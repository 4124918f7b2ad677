// Typed wrappers for the `/api/homeappliances` resources.

use serde_json::{Value, json};

use crate::client::ApiClient;
use crate::error::Error;
use crate::types::{
    ApplianceInfo, ApplianceList, CommandInfo, CommandList, Item, OptionList, Program,
    ProgramDefinition, ProgramList, ProgramSummary, SettingList, StatusList, keys,
};

const ROOT: &str = "homeappliances";

impl ApiClient {
    // ── Appliances ───────────────────────────────────────────────────

    pub async fn list_appliances(&self) -> Result<Vec<ApplianceInfo>, Error> {
        let list: ApplianceList = self.get(&[ROOT]).await?;
        Ok(list.homeappliances)
    }

    pub async fn get_appliance(&self, ha_id: &str) -> Result<ApplianceInfo, Error> {
        self.get(&[ROOT, ha_id]).await
    }

    // ── Status ───────────────────────────────────────────────────────

    pub async fn get_status(&self, ha_id: &str) -> Result<Vec<Item>, Error> {
        let list: StatusList = self.get(&[ROOT, ha_id, "status"]).await?;
        Ok(list.status)
    }

    pub async fn get_status_item(&self, ha_id: &str, key: &str) -> Result<Item, Error> {
        self.get(&[ROOT, ha_id, "status", key]).await
    }

    // ── Settings ─────────────────────────────────────────────────────

    pub async fn get_settings(&self, ha_id: &str) -> Result<Vec<Item>, Error> {
        let list: SettingList = self.get(&[ROOT, ha_id, "settings"]).await?;
        Ok(list.settings)
    }

    pub async fn get_setting(&self, ha_id: &str, key: &str) -> Result<Item, Error> {
        self.get(&[ROOT, ha_id, "settings", key]).await
    }

    pub async fn set_setting(&self, ha_id: &str, key: &str, value: Value) -> Result<(), Error> {
        self.put(
            &[ROOT, ha_id, "settings", key],
            json!({ "key": key, "value": value }),
        )
        .await
    }

    // ── Programs ─────────────────────────────────────────────────────

    pub async fn get_all_programs(&self, ha_id: &str) -> Result<Vec<ProgramSummary>, Error> {
        let list: ProgramList = self.get(&[ROOT, ha_id, "programs"]).await?;
        Ok(list.programs)
    }

    pub async fn get_available_programs(&self, ha_id: &str) -> Result<Vec<ProgramSummary>, Error> {
        let list: ProgramList = self.get(&[ROOT, ha_id, "programs", "available"]).await?;
        Ok(list.programs)
    }

    pub async fn get_available_program(
        &self,
        ha_id: &str,
        program: &str,
    ) -> Result<ProgramDefinition, Error> {
        self.get(&[ROOT, ha_id, "programs", "available", program])
            .await
    }

    /// `None` if the appliance reports no selected program.
    pub async fn get_selected_program(&self, ha_id: &str) -> Result<Option<Program>, Error> {
        absent_on(
            self.get(&[ROOT, ha_id, "programs", "selected"]).await,
            keys::NO_PROGRAM_SELECTED,
        )
    }

    pub async fn set_selected_program(
        &self,
        ha_id: &str,
        program: &str,
        options: &[Item],
    ) -> Result<(), Error> {
        self.put(
            &[ROOT, ha_id, "programs", "selected"],
            program_body(program, options),
        )
        .await
    }

    pub async fn set_selected_program_option(
        &self,
        ha_id: &str,
        option: &Item,
    ) -> Result<(), Error> {
        self.put(
            &[ROOT, ha_id, "programs", "selected", "options", &option.key],
            option_body(option),
        )
        .await
    }

    /// `None` if no program is running.
    pub async fn get_active_program(&self, ha_id: &str) -> Result<Option<Program>, Error> {
        absent_on(
            self.get(&[ROOT, ha_id, "programs", "active"]).await,
            keys::NO_PROGRAM_ACTIVE,
        )
    }

    pub async fn get_active_program_options(&self, ha_id: &str) -> Result<Vec<Item>, Error> {
        let list: OptionList = self
            .get(&[ROOT, ha_id, "programs", "active", "options"])
            .await?;
        Ok(list.options)
    }

    /// Start `program` with `options`.
    pub async fn start_program(
        &self,
        ha_id: &str,
        program: &str,
        options: &[Item],
    ) -> Result<(), Error> {
        self.put(
            &[ROOT, ha_id, "programs", "active"],
            program_body(program, options),
        )
        .await
    }

    pub async fn stop_program(&self, ha_id: &str) -> Result<(), Error> {
        self.delete(&[ROOT, ha_id, "programs", "active"]).await
    }

    /// Change several options of the running program in one request.
    pub async fn set_active_program_options(
        &self,
        ha_id: &str,
        options: &[Item],
    ) -> Result<(), Error> {
        let options: Vec<Value> = options.iter().map(option_body).collect();
        self.put(
            &[ROOT, ha_id, "programs", "active", "options"],
            json!({ "options": options }),
        )
        .await
    }

    pub async fn set_active_program_option(
        &self,
        ha_id: &str,
        option: &Item,
    ) -> Result<(), Error> {
        self.put(
            &[ROOT, ha_id, "programs", "active", "options", &option.key],
            option_body(option),
        )
        .await
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub async fn get_commands(&self, ha_id: &str) -> Result<Vec<CommandInfo>, Error> {
        let list: CommandList = self.get(&[ROOT, ha_id, "commands"]).await?;
        Ok(list.commands)
    }

    pub async fn put_command(&self, ha_id: &str, command: &str) -> Result<(), Error> {
        self.put(
            &[ROOT, ha_id, "commands", command],
            json!({ "key": command, "value": true }),
        )
        .await
    }
}

fn option_body(option: &Item) -> Value {
    match &option.unit {
        Some(unit) => json!({ "key": option.key, "value": option.value, "unit": unit }),
        None => json!({ "key": option.key, "value": option.value }),
    }
}

fn program_body(program: &str, options: &[Item]) -> Value {
    if options.is_empty() {
        return json!({ "key": program });
    }
    let options: Vec<Value> = options.iter().map(option_body).collect();
    json!({ "key": program, "options": options })
}

/// Turn the vendor's "nothing there" rejection into `None`.
fn absent_on(result: Result<Program, Error>, key: &str) -> Result<Option<Program>, Error> {
    match result {
        Ok(program) => Ok(Some(program)),
        Err(e) if e.vendor_key() == Some(key) => Ok(None),
        Err(e) => Err(e),
    }
}
