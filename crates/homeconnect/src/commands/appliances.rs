//! Appliance list and status handlers.

use tabled::Tabled;

use homeconnect_core::{Appliance, ApplianceInfo, Item, Platform};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

use super::util;

// ── Table rows ──────────────────────────────────────────────────────

#[derive(Tabled)]
struct ApplianceRow {
    #[tabled(rename = "haId")]
    ha_id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Brand")]
    brand: String,
    #[tabled(rename = "State")]
    state: String,
}

#[derive(Tabled)]
struct ItemRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Value")]
    value: String,
}

impl From<&Item> for ItemRow {
    fn from(item: &Item) -> Self {
        Self {
            key: item.key.clone(),
            value: util::display_value(item),
        }
    }
}

// ── Handlers ────────────────────────────────────────────────────────

pub fn list(platform: &Platform, global: &GlobalOpts) -> Result<(), CliError> {
    let color = output::should_color(&global.color);
    let infos: Vec<ApplianceInfo> = platform.appliances().iter().map(Appliance::info).collect();
    let out = output::render_list(
        &global.output,
        &infos,
        |info| ApplianceRow {
            ha_id: info.ha_id.clone(),
            name: info.name.clone(),
            kind: info.kind.clone(),
            brand: info.brand.clone(),
            state: output::connection_label(info.connected, color),
        },
        |info| info.ha_id.clone(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn status(appliance: &Appliance, global: &GlobalOpts) -> Result<(), CliError> {
    let items = appliance.get_status().await?;
    print_items(&items, global);
    Ok(())
}

/// Render status or setting items as a key/value table.
pub(super) fn print_items(items: &[Item], global: &GlobalOpts) {
    let out = output::render_list(&global.output, items, |item| ItemRow::from(item), |item| {
        format!("{}={}", item.key, util::display_value(item))
    });
    output::print_output(&out, global.quiet);
}
