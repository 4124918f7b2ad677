//! Setting command handlers.

use homeconnect_core::Platform;

use crate::cli::{GlobalOpts, SettingsArgs, SettingsCommand};
use crate::error::CliError;
use crate::output;

use super::appliances::print_items;
use super::util;

pub async fn handle(
    platform: &Platform,
    args: SettingsArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match args.command {
        SettingsCommand::List(args) => {
            let items = platform.appliance(&args.ha_id)?.get_settings().await?;
            print_items(&items, global);
            Ok(())
        }

        SettingsCommand::Get { ha_id, key } => {
            let item = platform.appliance(&ha_id)?.get_setting(&key).await?;
            print_items(&[item], global);
            Ok(())
        }

        SettingsCommand::Set { ha_id, key, value } => {
            platform
                .appliance(&ha_id)?
                .set_setting(&key, util::parse_value(&value))
                .await?;
            output::print_done(&format!("{key} set to {value}"), global.quiet);
            Ok(())
        }
    }
}
