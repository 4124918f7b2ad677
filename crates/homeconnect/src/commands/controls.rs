//! Appliance command handlers (`BSH.Common.Command.*`).

use tabled::Tabled;

use homeconnect_core::{CommandInfo, Platform};

use crate::cli::{CommandsArgs, CommandsCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct CommandRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Name")]
    name: String,
}

impl From<&CommandInfo> for CommandRow {
    fn from(c: &CommandInfo) -> Self {
        Self {
            key: c.key.clone(),
            name: c.name.clone().unwrap_or_default(),
        }
    }
}

pub async fn handle(
    platform: &Platform,
    args: CommandsArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match args.command {
        CommandsCommand::List(args) => {
            let commands = platform.appliance(&args.ha_id)?.get_commands().await?;
            let out = output::render_list(
                &global.output,
                &commands,
                |c| CommandRow::from(c),
                |c| c.key.clone(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }

        CommandsCommand::Run { ha_id, command } => {
            platform
                .appliance(&ha_id)?
                .execute_command(&command)
                .await?;
            output::print_done(&format!("{command} sent"), global.quiet);
            Ok(())
        }
    }
}
