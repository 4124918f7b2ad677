//! Command dispatch: bridges CLI args -> platform calls -> output formatting.

pub mod appliances;
pub mod auth;
pub mod config_cmd;
pub mod controls;
pub mod programs;
pub mod settings;
pub mod util;
pub mod watch;

use std::time::Duration;

use homeconnect_core::Platform;

use crate::cli::{Command, GlobalOpts};
use crate::config::Resolved;
use crate::error::CliError;

/// Dispatch a platform-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, resolved: Resolved, global: &GlobalOpts) -> Result<(), CliError> {
    if let Command::Auth(args) = cmd {
        return auth::handle(args, resolved, global).await;
    }

    let mut client = resolved.client;
    if matches!(cmd, Command::Watch(_)) {
        client.stream_mode = watch::stream_mode(client.stream_mode);
    } else {
        client.stream_mode = homeconnect_core::StreamMode::Off;
    }
    let platform = Platform::new(client, resolved.store)?;
    if !platform.auth().has_credentials() {
        return Err(CliError::NotLoggedIn {
            profile: resolved.profile_name,
        });
    }

    connect(&platform, global).await?;
    let result = async {
        match cmd {
            Command::Appliances => appliances::list(&platform, global),
            Command::Status(args) => {
                appliances::status(&platform.appliance(&args.ha_id)?, global).await
            }
            Command::Settings(args) => settings::handle(&platform, args, global).await,
            Command::Programs(args) => programs::handle(&platform, args, global).await,
            Command::Commands(args) => controls::handle(&platform, args, global).await,
            Command::Watch(args) => watch::handle(&platform, args, global).await,
            // Auth, Config and Completions never reach the platform
            Command::Auth(_) | Command::Config(_) | Command::Completions(_) => unreachable!(),
        }
    }
    .await;
    platform.shutdown().await;
    result
}

/// Start the platform and wait for the first appliance list.
async fn connect(platform: &Platform, global: &GlobalOpts) -> Result<(), CliError> {
    platform.start();
    let limit = Duration::from_secs(global.discovery_timeout);
    if tokio::time::timeout(limit, platform.wait_discovered())
        .await
        .is_err()
    {
        platform.shutdown().await;
        return Err(CliError::Timeout {
            seconds: global.discovery_timeout,
        });
    }
    Ok(())
}
