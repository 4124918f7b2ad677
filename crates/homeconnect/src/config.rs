//! CLI configuration: thin wrapper around `homeconnect_config`.
//!
//! Adds resolution that respects `GlobalOpts` flag overrides.

use std::sync::Arc;
use std::time::Duration;

use homeconnect_core::{ClientConfig, CoreError, JsonFileStore, KeyValueStore};

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub use homeconnect_config::{
    Config, Profile, config_path, load_config, save_config, select_profile, token_store_path,
};

/// A profile resolved into everything needed to build a `Platform`.
pub struct Resolved {
    pub profile_name: String,
    pub client: ClientConfig,
    pub store: Arc<dyn KeyValueStore>,
}

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Load the config file, pick the profile and open its token store.
pub fn resolve(global: &GlobalOpts) -> Result<Resolved, CliError> {
    let cfg = load_config()?;
    let profile_name = active_profile_name(global, &cfg);
    let (profile_name, profile) = select_profile(&cfg, Some(&profile_name)).map_err(|_| {
        let mut names: Vec<&str> = cfg.profiles.keys().map(String::as_str).collect();
        names.sort_unstable();
        if names.is_empty() {
            CliError::NoConfig {
                profile: profile_name.clone(),
                path: config_path().display().to_string(),
            }
        } else {
            CliError::ProfileNotFound {
                name: profile_name.clone(),
                available: names.join(", "),
            }
        }
    })?;

    let mut client =
        homeconnect_config::profile_to_client_config(profile, &profile_name, &cfg.defaults)?;
    if let Some(secs) = global.timeout {
        client.timeout = Duration::from_secs(secs);
    }

    let store = JsonFileStore::open(token_store_path(&profile_name)).map_err(CoreError::from)?;
    Ok(Resolved {
        profile_name,
        client,
        store: Arc::new(store),
    })
}
