//! Config subcommand handlers.

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{self, Config, Profile};
use crate::error::CliError;
use crate::output;

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Init {
            client_id,
            server,
            client_secret,
        } => {
            if client_id.trim().is_empty() {
                return Err(CliError::Validation {
                    field: "client_id".into(),
                    reason: "client id cannot be empty".into(),
                });
            }
            let mut cfg = config::load_config()?;
            let profile_name = config::active_profile_name(global, &cfg);

            if let Some(secret) = client_secret {
                homeconnect_config::store_client_secret(&profile_name, &secret)?;
            }
            cfg.profiles.insert(
                profile_name.clone(),
                Profile {
                    server: server.as_str().into(),
                    client_id,
                    ..Profile::default()
                },
            );
            if cfg.default_profile.is_none() || cfg.profiles.len() == 1 {
                cfg.default_profile = Some(profile_name.clone());
            }
            config::save_config(&cfg)?;

            output::print_done(
                &format!(
                    "Profile '{profile_name}' saved to {}\nNext: homeconnect auth login",
                    config::config_path().display()
                ),
                global.quiet,
            );
            Ok(())
        }

        ConfigCommand::Show => {
            let mut cfg = config::load_config()?;
            for profile in cfg.profiles.values_mut() {
                if profile.client_secret.is_some() {
                    profile.client_secret = Some("********".into());
                }
            }
            let out = output::render_single(&global.output, &cfg, show_toml, |c| {
                c.default_profile.clone().unwrap_or_default()
            });
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Path => {
            output::print_output(&config::config_path().display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::Profiles => {
            let cfg = config::load_config()?;
            let mut names: Vec<&String> = cfg.profiles.keys().collect();
            names.sort();
            let lines: Vec<String> = names
                .into_iter()
                .map(|name| {
                    if cfg.default_profile.as_ref() == Some(name) {
                        format!("{name} *")
                    } else {
                        name.clone()
                    }
                })
                .collect();
            output::print_output(&lines.join("\n"), global.quiet);
            Ok(())
        }

        ConfigCommand::Use { name } => {
            let mut cfg = config::load_config()?;
            if !cfg.profiles.contains_key(&name) {
                let mut available: Vec<&str> = cfg.profiles.keys().map(String::as_str).collect();
                available.sort_unstable();
                return Err(CliError::ProfileNotFound {
                    name,
                    available: available.join(", "),
                });
            }
            cfg.default_profile = Some(name.clone());
            config::save_config(&cfg)?;
            output::print_done(&format!("Default profile is now '{name}'"), global.quiet);
            Ok(())
        }
    }
}

fn show_toml(cfg: &Config) -> String {
    toml::to_string_pretty(cfg).unwrap_or_else(|e| format!("error: {e}"))
}
