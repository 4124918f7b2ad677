//! Shared configuration for Home Connect tools.
//!
//! TOML profiles, client-secret resolution (env + keyring + plaintext),
//! the token store location, and translation to
//! `homeconnect_core::ClientConfig`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use homeconnect_core::{ClientConfig, ScopeOverride, Server, StreamMode};

const KEYRING_SERVICE: &str = "homeconnect";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{profile}' not found")]
    UnknownProfile { profile: String },

    #[error("no client id configured for profile '{profile}'")]
    NoClientId { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named OAuth client profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default = "default_language")]
    pub language: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            timeout: default_timeout(),
            language: default_language(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    30
}
fn default_language() -> String {
    "en-GB".into()
}

/// A named OAuth client profile.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Profile {
    /// "production" or "simulator".
    #[serde(default = "default_server")]
    pub server: String,

    /// Replaces the server's base URL.
    pub base_url: Option<String>,

    /// OAuth client id from the developer portal.
    #[serde(default)]
    pub client_id: String,

    /// Client secret (plaintext; prefer keyring or env var).
    pub client_secret: Option<String>,

    /// Environment variable name containing the client secret.
    pub client_secret_env: Option<String>,

    /// Scopes to request. Defaults to all four.
    pub scopes: Option<Vec<String>>,

    /// Override the default `Accept-Language`.
    pub language: Option<String>,

    /// Override the default request timeout, in seconds.
    pub timeout: Option<u64>,

    /// Refresh lead time before expiry, e.g. "1h".
    pub refresh_window: Option<String>,

    /// Program definition cache lifetime, e.g. "24h".
    pub cache_ttl: Option<String>,

    /// "all", "per-appliance" or "off".
    pub stream: Option<String>,

    /// Track selected/active programs.
    pub poll_programs: Option<bool>,

    /// Consecutive rate-limited attempts before escalating the log level.
    pub rate_limit_escalation: Option<u32>,

    /// Per appliance type scope adjustments.
    #[serde(default)]
    pub scope_overrides: HashMap<String, ScopeOverrideConfig>,
}

fn default_server() -> String {
    "production".into()
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct ScopeOverrideConfig {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

impl From<ScopeOverrideConfig> for ScopeOverride {
    fn from(cfg: ScopeOverrideConfig) -> Self {
        Self {
            allow: cfg.allow,
            deny: cfg.deny,
        }
    }
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "homeconnect", "homeconnect")
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("homeconnect");
    p
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Where a profile's credential record and definition cache live.
pub fn token_store_path(profile_name: &str) -> PathBuf {
    let file = format!("{profile_name}.json");
    project_dirs().map_or_else(
        || dirs_fallback().join("state").join(&file),
        |dirs| dirs.data_dir().join(&file),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path`, then `HOMECONNECT_*` environment overrides
/// (`HOMECONNECT_DEFAULTS__TIMEOUT=60`).
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("HOMECONNECT_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Secret resolution ───────────────────────────────────────────────

/// Resolve the client secret: env var, then keyring, then plaintext.
/// `None` if none is configured; public clients have no secret.
pub fn resolve_client_secret(profile: &Profile, profile_name: &str) -> Option<SecretString> {
    // 1. Profile's client_secret_env → env var lookup
    if let Some(ref env_name) = profile.client_secret_env {
        if let Ok(val) = std::env::var(env_name) {
            return Some(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring_entry(profile_name) {
        if let Ok(secret) = entry.get_password() {
            return Some(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    profile
        .client_secret
        .as_ref()
        .map(|secret| SecretString::from(secret.clone()))
}

/// Store a client secret in the system keyring.
pub fn store_client_secret(profile_name: &str, secret: &str) -> Result<(), ConfigError> {
    keyring_entry(profile_name)?.set_password(secret)?;
    Ok(())
}

fn keyring_entry(profile_name: &str) -> Result<keyring::Entry, keyring::Error> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/client-secret"))
}

// ── Translation ─────────────────────────────────────────────────────

fn parse_duration(field: &str, raw: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(raw).map_err(|e| ConfigError::Validation {
        field: field.into(),
        reason: format!("'{raw}': {e}"),
    })
}

pub fn parse_server(raw: &str) -> Result<Server, ConfigError> {
    match raw {
        "production" => Ok(Server::Production),
        "simulator" => Ok(Server::Simulator),
        other => Err(ConfigError::Validation {
            field: "server".into(),
            reason: format!("expected 'production' or 'simulator', got '{other}'"),
        }),
    }
}

pub fn parse_stream_mode(raw: &str) -> Result<StreamMode, ConfigError> {
    match raw {
        "all" => Ok(StreamMode::All),
        "per-appliance" => Ok(StreamMode::PerAppliance),
        "off" => Ok(StreamMode::Off),
        other => Err(ConfigError::Validation {
            field: "stream".into(),
            reason: format!("expected 'all', 'per-appliance' or 'off', got '{other}'"),
        }),
    }
}

/// Build a `ClientConfig` from a profile, with no CLI overrides.
pub fn profile_to_client_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<ClientConfig, ConfigError> {
    if profile.client_id.is_empty() {
        return Err(ConfigError::NoClientId {
            profile: profile_name.into(),
        });
    }

    let mut config = ClientConfig {
        server: parse_server(&profile.server)?,
        client_id: profile.client_id.clone(),
        client_secret: resolve_client_secret(profile, profile_name),
        language: profile
            .language
            .clone()
            .unwrap_or_else(|| defaults.language.clone()),
        timeout: Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout)),
        scope_overrides: profile
            .scope_overrides
            .iter()
            .map(|(kind, o)| (kind.clone(), o.clone().into()))
            .collect(),
        ..ClientConfig::default()
    };

    if let Some(ref raw) = profile.base_url {
        config.base_url = Some(raw.parse::<url::Url>().map_err(|_| ConfigError::Validation {
            field: "base_url".into(),
            reason: format!("invalid URL: {raw}"),
        })?);
    }
    if let Some(ref scopes) = profile.scopes {
        config.scopes.clone_from(scopes);
    }
    if let Some(ref raw) = profile.refresh_window {
        config.refresh_window = parse_duration("refresh_window", raw)?;
    }
    if let Some(ref raw) = profile.cache_ttl {
        config.cache_ttl = parse_duration("cache_ttl", raw)?;
    }
    if let Some(ref raw) = profile.stream {
        config.stream_mode = parse_stream_mode(raw)?;
    }
    if let Some(poll) = profile.poll_programs {
        config.poll_programs = poll;
    }
    if let Some(threshold) = profile.rate_limit_escalation {
        config.rate_limit_escalation = threshold;
    }

    Ok(config)
}

/// Resolve the profile to use: explicit name, then `default_profile`.
pub fn select_profile<'a>(
    cfg: &'a Config,
    requested: Option<&str>,
) -> Result<(String, &'a Profile), ConfigError> {
    let name = requested
        .map(str::to_owned)
        .or_else(|| cfg.default_profile.clone())
        .unwrap_or_else(|| "default".into());
    cfg.profiles
        .get(&name)
        .map(|profile| (name.clone(), profile))
        .ok_or(ConfigError::UnknownProfile { profile: name })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const SAMPLE: &str = r#"
default_profile = "home"

[defaults]
timeout = 10
language = "de-DE"

[profiles.home]
server = "simulator"
client_id = "abc123"
refresh_window = "30m"
stream = "per-appliance"
poll_programs = false

[profiles.home.scope_overrides.Oven]
deny = ["Control"]
"#;

    fn load(sample: &str) -> Config {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, sample).unwrap();
        load_config_from(&path).unwrap()
    }

    #[test]
    fn profile_translates_to_client_config() {
        let cfg = load(SAMPLE);
        let (name, profile) = select_profile(&cfg, None).unwrap();
        assert_eq!(name, "home");

        let client = profile_to_client_config(profile, &name, &cfg.defaults).unwrap();
        assert_eq!(client.server, Server::Simulator);
        assert_eq!(client.client_id, "abc123");
        assert_eq!(client.language, "de-DE");
        assert_eq!(client.timeout, Duration::from_secs(10));
        assert_eq!(client.refresh_window, Duration::from_secs(30 * 60));
        assert_eq!(client.stream_mode, StreamMode::PerAppliance);
        assert!(!client.poll_programs);
        assert_eq!(client.scope_overrides["Oven"].deny, vec!["Control".to_owned()]);
    }

    #[test]
    fn missing_client_id_is_rejected() {
        let err = profile_to_client_config(&Profile::default(), "x", &Defaults::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::NoClientId { .. }));
    }

    #[test]
    fn bad_duration_names_the_field() {
        let profile = Profile {
            server: "production".into(),
            client_id: "abc".into(),
            cache_ttl: Some("soon".into()),
            ..Profile::default()
        };
        let err = profile_to_client_config(&profile, "x", &Defaults::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "cache_ttl"));
    }

    #[test]
    fn base_url_is_parsed_and_validated() {
        let mut profile = Profile {
            server: "production".into(),
            client_id: "abc".into(),
            base_url: Some("http://127.0.0.1:8080/".into()),
            ..Profile::default()
        };
        let client = profile_to_client_config(&profile, "x", &Defaults::default()).unwrap();
        assert_eq!(
            client.base_url,
            Some(url::Url::parse("http://127.0.0.1:8080/").unwrap())
        );

        profile.base_url = Some("not a url".into());
        let err = profile_to_client_config(&profile, "x", &Defaults::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "base_url"));
    }

    #[test]
    fn unknown_profile() {
        let cfg = Config::default();
        assert!(matches!(
            select_profile(&cfg, Some("nope")),
            Err(ConfigError::UnknownProfile { .. })
        ));
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut cfg = Config::default();
        cfg.profiles.insert(
            "default".into(),
            Profile {
                server: "production".into(),
                client_id: "id".into(),
                ..Profile::default()
            },
        );
        save_config_to(&cfg, &path).unwrap();
        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.profiles["default"].client_id, "id");
    }
}
