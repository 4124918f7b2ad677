//! Clap derive structures for the `homeconnect` CLI.
//!
//! Defines the command tree, global flags, and shared types.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// homeconnect -- control Home Connect appliances from the terminal
#[derive(Debug, Parser)]
#[command(
    name = "homeconnect",
    version,
    about = "Monitor and control Home Connect appliances",
    long_about = "Talks to the Home Connect cloud API: authorises an OAuth client,\n\
        lists paired appliances, reads status and settings, selects and\n\
        starts programs, and follows the live event stream.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Client profile to use
    #[arg(long, short = 'p', env = "HOMECONNECT_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "HOMECONNECT_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Request timeout in seconds (overrides profile)
    #[arg(long, env = "HOMECONNECT_TIMEOUT", global = true)]
    pub timeout: Option<u64>,

    /// Seconds to wait for the appliance list
    #[arg(long, default_value = "30", global = true)]
    pub discovery_timeout: u64,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Authorise the OAuth client
    Auth(AuthArgs),

    /// List paired appliances
    #[command(alias = "ls")]
    Appliances,

    /// Show an appliance's status values
    Status(ApplianceArg),

    /// Read or write appliance settings
    Settings(SettingsArgs),

    /// Browse, select and run programs
    #[command(alias = "prog")]
    Programs(ProgramsArgs),

    /// List or execute appliance commands
    Commands(CommandsArgs),

    /// Follow live appliance events
    Watch(WatchArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct ApplianceArg {
    /// Appliance haId
    pub ha_id: String,
}

// ── Auth ─────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct AuthArgs {
    #[command(subcommand)]
    pub command: AuthCommand,
}

#[derive(Debug, Subcommand)]
pub enum AuthCommand {
    /// Obtain tokens (device flow on production, code flow on the simulator)
    Login {
        /// Give up after this long, e.g. "10m"
        #[arg(long, default_value = "15m", value_parser = humantime_duration)]
        timeout: std::time::Duration,
    },

    /// Show whether tokens are stored and what they grant
    Status,

    /// Discard stored tokens
    Logout,
}

fn humantime_duration(raw: &str) -> Result<std::time::Duration, String> {
    humantime::parse_duration(raw).map_err(|e| e.to_string())
}

// ── Settings ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct SettingsArgs {
    #[command(subcommand)]
    pub command: SettingsCommand,
}

#[derive(Debug, Subcommand)]
pub enum SettingsCommand {
    /// List every setting
    List(ApplianceArg),

    /// Read one setting
    Get {
        ha_id: String,
        /// Setting key, e.g. BSH.Common.Setting.PowerState
        key: String,
    },

    /// Write one setting (value parsed as JSON, else taken as a string)
    Set {
        ha_id: String,
        key: String,
        value: String,
    },
}

// ── Programs ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ProgramsArgs {
    #[command(subcommand)]
    pub command: ProgramsCommand,
}

#[derive(Debug, Subcommand)]
pub enum ProgramsCommand {
    /// List programs
    List {
        ha_id: String,
        /// Only programs that can be selected right now
        #[arg(long)]
        available: bool,
    },

    /// Show a program's options and their constraints
    Show { ha_id: String, program: String },

    /// Show the selected program
    Selected(ApplianceArg),

    /// Show the active program
    Active(ApplianceArg),

    /// Select a program
    Select {
        ha_id: String,
        program: String,
        /// Program option as KEY=VALUE (repeatable)
        #[arg(long = "option", short = 'O')]
        options: Vec<String>,
    },

    /// Start a program (the selected one if omitted)
    Start {
        ha_id: String,
        program: Option<String>,
        /// Program option as KEY=VALUE (repeatable)
        #[arg(long = "option", short = 'O')]
        options: Vec<String>,
    },

    /// Stop the active program
    Stop(ApplianceArg),

    /// Pause the active program
    Pause(ApplianceArg),

    /// Resume a paused program
    Resume(ApplianceArg),

    /// Change an option of the selected or active program
    SetOption {
        ha_id: String,
        key: String,
        value: String,
        /// Change the selected program instead of the active one
        #[arg(long)]
        selected: bool,
    },
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CommandsArgs {
    #[command(subcommand)]
    pub command: CommandsCommand,
}

#[derive(Debug, Subcommand)]
pub enum CommandsCommand {
    /// List supported commands
    List(ApplianceArg),

    /// Execute a command
    Run { ha_id: String, command: String },
}

// ── Watch ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Only this appliance
    pub ha_id: Option<String>,

    /// Stop after this many item updates
    #[arg(long)]
    pub count: Option<usize>,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create or replace a profile
    Init {
        /// OAuth client id from the developer portal
        #[arg(long)]
        client_id: String,

        /// Server to talk to
        #[arg(long, default_value = "production")]
        server: ServerArg,

        /// Store this client secret in the system keyring
        #[arg(long)]
        client_secret: Option<String>,
    },

    /// Print the resolved configuration
    Show,

    /// Print the config file path
    Path,

    /// List profile names
    Profiles,

    /// Make a profile the default
    Use { name: String },
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ServerArg {
    Production,
    Simulator,
}

impl ServerArg {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Simulator => "simulator",
        }
    }
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
