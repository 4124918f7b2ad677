//! Appliance device model and platform orchestration on top of
//! `homeconnect-api`.
//!
//! - **[`Platform`]**: Owns the token loop, the event stream and one
//!   [`Appliance`] per discovered haId. [`start()`](Platform::start) spawns
//!   everything; [`shutdown()`](Platform::shutdown) cancels it.
//!
//! - **[`Appliance`]**: Last-known state of one appliance. Stream events
//!   and reads land in its item cache; listeners hear about a batch only
//!   after all of it is applied. Writes are coalesced per operation and
//!   never overlap.
//!
//! - **Preconditions**: Scope, connection and remote-control checks run
//!   before any request, failing with a named [`CoreError`] variant.

pub mod appliance;
pub mod config;
pub mod error;
pub mod platform;

// ── Primary re-exports ──────────────────────────────────────────────
pub use appliance::{
    Appliance, ApplianceEvent, ApplianceSettings, ItemListener, Options, Scope, options,
};
pub use config::{Backoff, ClientConfig, ScopeOverride, StreamMode};
pub use error::CoreError;
pub use platform::{Platform, PlatformEvent};

// Wire types collaborators need alongside the model.
pub use homeconnect_api::types::keys;
pub use homeconnect_api::{
    ApplianceInfo, AuthState, CommandInfo, Item, JsonFileStore, KeyValueStore, MemoryStore,
    OptionConstraints, OptionDefinition, Program, ProgramDefinition, ProgramSummary, Server,
    UserAction,
};
