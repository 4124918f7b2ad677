// homeconnect-api: Async Rust client for the Home Connect appliance API
//
// OAuth token authority, rate-gated REST client, server-sent event stream
// and the key/value store the token record and caches are persisted in.

pub mod appliances;
pub mod auth;
pub mod client;
pub mod error;
pub mod events;
pub mod gate;
mod oauth;
pub mod report;
mod response;
pub mod store;
pub mod token;
pub mod transport;
pub mod types;

pub use auth::{AuthConfig, Server};
pub use client::ApiClient;
pub use error::{Error, Invalidation};
pub use events::{
    EventKind, EventRouter, EventStreamConfig, EventStreamHandle, ReconnectConfig, StreamEvent,
};
pub use gate::RateGate;
pub use oauth::DeviceAuthorisation;
pub use report::ErrorReporter;
pub use store::{JsonFileStore, KeyValueStore, MemoryStore};
pub use token::{AuthState, CredentialRecord, TokenAuthority, UserAction};
pub use transport::TransportConfig;
pub use types::{
    ApplianceInfo, CommandInfo, Item, OptionConstraints, OptionDefinition, Program,
    ProgramDefinition, ProgramSummary,
};
