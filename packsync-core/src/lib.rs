//! PackSync core library — domain types, configuration, errors.
//!
//! Public API surface:
//! - [`types`] — newtypes and domain structs shared by every crate
//! - [`config`] — YAML configuration load / save / defaults
//! - [`error`] — [`ConfigError`]

pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, DeliveryConfig, RepoRef, ScopeConfig};
pub use error::ConfigError;
pub use types::{
    ClientSession, ContentHash, PackRecord, ProtocolClass, PushOutcome, PushResult,
    ReleaseDescriptor, ScopeId, SessionId,
};
