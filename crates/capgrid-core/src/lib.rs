//! Shared types and configuration for the capgrid workspace.
//!
//! Everything the other crates agree on lives here: host and VM identity,
//! the capacity tuple a host offers and a VM requests, the resource
//! dimensions the ledger reports refusals against, and the `capgrid.toml`
//! configuration that tunes the capacity controller.

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    CapgridConfig, ControllerConfig, ForecasterConfig, HostTemplate, PolicyConfig,
    PowerModelConfig, SpecPowerProfile, parse_duration_secs, try_parse_duration_secs,
};
pub use error::{ConfigError, ConfigResult};
pub use types::*;
