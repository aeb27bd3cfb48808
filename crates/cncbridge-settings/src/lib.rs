//! CNC Bridge Settings Crate
//!
//! Loads, validates, and saves the bridge configuration.

pub mod config;
pub mod error;

pub use config::{
    default_config_path, BridgeConfig, LinkSettings, PollingSettings, ReconnectSettings,
    ServerSettings,
};
pub use error::{SettingsError, SettingsResult};
