//! # fleet-core
//!
//! Configuration foundation shared by the fleetdesk crates: the
//! [`AppConfigTrait`] contract, environment detection and the
//! [`ConfigError`] type every config loader reports through.

pub mod config;

pub use config::{
    get_env_optional, get_env_or_default, get_env_parsed, AppConfigTrait, ConfigError,
    ConfigSource, Environment,
};
