//! Configuration types for gatewarden
//!
//! This module defines the configuration structure that can be loaded from
//! TOML files and/or environment variables: logging, state machine tunables,
//! role definitions, and trait-to-role mappings.

use crate::error::ConfigError;
use crate::policy::role::{Role, RoleCatalog};
use crate::policy::templates::TraitMapping;
use crate::requests::service::{DenyAuthority, RequestPolicy};
use serde::Deserialize;
use std::collections::BTreeMap;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Access request state machine settings
    pub requests: RequestsConfig,

    /// Role definitions, keyed by role name
    pub roles: BTreeMap<String, Role>,

    /// Mappings from identity provider traits to assigned role names
    pub trait_mappings: Vec<TraitMapping>,
}

impl AppConfig {
    /// Validates every role definition and assembles the catalog.
    ///
    /// A role keyed under one name in the file may not claim a different
    /// name in its body.
    pub fn build_catalog(&self) -> Result<RoleCatalog, ConfigError> {
        let mut catalog = RoleCatalog::new();
        for (name, role) in &self.roles {
            let mut role = role.clone();
            if role.name.is_empty() {
                role.name = name.clone();
            } else if role.name != *name {
                return Err(ConfigError::Invalid {
                    message: format!(
                        "role keyed {name:?} declares a different name {:?}",
                        role.name
                    ),
                });
            }
            catalog.insert(role).map_err(|e| ConfigError::Invalid {
                message: e.to_string(),
            })?;
        }
        Ok(catalog)
    }
}

/// Access request state machine settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RequestsConfig {
    /// Conditional-write attempts before a proposal submission is surfaced
    /// as retryable
    pub max_cas_attempts: u32,

    /// Whether a denial needs authority over the proposed subset or the
    /// full originally requested role set
    pub deny_authority: DenyAuthority,
}

impl Default for RequestsConfig {
    fn default() -> Self {
        Self {
            max_cas_attempts: 7,
            deny_authority: DenyAuthority::default(),
        }
    }
}

impl RequestsConfig {
    pub fn to_policy(&self) -> RequestPolicy {
        RequestPolicy {
            max_cas_attempts: self.max_cas_attempts,
            deny_authority: self.deny_authority,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Output format (pretty, json)
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output
    #[default]
    Pretty,
    /// JSON structured output
    Json,
}
