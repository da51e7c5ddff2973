//! Configuration loader with layered sources
//!
//! Loads configuration from multiple sources with the following precedence
//! (highest to lowest):
//! 1. Environment variables (GATEWARDEN_*)
//! 2. Configuration file (TOML)
//! 3. Default values

use crate::config::types::AppConfig;
use crate::error::ConfigError;
use config::{Config, Environment, File, FileFormat};
use std::path::Path;

/// Default configuration file paths to check (in order)
const DEFAULT_CONFIG_PATHS: &[&str] = &[
    "gatewarden.toml",
    ".gatewarden.toml",
    "~/.config/gatewarden/config.toml",
    "/etc/gatewarden/config.toml",
];

/// Load configuration from a TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::from_str(toml_str, FileFormat::Toml))
        .build()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    let app_config: AppConfig = config
        .try_deserialize()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    validate_config(&app_config)?;

    Ok(app_config)
}

/// Load configuration from files and environment
pub fn load_config(config_path: Option<&str>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder();

    // 1. Start with defaults (handled by serde defaults on AppConfig)

    // 2. Add configuration file
    if let Some(path) = config_path {
        // Explicit path provided - must exist
        if !Path::new(path).exists() {
            return Err(ConfigError::Load(format!(
                "Configuration file not found: {}",
                path
            )));
        }
        builder = builder.add_source(File::new(path, FileFormat::Toml));
    } else {
        // Try default paths (first existing one wins)
        for path in DEFAULT_CONFIG_PATHS {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                builder = builder.add_source(File::new(&expanded, FileFormat::Toml));
                break;
            }
        }
    }

    // 3. Add environment variables with GATEWARDEN_ prefix
    // e.g., GATEWARDEN_LOGGING__LEVEL, GATEWARDEN_REQUESTS__MAX_CAS_ATTEMPTS
    // Double underscore (__) maps to nested keys (logging.level)
    builder = builder.add_source(
        Environment::with_prefix("GATEWARDEN")
            .separator("__")
            .try_parsing(true),
    );

    // Build and deserialize
    let config = builder
        .build()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    let app_config: AppConfig = config
        .try_deserialize()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    validate_config(&app_config)?;

    Ok(app_config)
}

/// Validate configuration values
fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    // Validate log level
    match config.logging.level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        other => {
            return Err(ConfigError::Invalid {
                message: format!("logging.level must be a log level, got: {}", other),
            });
        }
    }

    // Validate request tunables
    if config.requests.max_cas_attempts == 0 {
        return Err(ConfigError::Invalid {
            message: "requests.max_cas_attempts must be greater than 0".to_string(),
        });
    }

    // Validate every role definition; a malformed role fails the load
    // instead of silently degrading.
    config.build_catalog()?;

    // Validate trait mapping patterns
    for mapping in &config.trait_mappings {
        let anchored = mapping.pattern.starts_with('^') && mapping.pattern.ends_with('$');
        if anchored && regex::Regex::new(&mapping.pattern).is_err() {
            return Err(ConfigError::Invalid {
                message: format!(
                    "trait_mappings: invalid pattern '{}' for trait '{}'",
                    mapping.pattern, mapping.trait_name
                ),
            });
        }
        if mapping.outputs.is_empty() {
            return Err(ConfigError::Invalid {
                message: format!(
                    "trait_mappings: mapping for trait '{}' has no outputs",
                    mapping.trait_name
                ),
            });
        }
    }

    Ok(())
}
