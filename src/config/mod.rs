//! Application configuration.
//!
//! Settings come from `config.toml` (path overridable with `CODING_RULES_CONFIG`),
//! with `DATABASE_URL` from the environment taking precedence over the file.

/// Database connection and schema creation
pub mod database;

/// Seeding of rules declared in config.toml
pub mod rules;

/// User directory used to resolve updater IDs to display names
pub mod users;

use crate::{
    core::rule::NewRule,
    errors::{Error, Result},
};
use serde::Deserialize;
use std::path::Path;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
pub const CONFIG_PATH_ENV: &str = "CODING_RULES_CONFIG";

/// Configuration structure representing the entire config.toml file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Database URL; `DATABASE_URL` overrides it
    #[serde(default)]
    pub database_url: Option<String>,
    /// Counter cleanup schedule and batch sizes
    #[serde(default)]
    pub housekeeping: HousekeepingConfig,
    /// Rules to create on startup when missing
    #[serde(default)]
    pub rules: Vec<NewRule>,
}

/// Schedule and batch sizes for the counter housekeeper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HousekeepingConfig {
    /// Seconds between soft-delete sweeps
    pub soft_delete_interval_secs: u64,
    /// Seconds between hard-delete sweeps
    pub hard_delete_interval_secs: u64,
    /// Counters soft-deleted per sweep
    pub soft_delete_batch: u64,
    /// Counters purged per sweep
    pub hard_delete_batch: u64,
    /// Hours a counter stays soft-deleted before it may be purged
    pub retention_hours: i64,
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        Self {
            soft_delete_interval_secs: 3600,
            hard_delete_interval_secs: 86_400,
            soft_delete_batch: 10,
            hard_delete_batch: 100,
            retention_hours: 24,
        }
    }
}

impl HousekeepingConfig {
    fn validate(&self) -> Result<()> {
        if self.soft_delete_interval_secs == 0 || self.hard_delete_interval_secs == 0 {
            return Err(Error::Config {
                message: "Housekeeping intervals must be at least one second".to_string(),
            });
        }
        if self.soft_delete_batch == 0 || self.hard_delete_batch == 0 {
            return Err(Error::Config {
                message: "Housekeeping batch sizes must be positive".to_string(),
            });
        }
        if self.retention_hours < 0 {
            return Err(Error::Config {
                message: "Housekeeping retention cannot be negative".to_string(),
            });
        }
        Ok(())
    }
}

impl AppConfig {
    /// Resolves the database URL: environment first, then the file, then the default.
    #[must_use]
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .ok()
            .or_else(|| self.database_url.clone())
            .unwrap_or_else(|| database::DEFAULT_DATABASE_URL.to_string())
    }
}

/// Parses and validates configuration from TOML text.
///
/// # Errors
/// Returns an error if the TOML is invalid or a housekeeping setting is out of range.
pub fn parse_config(contents: &str) -> Result<AppConfig> {
    let config: AppConfig = toml::from_str(contents).map_err(|e| Error::Config {
        message: format!("Failed to parse config.toml: {e}"),
    })?;
    config.housekeeping.validate()?;
    Ok(config)
}

/// Loads configuration from a TOML file
///
/// # Errors
/// Returns an error if:
/// - The file cannot be read
/// - The TOML syntax is invalid
/// - A housekeeping setting is out of range
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path_ref = path.as_ref();
    tracing::debug!("Attempting to load configuration from: {:?}", path_ref);
    let contents = std::fs::read_to_string(path_ref).map_err(|e| Error::Config {
        message: format!("Failed to read config file {}: {e}", path_ref.display()),
    })?;
    parse_config(&contents)
}

/// Loads configuration from `CODING_RULES_CONFIG` or `./config.toml`.
///
/// A missing default file is not an error: built-in defaults are used instead.
///
/// # Errors
/// Returns an error if an explicitly configured file is missing, or any file fails to parse.
pub fn load_app_configuration() -> Result<AppConfig> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return load_config(path);
    }
    if Path::new(DEFAULT_CONFIG_PATH).exists() {
        return load_config(DEFAULT_CONFIG_PATH);
    }
    tracing::info!("No {DEFAULT_CONFIG_PATH} found, using defaults");
    Ok(AppConfig::default())
}
