//! Layered configuration for fleet tooling.
//!
//! Sources, highest priority first:
//! 1. Environment variables with `FLEET_` prefix (`__` separates sections,
//!    e.g. `FLEET_LEDGER__ALLOW_NEGATIVE_BALANCE=true`).
//! 2. An explicit TOML file, or `fleet.toml` in the working directory.
//! 3. Built-in defaults.

use crate::logging::{default_log_level, parse_level};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_CONFIG_FILE: &str = "fleet.toml";
const ENV_PREFIX: &str = "FLEET_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Figment(#[from] Box<figment::Error>),

    #[error("invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl From<figment::Error> for ConfigError {
    fn from(value: figment::Error) -> Self {
        Self::Figment(Box::new(value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub blanks: BlankConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// SQLite database file.
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("fleet.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    /// File logging stays off when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level().to_string(),
            dir: None,
        }
    }
}

/// Stock ledger policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct LedgerConfig {
    /// When false, movements that would drive any location balance below
    /// zero (at their point in time or later) are rejected.
    #[serde(default)]
    pub allow_negative_balance: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct BlankConfig {
    pub max_batch_size: u32,
}

impl Default for BlankConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 10_000,
        }
    }
}

impl FleetConfig {
    /// Loads configuration from defaults, the optional TOML file and the
    /// environment.
    ///
    /// When `file` is `None`, `fleet.toml` in the current directory is used if
    /// it exists. An explicit `file` that does not exist is an error.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = file {
            if !path.exists() {
                return Err(ConfigError::InvalidValue {
                    field: "config",
                    reason: format!("file `{}` does not exist", path.display()),
                });
            }
        }
        let config: Self = Self::figment(file).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Builds the provider chain without extracting it.
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        match file {
            Some(path) => figment = figment.merge(Toml::file(path)),
            None => {
                let local = Path::new(DEFAULT_CONFIG_FILE);
                if local.exists() {
                    figment = figment.merge(Toml::file(local));
                }
            }
        }

        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "database.path",
                reason: "must not be empty".to_string(),
            });
        }
        parse_level(&self.logging.level).map_err(|err| ConfigError::InvalidValue {
            field: "logging.level",
            reason: err.to_string(),
        })?;
        if self.blanks.max_batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "blanks.max_batch_size",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
