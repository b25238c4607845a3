//! Configuration management for the connector
//!
//! Loads settings from ~/.config/sqlbridge/config.toml,
//! with overrides from the process environment (and a `.env` file).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const ENV_OPEN_TIMEOUT: &str = "SQLBRIDGE_OPEN_TIMEOUT";
pub const ENV_ROWCOUNT_MODE: &str = "SQLBRIDGE_ROWCOUNT_MODE";
pub const ENV_ENVIRONMENT: &str = "SQLBRIDGE_ENV";

/// How a multi-statement non-query script reports its row count
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RowcountMode {
    /// Sum of every statement's affected rows
    #[default]
    Total,
    /// Affected rows of the last statement only
    Last,
}

impl RowcountMode {
    pub fn apply(self, counts: &[u64]) -> u64 {
        match self {
            RowcountMode::Total => counts.iter().sum(),
            RowcountMode::Last => counts.last().copied().unwrap_or(0),
        }
    }
}

impl FromStr for RowcountMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "total" | "sum" => Ok(RowcountMode::Total),
            "last" => Ok(RowcountMode::Last),
            other => Err(format!("unknown rowcount mode '{}'", other)),
        }
    }
}

/// Driver and connection string for one logical environment
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct EnvironmentConfig {
    pub driver: String,
    pub connection_string: String,
}

/// Connector configuration
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Default open timeout when a request gives none
    pub open_timeout_secs: u64,
    pub rowcount_mode: RowcountMode,
    /// Separator line for script files (matched case-insensitively)
    pub script_delimiter: String,
    /// Environment used when none is named explicitly
    pub default_environment: Option<String>,
    pub environments: BTreeMap<String, EnvironmentConfig>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            open_timeout_secs: 15,
            rowcount_mode: RowcountMode::Total,
            script_delimiter: "GO".to_string(),
            default_environment: None,
            environments: BTreeMap::new(),
        }
    }
}

impl ConnectorConfig {
    /// Get the config file path (~/.config/sqlbridge/config.toml)
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not find config directory")?
            .join("sqlbridge");

        Ok(config_dir.join("config.toml"))
    }

    /// Load configuration from disk plus environment overrides, falling back
    /// to defaults when the file is unreadable
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();
        let mut config = match Self::config_path().and_then(|p| Self::load_from(&p)) {
            Ok(config) => config,
            Err(e) => {
                warn!("using default configuration: {:#}", e);
                Self::default()
            }
        };
        if let Err(e) = config.apply_env_overrides(|key| std::env::var(key).ok()) {
            warn!("ignoring invalid environment override: {:#}", e);
        }
        config
    }

    /// Load configuration from `path`; a missing file gives defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).context("Failed to read config file")?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse config file")
    }

    /// Apply `SQLBRIDGE_*` overrides read through `lookup`
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup(ENV_OPEN_TIMEOUT) {
            self.open_timeout_secs = v
                .trim()
                .parse()
                .with_context(|| format!("{} must be a number of seconds, got '{}'", ENV_OPEN_TIMEOUT, v))?;
        }
        if let Some(v) = lookup(ENV_ROWCOUNT_MODE) {
            self.rowcount_mode = v.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(v) = lookup(ENV_ENVIRONMENT) {
            self.default_environment = Some(v);
        }
        Ok(())
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_secs)
    }

    /// Resolve a logical environment by name
    pub fn environment(&self, name: &str) -> Option<&EnvironmentConfig> {
        self.environments.get(name)
    }

    /// The environment named by `default_environment`, if any
    pub fn selected_environment(&self) -> Option<&EnvironmentConfig> {
        self.default_environment
            .as_deref()
            .and_then(|name| self.environment(name))
    }
}
