//! ---
//! prc_section: "01-core-functionality"
//! prc_subsection: "module"
//! prc_type: "source"
//! prc_scope: "code"
//! prc_description: "Shared primitives and utilities for the precreator runtime."
//! prc_version: "v0.0.0-prealpha"
//! prc_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

/// Cadence at which the precreation loop re-checks shard group coverage.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Lead time added to "now" when computing the precreation cutoff.
pub const DEFAULT_ADVANCE_PERIOD: Duration = Duration::from_secs(30 * 60);

fn default_enabled() -> bool {
    true
}

fn default_check_interval() -> Duration {
    DEFAULT_CHECK_INTERVAL
}

fn default_advance_period() -> Duration {
    DEFAULT_ADVANCE_PERIOD
}

fn default_shard_group_duration() -> Duration {
    Duration::from_secs(7 * 24 * 60 * 60)
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9899))
}

/// Primary configuration object for the precreator daemon.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub precreator: PrecreatorConfig,
    #[serde(default)]
    pub databases: IndexMap<String, DatabaseConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "PRECREATOR_CONFIG";

    /// Load configuration from disk, respecting the `PRECREATOR_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.precreator.validate()?;
        for (name, database) in &self.databases {
            database.validate(name)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Settings for the shard precreation service.
#[serde_as]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrecreatorConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_check_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub check_interval: Duration,
    #[serde(default = "default_advance_period")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub advance_period: Duration,
}

impl PrecreatorConfig {
    /// Construct an enabled configuration with the provided cadence and horizon.
    pub fn new(check_interval: Duration, advance_period: Duration) -> Self {
        Self {
            enabled: true,
            check_interval,
            advance_period,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.check_interval.is_zero() {
            return Err(anyhow!("check_interval must be positive"));
        }
        if self.advance_period.is_zero() {
            return Err(anyhow!("advance_period must be positive"));
        }
        Ok(())
    }
}

impl Default for PrecreatorConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            check_interval: default_check_interval(),
            advance_period: default_advance_period(),
        }
    }
}

/// Database seeded into the standalone metadata store.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub retention_policies: IndexMap<String, RetentionPolicyConfig>,
}

impl DatabaseConfig {
    pub fn validate(&self, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(anyhow!("database names must not be empty"));
        }
        for (rp_name, rp) in &self.retention_policies {
            if rp.shard_group_duration.is_zero() {
                return Err(anyhow!(
                    "retention policy '{}.{}' must declare a positive shard_group_duration",
                    name,
                    rp_name
                ));
            }
        }
        Ok(())
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionPolicyConfig {
    #[serde(default = "default_shard_group_duration")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub shard_group_duration: Duration,
}

impl Default for RetentionPolicyConfig {
    fn default() -> Self {
        Self {
            shard_group_duration: default_shard_group_duration(),
        }
    }
}

/// Log output settings. Without a `directory` only stdout is written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            directory: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}
