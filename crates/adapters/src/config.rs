//! Application configuration
//!
//! Environment-driven, one struct per concern. All keys use the `SM_`
//! prefix; every knob has a production-sensible default.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {0}")]
    InvalidValue(String),

    #[error("configuration validation failed: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub orchestrator: OrchestratorConfig,
    pub maintainer: MaintainerConfig,
    pub signature: SignatureConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let config = Self::from_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self {
            server: ServerConfig::from_env()?,
            orchestrator: OrchestratorConfig::from_env()?,
            maintainer: MaintainerConfig::from_env()?,
            signature: SignatureConfig::from_env(),
        })
    }

    pub fn validate(&self) -> Result<()> {
        self.orchestrator.validate()?;
        self.maintainer.validate()?;
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            maintainer: MaintainerConfig::default(),
            signature: SignatureConfig::default(),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Query parameter names rejected with 501 Not Implemented when a
    /// caller supplies them.
    pub disabled_query_parameters: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            disabled_query_parameters: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            host: std::env::var("SM_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_parsed("SM_PORT", 8080)?,
            disabled_query_parameters: std::env::var("SM_DISABLED_QUERY_PARAMETERS")
                .map(|raw| parse_name_list(&raw))
                .unwrap_or_default(),
        })
    }
}

/// Comma-separated list of names; blanks are dropped.
fn parse_name_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Duration between `last_operation` poll attempts.
    pub polling_interval_secs: u64,
    /// Cap on concurrent broker deprovisions during cascade deletion.
    pub max_parallel_deletions: usize,
    /// Label name identifying the tenant on an instance.
    pub tenant_key: String,
    /// Timeout for a single outbound broker call.
    pub broker_timeout_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            polling_interval_secs: 10,
            max_parallel_deletions: 10,
            tenant_key: "tenant".to_string(),
            broker_timeout_secs: 60,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            polling_interval_secs: env_parsed(
                "SM_POLLING_INTERVAL_SECS",
                defaults.polling_interval_secs,
            )?,
            max_parallel_deletions: env_parsed(
                "SM_MAX_PARALLEL_DELETIONS",
                defaults.max_parallel_deletions,
            )?,
            tenant_key: std::env::var("SM_TENANT_KEY").unwrap_or(defaults.tenant_key),
            broker_timeout_secs: env_parsed("SM_BROKER_TIMEOUT_SECS", defaults.broker_timeout_secs)?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.polling_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "polling interval must be positive".to_string(),
            ));
        }
        if self.max_parallel_deletions == 0 {
            return Err(ConfigError::Validation(
                "max parallel deletions must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_secs)
    }

    pub fn broker_timeout(&self) -> Duration {
        Duration::from_secs(self.broker_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintainerConfig {
    /// Sweep cadence for stalled operations.
    pub reconciliation_interval_secs: u64,
    /// Operations older than this are failed instead of resumed.
    pub job_timeout_secs: u64,
    /// How long terminal operations are kept before garbage collection.
    pub operation_retention_hours: u64,
}

impl Default for MaintainerConfig {
    fn default() -> Self {
        Self {
            reconciliation_interval_secs: 600,
            job_timeout_secs: 86_400,
            operation_retention_hours: 168,
        }
    }
}

impl MaintainerConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            reconciliation_interval_secs: env_parsed(
                "SM_RECONCILIATION_INTERVAL_SECS",
                defaults.reconciliation_interval_secs,
            )?,
            job_timeout_secs: env_parsed("SM_JOB_TIMEOUT_SECS", defaults.job_timeout_secs)?,
            operation_retention_hours: env_parsed(
                "SM_OPERATION_RETENTION_HOURS",
                defaults.operation_retention_hours,
            )?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.reconciliation_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "reconciliation interval must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn reconciliation_interval(&self) -> Duration {
        Duration::from_secs(self.reconciliation_interval_secs)
    }

    pub fn job_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.job_timeout_secs as i64)
    }

    pub fn operation_retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.operation_retention_hours as i64)
    }
}

/// Optional context-signature key; absent means the feature is disabled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignatureConfig {
    pub private_key: Option<String>,
}

impl SignatureConfig {
    pub fn from_env() -> Self {
        Self {
            private_key: std::env::var("SM_CONTEXT_PRIVATE_KEY").ok(),
        }
    }
}
