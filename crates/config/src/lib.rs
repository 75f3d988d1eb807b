//! Configuration for the settlement service
//!
//! A single YAML document with `${VAR}` placeholders resolved from the
//! environment before parsing. [`validate_config`] reports problems as a
//! [`ValidationReport`] instead of failing on the first one.

use serde::{Deserialize, Serialize};

pub mod defaults;
pub mod parser;
pub mod substitution;
pub mod validator;

pub use defaults::*;
pub use parser::*;
pub use substitution::*;
pub use validator::*;

/// Root of `config/settlement.yaml`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SettlementServiceConfig {
    pub service: ServiceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    pub security: SecurityConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
    /// prod | virtual | static
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Prometheus exporter port; metrics are off when absent
    #[serde(default)]
    pub metrics_port: Option<u16>,
    #[serde(default = "default_shutdown_timeout_seconds")]
    pub shutdown_timeout_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageBackend::Postgres => "postgres",
            StorageBackend::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: StorageBackend,
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_seconds: u64,
    /// How often `/health/detailed` re-probes the store
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_seconds: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            database_url: None,
            max_connections: default_max_connections(),
            connection_timeout_seconds: default_connection_timeout(),
            health_check_interval_seconds: default_health_check_interval(),
        }
    }
}

#[derive(Clone, Deserialize, Serialize)]
pub struct SecurityConfig {
    /// 32-byte AES key, hex encoded
    pub encryption_key: String,
    #[serde(default = "default_subject_header")]
    pub subject_header: String,
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("encryption_key", &"<redacted>")
            .field("subject_header", &self.subject_header)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SettlementConfig {
    #[serde(default = "default_currencies")]
    pub currencies: Vec<CurrencyConfig>,
    /// Decimal string; no cap when absent
    #[serde(default)]
    pub max_amount: Option<String>,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Re-drive pending and validated records at startup
    #[serde(default = "default_enabled")]
    pub resume_on_startup: bool,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            currencies: default_currencies(),
            max_amount: None,
            retry: RetryConfig::default(),
            resume_on_startup: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CurrencyConfig {
    pub code: String,
    pub decimals: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// pretty | json | compact
    #[serde(default = "default_log_format")]
    pub format: String,
    /// Filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: default_log_level(),
        }
    }
}
