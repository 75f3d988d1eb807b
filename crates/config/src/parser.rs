use crate::*;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info, instrument};

#[instrument(skip(path))]
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SettlementServiceConfig> {
    let path = path.as_ref();
    info!("Loading configuration from: {:?}", path);

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    debug!("Config file content length: {} bytes", content.len());

    parse_config(&content)
}

/// Substitute environment placeholders and parse a YAML document
pub fn parse_config(content: &str) -> Result<SettlementServiceConfig> {
    let substituted = substitution::substitute_env_vars(content)?;
    debug!("Environment variable substitution completed");

    let config: SettlementServiceConfig = serde_yaml::from_str(&substituted)
        .with_context(|| "Failed to parse YAML configuration")?;

    info!(
        service = %config.service.name,
        environment = %config.service.environment,
        "Configuration loaded successfully"
    );
    Ok(config)
}

/// Starting configuration written by `settld init`
///
/// Secrets stay as placeholders so the file can be committed.
#[instrument]
pub fn generate_default_config() -> SettlementServiceConfig {
    use defaults::*;

    SettlementServiceConfig {
        service: ServiceConfig {
            name: default_service_name(),
            environment: "${SETTLEMENT_ENV:-prod}".to_string(),
            host: default_host(),
            port: default_port(),
            metrics_port: Some(9095),
            shutdown_timeout_seconds: default_shutdown_timeout_seconds(),
        },
        storage: StorageConfig {
            database_url: Some("${DATABASE_URL}".to_string()),
            ..StorageConfig::default()
        },
        security: SecurityConfig {
            encryption_key: "${SETTLEMENT_ENCRYPTION_KEY}".to_string(),
            subject_header: default_subject_header(),
        },
        settlement: SettlementConfig::default(),
        logging: LoggingConfig::default(),
    }
}

#[instrument(skip(config))]
pub fn save_config<P: AsRef<Path> + std::fmt::Debug>(config: &SettlementServiceConfig, path: P) -> Result<()> {
    let path = path.as_ref();
    info!("Saving configuration to: {:?}", path);

    let yaml = serde_yaml::to_string(config)
        .with_context(|| "Failed to serialize configuration to YAML")?;

    fs::write(path, yaml)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    info!("Configuration saved successfully");
    Ok(())
}
