use crate::*;
use regex::Regex;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::str::FromStr;
use thiserror::Error;

const VALID_ENVIRONMENTS: [&str; 3] = ["prod", "virtual", "static"];
const VALID_LOG_FORMATS: [&str; 3] = ["pretty", "json", "compact"];
const MAX_CURRENCY_DECIMALS: u32 = 18;
const ENCRYPTION_KEY_HEX_LEN: usize = 64;

#[derive(Error, Debug, Clone)]
pub enum ValidationError {
    #[error("Service name is required")]
    MissingServiceName,

    #[error("Invalid environment: {0}. Must be one of: prod, virtual, static")]
    InvalidEnvironment(String),

    #[error("{field} must be a positive integer")]
    InvalidPositiveInteger { field: String },

    #[error("{field}: port {port} is already used by {other}")]
    DuplicatePort { field: String, port: u16, other: String },

    #[error("Storage: {message}")]
    InvalidStorage { message: String },

    #[error("Security: {message}")]
    InvalidSecurity { message: String },

    #[error("No settlement currencies defined")]
    NoSettlementCurrencies,

    #[error("Settlement currency {code}: {message}")]
    InvalidSettlementCurrency { code: String, message: String },

    #[error("Duplicate settlement currency '{0}'")]
    DuplicateCurrency(String),

    #[error("Invalid max_amount '{0}': must be a positive decimal")]
    InvalidMaxAmount(String),

    #[error("Retry: {message}")]
    InvalidRetry { message: String },

    #[error("Invalid log format: {0}. Must be one of: pretty, json, compact")]
    InvalidLogFormat(String),

    #[error("Environment variable '{var}' is missing or invalid: {message}")]
    InvalidEnvVar { var: String, message: String },
}

#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct DefaultApplied {
    pub field: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
    pub defaults_applied: Vec<DefaultApplied>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
            defaults_applied: Vec::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, field: &str, message: &str) {
        self.warnings.push(ValidationWarning {
            field: field.to_string(),
            message: message.to_string(),
        });
    }

    pub fn add_default(&mut self, field: &str, value: &str) {
        self.defaults_applied.push(DefaultApplied {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

pub fn validate_config(config: &SettlementServiceConfig) -> ValidationReport {
    let mut report = ValidationReport::new();

    validate_placeholders(config, &mut report);
    validate_service(&config.service, &mut report);
    validate_storage(&config.storage, &config.service, &mut report);
    validate_security(&config.security, &mut report);
    validate_settlement(&config.settlement, &mut report);
    validate_logging(&config.logging, &mut report);

    report
}

/// Placeholders that survived substitution mean a required variable is unset
fn validate_placeholders(config: &SettlementServiceConfig, report: &mut ValidationReport) {
    let rendered = match serde_yaml::to_string(config) {
        Ok(rendered) => rendered,
        Err(_) => return,
    };
    let mut seen = HashSet::new();
    for var in unresolved_env_vars(&rendered) {
        if seen.insert(var.clone()) {
            report.add_error(ValidationError::InvalidEnvVar {
                var,
                message: "not set".to_string(),
            });
        }
    }
}

fn validate_service(service: &ServiceConfig, report: &mut ValidationReport) {
    if service.name.trim().is_empty() {
        report.add_error(ValidationError::MissingServiceName);
    }

    if !has_unresolved_env_vars(&service.environment)
        && !VALID_ENVIRONMENTS.contains(&service.environment.as_str())
    {
        report.add_error(ValidationError::InvalidEnvironment(service.environment.clone()));
    }

    if service.port == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "service.port".to_string(),
        });
    }

    match service.metrics_port {
        Some(0) => report.add_error(ValidationError::InvalidPositiveInteger {
            field: "service.metrics_port".to_string(),
        }),
        Some(port) if port == service.port => report.add_error(ValidationError::DuplicatePort {
            field: "service.metrics_port".to_string(),
            port,
            other: "service.port".to_string(),
        }),
        Some(_) => {}
        None => report.add_default("service.metrics_port", "disabled"),
    }

    if service.shutdown_timeout_seconds == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "service.shutdown_timeout_seconds".to_string(),
        });
    }
}

fn validate_storage(storage: &StorageConfig, service: &ServiceConfig, report: &mut ValidationReport) {
    match storage.backend {
        StorageBackend::Postgres => match storage.database_url.as_deref() {
            None | Some("") => report.add_error(ValidationError::InvalidStorage {
                message: "backend is 'postgres' but database_url is missing".to_string(),
            }),
            Some(raw) if has_unresolved_env_vars(raw) => {}
            Some(raw) => validate_database_url(raw, report),
        },
        StorageBackend::Memory => {
            if service.environment == "prod" {
                report.add_warning(
                    "storage.backend",
                    "memory backend in prod loses every settlement on restart",
                );
            }
        }
    }

    if storage.max_connections == 0 {
        report.add_error(ValidationError::InvalidStorage {
            message: "max_connections must be a positive integer".to_string(),
        });
    }

    if storage.connection_timeout_seconds == 0 {
        report.add_error(ValidationError::InvalidStorage {
            message: "connection_timeout_seconds must be a positive integer".to_string(),
        });
    }

    if storage.health_check_interval_seconds == 0 {
        report.add_error(ValidationError::InvalidStorage {
            message: "health_check_interval_seconds must be a positive integer".to_string(),
        });
    }
}

fn validate_database_url(raw: &str, report: &mut ValidationReport) {
    match url::Url::parse(raw) {
        Ok(parsed) if matches!(parsed.scheme(), "postgres" | "postgresql") => {
            if parsed.host_str().map_or(true, str::is_empty) {
                report.add_error(ValidationError::InvalidStorage {
                    message: "database_url has no host".to_string(),
                });
            }
        }
        Ok(parsed) => report.add_error(ValidationError::InvalidStorage {
            message: format!(
                "database_url scheme '{}' is not supported, expected postgres://",
                parsed.scheme()
            ),
        }),
        // The URL may carry credentials; keep it out of the message
        Err(e) => report.add_error(ValidationError::InvalidStorage {
            message: format!("database_url is not a valid URL: {}", e),
        }),
    }
}

fn validate_security(security: &SecurityConfig, report: &mut ValidationReport) {
    let key = security.encryption_key.trim();
    if !has_unresolved_env_vars(key) {
        if key.len() != ENCRYPTION_KEY_HEX_LEN {
            report.add_error(ValidationError::InvalidSecurity {
                message: format!(
                    "encryption_key must be {} hex characters, got {}",
                    ENCRYPTION_KEY_HEX_LEN,
                    key.len()
                ),
            });
        } else if !key.chars().all(|c| c.is_ascii_hexdigit()) {
            report.add_error(ValidationError::InvalidSecurity {
                message: "encryption_key must be hex encoded".to_string(),
            });
        }
    }

    let header_ok = Regex::new(r"^[A-Za-z0-9\-]+$")
        .map(|re| re.is_match(&security.subject_header))
        .unwrap_or(false);
    if !header_ok {
        report.add_error(ValidationError::InvalidSecurity {
            message: format!("subject_header '{}' is not a valid header name", security.subject_header),
        });
    }
}

fn validate_settlement(settlement: &SettlementConfig, report: &mut ValidationReport) {
    if settlement.currencies.is_empty() {
        report.add_error(ValidationError::NoSettlementCurrencies);
    }

    let code_regex = Regex::new(r"^[A-Z0-9]{3,10}$").ok();
    let mut seen = HashSet::new();
    for currency in &settlement.currencies {
        let code = currency.code.to_uppercase();
        if let Some(ref re) = code_regex {
            if !re.is_match(&code) {
                report.add_error(ValidationError::InvalidSettlementCurrency {
                    code: currency.code.clone(),
                    message: "code must be 3-10 letters or digits".to_string(),
                });
            }
        }
        if currency.decimals > MAX_CURRENCY_DECIMALS {
            report.add_error(ValidationError::InvalidSettlementCurrency {
                code: currency.code.clone(),
                message: format!(
                    "decimals must be at most {}, got {}",
                    MAX_CURRENCY_DECIMALS, currency.decimals
                ),
            });
        }
        if !seen.insert(code.clone()) {
            report.add_error(ValidationError::DuplicateCurrency(code));
        }
    }

    match settlement.max_amount.as_deref() {
        Some(raw) => match Decimal::from_str(raw.trim()) {
            Ok(amount) if amount > Decimal::ZERO => {}
            _ => report.add_error(ValidationError::InvalidMaxAmount(raw.to_string())),
        },
        None => report.add_default("settlement.max_amount", "unlimited"),
    }

    let retry = &settlement.retry;
    if retry.initial_delay_ms == 0 {
        report.add_error(ValidationError::InvalidRetry {
            message: "initial_delay_ms must be a positive integer".to_string(),
        });
    }
    if retry.max_delay_ms < retry.initial_delay_ms {
        report.add_error(ValidationError::InvalidRetry {
            message: format!(
                "max_delay_ms ({}) must not be below initial_delay_ms ({})",
                retry.max_delay_ms, retry.initial_delay_ms
            ),
        });
    }
    if retry.max_retries > 10 {
        report.add_warning(
            "settlement.retry.max_retries",
            "more than 10 retries can hold requests for a long time during an outage",
        );
    }
}

fn validate_logging(logging: &LoggingConfig, report: &mut ValidationReport) {
    if !VALID_LOG_FORMATS.contains(&logging.format.to_lowercase().as_str()) {
        report.add_error(ValidationError::InvalidLogFormat(logging.format.clone()));
    }
}
