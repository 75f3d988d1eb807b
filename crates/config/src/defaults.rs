pub fn default_enabled() -> bool {
    true
}

pub fn default_service_name() -> String {
    "exchange-settlement".to_string()
}

pub fn default_environment() -> String {
    "prod".to_string()
}

pub fn default_host() -> String {
    "0.0.0.0".to_string()
}

pub fn default_port() -> u16 {
    8085
}

pub fn default_shutdown_timeout_seconds() -> u64 {
    30
}

pub fn default_storage_backend() -> super::StorageBackend {
    super::StorageBackend::Postgres
}

pub fn default_max_connections() -> u32 {
    10
}

pub fn default_connection_timeout() -> u64 {
    30
}

pub fn default_health_check_interval() -> u64 {
    15
}

pub fn default_subject_header() -> String {
    "x-authenticated-subject".to_string()
}

pub fn default_currencies() -> Vec<super::CurrencyConfig> {
    [("USD", 2), ("EUR", 2), ("GBP", 2), ("JPY", 0), ("USDT", 6), ("BTC", 8)]
        .into_iter()
        .map(|(code, decimals)| super::CurrencyConfig {
            code: code.to_string(),
            decimals,
        })
        .collect()
}

pub fn default_max_retries() -> u32 {
    3
}

pub fn default_initial_delay_ms() -> u64 {
    100
}

pub fn default_max_delay_ms() -> u64 {
    2000
}

pub fn default_log_format() -> String {
    "pretty".to_string()
}

pub fn default_log_level() -> String {
    "info".to_string()
}
