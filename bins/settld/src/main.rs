//! Settlement service binary
//!
//! `settld start` boots the HTTP service; `validate`, `init` and `keygen`
//! are offline helpers for preparing a deployment.

use anyhow::{anyhow, Context, Result};
use axum::http::HeaderName;
use cli::{Cli, Commands, LogFormatArg};
use config::{
    generate_default_config, load_config, save_config, validate_config, SettlementServiceConfig,
    StorageBackend, ValidationReport,
};
use observability::{init_logging, LogFormat, SettlementMetrics};
use rust_decimal::Decimal;
use server::{
    health_routes, spawn_connection_monitor, validate_ports_available, HealthState, HttpServer,
    Server, ServerConfig, ShutdownController,
};
use settlement::api::{create_router, SettlementApiState};
use settlement::{
    CurrencyRule, EncryptionKey, Environment, FieldCodec, InMemorySettlementStore,
    PostgresSettlementStore, RetryPolicy, SettlementEngine, SettlementRules, SettlementStore,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const SERVICE_LOG_NAME: &str = "settld";

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();
    let starting = matches!(cli.command, Commands::Start { .. });

    let result = match cli.command {
        Commands::Start { config, port, env } => start_command(cli.log_format, config, port, env).await,
        Commands::Validate { config } => {
            init_cli_logging(cli.log_format);
            validate_command(config)
        }
        Commands::Init { output } => {
            init_cli_logging(cli.log_format);
            init_command(output)
        }
        Commands::Keygen => keygen_command(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if starting {
                error!(error = %format!("{:#}", e), "Critical error: failed to start settlement service");
            }
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// CLI flag beats `logging.format`, which beats the pretty default
fn resolve_log_format(cli_format: Option<LogFormatArg>, config_format: Option<&str>) -> LogFormat {
    cli_format
        .map(|f| f.as_str())
        .or(config_format)
        .and_then(LogFormat::parse)
        .unwrap_or_default()
}

fn init_cli_logging(cli_format: Option<LogFormatArg>) {
    if let Err(e) = init_logging(SERVICE_LOG_NAME, resolve_log_format(cli_format, None), "info") {
        eprintln!("Failed to initialize logging: {:#}", e);
    }
}

async fn start_command(
    cli_format: Option<LogFormatArg>,
    config_path: PathBuf,
    port_override: Option<u16>,
    env_override: Option<String>,
) -> Result<()> {
    // Logging needs the config's format, so a load failure is reported after init
    let loaded = load_config(&config_path);
    let (format, level) = match &loaded {
        Ok(config) => (
            resolve_log_format(cli_format, Some(&config.logging.format)),
            config.logging.level.clone(),
        ),
        Err(_) => (resolve_log_format(cli_format, None), "info".to_string()),
    };
    init_logging(SERVICE_LOG_NAME, format, &level)?;

    let mut config = loaded?;
    if let Some(port) = port_override {
        debug!(port, "Overriding service.port from CLI");
        config.service.port = port;
    }
    if let Some(env) = env_override {
        debug!(%env, "Overriding service.environment from CLI");
        config.service.environment = env;
    }

    let report = validate_config(&config);
    log_report(&report);
    if !report.is_valid() {
        anyhow::bail!(
            "Cannot start settlement service: {} configuration error(s)",
            report.errors.len()
        );
    }

    run_service(config).await
}

fn log_report(report: &ValidationReport) {
    for default in &report.defaults_applied {
        debug!(field = %default.field, value = %default.value, "Configuration default applied");
    }
    for warning in &report.warnings {
        warn!(field = %warning.field, message = %warning.message, "Configuration warning");
    }
    for err in &report.errors {
        error!("{}", err);
    }
}

fn build_rules(config: &SettlementServiceConfig) -> Result<SettlementRules> {
    let rules = SettlementRules::new(
        config
            .settlement
            .currencies
            .iter()
            .map(|c| CurrencyRule::new(c.code.as_str(), c.decimals)),
    );

    match config.settlement.max_amount.as_deref() {
        Some(raw) => {
            let max_amount = Decimal::from_str(raw.trim())
                .with_context(|| format!("Invalid settlement.max_amount '{}'", raw))?;
            Ok(rules.with_max_amount(max_amount))
        }
        None => Ok(rules),
    }
}

fn build_retry(config: &SettlementServiceConfig) -> RetryPolicy {
    let retry = &config.settlement.retry;
    RetryPolicy {
        max_retries: retry.max_retries,
        initial_delay: Duration::from_millis(retry.initial_delay_ms),
        max_delay: Duration::from_millis(retry.max_delay_ms),
        ..RetryPolicy::default()
    }
}

async fn connect_store(
    config: &SettlementServiceConfig,
    environment: Environment,
) -> Result<Arc<dyn SettlementStore>> {
    let storage = &config.storage;
    match storage.backend {
        StorageBackend::Postgres => {
            let url = storage
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow!("storage.database_url is required for the postgres backend"))?;
            let store = PostgresSettlementStore::connect(
                url,
                storage.max_connections,
                Duration::from_secs(storage.connection_timeout_seconds),
                environment,
            )
            .await
            .context("Failed to connect settlement store")?;
            Ok(Arc::new(store))
        }
        StorageBackend::Memory => {
            warn!(%environment, "Using in-memory settlement store; records do not survive restart");
            Ok(Arc::new(InMemorySettlementStore::new()))
        }
    }
}

async fn run_service(config: SettlementServiceConfig) -> Result<()> {
    let environment = Environment::parse(&config.service.environment)
        .ok_or_else(|| anyhow!("Unknown environment '{}'", config.service.environment))?;

    let codec = {
        let key = EncryptionKey::from_hex(config.security.encryption_key.trim())
            .context("Invalid security.encryption_key")?;
        Arc::new(FieldCodec::new(&key))
    };

    let store = connect_store(&config, environment).await?;
    store
        .init_schema()
        .await
        .context("Failed to initialize settlement schema")?;

    let engine = Arc::new(
        SettlementEngine::new(store, codec, build_rules(&config)?)
            .with_retry(build_retry(&config))
            .with_metrics(SettlementMetrics::new(&config.service.name)),
    );

    if config.settlement.resume_on_startup {
        let summary = engine
            .resume_in_flight()
            .await
            .context("Failed to resume in-flight settlements")?;
        info!(
            scanned = summary.scanned,
            settled = summary.settled,
            failed = summary.failed,
            errors = summary.errors,
            "Resumed in-flight settlements"
        );
    }

    let mut server_config = ServerConfig::new(config.service.host.clone(), config.service.port)
        .with_shutdown_timeout(Duration::from_secs(config.service.shutdown_timeout_seconds));
    if let Some(port) = config.service.metrics_port {
        server_config = server_config.with_metrics_port(port);
    }
    validate_ports_available(&server_config)
        .await
        .context("Port validation failed")?;

    if let Some(port) = config.service.metrics_port {
        observability::init_metrics(port).context("Failed to start metrics exporter")?;
    }

    let subject_header = HeaderName::try_from(config.security.subject_header.as_str())
        .with_context(|| format!("Invalid security.subject_header '{}'", config.security.subject_header))?;
    let api_state = SettlementApiState::new(engine.clone()).with_subject_header(subject_header);

    let shutdown = ShutdownController::with_signals();
    let health = Arc::new(HealthState::new(config.service.name.clone()));
    let probe_engine = engine.clone();
    let monitor = spawn_connection_monitor(
        health.clone(),
        "settlement-store",
        config.storage.backend.as_str(),
        Duration::from_secs(config.storage.health_check_interval_seconds),
        shutdown.child_token(),
        move || {
            let engine = probe_engine.clone();
            async move { engine.ping().await.map_err(|e| e.to_string()) }
        },
    );

    let router = create_router(Arc::new(api_state)).merge(health_routes(health));
    let http = HttpServer::new(server_config, router);

    info!(
        service = %config.service.name,
        port = config.service.port,
        %environment,
        security = "jwt+field-encryption",
        "Settlement service starting"
    );

    let served = http.run(shutdown.token()).await;
    shutdown.shutdown();
    if let Err(e) = monitor.await {
        warn!(%e, "Store monitor task ended abnormally");
    }
    served.context("HTTP server failed")?;

    info!("Settlement service stopped");
    Ok(())
}

fn validate_command<P: AsRef<Path>>(config_path: P) -> Result<()> {
    info!(path = ?config_path.as_ref(), "Validating configuration");

    let config = load_config(&config_path)?;
    let report = validate_config(&config);

    println!("\n=== Configuration Validation Report ===\n");

    if !report.defaults_applied.is_empty() {
        println!("Defaults Applied ({}):", report.defaults_applied.len());
        for default in &report.defaults_applied {
            println!("  [info] {} = {}", default.field, default.value);
        }
        println!();
    }

    if !report.warnings.is_empty() {
        println!("Warnings ({}):", report.warnings.len());
        for warning in &report.warnings {
            println!("  [warn] [{}] {}", warning.field, warning.message);
        }
        println!();
    }

    if !report.errors.is_empty() {
        println!("Errors ({}):", report.errors.len());
        for err in &report.errors {
            println!("  [error] {}", err);
        }
        println!();
        anyhow::bail!("Configuration validation failed");
    }

    println!("[ok] Configuration is valid!");
    println!();
    println!("Service: {}", config.service.name);
    println!("Environment: {}", config.service.environment);
    println!("Listen: {}:{}", config.service.host, config.service.port);
    println!("Storage: {}", config.storage.backend.as_str());
    println!("Settlement Currencies: {}", config.settlement.currencies.len());

    Ok(())
}

fn init_command<P: AsRef<Path>>(output_path: P) -> Result<()> {
    let output_path = output_path.as_ref();
    info!(?output_path, "Initializing new configuration file");

    let config = generate_default_config();

    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }

    save_config(&config, output_path)?;

    println!("[ok] Configuration file created successfully!");
    println!();
    println!("Location: {:?}", output_path);
    println!();
    println!("Next steps:");
    println!("  1. Run 'settld keygen' and export the key as SETTLEMENT_ENCRYPTION_KEY");
    println!("  2. Export DATABASE_URL (or set storage.backend: memory for local runs)");
    println!(
        "  3. Run 'settld validate --config {:?}' to check configuration",
        output_path
    );
    println!(
        "  4. Run 'settld start --config {:?}' to start the service",
        output_path
    );

    Ok(())
}

fn keygen_command() -> Result<()> {
    println!("{}", EncryptionKey::generate().to_hex());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_precedence() {
        assert_eq!(resolve_log_format(Some(LogFormatArg::Json), Some("compact")), LogFormat::Json);
        assert_eq!(resolve_log_format(None, Some("compact")), LogFormat::Compact);
        assert_eq!(resolve_log_format(None, None), LogFormat::Pretty);
        assert_eq!(resolve_log_format(None, Some("xml")), LogFormat::Pretty);
    }

    #[test]
    fn test_rules_and_retry_from_config() {
        let mut config = generate_default_config();
        config.settlement.max_amount = Some("1000000".to_string());
        config.settlement.retry.max_retries = 5;

        let rules = build_rules(&config).unwrap();
        assert!(rules.is_known_currency("usd"));
        assert!(!rules.is_known_currency("XYZ"));

        let retry = build_retry(&config);
        assert_eq!(retry.max_retries, 5);
        assert_eq!(retry.initial_delay, Duration::from_millis(100));

        config.settlement.max_amount = Some("lots".to_string());
        assert!(build_rules(&config).is_err());
    }

    #[tokio::test]
    async fn test_memory_backend_connects() {
        let mut config = generate_default_config();
        config.storage.backend = StorageBackend::Memory;
        let store = connect_store(&config, Environment::Static).await.unwrap();
        store.init_schema().await.unwrap();
        store.ping().await.unwrap();
    }
}
