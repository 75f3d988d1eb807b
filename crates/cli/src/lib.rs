use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "settld")]
#[command(about = "Exchange settlement service - encrypted, idempotent settlement ledger")]
#[command(version)]
pub struct Cli {
    /// Log output format; overrides logging.format in the config file
    #[arg(long, global = true, value_enum, env = "SETTLD_LOG_FORMAT")]
    pub log_format: Option<LogFormatArg>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the settlement service
    Start {
        /// Path to the configuration file
        #[arg(short, long, default_value = "config/settlement.yaml")]
        config: PathBuf,

        /// Override service.port
        #[arg(short, long)]
        port: Option<u16>,

        /// Override service.environment (prod, virtual, static)
        #[arg(short, long, env = "SETTLEMENT_ENV")]
        env: Option<String>,
    },

    /// Validate configuration without starting the service
    Validate {
        /// Path to the configuration file
        #[arg(short, long, default_value = "config/settlement.yaml")]
        config: PathBuf,
    },

    /// Write a configuration file with all defaults
    Init {
        /// Output path for the new configuration file
        #[arg(short, long, default_value = "settlement.yaml")]
        output: PathBuf,
    },

    /// Print a freshly generated encryption key as hex
    Keygen,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormatArg {
    Pretty,
    Json,
    Compact,
}

impl LogFormatArg {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormatArg::Pretty => "pretty",
            LogFormatArg::Json => "json",
            LogFormatArg::Compact => "compact",
        }
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_overrides() {
        let cli = Cli::try_parse_from([
            "settld", "--log-format", "json", "start", "--config", "/etc/settld.yaml", "--port", "9000", "--env", "virtual",
        ])
        .unwrap();

        assert_eq!(cli.log_format, Some(LogFormatArg::Json));
        match cli.command {
            Commands::Start { config, port, env } => {
                assert_eq!(config, PathBuf::from("/etc/settld.yaml"));
                assert_eq!(port, Some(9000));
                assert_eq!(env.as_deref(), Some("virtual"));
            }
            other => panic!("expected start, got {:?}", other),
        }
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["settld", "validate"]).unwrap();
        match cli.command {
            Commands::Validate { config } => assert_eq!(config, PathBuf::from("config/settlement.yaml")),
            other => panic!("expected validate, got {:?}", other),
        }

        assert!(matches!(
            Cli::try_parse_from(["settld", "keygen"]).unwrap().command,
            Commands::Keygen
        ));
    }

    #[test]
    fn test_unknown_log_format_is_rejected() {
        assert!(Cli::try_parse_from(["settld", "--log-format", "xml", "keygen"]).is_err());
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
