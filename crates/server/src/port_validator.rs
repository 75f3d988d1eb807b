//! Port validation utilities
//!
//! Checking a port before binding races with other processes; the bind
//! itself stays authoritative. These checks exist to fail startup early
//! with a readable message.

use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};

/// Validate that every configured port is in range and currently free
pub async fn validate_ports_available(config: &ServerConfig) -> Result<()> {
    info!("Validating server ports...");

    validate_config_ports(config)?;

    let ports = config.bound_ports();
    for (i, (protocol, port)) in ports.iter().enumerate() {
        if ports[..i].iter().any(|(_, other)| other == port) {
            return Err(ServerError::ConfigError(format!(
                "{} port {} is already assigned to another listener",
                protocol, port
            )));
        }
    }

    for (protocol, port) in ports {
        validate_single_port(&config.host, port, protocol).await?;
    }

    info!("All server ports validated successfully");
    Ok(())
}

async fn validate_single_port(host: &str, port: u16, protocol: &str) -> Result<()> {
    let addr = format!("{}:{}", host, port);
    debug!("Checking {} port {}", protocol, port);

    match TcpListener::bind(&addr).await {
        Ok(listener) => {
            let local_addr = listener
                .local_addr()
                .map_err(|e| ServerError::bind(addr.clone(), e))?;
            drop(listener);

            info!("{} port {} is available ({})", protocol, port, local_addr);
            Ok(())
        }
        Err(e) => {
            error!("{} port {} is NOT available: {}", protocol, port, e);
            Err(ServerError::port_in_use(port, e.to_string()))
        }
    }
}

/// Validate port range
///
/// Port 0 is rejected. Ports below 1024 generate a warning.
pub fn validate_port_range(port: u16) -> Result<()> {
    if port == 0 {
        Err(ServerError::ConfigError(
            "Port cannot be 0 (ephemeral port assignment not supported for explicit binding)"
                .to_string(),
        ))
    } else if port < 1024 {
        warn!(
            "Port {} is a privileged port (requires root/admin privileges)",
            port
        );
        Ok(())
    } else {
        Ok(())
    }
}

/// Validate all ports in a configuration
pub fn validate_config_ports(config: &ServerConfig) -> Result<()> {
    for (_, port) in config.bound_ports() {
        validate_port_range(port)?;
    }
    Ok(())
}
