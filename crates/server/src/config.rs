//! Server configuration
//!
//! Bind address, port constants and shutdown timing for the settlement
//! service listener.

use crate::error::{Result, ServerError};
use std::net::SocketAddr;
use std::time::Duration;

/// Standard port assignments
pub mod ports {
    /// Settlement service HTTP port
    pub const SETTLEMENT_HTTP: u16 = 8085;
    /// Prometheus exporter port
    pub const SETTLEMENT_METRICS: u16 = 9095;
}

/// Listener configuration
///
/// # Example
///
/// ```
/// use server::config::ServerConfig;
///
/// let config = ServerConfig::new("127.0.0.1", 8085).with_metrics_port(9095);
/// assert_eq!(config.http_port, 8085);
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// HTTP port; 0 binds an ephemeral port
    pub http_port: u16,
    /// Prometheus exporter port, if metrics are enabled
    pub metrics_port: Option<u16>,
    /// How long in-flight requests may drain after shutdown is signalled
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, http_port: u16) -> Self {
        Self {
            host: host.into(),
            http_port,
            metrics_port: None,
            shutdown_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_metrics_port(mut self, port: u16) -> Self {
        self.metrics_port = Some(port);
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Get HTTP socket address
    pub fn http_addr(&self) -> Result<SocketAddr> {
        self.parse_addr(self.http_port)
    }

    /// Every port this configuration binds, labelled for logs
    pub fn bound_ports(&self) -> Vec<(&'static str, u16)> {
        let mut ports = vec![("HTTP", self.http_port)];
        if let Some(port) = self.metrics_port {
            ports.push(("metrics", port));
        }
        ports
    }

    /// Parse an address from host and port
    fn parse_addr(&self, port: u16) -> Result<SocketAddr> {
        format!("{}:{}", self.host, port)
            .parse()
            .map_err(|_| ServerError::InvalidAddress(format!("{}:{}", self.host, port)))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("0.0.0.0", ports::SETTLEMENT_HTTP)
    }
}
