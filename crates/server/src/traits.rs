//! Server lifecycle trait
//!
//! [`Server`] is the contract the HTTP listener implements.

use async_trait::async_trait;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// A long-running listener with cooperative shutdown.
///
/// # Implementors
///
/// - [`HttpServer`](crate::http::HttpServer) - HTTP server using Axum
#[async_trait]
pub trait Server: Send + Sync + 'static {
    /// Name used in logs (e.g., "http")
    fn name(&self) -> &str;

    /// Address the server is bound to, or `None` before bind and after shutdown.
    fn address(&self) -> Option<SocketAddr>;

    fn is_running(&self) -> bool;

    /// Runs the server until the shutdown token is cancelled.
    ///
    /// Implementations bind, serve until `shutdown` fires, drain in-flight
    /// work and return `Ok(())` on a clean stop.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind or hits a fatal I/O error.
    async fn run(&self, shutdown: CancellationToken) -> Result<()>;
}
