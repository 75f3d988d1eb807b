//! HTTP server implementation using Axum
//!
//! This module provides an HTTP server built on Axum, implementing the
//! [`Server`](crate::Server) trait for consistent lifecycle management.

use async_trait::async_trait;
use axum::Router;
use parking_lot::RwLock;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::traits::Server;

/// HTTP server implementation using Axum
///
/// Wraps the application router with request tracing and serves it until
/// the shutdown token is cancelled. In-flight requests get
/// [`ServerConfig::shutdown_timeout`] to drain.
///
/// # Example
///
/// ```ignore
/// use server::{HttpServer, Server, ServerConfig, ShutdownController};
///
/// let shutdown = ShutdownController::with_signals();
/// let server = HttpServer::new(ServerConfig::new("127.0.0.1", 8085), router);
/// server.run(shutdown.token()).await?;
/// ```
#[derive(Clone)]
pub struct HttpServer {
    config: ServerConfig,
    router: Router,
    running: Arc<AtomicBool>,
    bound_addr: Arc<RwLock<Option<SocketAddr>>>,
}

impl HttpServer {
    /// Create a new HTTP server around `router`
    pub fn new(config: ServerConfig, router: Router) -> Self {
        Self {
            config,
            router: router.layer(TraceLayer::new_for_http()),
            running: Arc::new(AtomicBool::new(false)),
            bound_addr: Arc::new(RwLock::new(None)),
        }
    }
}

#[async_trait]
impl Server for HttpServer {
    fn name(&self) -> &str {
        "http"
    }

    fn address(&self) -> Option<SocketAddr> {
        *self.bound_addr.read()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn run(&self, shutdown_token: CancellationToken) -> Result<()> {
        let addr = self.config.http_addr()?;

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::bind(addr.to_string(), e))?;

        let local_addr = listener.local_addr().map_err(ServerError::Io)?;
        *self.bound_addr.write() = Some(local_addr);

        info!(%local_addr, "HTTP server listening");
        self.running.store(true, Ordering::SeqCst);

        let drain_token = CancellationToken::new();
        let drain_trigger = drain_token.clone();
        let serve = axum::serve(listener, self.router.clone())
            .with_graceful_shutdown(async move {
                shutdown_token.cancelled().await;
                info!("HTTP server received shutdown signal");
                drain_trigger.cancel();
            })
            .into_future();

        let timeout = self.config.shutdown_timeout;
        let result = tokio::select! {
            result = serve => result.map_err(ServerError::Io),
            _ = async {
                drain_token.cancelled().await;
                tokio::time::sleep(timeout).await;
            } => {
                warn!(?timeout, "HTTP server did not drain in time");
                Err(ServerError::ShutdownError(format!(
                    "requests still in flight after {:?}",
                    timeout
                )))
            }
        };

        self.running.store(false, Ordering::SeqCst);
        *self.bound_addr.write() = None;

        match result {
            Ok(()) => {
                info!("HTTP server shutdown complete");
                Ok(())
            }
            Err(e) => {
                error!(%e, "HTTP server error");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use std::time::Duration;

    fn test_router() -> Router {
        Router::new().route("/", get(|| async { "settlement" }))
    }

    #[tokio::test]
    async fn test_http_server_shutdown() {
        let config = ServerConfig::new("127.0.0.1", 0); // ephemeral port
        let server = HttpServer::new(config, test_router());
        let observer = server.clone();
        let token = CancellationToken::new();
        let handle = tokio::spawn({
            let token = token.clone();
            async move { server.run(token).await }
        });

        // Give server time to start
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(observer.is_running());
        assert!(observer.address().is_some());

        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(result.is_ok(), "Server should shutdown within timeout");
        assert!(!observer.is_running());
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let server = HttpServer::new(ServerConfig::new("127.0.0.1", port), test_router());
        let result = server.run(CancellationToken::new()).await;
        assert!(matches!(result, Err(ServerError::BindError { .. })));
    }

    #[test]
    fn test_http_server_name() {
        let server = HttpServer::new(ServerConfig::default(), test_router());
        assert_eq!(server.name(), "http");
    }
}
