//! Health endpoints and dependency monitoring
//!
//! `/health` answers liveness; `/health/detailed` reports every tracked
//! dependency and returns 503 while any of them is down. Dependencies are
//! refreshed by [`spawn_connection_monitor`].

use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::shutdown::run_until_shutdown;

/// Health check body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: String,
    pub uptime_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub healthy: Option<bool>,
    pub connections: Vec<ConnectionStatus>,
}

/// Last observed state of one dependency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub service: String,
    pub address: String,
    pub connected: bool,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
}

/// Shared state for health checks, wrapped in `Arc` for Axum.
#[derive(Clone)]
pub struct HealthState {
    pub service_name: String,
    pub start_time: Instant,
    pub connections: Arc<tokio::sync::RwLock<Vec<ConnectionStatus>>>,
}

impl HealthState {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            start_time: Instant::now(),
            connections: Arc::new(tokio::sync::RwLock::new(Vec::new())),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub async fn update_connection(&self, status: ConnectionStatus) {
        let mut connections = self.connections.write().await;
        connections.retain(|c| c.service != status.service);
        connections.push(status);
    }

    pub async fn get_connections(&self) -> Vec<ConnectionStatus> {
        self.connections.read().await.clone()
    }

    pub async fn is_healthy(&self) -> bool {
        self.connections.read().await.iter().all(|c| c.connected)
    }

    async fn snapshot(&self, status: &str, healthy: Option<bool>) -> HealthStatus {
        HealthStatus {
            status: status.to_string(),
            service: self.service_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now().to_rfc3339(),
            uptime_seconds: self.uptime_seconds(),
            healthy,
            connections: self.get_connections().await,
        }
    }
}

/// Liveness handler; always 200 while the process serves requests
pub async fn health_handler(State(state): State<Arc<HealthState>>) -> Json<HealthStatus> {
    Json(state.snapshot("ok", None).await)
}

/// Readiness handler with dependency detail
pub async fn detailed_health_handler(
    State(state): State<Arc<HealthState>>,
) -> (StatusCode, Json<HealthStatus>) {
    let all_healthy = state.is_healthy().await;
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let status = if all_healthy { "healthy" } else { "degraded" };

    (status_code, Json(state.snapshot(status, Some(all_healthy)).await))
}

/// Create health check router
pub fn health_routes(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/health/detailed", get(detailed_health_handler))
        .with_state(state)
}

/// Probe a dependency on a fixed interval and publish the result into `state`.
///
/// The first probe runs immediately. The task exits when `shutdown` is
/// cancelled.
pub fn spawn_connection_monitor<F, Fut>(
    state: Arc<HealthState>,
    service: impl Into<String>,
    address: impl Into<String>,
    interval: Duration,
    shutdown: CancellationToken,
    probe: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = std::result::Result<(), String>> + Send,
{
    let service = service.into();
    let address = address.into();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut was_connected = true;

        loop {
            if run_until_shutdown(shutdown.clone(), ticker.tick()).await.is_none() {
                break;
            }

            let start = Instant::now();
            let Some(result) = run_until_shutdown(shutdown.clone(), probe()).await else {
                break;
            };
            let latency_ms = Some(start.elapsed().as_millis() as u64);

            let status = match result {
                Ok(()) => {
                    if !was_connected {
                        info!(%service, "Dependency recovered");
                    }
                    debug!(%service, ?latency_ms, "Dependency probe succeeded");
                    was_connected = true;
                    ConnectionStatus {
                        service: service.clone(),
                        address: address.clone(),
                        connected: true,
                        latency_ms,
                        error: None,
                    }
                }
                Err(error) => {
                    if was_connected {
                        warn!(%service, %error, "Dependency probe failed");
                    }
                    was_connected = false;
                    ConnectionStatus {
                        service: service.clone(),
                        address: address.clone(),
                        connected: false,
                        latency_ms,
                        error: Some(error),
                    }
                }
            };
            state.update_connection(status).await;
        }

        debug!(%service, "Dependency monitor stopped");
    })
}
