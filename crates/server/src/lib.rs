//! Server infrastructure for the settlement service
//!
//! Provides the HTTP listener, health endpoints, port checks and
//! signal-driven shutdown used by the `settld` binary.
//!
//! # Architecture
//!
//! The listener implements the [`Server`] trait. Shutdown uses
//! `CancellationToken` from `tokio_util`, so cancelling the root token stops
//! the listener and every dependency monitor holding a child token.
//!
//! # Quick Start
//!
//! ```ignore
//! use server::{health_routes, HealthState, HttpServer, Server, ServerConfig, ShutdownController};
//!
//! let shutdown = ShutdownController::with_signals();
//! let health = Arc::new(HealthState::new("settlement"));
//! let router = api_router.merge(health_routes(health));
//! HttpServer::new(ServerConfig::default(), router)
//!     .run(shutdown.token())
//!     .await?;
//! ```

pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod port_validator;
pub mod shutdown;
pub mod traits;

pub use config::{ports, ServerConfig};
pub use error::{Result, ServerError};
pub use health::{health_routes, spawn_connection_monitor, ConnectionStatus, HealthState, HealthStatus};
pub use http::HttpServer;
pub use port_validator::validate_ports_available;
pub use shutdown::{run_until_shutdown, ShutdownController};
pub use traits::Server;
