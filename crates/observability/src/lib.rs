//! Observability infrastructure for the settlement service
//!
//! This crate provides:
//! - Structured logging via tracing
//! - Prometheus metrics
//! - Settlement engine metric helpers
//!
//! # Quick Start
//!
//! ```ignore
//! use observability::{init_logging, LogFormat};
//!
//! // Initialize logging
//! init_logging("settlement", LogFormat::Pretty, "info")?;
//!
//! // Initialize metrics (optional)
//! observability::metrics::init_metrics(9095)?;
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat};
pub use metrics::{init_metrics, SettlementMetrics, SubmitMetricsGuard, SubmitOutcomeLabel};
