//! Prometheus metrics infrastructure
//!
//! This module provides utilities for initializing the Prometheus exporter
//! and the metric set recorded by the settlement engine.

use metrics::{counter, histogram, Counter, Histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Initialize the Prometheus metrics exporter
///
/// This starts an HTTP server on the specified port that exposes metrics
/// at the `/metrics` endpoint.
///
/// # Arguments
///
/// * `port` - Port to expose metrics on
///
/// # Example
///
/// ```ignore
/// observability::metrics::init_metrics(9095)?;
/// // Metrics available at http://localhost:9095/metrics
/// ```
pub fn init_metrics(port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    tracing::info!(%addr, "Metrics server listening");
    Ok(())
}

/// Outcome label for `settlement_submissions_total`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcomeLabel {
    Settled,
    Failed,
    Replayed,
    Rejected,
    Error,
}

impl SubmitOutcomeLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            SubmitOutcomeLabel::Settled => "settled",
            SubmitOutcomeLabel::Failed => "failed",
            SubmitOutcomeLabel::Replayed => "replayed",
            SubmitOutcomeLabel::Rejected => "rejected",
            SubmitOutcomeLabel::Error => "error",
        }
    }
}

/// Settlement engine metrics
///
/// # Metrics
///
/// * `settlement_submissions_total{outcome}` - Submissions by outcome
/// * `settlement_submit_duration_seconds` - End-to-end submit latency
/// * `settlement_conflicts_total` - Lost compare-and-swap writes
/// * `settlement_reversals_total` - Reversal records created
///
/// Handles are cheap to clone; with no recorder installed every call is a no-op.
#[derive(Clone)]
pub struct SettlementMetrics {
    submit_duration: Histogram,
    conflicts: Counter,
    reversals: Counter,
    service_name: String,
}

impl SettlementMetrics {
    /// Create metrics for a service instance
    ///
    /// # Arguments
    ///
    /// * `service_name` - Value of the `service` label
    pub fn new(service_name: &str) -> Self {
        let name = service_name.to_string();

        Self {
            submit_duration: histogram!("settlement_submit_duration_seconds", "service" => name.clone()),
            conflicts: counter!("settlement_conflicts_total", "service" => name.clone()),
            reversals: counter!("settlement_reversals_total", "service" => name.clone()),
            service_name: name,
        }
    }

    /// Record a finished submission
    pub fn record_submission(&self, outcome: SubmitOutcomeLabel, duration: Duration) {
        counter!(
            "settlement_submissions_total",
            "service" => self.service_name.clone(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
        self.submit_duration.record(duration.as_secs_f64());
    }

    /// Record a lost conditional write
    pub fn record_conflict(&self) {
        self.conflicts.increment(1);
    }

    /// Record a newly created reversal
    pub fn record_reversal(&self) {
        self.reversals.increment(1);
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}

impl std::fmt::Debug for SettlementMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementMetrics")
            .field("service_name", &self.service_name)
            .finish()
    }
}

/// Submission timer that records on drop
///
/// The outcome defaults to `Error` so an early return through `?` is counted.
///
/// # Example
///
/// ```ignore
/// let metrics = SettlementMetrics::new("settlement");
/// {
///     let mut guard = SubmitMetricsGuard::new(&metrics);
///     // ... submit ...
///     guard.set_outcome(SubmitOutcomeLabel::Settled);
/// }
/// ```
pub struct SubmitMetricsGuard<'a> {
    metrics: &'a SettlementMetrics,
    start: Instant,
    outcome: SubmitOutcomeLabel,
}

impl<'a> SubmitMetricsGuard<'a> {
    pub fn new(metrics: &'a SettlementMetrics) -> Self {
        Self {
            metrics,
            start: Instant::now(),
            outcome: SubmitOutcomeLabel::Error,
        }
    }

    pub fn set_outcome(&mut self, outcome: SubmitOutcomeLabel) {
        self.outcome = outcome;
    }
}

impl Drop for SubmitMetricsGuard<'_> {
    fn drop(&mut self) {
        self.metrics
            .record_submission(self.outcome, self.start.elapsed());
    }
}
