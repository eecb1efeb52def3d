//! Prometheus metrics for the reservation engine.
//!
//! Counters are recorded through the `metrics` facade, so they cost nothing until
//! a recorder is installed. [`MetricsExporter`] installs the Prometheus recorder
//! and renders the scrape text; serving it over HTTP is left to the host process.
//!
//! # Example
//!
//! ```rust,no_run
//! use matchbook_runtime::metrics::MetricsExporter;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut exporter = MetricsExporter::new();
//! exporter.install()?;
//!
//! if let Some(text) = exporter.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use matchbook_core::ReservationError;
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, histogram};

/// Join attempts by outcome.
pub const JOINS_TOTAL: &str = "matchbook_joins_total";
/// Transaction retries by operation.
pub const TRANSACTION_RETRIES_TOTAL: &str = "matchbook_transaction_retries_total";
/// Role request transitions.
pub const ROLE_REQUESTS_TOTAL: &str = "matchbook_role_requests_total";
/// Match lifecycle transitions.
pub const MATCH_TRANSITIONS_TOTAL: &str = "matchbook_match_transitions_total";
/// End-to-end latency of mutating operations.
pub const OPERATION_DURATION_SECONDS: &str = "matchbook_operation_duration_seconds";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Installs the Prometheus recorder and renders its output.
#[derive(Default)]
pub struct MetricsExporter {
    handle: Option<PrometheusHandle>,
}

impl MetricsExporter {
    /// Create an exporter that has not installed anything yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Describe every engine metric and install the global Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or installed.
    /// A recorder that is already installed (common in tests) is not an error;
    /// the exporter then has no handle and [`Self::render`] returns `None`.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Prometheus metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if this exporter did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(JOINS_TOTAL, "Join attempts by outcome");
    describe_counter!(
        TRANSACTION_RETRIES_TOTAL,
        "Transactions re-run after a storage conflict"
    );
    describe_counter!(ROLE_REQUESTS_TOTAL, "Role request submissions and resolutions");
    describe_counter!(
        MATCH_TRANSITIONS_TOTAL,
        "Match cancellations and completions"
    );
    describe_histogram!(
        OPERATION_DURATION_SECONDS,
        "Time taken by mutating engine operations, retries included"
    );
}

/// Join metrics recorder.
pub struct JoinMetrics;

impl JoinMetrics {
    /// Record the outcome of one `join_match` call; `None` means it succeeded.
    pub fn record(error: Option<&ReservationError>, duration: Duration) {
        let outcome = match error {
            None => "joined",
            Some(ReservationError::CapacityExceeded { .. }) => "capacity_exceeded",
            Some(ReservationError::AlreadyJoined { .. }) => "already_joined",
            Some(ReservationError::TransientFailure { .. }) => "transient_failure",
            Some(_) => "rejected",
        };
        counter!(JOINS_TOTAL, "outcome" => outcome).increment(1);
        histogram!(OPERATION_DURATION_SECONDS, "operation" => "join_match")
            .record(duration.as_secs_f64());
    }
}

/// Transaction metrics recorder.
pub struct TransactionMetrics;

impl TransactionMetrics {
    /// Record one retry of `operation`.
    pub fn record_retry(operation: &'static str) {
        counter!(TRANSACTION_RETRIES_TOTAL, "operation" => operation).increment(1);
    }

    /// Record the latency of a mutating operation.
    pub fn record_duration(operation: &'static str, duration: Duration) {
        histogram!(OPERATION_DURATION_SECONDS, "operation" => operation)
            .record(duration.as_secs_f64());
    }
}

/// Role request metrics recorder.
pub struct RoleRequestMetrics;

impl RoleRequestMetrics {
    /// Record a transition: `submitted`, `approved` or `rejected`.
    pub fn record_transition(transition: &'static str) {
        counter!(ROLE_REQUESTS_TOTAL, "transition" => transition).increment(1);
    }
}

/// Match lifecycle metrics recorder.
pub struct MatchMetrics;

impl MatchMetrics {
    /// Record a lifecycle transition: `cancelled` or `completed`.
    pub fn record_transition(transition: &'static str) {
        counter!(MATCH_TRANSITIONS_TOTAL, "transition" => transition).increment(1);
    }
}
