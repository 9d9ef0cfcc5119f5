//! Prometheus metrics for the flash-sale pipeline.
//!
//! [`MetricsRecorder::install`] installs the global recorder once at startup
//! and describes every metric; the HTTP layer serves
//! [`MetricsRecorder::render`] on `/metrics`.
//!
//! # Example
//!
//! ```rust,no_run
//! use flashsale_runtime::metrics::{AdmissionMetrics, MetricsRecorder};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let recorder = MetricsRecorder::install()?;
//! AdmissionMetrics::record_outcome("queued");
//! println!("{}", recorder.render());
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to configure the exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install the global recorder
    #[error("Failed to install metrics recorder: {0}")]
    Install(String),
}

/// Handle to the installed Prometheus recorder.
#[derive(Clone)]
pub struct MetricsRecorder {
    handle: PrometheusHandle,
}

impl MetricsRecorder {
    /// Install the global Prometheus recorder and describe all metrics.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or a recorder
    /// is already installed.
    pub fn install() -> Result<Self, MetricsError> {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .install_recorder()
            .map_err(|e| MetricsError::Install(e.to_string()))?;

        describe_metrics();
        tracing::info!("Prometheus recorder installed");

        Ok(Self { handle })
    }

    /// Render current metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

fn describe_metrics() {
    describe_counter!(
        "flashsale_admission_total",
        "Flash-sale admission attempts by outcome"
    );
    describe_histogram!(
        "flashsale_admission_duration_seconds",
        "Time spent on the admission path"
    );
    describe_counter!(
        "flashsale_rate_limited_total",
        "Requests rejected by the admission gate, by route class"
    );
    describe_counter!(
        "flashsale_intents_published_total",
        "Purchase intents accepted by the durable queue"
    );
    describe_counter!(
        "flashsale_compensations_total",
        "Decrements compensated after a failed publish or a lost dedup race"
    );
    describe_counter!(
        "flashsale_compensation_failures_total",
        "Compensating steps that failed after retries, by step"
    );
    describe_counter!(
        "flashsale_materializer_outcomes_total",
        "Intents handled by the order materializer, by outcome"
    );
    describe_histogram!(
        "flashsale_materializer_duration_seconds",
        "Time to materialize one intent"
    );
    describe_counter!(
        "flashsale_dead_letters_total",
        "Intents parked in the dead-letter store"
    );
    describe_counter!(
        "flashsale_dead_letters_settled_total",
        "Dead-letter entries resolved or discarded by an operator"
    );
    describe_gauge!(
        "flashsale_circuit_breaker_state",
        "Circuit breaker state (0=closed, 1=half-open, 2=open)"
    );
    describe_counter!(
        "flashsale_circuit_breaker_transitions_total",
        "Circuit breaker state transitions"
    );
    describe_counter!(
        "flashsale_circuit_breaker_rejections_total",
        "Calls rejected because the circuit was open"
    );
}

/// Admission path recorder.
pub struct AdmissionMetrics;

impl AdmissionMetrics {
    /// Count one admission attempt. `outcome` is `queued` or an error reason.
    pub fn record_outcome(outcome: &'static str) {
        counter!("flashsale_admission_total", "outcome" => outcome).increment(1);
    }

    /// Record admission latency.
    pub fn record_duration(duration: Duration) {
        histogram!("flashsale_admission_duration_seconds").record(duration.as_secs_f64());
    }

    /// Count a gate rejection.
    pub fn record_rate_limited(class: &'static str) {
        counter!("flashsale_rate_limited_total", "class" => class).increment(1);
    }

    /// Count an intent accepted by the queue.
    pub fn record_published() {
        counter!("flashsale_intents_published_total").increment(1);
    }
}

/// Compensator recorder.
pub struct CompensationMetrics;

impl CompensationMetrics {
    /// Count one compensation run.
    pub fn record_compensation() {
        counter!("flashsale_compensations_total").increment(1);
    }

    /// Count a compensating step that failed for good.
    pub fn record_failure(step: &'static str) {
        counter!("flashsale_compensation_failures_total", "step" => step).increment(1);
    }
}

/// Order materializer recorder.
pub struct MaterializerMetrics;

impl MaterializerMetrics {
    /// Count one handled delivery.
    pub fn record_outcome(outcome: &'static str) {
        counter!("flashsale_materializer_outcomes_total", "outcome" => outcome).increment(1);
    }

    /// Record time spent on one delivery.
    pub fn record_duration(duration: Duration) {
        histogram!("flashsale_materializer_duration_seconds").record(duration.as_secs_f64());
    }

    /// Count a dead-lettered intent.
    pub fn record_dead_letter() {
        counter!("flashsale_dead_letters_total").increment(1);
    }
}
