//! Application state shared by every handler.

use super::health::DependencyProbe;
use crate::api::AdminSecret;
use crate::pipeline::SeckillPipeline;
use axum::extract::FromRef;
use flashsale_runtime::circuit_breaker::CircuitBreaker;
use flashsale_runtime::metrics::MetricsRecorder;
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
///
/// Cloned per request; every field is an `Arc` or cheap handle.
#[derive(Clone)]
pub struct AppState {
    /// Admission pipeline
    pub pipeline: Arc<SeckillPipeline>,

    /// Admin bearer token
    pub admin: AdminSecret,

    /// Dependencies checked by `/ready`
    pub probes: Vec<Arc<dyn DependencyProbe>>,

    /// Breakers reported by `/ready`
    pub breakers: Vec<CircuitBreaker>,

    /// Prometheus handle, absent when no recorder was installed
    pub metrics: Option<MetricsRecorder>,
}

impl AppState {
    /// State with no probes, breakers or metrics.
    #[must_use]
    pub fn new(pipeline: Arc<SeckillPipeline>, admin: AdminSecret) -> Self {
        Self {
            pipeline,
            admin,
            probes: Vec::new(),
            breakers: Vec::new(),
            metrics: None,
        }
    }

    /// Add a readiness probe.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn DependencyProbe>) -> Self {
        self.probes.push(probe);
        self
    }

    /// Report a breaker's state in readiness.
    #[must_use]
    pub fn with_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breakers.push(breaker);
        self
    }

    /// Serve `/metrics` from this recorder.
    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsRecorder) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

impl FromRef<AppState> for AdminSecret {
    fn from_ref(state: &AppState) -> Self {
        state.admin.clone()
    }
}
