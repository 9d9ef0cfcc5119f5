//! Readiness and metrics endpoints.
//!
//! `/ready` pings every dependency probe and reports each circuit breaker.
//! A dependency that does not answer makes the instance unready (`503`);
//! an open or half-open breaker only degrades it.

use super::state::AppState;
use async_trait::async_trait;
use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use flashsale_core::orders::OrderRepository;
use flashsale_redis::RedisFlashStore;
use flashsale_runtime::circuit_breaker::State as BreakerState;
use flashsale_web::handlers::{DependencyCheck, ReadinessReport};
use std::sync::Arc;

/// A dependency `/ready` can ping.
#[async_trait]
pub trait DependencyProbe: Send + Sync {
    /// Component name in the report.
    fn name(&self) -> &'static str;

    /// `Err` carries the failure detail.
    async fn check(&self) -> Result<(), String>;
}

/// Pings the shared store.
pub struct RedisProbe(pub RedisFlashStore);

#[async_trait]
impl DependencyProbe for RedisProbe {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn check(&self) -> Result<(), String> {
        self.0.ping().await.map_err(|e| e.to_string())
    }
}

/// Pings the order database.
pub struct RepositoryProbe(pub Arc<dyn OrderRepository>);

#[async_trait]
impl DependencyProbe for RepositoryProbe {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn check(&self) -> Result<(), String> {
        self.0.ping().await.map_err(|e| e.to_string())
    }
}

/// Readiness endpoint.
///
/// # Endpoint
///
/// ```text
/// GET /ready
/// ```
///
/// ```json
/// {"status":"degraded","checks":[
///   {"component":"redis","status":"healthy"},
///   {"component":"breaker:queue","status":"degraded","message":"open"}
/// ]}
/// ```
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<ReadinessReport>) {
    let probes = state.probes.iter().map(|probe| async move {
        match probe.check().await {
            Ok(()) => DependencyCheck::healthy(probe.name()),
            Err(message) => {
                tracing::warn!(component = probe.name(), error = %message, "Readiness probe failed");
                DependencyCheck::unhealthy(probe.name(), message)
            }
        }
    });
    let mut checks = futures::future::join_all(probes).await;

    for breaker in &state.breakers {
        let snapshot = breaker.snapshot().await;
        let component = format!("breaker:{}", snapshot.name);
        checks.push(match snapshot.state {
            BreakerState::Closed => DependencyCheck::healthy(component),
            open => DependencyCheck::degraded(
                component,
                format!(
                    "{} since {}, {} consecutive failures",
                    open.as_str(),
                    snapshot.last_transition_at.to_rfc3339(),
                    snapshot.consecutive_failures
                ),
            ),
        });
    }

    ReadinessReport::from_checks(checks).into_response_parts()
}

/// Prometheus scrape endpoint.
///
/// `404` when the service runs without a recorder.
#[allow(clippy::unused_async)]
pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(recorder) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            recorder.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
