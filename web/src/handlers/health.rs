//! Health check endpoints.
//!
//! These endpoints are used by load balancers and monitoring systems
//! to verify service health. Liveness never touches dependencies;
//! readiness reports each dependency the service was built with.

use axum::{Json, http::StatusCode};
use serde::Serialize;

/// Simple health check endpoint (for basic liveness).
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Status of one dependency in a readiness report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Reachable and fully functional
    Healthy,
    /// Reachable but shedding load (for example a circuit is open)
    Degraded,
    /// Not reachable
    Unhealthy,
}

/// One dependency's entry in a readiness report.
#[derive(Debug, Clone, Serialize)]
pub struct DependencyCheck {
    /// Dependency name (`redis`, `postgres`, `breaker:queue`, …)
    pub component: String,
    /// Status
    pub status: HealthStatus,
    /// Failure detail or state description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DependencyCheck {
    /// Healthy dependency.
    #[must_use]
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Healthy,
            message: None,
        }
    }

    /// Degraded dependency.
    #[must_use]
    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
        }
    }

    /// Unreachable dependency.
    #[must_use]
    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
        }
    }
}

/// Readiness response body.
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessReport {
    /// Worst status across all checks
    pub status: HealthStatus,
    /// Individual checks
    pub checks: Vec<DependencyCheck>,
}

impl ReadinessReport {
    /// Aggregate checks; the report is as bad as its worst entry.
    #[must_use]
    pub fn from_checks(checks: Vec<DependencyCheck>) -> Self {
        let status = if checks.iter().any(|c| c.status == HealthStatus::Unhealthy) {
            HealthStatus::Unhealthy
        } else if checks.iter().any(|c| c.status == HealthStatus::Degraded) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        Self { status, checks }
    }

    /// `200` when healthy or degraded, `503` when any dependency is down.
    #[must_use]
    pub fn into_response_parts(self) -> (StatusCode, Json<Self>) {
        let status = match self.status {
            HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simple_health_check() {
        let (status, body) = health_check().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[test]
    fn degraded_dependency_is_still_ready() {
        let report = ReadinessReport::from_checks(vec![
            DependencyCheck::healthy("redis"),
            DependencyCheck::degraded("breaker:queue", "open"),
        ]);

        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.into_response_parts().0, StatusCode::OK);
    }

    #[test]
    fn unhealthy_dependency_is_not_ready() {
        let report = ReadinessReport::from_checks(vec![
            DependencyCheck::healthy("redis"),
            DependencyCheck::unhealthy("postgres", "connection refused"),
        ]);

        assert_eq!(report.into_response_parts().0, StatusCode::SERVICE_UNAVAILABLE);
    }
}
