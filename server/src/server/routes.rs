//! Router configuration for the flash-sale service.

use super::health::{metrics, readiness};
use super::state::AppState;
use crate::api::seckill;
use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use flashsale_core::admission::AdmissionGate;
use flashsale_web::handlers::health_check;
use flashsale_web::{RouteLimit, TrustedProxies, admission_limit, correlation_id_layer};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Admission gates per route class.
///
/// `login` is carried for the gateway's auth routes; this service mounts
/// none, so it is only consulted where a deployment adds them.
#[derive(Clone)]
pub struct RouteGates {
    /// Admin and read endpoints
    pub general: Arc<dyn AdmissionGate>,
    /// Credential endpoints
    pub login: Arc<dyn AdmissionGate>,
    /// Purchase attempts
    pub seckill: Arc<dyn AdmissionGate>,
    /// Proxies whose forwarding headers name the client
    pub trusted: TrustedProxies,
}

/// Build the complete router.
///
/// - `POST /seckill` behind the `seckill` gate
/// - `POST /seckill/init`, `GET /seckill/:product_id/stock` behind `general`
/// - `/health`, `/ready`, `/metrics` ungated
pub fn build_router(state: AppState, gates: &RouteGates) -> Router {
    let purchase = Router::new()
        .route("/seckill", post(seckill::submit))
        .route_layer(from_fn_with_state(
            RouteLimit::new("seckill", gates.seckill.clone())
                .with_trusted_proxies(gates.trusted.clone()),
            admission_limit,
        ));

    let admin = Router::new()
        .route("/seckill/init", post(seckill::init))
        .route("/seckill/:product_id/stock", get(seckill::stock))
        .route_layer(from_fn_with_state(
            RouteLimit::new("general", gates.general.clone())
                .with_trusted_proxies(gates.trusted.clone()),
            admission_limit,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness))
        .route("/metrics", get(metrics))
        .merge(purchase)
        .merge(admin)
        .layer(correlation_id_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
