//! Axum middleware for request tracking and admission control.
//!
//! - [`correlation_id_layer`]: extract or generate a correlation id, run the
//!   request inside a span carrying it, echo it in the response
//! - [`admission_limit`]: per route class throttling through an
//!   [`AdmissionGate`], keyed by `<class>:<client ip>`. The client ip is
//!   the connected peer; forwarding headers count only when that peer is a
//!   configured [`TrustedProxies`] entry
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, middleware::from_fn_with_state, routing::post};
//! use flashsale_web::middleware::{RouteLimit, admission_limit, correlation_id_layer};
//!
//! let app = Router::new()
//!     .route("/seckill", post(seckill))
//!     .route_layer(from_fn_with_state(RouteLimit::new("seckill", gate), admission_limit))
//!     .layer(correlation_id_layer());
//! ```

use crate::error::AppError;
use crate::extractors::{TrustedProxies, extract_client_ip};
use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use flashsale_core::admission::{Admission, AdmissionGate};
use flashsale_runtime::metrics::AdmissionMetrics;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::Instrument;
use uuid::Uuid;

/// Header name for correlation ID.
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// Create a layer that adds correlation ID tracking to all requests.
///
/// This layer:
/// - Extracts correlation ID from request header or generates new UUID
/// - Stores correlation ID in request extensions
/// - Creates tracing span with correlation_id field
/// - Injects correlation ID into response header
#[must_use]
pub const fn correlation_id_layer() -> CorrelationIdLayer {
    CorrelationIdLayer
}

/// Layer for correlation ID tracking.
#[derive(Clone, Debug)]
pub struct CorrelationIdLayer;

impl<S> Layer<S> for CorrelationIdLayer {
    type Service = CorrelationIdMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorrelationIdMiddleware { inner }
    }
}

/// Middleware service for correlation ID tracking.
#[derive(Clone, Debug)]
pub struct CorrelationIdMiddleware<S> {
    inner: S,
}

impl<S> Service<Request> for CorrelationIdMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let correlation_id = req
            .headers()
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::new_v4);

        req.extensions_mut().insert(correlation_id);

        let span = tracing::info_span!(
            "http_request",
            correlation_id = %correlation_id,
            method = %req.method(),
            uri = %req.uri(),
        );

        let fut = self.inner.call(req);

        Box::pin(async move {
            let mut response = fut.instrument(span).await?;

            if let Ok(header_value) = HeaderValue::from_str(&correlation_id.to_string()) {
                response
                    .headers_mut()
                    .insert(CORRELATION_ID_HEADER, header_value);
            }

            Ok(response)
        })
    }
}

/// Gate and route class for [`admission_limit`].
#[derive(Clone)]
pub struct RouteLimit {
    class: &'static str,
    gate: Arc<dyn AdmissionGate>,
    trusted: TrustedProxies,
}

impl RouteLimit {
    /// Throttle a route class (`general`, `login`, `seckill`) with `gate`.
    #[must_use]
    pub fn new(class: &'static str, gate: Arc<dyn AdmissionGate>) -> Self {
        Self {
            class,
            gate,
            trusted: TrustedProxies::default(),
        }
    }

    /// Read forwarding headers when the peer is one of `trusted`.
    #[must_use]
    pub fn with_trusted_proxies(mut self, trusted: TrustedProxies) -> Self {
        self.trusted = trusted;
        self
    }

    /// Route class name.
    #[must_use]
    pub const fn class(&self) -> &'static str {
        self.class
    }
}

/// Admission middleware.
///
/// Denied requests get `429` with `Retry-After`. A gate that cannot answer
/// (shared store down) fails closed with `503`.
pub async fn admission_limit(
    State(limit): State<RouteLimit>,
    request: Request,
    next: Next,
) -> Response {
    let ip = extract_client_ip(request.headers(), request.extensions().get(), &limit.trusted);
    let key = format!("{}:{ip}", limit.class);

    match limit.gate.admit(&key).await {
        Ok(Admission::Allowed) => next.run(request).await,
        Ok(Admission::Denied { retry_after }) => {
            AdmissionMetrics::record_rate_limited(limit.class);
            tracing::debug!(class = limit.class, key = %key, "Request rate limited");
            AppError::too_many_requests(retry_after).into_response()
        }
        Err(e) => {
            tracing::error!(class = limit.class, error = %e, "Admission gate unavailable, rejecting");
            AppError::from(e).into_response()
        }
    }
}
