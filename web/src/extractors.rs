//! Custom Axum extractors.
//!
//! - `CorrelationId`: the request's correlation id, as set by the middleware
//!   or taken from `X-Correlation-ID`
//! - `ClientIp`: client address from the connection, or from forwarding
//!   headers when the connection comes from a trusted proxy
//!
//! # Examples
//!
//! ```ignore
//! use flashsale_web::extractors::{ClientIp, CorrelationId};
//!
//! async fn handler(correlation_id: CorrelationId, client_ip: ClientIp) -> String {
//!     format!("{} from {}", correlation_id.0, client_ip.0)
//! }
//! ```

use crate::middleware::CORRELATION_ID_HEADER;
use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, request::Parts},
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use uuid::Uuid;

/// Correlation ID for request tracing.
///
/// Prefers the id the correlation middleware stored in the request
/// extensions, then the `X-Correlation-ID` header, and generates a new
/// UUID v4 otherwise.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let correlation_id = parts
            .extensions
            .get::<Uuid>()
            .copied()
            .or_else(|| {
                parts
                    .headers
                    .get(CORRELATION_ID_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| Uuid::parse_str(s).ok())
            })
            .unwrap_or_else(Uuid::new_v4);

        Ok(Self(correlation_id))
    }
}

/// Reverse proxies allowed to report the client address.
///
/// Forwarding headers are only read when the connected peer is one of these.
/// Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxies(Arc<[IpAddr]>);

impl TrustedProxies {
    /// Trust exactly `proxies`.
    #[must_use]
    pub fn new(proxies: impl IntoIterator<Item = IpAddr>) -> Self {
        Self(proxies.into_iter().collect())
    }

    /// Whether `ip` is a trusted proxy.
    #[must_use]
    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.0.contains(ip)
    }
}

/// Client IP address.
///
/// The connected peer, unless the peer is a [`TrustedProxies`] entry found
/// in the request extensions (add it with `axum::Extension`). Then:
///
/// 1. The right-most `X-Forwarded-For` hop that is not a trusted proxy
/// 2. `X-Real-IP`
/// 3. The peer itself
///
/// Without connect info the peer is taken to be `127.0.0.1`.
#[derive(Debug, Clone, Copy)]
pub struct ClientIp(pub IpAddr);

#[async_trait]
impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let trusted = parts.extensions.get::<TrustedProxies>().cloned().unwrap_or_default();
        let ip = extract_client_ip(&parts.headers, parts.extensions.get(), &trusted);

        Ok(Self(ip))
    }
}

/// Resolve the client address for a request.
pub(crate) fn extract_client_ip(
    headers: &HeaderMap,
    connect_info: Option<&ConnectInfo<SocketAddr>>,
    trusted: &TrustedProxies,
) -> IpAddr {
    let peer = connect_info.map_or(IpAddr::V4(Ipv4Addr::LOCALHOST), |ConnectInfo(addr)| addr.ip());
    if !trusted.contains(&peer) {
        return peer;
    }

    let forwarded = headers
        .get_all("X-Forwarded-For")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|hop| hop.trim().parse::<IpAddr>().ok())
        .collect::<Vec<_>>();

    let real_ip = || {
        headers
            .get("X-Real-IP")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
    };

    forwarded
        .into_iter()
        .rev()
        .find(|hop| !trusted.contains(hop))
        .or_else(real_ip)
        .unwrap_or(peer)
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[tokio::test]
    async fn test_correlation_id_from_header() {
        let uuid = Uuid::new_v4();
        let req = Request::builder()
            .header(CORRELATION_ID_HEADER, uuid.to_string())
            .body(())
            .expect("Valid request");

        let (mut parts, _) = req.into_parts();
        let Ok(correlation_id) = CorrelationId::from_request_parts(&mut parts, &()).await;

        assert_eq!(correlation_id.0, uuid);
    }

    #[tokio::test]
    async fn correlation_id_prefers_extension() {
        let from_middleware = Uuid::new_v4();
        let req = Request::builder()
            .header(CORRELATION_ID_HEADER, Uuid::new_v4().to_string())
            .body(())
            .expect("Valid request");

        let (mut parts, _) = req.into_parts();
        parts.extensions.insert(from_middleware);
        let Ok(correlation_id) = CorrelationId::from_request_parts(&mut parts, &()).await;

        assert_eq!(correlation_id.0, from_middleware);
    }

    fn peer(ip: &str) -> ConnectInfo<SocketAddr> {
        ConnectInfo(SocketAddr::new(ip.parse().expect("Valid address"), 40_000))
    }

    fn forwarded(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("X-Forwarded-For", value.parse().expect("Valid header"));
        headers
    }

    #[test]
    fn untrusted_peer_cannot_claim_another_address() {
        let trusted = TrustedProxies::new(["10.0.0.2".parse().expect("Valid address")]);
        let headers = forwarded("203.0.113.1");

        let ip = extract_client_ip(&headers, Some(&peer("198.51.100.7")), &trusted);

        assert_eq!(ip.to_string(), "198.51.100.7");
    }

    #[test]
    fn trusted_proxy_reports_right_most_untrusted_hop() {
        let trusted = TrustedProxies::new([
            "10.0.0.2".parse().expect("Valid address"),
            "10.0.0.3".parse().expect("Valid address"),
        ]);
        // Client-supplied left entry, then the real client, then an inner proxy
        let headers = forwarded("1.2.3.4, 203.0.113.1, 10.0.0.3");

        let ip = extract_client_ip(&headers, Some(&peer("10.0.0.2")), &trusted);

        assert_eq!(ip.to_string(), "203.0.113.1");
    }

    #[test]
    fn trusted_proxy_without_hops_falls_back_to_real_ip_then_peer() {
        let trusted = TrustedProxies::new(["10.0.0.2".parse().expect("Valid address")]);
        let mut headers = HeaderMap::new();
        headers.insert("X-Real-IP", "198.51.100.42".parse().expect("Valid header"));

        let ip = extract_client_ip(&headers, Some(&peer("10.0.0.2")), &trusted);
        assert_eq!(ip.to_string(), "198.51.100.42");

        let ip = extract_client_ip(&HeaderMap::new(), Some(&peer("10.0.0.2")), &trusted);
        assert_eq!(ip.to_string(), "10.0.0.2");
    }

    #[tokio::test]
    async fn client_ip_extractor_ignores_headers_by_default() {
        let req = Request::builder()
            .header("X-Forwarded-For", "203.0.113.1")
            .body(())
            .expect("Valid request");

        let (mut parts, _) = req.into_parts();
        parts.extensions.insert(peer("192.0.2.7"));
        let Ok(client_ip) = ClientIp::from_request_parts(&mut parts, &()).await;

        assert_eq!(client_ip.0.to_string(), "192.0.2.7");
    }

    #[tokio::test]
    async fn client_ip_extractor_uses_trusted_proxies_extension() {
        let req = Request::builder()
            .header("X-Forwarded-For", "203.0.113.1")
            .body(())
            .expect("Valid request");

        let (mut parts, _) = req.into_parts();
        parts.extensions.insert(peer("10.0.0.2"));
        parts
            .extensions
            .insert(TrustedProxies::new(["10.0.0.2".parse().expect("Valid address")]));
        let Ok(client_ip) = ClientIp::from_request_parts(&mut parts, &()).await;

        assert_eq!(client_ip.0.to_string(), "203.0.113.1");
    }

    #[test]
    fn missing_connect_info_is_loopback() {
        let ip = extract_client_ip(&forwarded("203.0.113.1"), None, &TrustedProxies::default());
        assert_eq!(ip.to_string(), "127.0.0.1");
    }
}
