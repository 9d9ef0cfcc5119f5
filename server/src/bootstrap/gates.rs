//! Admission gate construction for each route class.

use crate::config::RateLimitConfig;
use crate::server::RouteGates;
use flashsale_core::admission::AdmissionGate;
use flashsale_redis::RedisSlidingWindow;
use flashsale_runtime::KeyedTokenBucket;
use flashsale_web::TrustedProxies;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;

/// In-process token buckets, one per route class.
///
/// The buckets are returned alongside the gates so their janitors can be
/// started with the rest of the background tasks.
#[must_use]
pub fn local_gates(config: &RateLimitConfig) -> (RouteGates, Vec<KeyedTokenBucket>) {
    let idle_ttl = Duration::from_secs(config.idle_ttl_secs);
    let general = KeyedTokenBucket::new("general", config.general.token_bucket(idle_ttl));
    let login = KeyedTokenBucket::new("login", config.login.token_bucket(idle_ttl));
    let seckill = KeyedTokenBucket::new("seckill", config.seckill.token_bucket(idle_ttl));

    let gates = RouteGates {
        general: Arc::new(general.clone()),
        login: Arc::new(login.clone()),
        seckill: Arc::new(seckill.clone()),
        trusted: TrustedProxies::new(config.trusted_proxies.iter().copied()),
    };
    (gates, vec![general, login, seckill])
}

/// Redis sliding windows shared by every instance.
#[must_use]
pub fn distributed_gates(
    conn: &ConnectionManager,
    config: &RateLimitConfig,
    timeout: Duration,
) -> RouteGates {
    let window = |limit: &crate::config::RouteLimitConfig| -> Arc<dyn AdmissionGate> {
        Arc::new(RedisSlidingWindow::new(
            conn.clone(),
            limit.burst,
            limit.window(),
            timeout,
        ))
    };

    RouteGates {
        general: window(&config.general),
        login: window(&config.login),
        seckill: window(&config.seckill),
        trusted: TrustedProxies::new(config.trusted_proxies.iter().copied()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::{AdmissionMode, RouteLimitConfig};
    use flashsale_core::admission::Admission;

    fn limits(burst: u32) -> RouteLimitConfig {
        RouteLimitConfig {
            rate: 1.0,
            burst,
            window_secs: 1,
        }
    }

    #[tokio::test]
    async fn local_gates_are_independent_per_class() {
        let config = RateLimitConfig {
            mode: AdmissionMode::Local,
            general: limits(5),
            login: limits(1),
            seckill: limits(2),
            idle_ttl_secs: 600,
            janitor_interval_secs: 60,
            trusted_proxies: vec!["10.0.0.2".parse().unwrap()],
        };
        let (gates, buckets) = local_gates(&config);
        assert_eq!(buckets.len(), 3);

        assert_eq!(gates.seckill.admit("seckill:1.2.3.4").await.unwrap(), Admission::Allowed);
        assert_eq!(gates.seckill.admit("seckill:1.2.3.4").await.unwrap(), Admission::Allowed);
        assert!(matches!(
            gates.seckill.admit("seckill:1.2.3.4").await.unwrap(),
            Admission::Denied { .. }
        ));

        assert_eq!(gates.general.admit("general:1.2.3.4").await.unwrap(), Admission::Allowed);
        assert!(gates.trusted.contains(&"10.0.0.2".parse().unwrap()));
    }
}
