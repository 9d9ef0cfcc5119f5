//! HTTP surface over in-memory collaborators.

#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use flashsale_core::{Product, ProductId};
use flashsale_server::api::{AdminSecret, USER_ID_HEADER};
use flashsale_server::pipeline::SeckillPipeline;
use flashsale_server::server::{AppState, DependencyProbe, RepositoryProbe, RouteGates, build_router};
use flashsale_testing::{InMemoryFlashStore, InMemoryIntentBus, InMemoryOrderRepository, ScriptedGate};
use flashsale_web::TrustedProxies;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const ADMIN: &str = "admin-secret";

struct App {
    router: Router,
    store: InMemoryFlashStore,
    bus: InMemoryIntentBus,
}

fn app() -> App {
    let orders = InMemoryOrderRepository::new().with_product(Product {
        id: ProductId::new(1),
        name: "Phone".to_string(),
        price_cents: 49_900,
        stock: 3,
    });
    app_with(
        ScriptedGate::allow(),
        Arc::new(RepositoryProbe(Arc::new(orders.clone()))),
        orders,
    )
}

fn app_with(
    seckill_gate: ScriptedGate,
    probe: Arc<dyn DependencyProbe>,
    orders: InMemoryOrderRepository,
) -> App {
    let store = InMemoryFlashStore::new();
    let bus = InMemoryIntentBus::new();
    let pipeline = SeckillPipeline::builder()
        .ledger(Arc::new(store.clone()))
        .dedup(Arc::new(store.clone()))
        .bus(Arc::new(bus.clone()))
        .repository(Arc::new(orders))
        .build()
        .unwrap();

    let gates = RouteGates {
        general: Arc::new(ScriptedGate::allow()),
        login: Arc::new(ScriptedGate::allow()),
        seckill: Arc::new(seckill_gate),
        trusted: TrustedProxies::default(),
    };
    let state = AppState::new(Arc::new(pipeline), AdminSecret::new(ADMIN)).with_probe(probe);

    App {
        router: build_router(state, &gates),
        store,
        bus,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn buy(user: &str, product_id: i64) -> Request<Body> {
    Request::post("/seckill")
        .header(USER_ID_HEADER, user)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "product_id": product_id }).to_string()))
        .unwrap()
}

fn init(token: Option<&str>, body: &Value) -> Request<Body> {
    let mut request = Request::post("/seckill/init").header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    request.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn purchase_is_accepted_with_order_preview() {
    let app = app();
    let (status, _) = send(&app.router, init(Some(ADMIN), &json!({ "product_id": 1 }))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app.router, buy("7", 1)).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["product_id"], 1);
    assert_eq!(body["product_name"], "Phone");
    assert_eq!(body["price"], 49_900);
    assert_eq!(body["quantity"], 1);
    assert_eq!(
        body["request_id"].as_str().unwrap(),
        app.bus.published()[0].request_id.to_string()
    );
    assert_eq!(app.store.stock(ProductId::new(1)), Some(2));
}

#[tokio::test]
async fn second_purchase_by_same_buyer_conflicts() {
    let app = app();
    send(&app.router, init(Some(ADMIN), &json!({ "product_id": 1 }))).await;
    send(&app.router, buy("7", 1)).await;

    let (status, body) = send(&app.router, buy("7", 1)).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "ALREADY_PARTICIPATED");
}

#[tokio::test]
async fn sold_out_and_not_open() {
    let app = app();
    let (status, body) = send(&app.router, buy("1", 1)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "SALE_NOT_OPEN");

    send(&app.router, init(Some(ADMIN), &json!({ "product_id": 1, "stock": 1 }))).await;
    assert_eq!(send(&app.router, buy("1", 1)).await.0, StatusCode::ACCEPTED);

    let (status, body) = send(&app.router, buy("2", 1)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "SOLD_OUT");
}

#[tokio::test]
async fn purchase_without_identity_is_unauthorized() {
    let app = app();
    let request = Request::post("/seckill")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"product_id":1}"#))
        .unwrap();

    assert_eq!(send(&app.router, request).await.0, StatusCode::UNAUTHORIZED);
    assert!(app.bus.published().is_empty());
}

#[tokio::test]
async fn throttled_purchase_gets_retry_after() {
    let gate = ScriptedGate::deny(Duration::from_millis(1_500));
    let orders = InMemoryOrderRepository::new();
    let app = app_with(gate.clone(), Arc::new(RepositoryProbe(Arc::new(orders.clone()))), orders);

    let response = app.router.oneshot(buy("7", 1)).await.unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()[header::RETRY_AFTER], "2");
    assert!(gate.seen()[0].starts_with("seckill:"));
    assert!(app.bus.published().is_empty());
}

#[tokio::test]
async fn admin_endpoints_require_the_token() {
    let app = app();

    let (status, _) = send(&app.router, init(None, &json!({ "product_id": 1 }))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app.router, init(Some("guess"), &json!({ "product_id": 1 }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&app.router, init(Some(ADMIN), &json!({ "product_id": 1, "stock": 2 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stock"], 2);

    let stock = Request::get("/seckill/1/stock")
        .header(header::AUTHORIZATION, format!("Bearer {ADMIN}"))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app.router, stock).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stock"], 2);
}

#[tokio::test]
async fn init_for_unknown_product_is_not_found() {
    let app = app();

    let (status, _) = send(&app.router, init(Some(ADMIN), &json!({ "product_id": 99 }))).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

struct DownProbe;

#[async_trait]
impl DependencyProbe for DownProbe {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn check(&self) -> Result<(), String> {
        Err("connection refused".to_string())
    }
}

#[tokio::test]
async fn readiness_reflects_dependencies() {
    let ready = || Request::get("/ready").body(Body::empty()).unwrap();

    let (status, body) = send(&app().router, ready()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let down = app_with(ScriptedGate::allow(), Arc::new(DownProbe), InMemoryOrderRepository::new());
    let (status, body) = send(&down.router, ready()).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["checks"][0]["component"], "redis");
    assert_eq!(body["checks"][0]["status"], "unhealthy");
}

#[tokio::test]
async fn liveness_and_metrics_without_recorder() {
    let app = app();

    let response = app
        .router
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .router
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
